//! Pull client: plays a remote stream and yields its packets
//!
//! Wraps a play-mode [`RtmpConnector`] as a [`StreamProducer`] so the
//! registry treats a pulled stream exactly like a local publisher.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::client::connector::RtmpConnector;
use crate::error::Result;
use crate::media::flv::{parse_header, TagHeader};
use crate::protocol::constants::msg;
use crate::registry::packet::{Packet, StreamInfo, StreamProducer};
use crate::registry::rwbase::RwBase;
use crate::session::server::decode_command;

/// Producer fed by a remote RTMP server
pub struct RtmpPuller<S> {
    connector: RtmpConnector<S>,
    info: StreamInfo,
    base: Arc<RwBase>,
}

impl RtmpPuller<tokio::net::TcpStream> {
    /// Dial a remote stream in play mode; the producer reinjects it under
    /// `local_key`.
    pub async fn dial(url: &str, local_key: &str) -> crate::error::Result<Self> {
        let connector =
            RtmpConnector::dial(url, crate::client::connector::ClientMode::Play).await?;
        Ok(Self::new(connector, local_key))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> RtmpPuller<S> {
    /// Wrap an established play-mode session; packets are reinjected
    /// locally under `local_key`.
    pub fn new(connector: RtmpConnector<S>, local_key: &str) -> Self {
        let url = format!(
            "rtmp://{}/{}",
            connector.target().host,
            connector.target().key()
        );
        Self {
            connector,
            info: StreamInfo::new(local_key, url),
            base: Arc::new(RwBase::default()),
        }
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send> StreamProducer for RtmpPuller<S> {
    async fn read_packet(&mut self) -> Result<Packet> {
        self.base.set_pre_time();
        loop {
            let message = self.connector.read_message().await?;
            match message.type_id {
                msg::AUDIO => {
                    let (header, _) = parse_header(&message.data, false)?;
                    if let TagHeader::Audio(audio) = header {
                        return Ok(Packet::audio(message.timestamp, message.data, audio));
                    }
                }
                msg::VIDEO => {
                    let (header, _) = parse_header(&message.data, true)?;
                    if let TagHeader::Video(video) = header {
                        return Ok(Packet::video(message.timestamp, message.data, video));
                    }
                }
                msg::DATA_AMF0 | msg::DATA_AMF3 => {
                    // forwarded so late joiners of the pulled stream get onMetaData
                    return Ok(Packet::metadata(message.timestamp, message.data));
                }
                msg::COMMAND_AMF0 | msg::COMMAND_AMF3 => {
                    if let Ok(values) = decode_command(&message) {
                        debug!(remote = %self.info.url, ?values, "command from pulled peer");
                    }
                }
                other => {
                    debug!(type_id = other, "ignoring message from pulled peer");
                }
            }
        }
    }

    fn info(&self) -> StreamInfo {
        self.info.clone()
    }

    fn base(&self) -> Arc<RwBase> {
        self.base.clone()
    }
}
