//! Client-side RTMP session
//!
//! The originator path relays use: handshake, `connect`, `createStream`,
//! then `publish` or `play`, validating each response. Mismatched
//! responses are protocol errors and close the connection.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use url::Url;

use crate::amf::{reform, AmfValue, Reform};
use crate::amf_object;
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::chunk::ChunkMessage;
use crate::protocol::connection::Connection;
use crate::protocol::constants::{cmd, csid, msg};
use crate::protocol::handshake::{handshake_client, HANDSHAKE_TIMEOUT};
use crate::registry::packet::{Packet, PacketKind};
use crate::session::server::{command_message, decode_command};

const DEFAULT_RTMP_PORT: u16 = 1935;

/// What the client session does once established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    Publish,
    Play,
}

/// Pieces of an `rtmp://` URL the session needs
#[derive(Debug, Clone)]
pub struct RtmpTarget {
    pub host: String,
    pub port: u16,
    pub app: String,
    pub stream: String,
    pub tc_url: String,
}

impl RtmpTarget {
    /// Parse `rtmp://host[:port]/app/stream[?query]`
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|_| Error::Protocol(ProtocolError::UnexpectedResponse(raw.to_string())))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Protocol(ProtocolError::UnexpectedResponse(raw.to_string())))?
            .to_string();
        let port = url.port().unwrap_or(DEFAULT_RTMP_PORT);

        let path = url.path().trim_start_matches('/');
        let (app, stream) = path
            .split_once('/')
            .ok_or_else(|| Error::Protocol(ProtocolError::UnexpectedResponse(raw.to_string())))?;
        if app.is_empty() || stream.is_empty() {
            return Err(ProtocolError::UnexpectedResponse(raw.to_string()).into());
        }

        let stream = match url.query() {
            Some(query) => format!("{}?{}", stream, query),
            None => stream.to_string(),
        };

        Ok(Self {
            tc_url: format!("rtmp://{}/{}", url.host_str().unwrap_or(&host), app),
            host,
            port,
            app: app.to_string(),
            stream,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Channel key (`app/stream`, query stripped)
    pub fn key(&self) -> String {
        let name = self.stream.split('?').next().unwrap_or(&self.stream);
        format!("{}/{}", self.app, name)
    }
}

/// An established client session
#[derive(Debug)]
pub struct RtmpConnector<S> {
    conn: Connection<S>,
    target: RtmpTarget,
    transaction_id: f64,
    stream_id: u32,
}

impl RtmpConnector<TcpStream> {
    /// Dial, handshake and run the command sequence for `mode`.
    pub async fn dial(raw_url: &str, mode: ClientMode) -> Result<Self> {
        let target = RtmpTarget::parse(raw_url)?;
        let mut stream = TcpStream::connect(target.addr()).await?;
        stream.set_nodelay(true)?;
        handshake_client(&mut stream, HANDSHAKE_TIMEOUT).await?;
        Self::establish(Connection::new(stream), target, mode).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> RtmpConnector<S> {
    /// Command sequence over an already-handshaken connection.
    pub async fn establish(
        conn: Connection<S>,
        target: RtmpTarget,
        mode: ClientMode,
    ) -> Result<Self> {
        let mut this = Self {
            conn,
            target,
            transaction_id: 1.0,
            stream_id: 0,
        };
        this.send_connect().await?;
        this.send_create_stream().await?;
        match mode {
            ClientMode::Publish => this.send_publish().await?,
            ClientMode::Play => this.send_play().await?,
        }
        Ok(this)
    }

    pub fn target(&self) -> &RtmpTarget {
        &self.target
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    async fn send_connect(&mut self) -> Result<()> {
        let command = amf_object! {
            "app" => self.target.app.as_str(),
            "type" => "nonprivate",
            "flashVer" => "FMS.3.1",
            "tcUrl" => self.target.tc_url.as_str(),
        };
        self.write_command(&[
            AmfValue::String(cmd::CONNECT.into()),
            AmfValue::Number(self.transaction_id),
            command,
        ])
        .await?;

        let values = self.read_command_response().await?;
        expect_result(&values, self.transaction_id)?;
        match values.get(3).and_then(|v| v.get_string("code")) {
            Some(cmd::CONNECT_SUCCESS) => Ok(()),
            Some(other) => Err(ProtocolError::BadStatus(other.to_string()).into()),
            None => Err(ProtocolError::UnexpectedResponse("connect".into()).into()),
        }
    }

    async fn send_create_stream(&mut self) -> Result<()> {
        self.transaction_id += 1.0;
        self.write_command(&[
            AmfValue::String(cmd::CREATE_STREAM.into()),
            AmfValue::Number(self.transaction_id),
            AmfValue::Null,
        ])
        .await?;

        let values = self.read_command_response().await?;
        expect_result(&values, self.transaction_id)?;
        self.stream_id = values
            .get(3)
            .and_then(|v| v.as_number())
            .ok_or_else(|| Error::Protocol(ProtocolError::UnexpectedResponse("createStream".into())))?
            as u32;
        Ok(())
    }

    async fn send_publish(&mut self) -> Result<()> {
        self.transaction_id += 1.0;
        self.write_command(&[
            AmfValue::String(cmd::PUBLISH.into()),
            AmfValue::Number(self.transaction_id),
            AmfValue::Null,
            AmfValue::String(self.target.stream.clone()),
            AmfValue::String("live".into()),
        ])
        .await?;
        self.expect_status(cmd::PUBLISH_START).await
    }

    async fn send_play(&mut self) -> Result<()> {
        self.write_command(&[
            AmfValue::String(cmd::PLAY.into()),
            AmfValue::Number(0.0),
            AmfValue::Null,
            AmfValue::String(self.target.stream.clone()),
        ])
        .await?;
        self.expect_status(cmd::PLAY_START).await
    }

    /// Read onStatus messages until the wanted code arrives; error-level
    /// statuses and `_error` results fail the session.
    async fn expect_status(&mut self, wanted: &str) -> Result<()> {
        loop {
            let values = self.read_command_response().await?;
            match values.first().and_then(|v| v.as_str()) {
                Some(cmd::ON_STATUS) => {
                    let info = values.get(3);
                    if info.and_then(|v| v.get_string("level")) == Some("error") {
                        let code = info
                            .and_then(|v| v.get_string("code"))
                            .unwrap_or("unknown")
                            .to_string();
                        return Err(ProtocolError::BadStatus(code).into());
                    }
                    if info.and_then(|v| v.get_string("code")) == Some(wanted) {
                        return Ok(());
                    }
                    // interim statuses (Play.Reset) keep going
                }
                Some(cmd::ERROR) => {
                    return Err(ProtocolError::UnexpectedResponse(cmd::ERROR.into()).into());
                }
                _ => {}
            }
        }
    }

    async fn write_command(&mut self, values: &[AmfValue]) -> Result<()> {
        let message = command_message(csid::COMMAND, self.stream_id, values)?;
        self.conn.send(&message).await
    }

    async fn read_command_response(&mut self) -> Result<Vec<AmfValue>> {
        loop {
            let message = self.conn.read_message().await?;
            if message.is_command() {
                return decode_command(&message);
            }
        }
    }

    /// Next message from the peer (pull relays read media this way).
    pub async fn read_message(&mut self) -> Result<ChunkMessage> {
        self.conn.read_message().await
    }

    /// Send one packet toward the peer (push relays).
    ///
    /// Metadata gets the `@setDataFrame` wrapper the receiving server
    /// expects from a publisher.
    pub async fn write_packet(&mut self, packet: Packet) -> Result<()> {
        let (type_id, data) = match packet.kind {
            PacketKind::Video => (msg::VIDEO, packet.data),
            PacketKind::Audio => (msg::AUDIO, packet.data),
            PacketKind::Metadata => (
                msg::DATA_AMF0,
                reform(packet.data, Reform::Add).map_err(Error::from)?,
            ),
        };
        let message = ChunkMessage::new(
            csid::VIDEO,
            packet.timestamp,
            type_id,
            self.stream_id.max(1),
            data,
        );
        self.conn.send(&message).await
    }

    pub async fn close(&mut self) {
        self.conn.close().await;
    }
}

fn expect_result(values: &[AmfValue], transaction_id: f64) -> Result<()> {
    match values.first().and_then(|v| v.as_str()) {
        Some(cmd::RESULT) => {}
        Some(other) => return Err(ProtocolError::UnexpectedResponse(other.to_string()).into()),
        None => return Err(ProtocolError::UnexpectedResponse("empty".into()).into()),
    }
    match values.get(1).and_then(|v| v.as_number()) {
        Some(txn) if txn == transaction_id => Ok(()),
        Some(txn) => Err(ProtocolError::BadTransactionId(txn).into()),
        None => Err(ProtocolError::UnexpectedResponse("missing transaction".into()).into()),
    }
}
