//! RTMP media endpoints
//!
//! After the command phase, a connection becomes either a producer
//! (publisher: chunk messages in, packets out) or a consumer (player:
//! packets in, chunk messages out through a bounded queue and drain task).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::amf::{reform, Reform};
use crate::error::{Error, Result};
use crate::media::flv::{parse_header, TagHeader};
use crate::protocol::chunk::ChunkMessage;
use crate::protocol::connection::Connection;
use crate::protocol::constants::{csid, msg};
use crate::registry::packet::{Packet, PacketKind, StreamConsumer, StreamInfo, StreamProducer};
use crate::registry::queue::PacketQueue;
use crate::registry::rwbase::RwBase;

/// Publisher side: turns inbound media messages into packets
pub struct RtmpProducer<S> {
    conn: Connection<S>,
    info: StreamInfo,
    base: Arc<RwBase>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> RtmpProducer<S> {
    pub fn new(conn: Connection<S>, info: StreamInfo) -> Self {
        Self {
            conn,
            info,
            base: Arc::new(RwBase::default()),
        }
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send> StreamProducer for RtmpProducer<S> {
    async fn read_packet(&mut self) -> Result<Packet> {
        self.base.set_pre_time();
        loop {
            let message = self.conn.read_message().await?;
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
                    return Ok(Packet::metadata(message.timestamp, message.data));
                }
                other => {
                    // commands after publish (deleteStream etc.) are not media
                    debug!(type_id = other, "ignoring non-media message from publisher");
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

/// Subscriber side: bounded queue plus a drain task writing FLV-typed
/// chunk messages.
pub struct RtmpConsumer {
    info: StreamInfo,
    base: Arc<RwBase>,
    queue: Arc<PacketQueue>,
}

impl RtmpConsumer {
    /// Spawn the drain task and return the consumer handle.
    pub fn spawn<S>(conn: Connection<S>, info: StreamInfo) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let consumer = Arc::new(Self {
            info,
            base: Arc::new(RwBase::default()),
            queue: Arc::new(PacketQueue::new()),
        });

        let queue = consumer.queue.clone();
        let base = consumer.base.clone();
        let info = consumer.info.clone();
        tokio::spawn(async move {
            let mut conn = conn;
            while let Some(packet) = queue.pop().await {
                if let Err(e) = send_packet(&mut conn, &base, packet).await {
                    debug!(writer = %info, error = %e, "subscriber write failed");
                    queue.close();
                    break;
                }
            }
            conn.close().await;
            debug!(writer = %info, "subscriber sender stopped");
        });

        consumer
    }
}

async fn send_packet<S>(
    conn: &mut Connection<S>,
    base: &RwBase,
    packet: Packet,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    base.set_pre_time();
    let timestamp = packet.timestamp.wrapping_add(base.base_timestamp());
    base.rec_timestamp(timestamp, packet.kind);

    let (type_id, data) = match packet.kind {
        PacketKind::Video => (msg::VIDEO, packet.data),
        PacketKind::Audio => (msg::AUDIO, packet.data),
        PacketKind::Metadata => (
            msg::DATA_AMF0,
            reform(packet.data, Reform::Del).map_err(Error::from)?,
        ),
    };
    let message = ChunkMessage::new(csid::VIDEO, timestamp, type_id, 1, data);
    conn.send(&message).await
}

impl StreamConsumer for RtmpConsumer {
    fn write_packet(&self, packet: Packet) -> Result<()> {
        self.queue.push(packet)
    }

    fn close(&self, reason: &str) {
        debug!(writer = %self.info, reason, "subscriber closed");
        self.queue.close();
    }

    fn info(&self) -> StreamInfo {
        self.info.clone()
    }

    fn alive(&self) -> bool {
        !self.queue.is_closed() && self.base.alive()
    }

    fn base(&self) -> Arc<RwBase> {
        self.base.clone()
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use super::*;
    use crate::amf::{Amf0Encoder, AmfValue};
    use crate::protocol::connection::media_message;

    fn wrapped_metadata() -> Bytes {
        let enc = Amf0Encoder::new();
        let mut buf = BytesMut::new();
        enc.encode(&mut buf, &AmfValue::String("@setDataFrame".into()))
            .unwrap();
        enc.encode(&mut buf, &AmfValue::String("onMetaData".into()))
            .unwrap();
        enc.encode(&mut buf, &crate::amf_object! { "width" => 640.0 })
            .unwrap();
        buf.freeze()
    }

    #[tokio::test]
    async fn test_producer_parses_media() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let mut client = Connection::new(client_io);
        let mut producer = RtmpProducer::new(
            Connection::new(server_io),
            StreamInfo::new("live/s", "rtmp://x/live/s"),
        );

        client
            .send(&media_message(
                msg::VIDEO,
                40,
                Bytes::from_static(&[0x17, 0x01, 0, 0, 0, 0xAB]),
            ))
            .await
            .unwrap();
        client
            .send(&media_message(
                msg::AUDIO,
                42,
                Bytes::from_static(&[0xAF, 0x01, 0xCD]),
            ))
            .await
            .unwrap();

        let video = producer.read_packet().await.unwrap();
        assert!(video.is_video());
        assert_eq!(video.timestamp, 40);
        assert!(video.is_media_keyframe());

        let audio = producer.read_packet().await.unwrap();
        assert!(audio.is_audio());
        assert_eq!(audio.timestamp, 42);
    }

    #[tokio::test]
    async fn test_producer_skips_commands() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let mut client = Connection::new(client_io);
        let mut producer = RtmpProducer::new(
            Connection::new(server_io),
            StreamInfo::new("live/s", ""),
        );

        let cmd = crate::session::server::command_message(
            csid::COMMAND,
            0,
            &[AmfValue::String("deleteStream".into()), AmfValue::Number(5.0)],
        )
        .unwrap();
        client.send(&cmd).await.unwrap();
        client
            .send(&media_message(
                msg::AUDIO,
                7,
                Bytes::from_static(&[0xAF, 0x01, 0x00]),
            ))
            .await
            .unwrap();

        let packet = producer.read_packet().await.unwrap();
        assert!(packet.is_audio());
    }

    #[tokio::test]
    async fn test_consumer_writes_media_with_base_offset() {
        let (client_io, server_io) = tokio::io::duplex(256 * 1024);
        let mut client = Connection::new(client_io);

        let info = StreamInfo::new("live/s", "");
        let consumer = RtmpConsumer::spawn(Connection::new(server_io), info);
        consumer.base().rec_timestamp(500, PacketKind::Video);
        consumer.base().calc_base_timestamp();

        let (header, _) = parse_header(&[0x17, 0x01, 0, 0, 0], true).unwrap();
        let packet = Packet::video(
            100,
            Bytes::from_static(&[0x17, 0x01, 0, 0, 0]),
            *header.as_video().unwrap(),
        );
        consumer.write_packet(packet).unwrap();

        let message = client.read_message().await.unwrap();
        assert_eq!(message.type_id, msg::VIDEO);
        assert_eq!(message.timestamp, 600); // 100 + base 500
        assert_eq!(message.stream_id, 1);
    }

    #[tokio::test]
    async fn test_consumer_strips_set_data_frame() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let mut client = Connection::new(client_io);

        let consumer = RtmpConsumer::spawn(
            Connection::new(server_io),
            StreamInfo::new("live/s", ""),
        );
        consumer
            .write_packet(Packet::metadata(0, wrapped_metadata()))
            .unwrap();

        let message = client.read_message().await.unwrap();
        assert_eq!(message.type_id, msg::DATA_AMF0);
        let values = crate::session::server::decode_command(&message).unwrap();
        assert_eq!(values[0].as_str(), Some("onMetaData"));
    }

    #[tokio::test]
    async fn test_consumer_close_ends_drain() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let consumer = RtmpConsumer::spawn(
            Connection::new(server_io),
            StreamInfo::new("live/s", ""),
        );
        consumer.close("done");
        assert!(consumer.write_packet(Packet::metadata(0, Bytes::new())).is_err());
        drop(client_io);
    }
}
