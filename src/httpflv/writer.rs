//! FLV byte-stream writer
//!
//! Serializes a channel's packets as the canonical FLV byte stream: the
//! file header, a zero previous-tag-size, then one tag per packet. The
//! destination is abstract (HTTP body, WebSocket, file), so the HTTP-FLV
//! surface, the WebSocket surface and the recorder share this writer.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::amf::{reform, Reform};
use crate::error::{Error, Result};
use crate::protocol::constants::msg;
use crate::registry::packet::{Packet, PacketKind, StreamConsumer, StreamInfo};
use crate::registry::queue::PacketQueue;
use crate::registry::rwbase::RwBase;

/// FLV file header: "FLV", version 1, audio+video, offset 9
pub const FLV_HEADER: [u8; 9] = [0x46, 0x4C, 0x56, 0x01, 0x05, 0x00, 0x00, 0x00, 0x09];

const TAG_HEADER_LEN: usize = 11;

/// Destination for FLV bytes
#[async_trait]
pub trait FlvSink: Send {
    async fn send(&mut self, bytes: Bytes) -> Result<()>;

    /// Flush/terminate the destination (close frames, fsync)
    async fn finish(&mut self) {}
}

/// Build one FLV tag: header, payload, previous-tag-size
pub fn flv_tag(type_id: u8, timestamp: u32, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(TAG_HEADER_LEN + data.len() + 4);
    buf.put_u8(type_id);
    buf.put_u8((data.len() >> 16) as u8);
    buf.put_u8((data.len() >> 8) as u8);
    buf.put_u8(data.len() as u8);
    buf.put_u8((timestamp >> 16) as u8);
    buf.put_u8((timestamp >> 8) as u8);
    buf.put_u8(timestamp as u8);
    buf.put_u8((timestamp >> 24) as u8);
    buf.put_slice(&[0, 0, 0]); // stream id
    buf.put_slice(data);
    buf.put_u32((TAG_HEADER_LEN + data.len()) as u32);
    buf.freeze()
}

/// The FLV preamble every stream starts with
pub fn flv_preamble() -> Bytes {
    let mut buf = BytesMut::with_capacity(FLV_HEADER.len() + 4);
    buf.put_slice(&FLV_HEADER);
    buf.put_u32(0);
    buf.freeze()
}

/// Consumer that feeds an [`FlvSink`] through a bounded queue
pub struct FlvWriter {
    info: StreamInfo,
    base: Arc<RwBase>,
    queue: Arc<PacketQueue>,
}

impl FlvWriter {
    pub fn spawn<K>(info: StreamInfo, mut sink: K) -> Arc<Self>
    where
        K: FlvSink + 'static,
    {
        let writer = Arc::new(Self {
            info,
            base: Arc::new(RwBase::default()),
            queue: Arc::new(PacketQueue::new()),
        });

        let queue = writer.queue.clone();
        let base = writer.base.clone();
        let info = writer.info.clone();
        tokio::spawn(async move {
            if sink.send(flv_preamble()).await.is_err() {
                queue.close();
                return;
            }
            while let Some(packet) = queue.pop().await {
                base.set_pre_time();
                match encode_packet(&base, packet) {
                    Ok(bytes) => {
                        if let Err(e) = sink.send(bytes).await {
                            debug!(writer = %info, error = %e, "flv sink failed");
                            queue.close();
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(writer = %info, error = %e, "flv encode failed");
                    }
                }
            }
            sink.finish().await;
            debug!(writer = %info, "flv writer stopped");
        });

        writer
    }
}

fn encode_packet(base: &RwBase, packet: Packet) -> Result<Bytes> {
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
    Ok(flv_tag(type_id, timestamp, &data))
}

impl StreamConsumer for FlvWriter {
    fn write_packet(&self, packet: Packet) -> Result<()> {
        self.queue.push(packet)
    }

    fn close(&self, reason: &str) {
        debug!(writer = %self.info, reason, "flv writer closed");
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

/// Sink over an in-process byte channel (the HTTP-FLV response body)
pub struct ChannelSink {
    pub tx: tokio::sync::mpsc::Sender<Bytes>,
}

#[async_trait]
impl FlvSink for ChannelSink {
    async fn send(&mut self, bytes: Bytes) -> Result<()> {
        self.tx.send(bytes).await.map_err(|_| Error::Closed)
    }
}
