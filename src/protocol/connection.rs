//! Message-level RTMP connection
//!
//! Wraps a stream with chunk assembly/framing, inline protocol-control
//! handling and the acknowledgement discipline. Generic over the
//! transport so tests run against in-memory duplex pipes.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::protocol::chunk::{self, BufferArena, ChunkAssembly, ChunkMessage, ChunkReader};
use crate::protocol::constants::{
    csid, msg, user_control, ACK_COUNTER_RESET, DEFAULT_CHUNK_SIZE, DEFAULT_WINDOW_ACK_SIZE,
};

/// An RTMP connection after the handshake
#[derive(Debug)]
pub struct Connection<S> {
    reader: ChunkReader<tokio::io::ReadHalf<S>>,
    writer: tokio::io::WriteHalf<S>,
    out: BytesMut,
    assemblies: HashMap<u32, ChunkAssembly>,
    arena: BufferArena,

    /// Chunk size for outbound messages
    pub chunk_size: u32,
    /// Peer's chunk size for inbound messages
    pub remote_chunk_size: u32,
    /// Window we advertise
    pub window_ack_size: u32,
    /// Window the peer advertises
    pub remote_window_ack_size: u32,

    received: u32,
    ack_received: u32,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub fn new(stream: S) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: ChunkReader::new(read_half),
            writer: write_half,
            out: BytesMut::with_capacity(8 * 1024),
            assemblies: HashMap::new(),
            arena: BufferArena::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            remote_chunk_size: DEFAULT_CHUNK_SIZE,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            remote_window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            received: 0,
            ack_received: 0,
        }
    }

    /// Read the next non-control message.
    ///
    /// Protocol control (SetChunkSize, WindowAckSize, Ack, Abort) is
    /// applied inline and never surfaced; acknowledgements are emitted
    /// as the ack window fills.
    pub async fn read_message(&mut self) -> Result<ChunkMessage> {
        loop {
            let message = chunk::read_message(
                &mut self.reader,
                &mut self.assemblies,
                self.remote_chunk_size,
                &mut self.arena,
            )
            .await?;

            self.ack(message.data.len() as u32).await?;

            match message.type_id {
                msg::SET_CHUNK_SIZE if message.data.len() >= 4 => {
                    self.remote_chunk_size =
                        u32::from_be_bytes([message.data[0], message.data[1], message.data[2], message.data[3]]);
                }
                msg::WINDOW_ACK_SIZE if message.data.len() >= 4 => {
                    self.remote_window_ack_size =
                        u32::from_be_bytes([message.data[0], message.data[1], message.data[2], message.data[3]]);
                }
                msg::ACK | msg::SET_PEER_BANDWIDTH | msg::USER_CONTROL => {
                    // noted only
                }
                msg::ABORT if message.data.len() >= 4 => {
                    let aborted =
                        u32::from_be_bytes([message.data[0], message.data[1], message.data[2], message.data[3]]);
                    self.assemblies.remove(&aborted);
                }
                _ => return Ok(message),
            }
        }
    }

    /// Queue a message; [`flush`] pushes it to the wire.
    ///
    /// Sending SetChunkSize switches our outbound chunk size as well.
    ///
    /// [`flush`]: Connection::flush
    pub fn write_message(&mut self, message: &ChunkMessage) {
        if message.type_id == msg::SET_CHUNK_SIZE && message.data.len() >= 4 {
            self.chunk_size =
                u32::from_be_bytes([message.data[0], message.data[1], message.data[2], message.data[3]]);
        }
        chunk::write_message(&mut self.out, message, self.chunk_size);
    }

    pub async fn flush(&mut self) -> Result<()> {
        if !self.out.is_empty() {
            let buf = self.out.split();
            self.writer.write_all(&buf).await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// Queue and flush in one step
    pub async fn send(&mut self, message: &ChunkMessage) -> Result<()> {
        self.write_message(message);
        self.flush().await
    }

    async fn ack(&mut self, size: u32) -> Result<()> {
        self.received = self.received.wrapping_add(size);
        self.ack_received = self.ack_received.wrapping_add(size);
        if self.received >= ACK_COUNTER_RESET {
            self.received = 0;
        }
        if self.ack_received >= self.remote_window_ack_size {
            let ack = control_message(msg::ACK, self.ack_received);
            self.send(&ack).await?;
            self.ack_received = 0;
        }
        Ok(())
    }

    pub async fn write_set_chunk_size(&mut self, size: u32) -> Result<()> {
        self.send(&control_message(msg::SET_CHUNK_SIZE, size)).await
    }

    pub async fn write_window_ack_size(&mut self, size: u32) -> Result<()> {
        self.send(&control_message(msg::WINDOW_ACK_SIZE, size)).await
    }

    /// SetPeerBandwidth with limit type 2 (dynamic)
    pub async fn write_set_peer_bandwidth(&mut self, size: u32) -> Result<()> {
        let mut data = BytesMut::with_capacity(5);
        data.put_u32(size);
        data.put_u8(2);
        let message = ChunkMessage::new(csid::CONTROL, 0, msg::SET_PEER_BANDWIDTH, 0, data.freeze());
        self.send(&message).await
    }

    pub async fn write_stream_begin(&mut self, stream_id: u32) -> Result<()> {
        self.send(&user_control_message(user_control::STREAM_BEGIN, stream_id))
            .await
    }

    pub async fn write_stream_is_recorded(&mut self, stream_id: u32) -> Result<()> {
        self.send(&user_control_message(
            user_control::STREAM_IS_RECORDED,
            stream_id,
        ))
        .await
    }

    /// Shut down the transport
    pub async fn close(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

fn control_message(type_id: u8, value: u32) -> ChunkMessage {
    let mut data = BytesMut::with_capacity(4);
    data.put_u32(value);
    ChunkMessage::new(csid::CONTROL, 0, type_id, 0, data.freeze())
}

fn user_control_message(event: u16, stream_id: u32) -> ChunkMessage {
    let mut data = BytesMut::with_capacity(6);
    data.put_u16(event);
    data.put_u32(stream_id);
    ChunkMessage::new(csid::CONTROL, 0, msg::USER_CONTROL, 1, data.freeze())
}

/// Build a media/script message bound for stream 1
pub fn media_message(type_id: u8, timestamp: u32, data: Bytes) -> ChunkMessage {
    ChunkMessage::new(csid::VIDEO, timestamp, type_id, 1, data)
}
