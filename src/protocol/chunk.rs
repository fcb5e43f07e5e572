//! RTMP chunk framing
//!
//! Messages are split into chunks of the negotiated chunk size; concurrent
//! messages interleave on chunk stream ids (CSIDs). Chunk headers compress
//! by format:
//!
//! ```text
//! fmt 0: timestamp(3) length(3) type(1) streamid(4, LE)   full header
//! fmt 1: delta(3)     length(3) type(1)                   same stream
//! fmt 2: delta(3)                                         same stream+type
//! fmt 3:                                                  continuation
//! ```
//!
//! A 3-byte timestamp/delta of 0xFFFFFF escapes to a 4-byte extended word
//! after the message header. Format-3 continuations of an extended-ts
//! message repeat the extended word; it is peeked and consumed only when it
//! matches the message timestamp, since not every encoder repeats it.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, ProtocolError, Result};
use crate::protocol::constants::{csid, msg, ARENA_SIZE};

const EXTENDED_TS_MARKER: u32 = 0xFF_FFFF;

/// An assembled RTMP message
#[derive(Debug, Clone, Default)]
pub struct ChunkMessage {
    pub csid: u32,
    /// Absolute timestamp (deltas already applied)
    pub timestamp: u32,
    pub type_id: u8,
    pub stream_id: u32,
    pub data: Bytes,
}

impl ChunkMessage {
    pub fn new(csid: u32, timestamp: u32, type_id: u8, stream_id: u32, data: Bytes) -> Self {
        Self {
            csid,
            timestamp,
            type_id,
            stream_id,
            data,
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(self.type_id, msg::AUDIO | msg::VIDEO)
    }

    pub fn is_command(&self) -> bool {
        matches!(self.type_id, msg::COMMAND_AMF0 | msg::COMMAND_AMF3)
    }

    pub fn is_data(&self) -> bool {
        matches!(self.type_id, msg::DATA_AMF0 | msg::DATA_AMF3)
    }
}

/// Reassembly buffer arena
///
/// Hands out message buffers carved from a 500 KiB block, replenished when
/// exhausted. Keeps per-message allocations off the hot path.
#[derive(Debug)]
pub struct BufferArena {
    block: BytesMut,
}

impl BufferArena {
    pub fn new() -> Self {
        Self {
            block: BytesMut::with_capacity(ARENA_SIZE),
        }
    }

    /// A zeroed buffer of exactly `size` bytes
    pub fn get(&mut self, size: usize) -> BytesMut {
        if self.block.capacity() - self.block.len() < size {
            self.block = BytesMut::with_capacity(ARENA_SIZE.max(size));
        }
        self.block.resize(size, 0);
        self.block.split_to(size)
    }
}

impl Default for BufferArena {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-CSID reassembly state
#[derive(Debug, Default)]
pub struct ChunkAssembly {
    initialized: bool,
    format: u8,
    timestamp: u32,
    time_delta: u32,
    length: u32,
    type_id: u8,
    stream_id: u32,
    extended: bool,
    data: BytesMut,
    remaining: u32,
}

impl ChunkAssembly {
    fn begin(&mut self, arena: &mut BufferArena) {
        self.remaining = self.length;
        self.data = arena.get(self.length as usize);
    }
}

/// Buffered chunk reader
///
/// Owns a read buffer so extended-timestamp words can be peeked, and
/// counts every byte consumed for the acknowledgement discipline.
#[derive(Debug)]
pub struct ChunkReader<R> {
    inner: R,
    buf: BytesMut,
    /// Total bytes consumed from the wire
    pub bytes_read: u64,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(8 * 1024),
            bytes_read: 0,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    async fn fill(&mut self, n: usize) -> Result<()> {
        while self.buf.len() < n {
            let read = self.inner.read_buf(&mut self.buf).await?;
            if read == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed mid-chunk",
                )));
            }
        }
        Ok(())
    }

    async fn read_u8(&mut self) -> Result<u8> {
        self.fill(1).await?;
        self.bytes_read += 1;
        Ok(self.buf.get_u8())
    }

    async fn read_u24_be(&mut self) -> Result<u32> {
        self.fill(3).await?;
        self.bytes_read += 3;
        let b = [self.buf.get_u8(), self.buf.get_u8(), self.buf.get_u8()];
        Ok(((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32)
    }

    async fn read_u32_be(&mut self) -> Result<u32> {
        self.fill(4).await?;
        self.bytes_read += 4;
        Ok(self.buf.get_u32())
    }

    async fn read_u32_le(&mut self) -> Result<u32> {
        self.fill(4).await?;
        self.bytes_read += 4;
        Ok(self.buf.get_u32_le())
    }

    async fn read_u16_le(&mut self) -> Result<u32> {
        self.fill(2).await?;
        self.bytes_read += 2;
        Ok(self.buf.get_u16_le() as u32)
    }

    async fn peek_u32_be(&mut self) -> Result<u32> {
        self.fill(4).await?;
        Ok(u32::from_be_bytes([
            self.buf[0],
            self.buf[1],
            self.buf[2],
            self.buf[3],
        ]))
    }

    fn discard(&mut self, n: usize) {
        self.bytes_read += n as u64;
        self.buf.advance(n);
    }

    async fn read_exact_into(&mut self, dst: &mut [u8]) -> Result<()> {
        self.fill(dst.len()).await?;
        self.bytes_read += dst.len() as u64;
        self.buf.copy_to_slice(dst);
        Ok(())
    }
}

/// Read chunks until one message completes.
///
/// `assemblies` carries per-CSID state across calls; `chunk_size` is the
/// peer's negotiated chunk size.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut ChunkReader<R>,
    assemblies: &mut HashMap<u32, ChunkAssembly>,
    chunk_size: u32,
    arena: &mut BufferArena,
) -> Result<ChunkMessage> {
    loop {
        let basic = reader.read_u8().await?;
        let format = basic >> 6;
        let csid = match basic & 0x3F {
            0 => reader.read_u8().await? as u32 + 64,
            1 => reader.read_u16_le().await? + 64,
            id => id as u32,
        };

        let cs = assemblies.entry(csid).or_default();
        read_chunk(reader, cs, format, csid, chunk_size, arena).await?;

        if cs.remaining == 0 {
            let data = std::mem::take(&mut cs.data).freeze();
            return Ok(ChunkMessage {
                csid,
                timestamp: cs.timestamp,
                type_id: cs.type_id,
                stream_id: cs.stream_id,
                data,
            });
        }
    }
}

async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut ChunkReader<R>,
    cs: &mut ChunkAssembly,
    format: u8,
    csid: u32,
    chunk_size: u32,
    arena: &mut BufferArena,
) -> Result<()> {
    if cs.remaining != 0 && format != 3 {
        return Err(ProtocolError::BadChunkHeader.into());
    }
    if !cs.initialized && format != 0 {
        return Err(ProtocolError::NoPriorFullHeader(csid).into());
    }

    match format {
        0 => {
            cs.initialized = true;
            cs.format = 0;
            cs.timestamp = reader.read_u24_be().await?;
            cs.length = reader.read_u24_be().await?;
            cs.type_id = reader.read_u8().await?;
            cs.stream_id = reader.read_u32_le().await?;
            if cs.timestamp == EXTENDED_TS_MARKER {
                cs.timestamp = reader.read_u32_be().await?;
                cs.extended = true;
            } else {
                cs.extended = false;
            }
            cs.begin(arena);
        }
        1 => {
            cs.format = 1;
            let mut delta = reader.read_u24_be().await?;
            cs.length = reader.read_u24_be().await?;
            cs.type_id = reader.read_u8().await?;
            if delta == EXTENDED_TS_MARKER {
                delta = reader.read_u32_be().await?;
                cs.extended = true;
            } else {
                cs.extended = false;
            }
            cs.time_delta = delta;
            cs.timestamp = cs.timestamp.wrapping_add(delta);
            cs.begin(arena);
        }
        2 => {
            cs.format = 2;
            let mut delta = reader.read_u24_be().await?;
            if delta == EXTENDED_TS_MARKER {
                delta = reader.read_u32_be().await?;
                cs.extended = true;
            } else {
                cs.extended = false;
            }
            cs.time_delta = delta;
            cs.timestamp = cs.timestamp.wrapping_add(delta);
            cs.begin(arena);
        }
        3 => {
            if cs.remaining == 0 {
                // a new message reusing the previous header
                match cs.format {
                    0 => {
                        if cs.extended {
                            cs.timestamp = reader.read_u32_be().await?;
                        }
                    }
                    _ => {
                        let delta = if cs.extended {
                            reader.read_u32_be().await?
                        } else {
                            cs.time_delta
                        };
                        cs.timestamp = cs.timestamp.wrapping_add(delta);
                    }
                }
                cs.begin(arena);
            } else if cs.extended {
                // continuation: the extended word may or may not repeat
                let peeked = reader.peek_u32_be().await?;
                if peeked == cs.timestamp {
                    reader.discard(4);
                }
            }
        }
        _ => unreachable!("format is two bits"),
    }

    let take = cs.remaining.min(chunk_size) as usize;
    if take > 0 {
        let filled = cs.length as usize - cs.remaining as usize;
        reader
            .read_exact_into(&mut cs.data[filled..filled + take])
            .await?;
        cs.remaining -= take as u32;
    }
    Ok(())
}

/// Encode one message as chunks into `out`.
///
/// Media and script messages are pinned to their conventional CSIDs. The
/// first chunk carries a full format-0 header, continuations format 3;
/// extended timestamps repeat in every continuation header.
pub fn write_message(out: &mut BytesMut, message: &ChunkMessage, chunk_size: u32) {
    let mut csid = message.csid;
    match message.type_id {
        msg::AUDIO => csid = csid::AUDIO,
        msg::VIDEO | msg::DATA_AMF0 | msg::DATA_AMF3 => csid = csid::VIDEO,
        _ => {}
    }

    let data = &message.data;
    let mut written = 0usize;
    let mut first = true;
    while written < data.len() || first {
        let format = if first { 0 } else { 3 };
        write_header(out, format, csid, message);
        let take = (data.len() - written).min(chunk_size as usize);
        out.put_slice(&data[written..written + take]);
        written += take;
        first = false;
    }
}

fn write_header(out: &mut BytesMut, format: u8, csid: u32, message: &ChunkMessage) {
    write_basic_header(out, format, csid);

    let extended = message.timestamp >= EXTENDED_TS_MARKER;
    if format == 0 {
        let ts_field = if extended {
            EXTENDED_TS_MARKER
        } else {
            message.timestamp
        };
        put_u24_be(out, ts_field);
        put_u24_be(out, message.data.len() as u32);
        out.put_u8(message.type_id);
        out.put_u32_le(message.stream_id);
    }
    if extended {
        out.put_u32(message.timestamp);
    }
}

fn write_basic_header(out: &mut BytesMut, format: u8, csid: u32) {
    let fmt_bits = (format as u32) << 6;
    match csid {
        0..=63 => out.put_u8((fmt_bits | csid) as u8),
        64..=319 => {
            out.put_u8(fmt_bits as u8);
            out.put_u8((csid - 64) as u8);
        }
        _ => {
            out.put_u8((fmt_bits | 1) as u8);
            out.put_u16_le((csid - 64) as u16);
        }
    }
}

fn put_u24_be(out: &mut BytesMut, val: u32) {
    out.put_u8((val >> 16) as u8);
    out.put_u8((val >> 8) as u8);
    out.put_u8(val as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(
        wire: &[u8],
        chunk_size: u32,
        count: usize,
    ) -> Vec<ChunkMessage> {
        let mut reader = ChunkReader::new(wire);
        let mut assemblies = HashMap::new();
        let mut arena = BufferArena::new();
        let mut out = Vec::new();
        for _ in 0..count {
            out.push(
                read_message(&mut reader, &mut assemblies, chunk_size, &mut arena)
                    .await
                    .unwrap(),
            );
        }
        out
    }

    fn message(csid: u32, timestamp: u32, type_id: u8, stream_id: u32, len: usize) -> ChunkMessage {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        ChunkMessage::new(csid, timestamp, type_id, stream_id, Bytes::from(data))
    }

    #[tokio::test]
    async fn test_round_trip_across_chunk_sizes() {
        for chunk_size in [128u32, 300, 1024, 4096, 65536] {
            let original = message(3, 12345, msg::COMMAND_AMF0, 1, 5000);
            let mut wire = BytesMut::new();
            write_message(&mut wire, &original, chunk_size);

            let got = read_all(&wire, chunk_size, 1).await.remove(0);
            assert_eq!(got.timestamp, original.timestamp, "cs={}", chunk_size);
            assert_eq!(got.type_id, original.type_id);
            assert_eq!(got.stream_id, original.stream_id);
            assert_eq!(got.data, original.data);
        }
    }

    #[tokio::test]
    async fn test_csid_boundary_encodings() {
        // (csid, expected basic-header length)
        let cases = [(2u32, 1usize), (63, 1), (64, 2), (319, 2), (320, 3), (65599, 3)];
        for (csid, header_len) in cases {
            let original = message(csid, 0, msg::COMMAND_AMF0, 0, 10);
            let mut wire = BytesMut::new();
            write_message(&mut wire, &original, 128);

            // basic header length check: fmt0 message header is 11 bytes
            assert_eq!(wire.len(), header_len + 11 + 10, "csid={}", csid);

            let got = read_all(&wire, 128, 1).await.remove(0);
            assert_eq!(got.csid, csid);
            assert_eq!(got.data, original.data);
        }
    }

    #[tokio::test]
    async fn test_extended_timestamp_boundaries() {
        for timestamp in [0xFF_FFFEu32, 0xFF_FFFF, 0x0100_0000, u32::MAX] {
            let original = message(3, timestamp, msg::VIDEO, 1, 700);
            let mut wire = BytesMut::new();
            write_message(&mut wire, &original, 128);

            let got = read_all(&wire, 128, 1).await.remove(0);
            assert_eq!(got.timestamp, timestamp, "ts={:#x}", timestamp);
            assert_eq!(got.data, original.data);
        }
    }

    #[tokio::test]
    async fn test_extended_ts_repeats_in_continuations() {
        let original = message(3, 0x0100_0000, msg::VIDEO, 1, 300);
        let mut wire = BytesMut::new();
        write_message(&mut wire, &original, 128);

        // fmt0 header: 1 + 11 + 4(ext); then two continuations each 1 + 4(ext)
        let expected = 1 + 11 + 4 + 128 + (1 + 4) + 128 + (1 + 4) + 44;
        assert_eq!(wire.len(), expected);

        let got = read_all(&wire, 128, 1).await.remove(0);
        assert_eq!(got.data, original.data);
    }

    #[tokio::test]
    async fn test_continuation_without_repeated_ext_ts() {
        // hand-build: fmt0 with extended ts, continuation WITHOUT the
        // repeated word; the reader must not eat payload as a timestamp
        let timestamp: u32 = 0x0100_0000;
        let payload: Vec<u8> = (0..200).map(|i| (i % 97) as u8).collect();
        let mut wire = BytesMut::new();
        wire.put_u8(0x03); // fmt0 csid3
        put_u24_be(&mut wire, EXTENDED_TS_MARKER);
        put_u24_be(&mut wire, payload.len() as u32);
        wire.put_u8(msg::VIDEO);
        wire.put_u32_le(1);
        wire.put_u32(timestamp);
        wire.put_slice(&payload[..128]);
        wire.put_u8(0xC3); // fmt3 csid3, no repeated ext word
        wire.put_slice(&payload[128..]);

        let got = read_all(&wire, 128, 1).await.remove(0);
        assert_eq!(got.timestamp, timestamp);
        assert_eq!(&got.data[..], &payload[..]);
    }

    #[tokio::test]
    async fn test_interleaved_csids() {
        // audio and video messages interleaved chunk by chunk
        let audio = message(4, 10, msg::AUDIO, 1, 200);
        let video = message(6, 20, msg::VIDEO, 1, 200);

        let mut a_wire = BytesMut::new();
        write_message(&mut a_wire, &audio, 128);
        let mut v_wire = BytesMut::new();
        write_message(&mut v_wire, &video, 128);

        // audio chunk 1 | video chunk 1 | audio chunk 2 | video chunk 2
        // chunk1 = 12 + 128 bytes, chunk2 = 1 + 72 bytes
        let mut wire = BytesMut::new();
        wire.put_slice(&a_wire[..140]);
        wire.put_slice(&v_wire[..140]);
        wire.put_slice(&a_wire[140..]);
        wire.put_slice(&v_wire[140..]);

        let got = read_all(&wire, 128, 2).await;
        assert_eq!(got[0].type_id, msg::AUDIO);
        assert_eq!(got[0].data, audio.data);
        assert_eq!(got[1].type_id, msg::VIDEO);
        assert_eq!(got[1].data, video.data);
    }

    #[tokio::test]
    async fn test_format3_reuses_prior_header() {
        // two messages on one csid, the second sent as bare fmt3
        let first = message(3, 100, msg::AUDIO, 1, 50);
        let mut wire = BytesMut::new();
        write_message(&mut wire, &first, 128);
        wire.put_u8(0xC4); // fmt3 csid4 -- write pinned audio to csid 4
        wire.put_slice(&first.data);

        let mut reader = ChunkReader::new(&wire[..]);
        let mut assemblies = HashMap::new();
        let mut arena = BufferArena::new();
        let one = read_message(&mut reader, &mut assemblies, 128, &mut arena)
            .await
            .unwrap();
        let two = read_message(&mut reader, &mut assemblies, 128, &mut arena)
            .await
            .unwrap();
        assert_eq!(one.timestamp, 100);
        // fmt0 carried an absolute timestamp; a fresh fmt3 message repeats it
        assert_eq!(two.timestamp, 100);
        assert_eq!(two.data, first.data);
    }

    #[tokio::test]
    async fn test_delta_formats_accumulate() {
        // fmt0 ts=1000, then fmt1 delta=40, then fmt2 delta=40
        let payload = Bytes::from_static(&[0xAA; 10]);
        let mut wire = BytesMut::new();

        wire.put_u8(0x04); // fmt0 csid4
        put_u24_be(&mut wire, 1000);
        put_u24_be(&mut wire, 10);
        wire.put_u8(msg::AUDIO);
        wire.put_u32_le(1);
        wire.put_slice(&payload);

        wire.put_u8(0x44); // fmt1 csid4
        put_u24_be(&mut wire, 40);
        put_u24_be(&mut wire, 10);
        wire.put_u8(msg::AUDIO);
        wire.put_slice(&payload);

        wire.put_u8(0x84); // fmt2 csid4
        put_u24_be(&mut wire, 40);
        wire.put_slice(&payload);

        let got = read_all(&wire, 128, 3).await;
        assert_eq!(got[0].timestamp, 1000);
        assert_eq!(got[1].timestamp, 1040);
        assert_eq!(got[2].timestamp, 1080);
    }

    #[tokio::test]
    async fn test_continuation_with_no_prior_header_errors() {
        let wire = [0xC3u8]; // fmt3 csid3 out of nowhere
        let mut reader = ChunkReader::new(&wire[..]);
        let mut assemblies = HashMap::new();
        let mut arena = BufferArena::new();
        let err = read_message(&mut reader, &mut assemblies, 128, &mut arena)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::NoPriorFullHeader(3))
        ));
    }

    #[test]
    fn test_arena_replenishes() {
        let mut arena = BufferArena::new();
        let a = arena.get(ARENA_SIZE - 10);
        let b = arena.get(64); // forces a fresh block
        assert_eq!(a.len(), ARENA_SIZE - 10);
        assert_eq!(b.len(), 64);
    }

    #[test]
    fn test_arena_oversize_request() {
        let mut arena = BufferArena::new();
        let big = arena.get(ARENA_SIZE * 2);
        assert_eq!(big.len(), ARENA_SIZE * 2);
    }

    #[tokio::test]
    async fn test_zero_length_message() {
        let original = message(3, 5, msg::COMMAND_AMF0, 0, 0);
        let mut wire = BytesMut::new();
        write_message(&mut wire, &original, 128);
        let got = read_all(&wire, 128, 1).await.remove(0);
        assert!(got.data.is_empty());
        assert_eq!(got.timestamp, 5);
    }
}
