//! Per-channel packet cache
//!
//! Late joiners need the metadata, both sequence headers and a decodable
//! run of frames. The cache retains those and replays them in canonical
//! order: metadata, video sequence header, audio sequence header, then the
//! retained GOPs oldest first.

use std::collections::VecDeque;

use crate::error::ChannelError;
use crate::registry::packet::{Packet, StreamConsumer};

/// Per-GOP packet bound; one runaway GOP must not hold the channel hostage
pub const MAX_GOP_PACKETS: usize = 1024;

/// One group of pictures: a non-sequence keyframe and everything until the
/// next one (audio included, so late joiners get sound immediately)
#[derive(Debug, Default)]
struct Gop {
    packets: Vec<Packet>,
}

impl Gop {
    fn push(&mut self, packet: Packet) -> Result<(), ChannelError> {
        if self.packets.len() >= MAX_GOP_PACKETS {
            return Err(ChannelError::GopTooLarge);
        }
        self.packets.push(packet);
        Ok(())
    }
}

/// Ring of the `count` most recent GOPs
#[derive(Debug)]
pub struct GopRing {
    started: bool,
    count: usize,
    gops: VecDeque<Gop>,
}

impl GopRing {
    pub fn new(count: usize) -> Self {
        Self {
            started: false,
            count: count.max(1),
            gops: VecDeque::new(),
        }
    }

    /// Write a media packet. Packets before the first keyframe are
    /// discarded. A keyframe starts a new GOP, evicting the oldest when
    /// the ring is full. An oversized GOP is abandoned: caching stops
    /// until the next keyframe and the caller is told.
    pub fn write(&mut self, packet: &Packet) -> Result<(), ChannelError> {
        let starts_new = packet.is_media_keyframe();
        if starts_new {
            if self.gops.len() == self.count {
                self.gops.pop_front();
            }
            self.gops.push_back(Gop::default());
            self.started = true;
        }
        if !self.started {
            return Ok(());
        }
        let current = self.gops.back_mut().expect("started implies a gop");
        if let Err(e) = current.push(packet.clone()) {
            self.gops.pop_back();
            self.started = false;
            return Err(e);
        }
        Ok(())
    }

    /// Replay retained GOPs oldest-first
    pub fn send(&self, consumer: &dyn StreamConsumer) -> crate::error::Result<()> {
        for gop in &self.gops {
            for packet in &gop.packets {
                consumer.write_packet(packet.clone())?;
            }
        }
        Ok(())
    }

    pub fn packet_count(&self) -> usize {
        self.gops.iter().map(|g| g.packets.len()).sum()
    }

    pub fn gop_count(&self) -> usize {
        self.gops.len()
    }
}

/// The whole per-channel cache
#[derive(Debug)]
pub struct PacketCache {
    metadata: Option<Packet>,
    video_seq: Option<Packet>,
    audio_seq: Option<Packet>,
    gops: GopRing,
}

impl PacketCache {
    pub fn new(gop_num: usize) -> Self {
        Self {
            metadata: None,
            video_seq: None,
            audio_seq: None,
            gops: GopRing::new(gop_num),
        }
    }

    /// Record one packet. Metadata and sequence headers overwrite their
    /// slot; ordinary media goes to the GOP ring.
    pub fn write(&mut self, packet: &Packet) -> Result<(), ChannelError> {
        if packet.is_metadata() {
            self.metadata = Some(packet.clone());
            return Ok(());
        }
        if packet.is_sequence_header() {
            if packet.is_video() {
                self.video_seq = Some(packet.clone());
            } else {
                self.audio_seq = Some(packet.clone());
            }
            return Ok(());
        }
        self.gops.write(packet)
    }

    /// Replay to a fresh consumer: metadata, video seq, audio seq, GOPs.
    pub fn send(&self, consumer: &dyn StreamConsumer) -> crate::error::Result<()> {
        if let Some(p) = &self.metadata {
            consumer.write_packet(p.clone())?;
        }
        if let Some(p) = &self.video_seq {
            consumer.write_packet(p.clone())?;
        }
        if let Some(p) = &self.audio_seq {
            consumer.write_packet(p.clone())?;
        }
        self.gops.send(consumer)
    }

    pub fn gop_packet_count(&self) -> usize {
        self.gops.packet_count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;

    use super::*;
    use crate::media::flv::parse_header;
    use crate::registry::packet::{PacketKind, StreamInfo};
    use crate::registry::rwbase::RwBase;

    /// Consumer that records everything written to it
    struct Recorder {
        info: StreamInfo,
        base: Arc<RwBase>,
        pub packets: Mutex<Vec<Packet>>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                info: StreamInfo::new("live/test", ""),
                base: Arc::new(RwBase::default()),
                packets: Mutex::new(Vec::new()),
            }
        }
    }

    impl StreamConsumer for Recorder {
        fn write_packet(&self, packet: Packet) -> crate::error::Result<()> {
            self.packets.lock().unwrap().push(packet);
            Ok(())
        }
        fn close(&self, _reason: &str) {}
        fn info(&self) -> StreamInfo {
            self.info.clone()
        }
        fn alive(&self) -> bool {
            true
        }
        fn base(&self) -> Arc<RwBase> {
            self.base.clone()
        }
    }

    fn video(ts: u32, bytes: &'static [u8]) -> Packet {
        let (header, _) = parse_header(bytes, true).unwrap();
        Packet::video(ts, Bytes::from_static(bytes), header.as_video().copied().unwrap())
    }

    fn audio(ts: u32, bytes: &'static [u8]) -> Packet {
        let (header, _) = parse_header(bytes, false).unwrap();
        Packet::audio(ts, Bytes::from_static(bytes), header.as_audio().copied().unwrap())
    }

    const KEY: &[u8] = &[0x17, 0x01, 0, 0, 0];
    const INTER: &[u8] = &[0x27, 0x01, 0, 0, 0];
    const VSEQ: &[u8] = &[0x17, 0x00, 0, 0, 0];
    const ASEQ: &[u8] = &[0xAF, 0x00, 0x12, 0x10];
    const ARAW: &[u8] = &[0xAF, 0x01, 0x21];

    #[test]
    fn test_pre_keyframe_packets_discarded() {
        let mut cache = PacketCache::new(1);
        cache.write(&video(0, INTER)).unwrap();
        cache.write(&audio(5, ARAW)).unwrap();
        assert_eq!(cache.gop_packet_count(), 0);

        cache.write(&video(10, KEY)).unwrap();
        cache.write(&audio(15, ARAW)).unwrap();
        assert_eq!(cache.gop_packet_count(), 2);
    }

    #[test]
    fn test_send_order() {
        let mut cache = PacketCache::new(1);
        cache.write(&Packet::metadata(0, Bytes::from_static(b"meta"))).unwrap();
        cache.write(&video(0, VSEQ)).unwrap();
        cache.write(&audio(0, ASEQ)).unwrap();
        cache.write(&video(10, KEY)).unwrap();
        cache.write(&video(43, INTER)).unwrap();

        let recorder = Recorder::new();
        cache.send(&recorder).unwrap();

        let got = recorder.packets.lock().unwrap();
        assert_eq!(got.len(), 5);
        assert_eq!(got[0].kind, PacketKind::Metadata);
        assert!(got[1].video_header().unwrap().is_sequence_header());
        assert!(got[2].audio_header().unwrap().is_sequence_header());
        assert!(got[3].is_media_keyframe());
        assert_eq!(got[4].timestamp, 43);
    }

    #[test]
    fn test_sequence_headers_overwrite() {
        let mut cache = PacketCache::new(1);
        cache.write(&video(0, VSEQ)).unwrap();
        cache.write(&video(100, VSEQ)).unwrap();

        let recorder = Recorder::new();
        cache.send(&recorder).unwrap();
        let got = recorder.packets.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].timestamp, 100);
    }

    #[test]
    fn test_ring_keeps_most_recent_gops() {
        let mut cache = PacketCache::new(2);
        // three GOPs of two packets each into a ring of two
        for base_ts in [0u32, 100, 200] {
            cache.write(&video(base_ts, KEY)).unwrap();
            cache.write(&video(base_ts + 40, INTER)).unwrap();
        }

        let recorder = Recorder::new();
        cache.send(&recorder).unwrap();
        let got = recorder.packets.lock().unwrap();
        let timestamps: Vec<u32> = got.iter().map(|p| p.timestamp).collect();
        assert_eq!(timestamps, vec![100, 140, 200, 240]);
    }

    #[test]
    fn test_new_keyframe_starts_new_gop() {
        let mut ring = GopRing::new(1);
        ring.write(&video(0, KEY)).unwrap();
        ring.write(&video(40, INTER)).unwrap();
        assert_eq!(ring.packet_count(), 2);

        ring.write(&video(80, KEY)).unwrap();
        assert_eq!(ring.gop_count(), 1);
        assert_eq!(ring.packet_count(), 1);
    }

    #[test]
    fn test_gop_too_large() {
        let mut ring = GopRing::new(1);
        ring.write(&video(0, KEY)).unwrap();
        for i in 1..MAX_GOP_PACKETS {
            ring.write(&video(i as u32, INTER)).unwrap();
        }
        let err = ring.write(&video(9999, INTER)).unwrap_err();
        assert_eq!(err, ChannelError::GopTooLarge);

        // caching resumes at the next keyframe
        ring.write(&video(10000, INTER)).unwrap();
        assert_eq!(ring.packet_count(), 0);
        ring.write(&video(10040, KEY)).unwrap();
        assert_eq!(ring.packet_count(), 1);
    }

    #[test]
    fn test_audio_rides_in_gop() {
        let mut ring = GopRing::new(1);
        ring.write(&video(0, KEY)).unwrap();
        ring.write(&audio(10, ARAW)).unwrap();
        ring.write(&video(40, INTER)).unwrap();
        assert_eq!(ring.packet_count(), 3);
    }
}
