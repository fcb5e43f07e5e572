//! The FLV→TS segmenter
//!
//! A consumer that turns a channel's packets into TS segments: demux the
//! FLV codec header, run the codec parsers (Annex-B / ADTS), cut on video
//! keyframes once the segment passes the minimum duration, and publish
//! finished segments into the channel's [`TsCache`].
//!
//! Audio PTS alignment: each AAC frame should advance the 90 kHz clock by
//! `90000 * 1024 / sample_rate`. Measured timestamps within 2 ms of the
//! expectation snap to it; larger jumps re-base the estimate.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::error::{Error, MediaError, Result};
use crate::hls::cache::{TsCache, TsItem};
use crate::hls::ts::{TsFrame, TsMuxer};
use crate::media::codec::CodecParser;
use crate::media::flv::{demux, Demuxed, SoundFormat, TagHeader};
use crate::registry::packet::{Packet, StreamConsumer, StreamInfo};
use crate::registry::queue::PacketQueue;
use crate::registry::rwbase::RwBase;

/// Minimum segment duration before a keyframe cut
pub const SEGMENT_MIN_MS: i64 = 3000;

/// Segmenter queue depth
const HLS_QUEUE: usize = 512;

/// Audio frames batched into one PES
const AUDIO_BATCH: u8 = 6;

const VIDEO_HZ: u64 = 90_000;
const AAC_SAMPLE_LEN: u64 = 1024;
const H264_HZ: u64 = 90;

/// ±2 ms tolerance for the audio cadence
const SYNC_MS: u64 = 2;

/// Per-segment timing
#[derive(Debug, Default)]
struct SegmentStatus {
    has_set_first: bool,
    first_timestamp: i64,
    last_timestamp: i64,
}

impl SegmentStatus {
    fn update(&mut self, timestamp: u32) {
        if !self.has_set_first {
            self.has_set_first = true;
            self.first_timestamp = timestamp as i64;
        }
        self.last_timestamp = timestamp as i64;
    }

    fn duration_ms(&self) -> i64 {
        self.last_timestamp - self.first_timestamp
    }

    fn reset(&mut self) {
        self.has_set_first = false;
        self.first_timestamp = 0;
        self.last_timestamp = 0;
    }
}

/// Audio cadence smoother
#[derive(Debug, Default)]
struct PtsAligner {
    frame_num: u64,
    frame_base: u64,
}

impl PtsAligner {
    fn align(&mut self, dts: &mut u64, inc: u64) {
        let estimate = self.frame_base + self.frame_num * inc;
        let delta = estimate.abs_diff(*dts);
        if delta <= SYNC_MS * H264_HZ {
            self.frame_num += 1;
            *dts = estimate;
            return;
        }
        self.frame_num = 1;
        self.frame_base = *dts;
    }
}

/// Accumulates ADTS frames until a batch is muxed as one PES
#[derive(Debug, Default)]
struct AudioBatch {
    num: u8,
    pts: u64,
    buf: BytesMut,
}

impl AudioBatch {
    fn cache(&mut self, data: &[u8], pts: u64) {
        if self.num == 0 {
            self.pts = pts;
            self.buf.clear();
        }
        self.buf.extend_from_slice(data);
        self.num += 1;
    }

    fn take(&mut self) -> (u8, u64, Bytes) {
        let num = self.num;
        self.num = 0;
        (num, self.pts, self.buf.split().freeze())
    }

    fn len(&self) -> u8 {
        self.num
    }
}

/// The HLS consumer attached to a channel
pub struct HlsSegmenter {
    info: StreamInfo,
    base: Arc<RwBase>,
    queue: Arc<PacketQueue>,
    cache: Arc<TsCache>,
}

impl HlsSegmenter {
    /// Spawn the segmenting task; `keep_after_end` leaves segments
    /// queryable after the publisher disconnects.
    pub fn spawn(key: &str, keep_after_end: bool) -> Arc<Self> {
        let segmenter = Arc::new(Self {
            info: StreamInfo::new(key, "").interstitial(),
            base: Arc::new(RwBase::default()),
            queue: Arc::new(PacketQueue::with_capacity(HLS_QUEUE)),
            cache: Arc::new(TsCache::new(key)),
        });

        let queue = segmenter.queue.clone();
        let cache = segmenter.cache.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let mut worker = Worker::new(key.clone(), cache.clone());
            while let Some(packet) = queue.pop().await {
                if let Err(e) = worker.process(&packet) {
                    // dropped packets never stop the segmenter
                    if is_unsupported(&e) {
                        warn!(channel = %key, error = %e, "unsupported codec, packet dropped");
                    } else {
                        debug!(channel = %key, error = %e, "hls packet dropped");
                    }
                }
            }
            if !keep_after_end {
                cache.clear();
            }
            debug!(channel = %key, "hls segmenter stopped");
        });

        segmenter
    }

    /// The segment window this segmenter fills
    pub fn cache(&self) -> Arc<TsCache> {
        self.cache.clone()
    }
}

impl StreamConsumer for HlsSegmenter {
    fn write_packet(&self, packet: Packet) -> Result<()> {
        self.base.set_pre_time();
        self.queue.push(packet)
    }

    fn close(&self, reason: &str) {
        debug!(writer = %self.info, reason, "hls segmenter closed");
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

/// Owned by the segmenting task
struct Worker {
    key: String,
    cache: Arc<TsCache>,
    muxer: TsMuxer,
    parser: CodecParser,
    aligner: PtsAligner,
    audio: AudioBatch,
    status: SegmentStatus,
    scratch: BytesMut,
    segment: BytesMut,
    segment_open: bool,
    seq: u64,
    pts: u64,
    dts: u64,
}

impl Worker {
    fn new(key: String, cache: Arc<TsCache>) -> Self {
        Self {
            key,
            cache,
            muxer: TsMuxer::new(),
            parser: CodecParser::new(),
            aligner: PtsAligner::default(),
            audio: AudioBatch::default(),
            status: SegmentStatus::default(),
            scratch: BytesMut::with_capacity(100 * 1024),
            segment: BytesMut::new(),
            segment_open: false,
            seq: 0,
            pts: 0,
            dts: 0,
        }
    }

    fn process(&mut self, packet: &Packet) -> Result<()> {
        if packet.is_metadata() {
            return Ok(());
        }

        let demuxed = demux(packet.data.clone(), packet.is_video()).map_err(Error::from)?;
        let (header, payload) = match demuxed {
            Demuxed::AvcEndOfSequence => {
                warn!(channel = %self.key, "avc end of sequence, skipping");
                return Ok(());
            }
            Demuxed::Media { header, data } => (header, data),
        };

        // the TS pipeline carries H.264 + AAC only; the PMT advertises AAC,
        // so other audio formats must not reach the mux
        if let TagHeader::Audio(audio) = &header {
            if audio.sound_format != SoundFormat::Aac {
                return Err(MediaError::UnsupportedCodec.into());
            }
        }

        // sequence headers configure the parsers and emit nothing
        if packet.is_sequence_header() {
            self.scratch.clear();
            self.parser
                .parse(&header, &payload, &mut self.scratch)
                .map_err(Error::from)?;
            return Ok(());
        }

        self.scratch.clear();
        self.parser
            .parse(&header, &payload, &mut self.scratch)
            .map_err(Error::from)?;

        let (is_video, is_keyframe, composition_time) = match &header {
            TagHeader::Video(v) => (true, v.is_key_frame(), v.composition_time),
            TagHeader::Audio(_) => (false, false, 0),
        };

        if is_video && is_keyframe {
            self.cut(packet.timestamp);
        }
        if !self.segment_open {
            // nothing decodable until the first keyframe opens a segment
            return Ok(());
        }

        self.status.update(packet.timestamp);
        self.calc_pts_dts(is_video, packet.timestamp, composition_time);
        self.mux(is_video, is_keyframe)
    }

    /// Open the first segment, or finish the current one when a keyframe
    /// lands past the minimum duration.
    fn cut(&mut self, _timestamp: u32) {
        if self.segment_open && self.status.duration_ms() >= SEGMENT_MIN_MS {
            let _ = self.flush_audio();
            self.seq += 1;
            let unix = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let name = format!("/{}/{}.ts", self.key, unix);
            let item = TsItem {
                name,
                seq: self.seq,
                duration_ms: self.status.duration_ms(),
                data: self.segment.split().freeze(),
            };
            debug!(channel = %self.key, seq = item.seq, duration_ms = item.duration_ms, "segment cut");
            self.cache.push(item);
            self.status.reset();
            self.segment_open = false;
        }
        if !self.segment_open {
            self.segment_open = true;
            let pat = self.muxer.pat();
            self.segment.extend_from_slice(&pat);
            let pmt = self.muxer.pmt(SoundFormat::Aac, true);
            self.segment.extend_from_slice(&pmt);
        }
    }

    fn calc_pts_dts(&mut self, is_video: bool, timestamp: u32, composition_time: i32) {
        self.dts = timestamp as u64 * H264_HZ;
        if is_video {
            self.pts = self
                .dts
                .wrapping_add((composition_time as i64 * H264_HZ as i64) as u64);
        } else {
            let sample_rate = self.parser.sample_rate().unwrap_or(44_100) as u64;
            self.aligner
                .align(&mut self.dts, VIDEO_HZ * AAC_SAMPLE_LEN / sample_rate);
            self.pts = self.dts;
        }
    }

    fn mux(&mut self, is_video: bool, is_keyframe: bool) -> Result<()> {
        if is_video {
            let frame = TsFrame {
                is_video: true,
                is_keyframe,
                pts: self.pts,
                dts: self.dts,
                data: &self.scratch,
            };
            self.muxer.mux(&frame, &mut self.segment);
            Ok(())
        } else {
            let scratch = self.scratch.split().freeze();
            self.audio.cache(&scratch, self.pts);
            self.mux_audio(AUDIO_BATCH)
        }
    }

    /// Emit the batched audio once `limit` frames have accumulated.
    fn mux_audio(&mut self, limit: u8) -> Result<()> {
        if self.audio.len() < limit {
            return Ok(());
        }
        let (_num, pts, data) = self.audio.take();
        let frame = TsFrame {
            is_video: false,
            is_keyframe: false,
            pts,
            dts: pts,
            data: &data,
        };
        self.muxer.mux(&frame, &mut self.segment);
        Ok(())
    }

    /// Force out whatever audio is pending (segment cut)
    fn flush_audio(&mut self) -> Result<()> {
        self.mux_audio(1)
    }
}

// rejected codecs surface as MediaError::UnsupportedCodec
fn is_unsupported(e: &Error) -> bool {
    matches!(e, Error::Media(MediaError::UnsupportedCodec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::ts::TS_PACKET_LEN;
    use crate::media::flv::parse_header;
    use crate::registry::packet::Packet;

    fn avcc(nal: &[u8]) -> Vec<u8> {
        let mut v = (nal.len() as u32).to_be_bytes().to_vec();
        v.extend_from_slice(nal);
        v
    }

    fn video_packet(ts: u32, keyframe: bool, body: &[u8]) -> Packet {
        let mut data = vec![if keyframe { 0x17 } else { 0x27 }, 0x01, 0, 0, 0];
        data.extend_from_slice(body);
        let (header, _) = parse_header(&data, true).unwrap();
        Packet::video(ts, Bytes::from(data), *header.as_video().unwrap())
    }

    fn video_seq_packet() -> Packet {
        let mut data = vec![0x17, 0x00, 0, 0, 0];
        data.extend_from_slice(&[
            0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x02, 0x67, 0x64, 0x01, 0x00, 0x02, 0x68,
            0xEE,
        ]);
        let (header, _) = parse_header(&data, true).unwrap();
        Packet::video(0, Bytes::from(data), *header.as_video().unwrap())
    }

    fn audio_seq_packet() -> Packet {
        let data = vec![0xAF, 0x00, 0x12, 0x10];
        let (header, _) = parse_header(&data, false).unwrap();
        Packet::audio(0, Bytes::from(data), *header.as_audio().unwrap())
    }

    fn audio_packet(ts: u32) -> Packet {
        let data = vec![0xAF, 0x01, 0x21, 0x10, 0x04];
        let (header, _) = parse_header(&data, false).unwrap();
        Packet::audio(ts, Bytes::from(data), *header.as_audio().unwrap())
    }

    fn feed_stream(worker: &mut Worker, seconds: u32) {
        worker.process(&video_seq_packet()).unwrap();
        worker.process(&audio_seq_packet()).unwrap();
        // one keyframe per second, audio every 250 ms
        for second in 0..seconds {
            let ts = second * 1000;
            worker
                .process(&video_packet(ts, true, &avcc(&[0x65, 0x88])))
                .unwrap();
            for n in 1..4u32 {
                worker
                    .process(&video_packet(ts + n * 250, false, &avcc(&[0x41, 0x9A])))
                    .unwrap();
                worker.process(&audio_packet(ts + n * 250)).unwrap();
            }
        }
    }

    #[test]
    fn test_segments_cut_on_keyframes() {
        let cache = Arc::new(TsCache::new("live/s"));
        let mut worker = Worker::new("live/s".into(), cache.clone());

        feed_stream(&mut worker, 12);

        // 12 s of stream with 3 s minimum segments: at least two cuts
        // (the synthetic stream cuts within one wall-clock second, so the
        // window may coalesce same-named segments)
        assert!(worker.seq >= 2, "cuts: {}", worker.seq);
        assert!(!cache.is_empty());

        let playlist = cache.m3u8();
        assert!(playlist.contains("#EXTINF"));

        // every retained segment starts with a PAT packet and is whole
        for line in playlist.lines().filter(|l| l.ends_with(".ts")) {
            let item = cache.get(line).unwrap();
            assert_eq!(item.data[0], 0x47);
            assert_eq!(item.data[1] & 0x1F, 0x00); // PID 0: PAT
            assert_eq!(item.data[TS_PACKET_LEN], 0x47);
            assert_eq!(item.data.len() % TS_PACKET_LEN, 0);
            assert!(item.duration_ms >= SEGMENT_MIN_MS);
        }
    }

    #[test]
    fn test_metadata_and_pre_keyframe_dropped() {
        let cache = Arc::new(TsCache::new("live/s"));
        let mut worker = Worker::new("live/s".into(), cache.clone());

        worker
            .process(&Packet::metadata(0, Bytes::from_static(b"meta")))
            .unwrap();
        worker.process(&video_seq_packet()).unwrap();
        // inter frame before any keyframe: no segment opens
        worker
            .process(&video_packet(0, false, &avcc(&[0x41, 0x9A])))
            .unwrap();
        assert!(!worker.segment_open);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unsupported_video_codec_rejected() {
        let cache = Arc::new(TsCache::new("live/s"));
        let mut worker = Worker::new("live/s".into(), cache);

        // VP6 keyframe
        let data = vec![0x14u8, 0x01, 0, 0, 0, 0xAA];
        let (header, _) = parse_header(&data, true).unwrap();
        let packet = Packet::video(0, Bytes::from(data), *header.as_video().unwrap());
        let err = worker.process(&packet).unwrap_err();
        assert!(is_unsupported(&err));
    }

    #[test]
    fn test_unsupported_audio_codec_rejected() {
        let cache = Arc::new(TsCache::new("live/s"));
        let mut worker = Worker::new("live/s".into(), cache.clone());

        worker.process(&video_seq_packet()).unwrap();
        worker
            .process(&video_packet(0, true, &avcc(&[0x65, 0x88])))
            .unwrap();
        let muxed = worker.segment.len();

        // MP3 frame: refused before it can reach the AAC-advertising PMT
        let data = vec![0x2Fu8, 0xFF, 0xFB, 0x10, 0x00];
        let (header, _) = parse_header(&data, false).unwrap();
        let packet = Packet::audio(10, Bytes::from(data), *header.as_audio().unwrap());
        let err = worker.process(&packet).unwrap_err();
        assert!(is_unsupported(&err));

        // nothing was written and the video path is unaffected
        assert_eq!(worker.segment.len(), muxed);
        worker
            .process(&video_packet(40, false, &avcc(&[0x41, 0x9A])))
            .unwrap();
        assert!(worker.segment.len() > muxed);
    }

    #[test]
    fn test_avc_end_of_sequence_skipped() {
        let cache = Arc::new(TsCache::new("live/s"));
        let mut worker = Worker::new("live/s".into(), cache);
        let data = Bytes::from_static(&[0x17, 0x02, 0, 0, 0]);
        let (header, _) = parse_header(&data, true).unwrap();
        let packet = Packet::video(0, data, *header.as_video().unwrap());
        worker.process(&packet).unwrap();
        assert!(!worker.segment_open);
    }

    #[test]
    fn test_audio_batching() {
        let cache = Arc::new(TsCache::new("live/s"));
        let mut worker = Worker::new("live/s".into(), cache);

        worker.process(&video_seq_packet()).unwrap();
        worker.process(&audio_seq_packet()).unwrap();
        worker
            .process(&video_packet(0, true, &avcc(&[0x65, 0x88])))
            .unwrap();

        let before = worker.segment.len();
        // five audio frames: batched, nothing muxed yet
        for n in 0..5u32 {
            worker.process(&audio_packet(n * 23)).unwrap();
        }
        assert_eq!(worker.segment.len(), before);
        assert_eq!(worker.audio.len(), 5);

        // sixth frame flushes the batch
        worker.process(&audio_packet(5 * 23)).unwrap();
        assert!(worker.segment.len() > before);
        assert_eq!(worker.audio.len(), 0);
    }

    #[test]
    fn test_aligner_snaps_within_tolerance() {
        let mut aligner = PtsAligner::default();
        let inc = VIDEO_HZ * AAC_SAMPLE_LEN / 44_100; // ≈2089

        let mut dts = 0u64;
        aligner.align(&mut dts, inc);
        assert_eq!(dts, 0); // first frame matches the zero estimate

        // subsequent frames near the cadence snap exactly onto it
        let mut dts = inc + 50; // within 2 ms (180 ticks)
        aligner.align(&mut dts, inc);
        assert_eq!(dts, inc);

        let mut dts = 2 * inc - 100;
        aligner.align(&mut dts, inc);
        assert_eq!(dts, 2 * inc);

        // a large jump re-bases
        let mut dts = 10 * inc + 5000;
        aligner.align(&mut dts, inc);
        assert_eq!(dts, 10 * inc + 5000);
        let mut dts = 11 * inc + 5000 + 30;
        aligner.align(&mut dts, inc);
        assert_eq!(dts, 11 * inc + 5000);
    }

    #[tokio::test]
    async fn test_segmenter_consumer_lifecycle() {
        let segmenter = HlsSegmenter::spawn("live/s", false);
        assert!(segmenter.alive());

        segmenter.write_packet(video_seq_packet()).unwrap();
        segmenter.close("done");
        assert!(segmenter.write_packet(audio_packet(0)).is_err());
        assert!(!segmenter.alive());
    }
}
