//! The packet type and the endpoint capabilities
//!
//! A [`Packet`] is the unit the core moves end-to-end: one FLV tag body
//! with its parsed header and timestamp. Payload bytes are reference
//! counted, so handing a packet to N consumers shares one allocation.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::Result;
use crate::media::flv::{AudioTagHeader, TagHeader, VideoTagHeader};
use crate::registry::rwbase::RwBase;

/// What a packet carries; exactly one kind per packet by construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Audio,
    Video,
    Metadata,
}

/// One media or metadata payload flowing through a channel
#[derive(Debug, Clone)]
pub struct Packet {
    pub kind: PacketKind,
    /// Milliseconds, relative to the publisher's epoch
    pub timestamp: u32,
    /// FLV tag body (codec header included)
    pub data: Bytes,
    /// Parsed codec header; `None` for metadata
    pub header: Option<TagHeader>,
}

impl Packet {
    pub fn audio(timestamp: u32, data: Bytes, header: AudioTagHeader) -> Self {
        Self {
            kind: PacketKind::Audio,
            timestamp,
            data,
            header: Some(TagHeader::Audio(header)),
        }
    }

    pub fn video(timestamp: u32, data: Bytes, header: VideoTagHeader) -> Self {
        Self {
            kind: PacketKind::Video,
            timestamp,
            data,
            header: Some(TagHeader::Video(header)),
        }
    }

    pub fn metadata(timestamp: u32, data: Bytes) -> Self {
        Self {
            kind: PacketKind::Metadata,
            timestamp,
            data,
            header: None,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.kind == PacketKind::Audio
    }

    pub fn is_video(&self) -> bool {
        self.kind == PacketKind::Video
    }

    pub fn is_metadata(&self) -> bool {
        self.kind == PacketKind::Metadata
    }

    pub fn audio_header(&self) -> Option<&AudioTagHeader> {
        self.header.as_ref()?.as_audio()
    }

    pub fn video_header(&self) -> Option<&VideoTagHeader> {
        self.header.as_ref()?.as_video()
    }

    /// Video keyframe that is not a sequence header (starts a GOP)
    pub fn is_media_keyframe(&self) -> bool {
        self.video_header()
            .map(|h| h.is_key_frame() && !h.is_sequence_header())
            .unwrap_or(false)
    }

    /// Video or audio sequence header
    pub fn is_sequence_header(&self) -> bool {
        match &self.header {
            Some(TagHeader::Video(v)) => v.is_sequence_header(),
            Some(TagHeader::Audio(a)) => a.is_sequence_header(),
            None => false,
        }
    }
}

/// Identity of one endpoint attachment
#[derive(Debug, Clone, Default)]
pub struct StreamInfo {
    /// Unique per attachment, not per channel
    pub uid: String,
    /// Source/destination URL, where known
    pub url: String,
    /// Channel key: `app/stream`
    pub key: String,
    /// Interstitial endpoints are auto-closed when the publisher exits
    /// (HLS, HTTP-FLV, recorders); direct RTMP subscribers are not.
    pub interstitial: bool,
}

impl StreamInfo {
    pub fn new(key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            uid: new_uid(),
            url: url.into(),
            key: key.into(),
            interstitial: false,
        }
    }

    pub fn interstitial(mut self) -> Self {
        self.interstitial = true;
        self
    }

    /// `app` component of the key
    pub fn app(&self) -> &str {
        self.key.split('/').next().unwrap_or("")
    }

    /// `stream` component of the key
    pub fn stream(&self) -> &str {
        match self.key.split_once('/') {
            Some((_, stream)) => stream,
            None => "",
        }
    }
}

impl std::fmt::Display for StreamInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.key, self.uid)
    }
}

/// Random attachment id
pub fn new_uid() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

/// A packet source: an RTMP publisher or a pull relay.
///
/// Owned by the channel's fan-out task; external shutdown goes through the
/// channel's stop signal, not the producer itself.
#[async_trait]
pub trait StreamProducer: Send {
    /// Next packet from the wire. Must touch the liveness clock.
    async fn read_packet(&mut self) -> Result<Packet>;

    fn info(&self) -> StreamInfo;

    fn base(&self) -> Arc<RwBase>;
}

/// A packet sink: RTMP subscriber, HTTP-FLV body, HLS segmenter, FLV
/// recorder or push relay.
///
/// `write_packet` must not block: sinks queue internally and drain on
/// their own task, applying the backpressure policy on overflow.
pub trait StreamConsumer: Send + Sync {
    fn write_packet(&self, packet: Packet) -> Result<()>;

    /// Stop the sink; idempotent
    fn close(&self, reason: &str);

    fn info(&self) -> StreamInfo;

    fn alive(&self) -> bool;

    fn base(&self) -> Arc<RwBase>;
}
