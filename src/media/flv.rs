//! FLV tag header parsing
//!
//! RTMP audio/video message payloads are FLV tag bodies: a 1-byte (audio)
//! or 5-byte (video) codec header followed by the codec payload.
//!
//! ```text
//! Audio:  | SoundFormat(4) SoundRate(2) SoundSize(1) SoundType(1) | [AACPacketType(8)] | data
//! Video:  | FrameType(4) CodecID(4) | AVCPacketType(8) CompositionTime(24, signed) | data
//! ```
//!
//! The parsed header is a tagged variant ([`TagHeader`]), so downstream
//! code matches on it instead of downcasting.

use bytes::Bytes;

use crate::error::MediaError;

/// Video frame type (upper 4 bits of the first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Key = 1,
    Inter = 2,
    DisposableInter = 3,
    GeneratedKey = 4,
    VideoInfo = 5,
}

impl FrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            1 => Some(FrameType::Key),
            2 => Some(FrameType::Inter),
            3 => Some(FrameType::DisposableInter),
            4 => Some(FrameType::GeneratedKey),
            5 => Some(FrameType::VideoInfo),
            _ => None,
        }
    }

    pub fn is_key(&self) -> bool {
        matches!(self, FrameType::Key | FrameType::GeneratedKey)
    }
}

/// Video codec id (lower 4 bits of the first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecId {
    SorensonH263 = 2,
    ScreenVideo = 3,
    Vp6 = 4,
    Vp6Alpha = 5,
    ScreenVideoV2 = 6,
    H264 = 7,
}

impl CodecId {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x0F {
            2 => Some(CodecId::SorensonH263),
            3 => Some(CodecId::ScreenVideo),
            4 => Some(CodecId::Vp6),
            5 => Some(CodecId::Vp6Alpha),
            6 => Some(CodecId::ScreenVideoV2),
            7 => Some(CodecId::H264),
            _ => None,
        }
    }
}

/// Audio coding format (upper 4 bits of the first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundFormat {
    LinearPcm = 0,
    Adpcm = 1,
    Mp3 = 2,
    LinearPcmLe = 3,
    Nellymoser16kMono = 4,
    Nellymoser8kMono = 5,
    Nellymoser = 6,
    G711ALaw = 7,
    G711MuLaw = 8,
    Aac = 10,
    Speex = 11,
    Mp38k = 14,
    DeviceSpecific = 15,
}

impl SoundFormat {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            0 => Some(SoundFormat::LinearPcm),
            1 => Some(SoundFormat::Adpcm),
            2 => Some(SoundFormat::Mp3),
            3 => Some(SoundFormat::LinearPcmLe),
            4 => Some(SoundFormat::Nellymoser16kMono),
            5 => Some(SoundFormat::Nellymoser8kMono),
            6 => Some(SoundFormat::Nellymoser),
            7 => Some(SoundFormat::G711ALaw),
            8 => Some(SoundFormat::G711MuLaw),
            10 => Some(SoundFormat::Aac),
            11 => Some(SoundFormat::Speex),
            14 => Some(SoundFormat::Mp38k),
            15 => Some(SoundFormat::DeviceSpecific),
            _ => None,
        }
    }
}

/// AAC packet type (second audio byte when the format is AAC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacPacketType {
    SequenceHeader = 0,
    Raw = 1,
}

/// AVC packet type (second video byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    SequenceHeader = 0,
    Nalu = 1,
    EndOfSequence = 2,
}

/// Parsed audio tag header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTagHeader {
    pub sound_format: SoundFormat,
    /// 0=5.5k 1=11k 2=22k 3=44k (AAC always 3)
    pub sound_rate: u8,
    /// 0=8-bit 1=16-bit
    pub sound_size: u8,
    /// 0=mono 1=stereo
    pub sound_type: u8,
    /// Present only when the format is AAC
    pub aac_packet_type: Option<AacPacketType>,
}

impl AudioTagHeader {
    pub fn is_aac(&self) -> bool {
        self.sound_format == SoundFormat::Aac
    }

    pub fn is_sequence_header(&self) -> bool {
        self.aac_packet_type == Some(AacPacketType::SequenceHeader)
    }
}

/// Parsed video tag header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoTagHeader {
    pub frame_type: FrameType,
    pub codec_id: CodecId,
    /// Present for key/inter frames
    pub avc_packet_type: Option<AvcPacketType>,
    /// Signed composition-time offset in milliseconds
    pub composition_time: i32,
}

impl VideoTagHeader {
    pub fn is_key_frame(&self) -> bool {
        self.frame_type.is_key()
    }

    /// AVC sequence header (keyframe carrying the decoder configuration)
    pub fn is_sequence_header(&self) -> bool {
        self.frame_type == FrameType::Key
            && self.avc_packet_type == Some(AvcPacketType::SequenceHeader)
    }
}

/// Tagged media header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagHeader {
    Audio(AudioTagHeader),
    Video(VideoTagHeader),
}

impl TagHeader {
    pub fn as_audio(&self) -> Option<&AudioTagHeader> {
        match self {
            TagHeader::Audio(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_video(&self) -> Option<&VideoTagHeader> {
        match self {
            TagHeader::Video(h) => Some(h),
            _ => None,
        }
    }
}

/// Result of [`demux`]
#[derive(Debug, Clone)]
pub enum Demuxed {
    /// Header plus the payload with the codec header stripped
    Media { header: TagHeader, data: Bytes },
    /// AVC end-of-sequence marker (0x17 0x02); carries no payload
    AvcEndOfSequence,
}

/// Parse the codec header in place, returning it and its length in bytes.
pub fn parse_header(data: &[u8], is_video: bool) -> Result<(TagHeader, usize), MediaError> {
    if is_video {
        parse_video_header(data).map(|(h, n)| (TagHeader::Video(h), n))
    } else {
        parse_audio_header(data).map(|(h, n)| (TagHeader::Audio(h), n))
    }
}

fn parse_audio_header(data: &[u8]) -> Result<(AudioTagHeader, usize), MediaError> {
    if data.is_empty() {
        return Err(MediaError::InvalidTag);
    }
    let flags = data[0];
    let sound_format = SoundFormat::from_byte(flags).ok_or(MediaError::InvalidTag)?;
    let mut header = AudioTagHeader {
        sound_format,
        sound_rate: (flags >> 2) & 0x03,
        sound_size: (flags >> 1) & 0x01,
        sound_type: flags & 0x01,
        aac_packet_type: None,
    };
    let mut n = 1;
    if sound_format == SoundFormat::Aac {
        if data.len() < 2 {
            return Err(MediaError::InvalidTag);
        }
        header.aac_packet_type = Some(match data[1] {
            0 => AacPacketType::SequenceHeader,
            _ => AacPacketType::Raw,
        });
        n = 2;
    }
    Ok((header, n))
}

fn parse_video_header(data: &[u8]) -> Result<(VideoTagHeader, usize), MediaError> {
    if data.is_empty() {
        return Err(MediaError::InvalidTag);
    }
    let flags = data[0];
    let frame_type = FrameType::from_byte(flags).ok_or(MediaError::InvalidTag)?;
    let codec_id = CodecId::from_byte(flags).ok_or(MediaError::InvalidTag)?;
    let mut header = VideoTagHeader {
        frame_type,
        codec_id,
        avc_packet_type: None,
        composition_time: 0,
    };
    let mut n = 1;
    if matches!(frame_type, FrameType::Key | FrameType::Inter) {
        if data.len() < 5 {
            return Err(MediaError::InvalidTag);
        }
        header.avc_packet_type = Some(match data[1] {
            0 => AvcPacketType::SequenceHeader,
            2 => AvcPacketType::EndOfSequence,
            _ => AvcPacketType::Nalu,
        });
        let raw = ((data[2] as i32) << 16) | ((data[3] as i32) << 8) | data[4] as i32;
        // sign extend from 24 bits
        header.composition_time = if raw & 0x80_0000 != 0 {
            raw | !0xFF_FFFF
        } else {
            raw
        };
        n = 5;
    }
    Ok((header, n))
}

/// Parse the header and strip it from the payload.
///
/// The 0x17 0x02 video byte pair (AVC end-of-sequence) comes back as a
/// distinguished variant so the HLS pipeline can skip it.
pub fn demux(data: Bytes, is_video: bool) -> Result<Demuxed, MediaError> {
    if is_video && data.len() >= 2 && data[0] == 0x17 && data[1] == 0x02 {
        return Ok(Demuxed::AvcEndOfSequence);
    }
    let (header, n) = parse_header(&data, is_video)?;
    Ok(Demuxed::Media {
        header,
        data: data.slice(n..),
    })
}
