//! Media handling
//!
//! - FLV tag-header parsing and demuxing
//! - H.264 AVCC→Annex-B conversion
//! - AAC AudioSpecificConfig + ADTS emission
//! - MP3 header parsing
//! - the codec-parser facade used by the HLS pipeline

pub mod aac;
pub mod codec;
pub mod flv;
pub mod h264;
pub mod mp3;

pub use aac::{AacParser, AudioSpecificConfig};
pub use codec::CodecParser;
pub use flv::{
    demux, parse_header, AacPacketType, AudioTagHeader, AvcPacketType, CodecId, Demuxed,
    FrameType, SoundFormat, TagHeader, VideoTagHeader,
};
pub use h264::{H264Parser, NaluType};
pub use mp3::Mp3Parser;
