//! Codec parser facade
//!
//! Dispatches demuxed payloads to the right per-codec parser, creating
//! each lazily on first use. The HLS pipeline drives this with the parsed
//! tag header and the header-stripped payload.

use bytes::BytesMut;

use crate::error::MediaError;
use crate::media::aac::AacParser;
use crate::media::flv::{AacPacketType, CodecId, SoundFormat, TagHeader};
use crate::media::h264::H264Parser;
use crate::media::mp3::Mp3Parser;

#[derive(Debug, Default)]
pub struct CodecParser {
    aac: Option<AacParser>,
    mp3: Option<Mp3Parser>,
    h264: Option<H264Parser>,
}

impl CodecParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one demuxed payload.
    ///
    /// Sequence headers configure parser state and write nothing; media
    /// payloads are written to `out` in their transport form (Annex-B for
    /// video, ADTS for AAC). Codecs outside H.264/AAC/MP3 are refused.
    pub fn parse(
        &mut self,
        header: &TagHeader,
        data: &[u8],
        out: &mut BytesMut,
    ) -> Result<(), MediaError> {
        match header {
            TagHeader::Video(v) => {
                if v.codec_id != CodecId::H264 {
                    return Err(MediaError::UnsupportedCodec);
                }
                let parser = self.h264.get_or_insert_with(H264Parser::new);
                if v.is_sequence_header() {
                    parser.parse_sequence_header(data)
                } else {
                    parser.parse_nalus(data, out)
                }
            }
            TagHeader::Audio(a) => match a.sound_format {
                SoundFormat::Aac => {
                    let parser = self.aac.get_or_insert_with(AacParser::new);
                    let packet_type = a.aac_packet_type.unwrap_or(AacPacketType::Raw);
                    parser.parse(data, packet_type, out)
                }
                SoundFormat::Mp3 => {
                    let parser = self.mp3.get_or_insert_with(Mp3Parser::new);
                    parser.parse(data)?;
                    out.extend_from_slice(data);
                    Ok(())
                }
                _ => Err(MediaError::UnsupportedCodec),
            },
        }
    }

    /// Audio sample rate for PTS alignment; errors until an audio packet
    /// has been seen.
    pub fn sample_rate(&self) -> Result<u32, MediaError> {
        if let Some(aac) = &self.aac {
            if let Some(rate) = aac.sample_rate() {
                return Ok(rate);
            }
        }
        if let Some(mp3) = &self.mp3 {
            return Ok(mp3.sample_rate());
        }
        Err(MediaError::InvalidAacPacket)
    }
}
