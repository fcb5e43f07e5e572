//! AAC parsing and ADTS emission
//!
//! RTMP carries AAC as raw frames (no ADTS). The sequence header holds the
//! AudioSpecificConfig; once that is seen, every raw frame gets a 7-byte
//! ADTS header derived from it so MPEG-TS and file consumers can decode.

use bytes::BytesMut;

use crate::error::MediaError;
use crate::media::flv::AacPacketType;

/// MPEG-4 sampling frequencies by index
const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

const ADTS_HEADER_LEN: usize = 7;

/// Decoded AudioSpecificConfig
///
/// ```text
/// audioObjectType(5) samplingFrequencyIndex(4) channelConfiguration(4) ...
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub object_type: u8,
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
}

impl AudioSpecificConfig {
    pub fn parse(data: &[u8]) -> Result<Self, MediaError> {
        if data.len() < 2 {
            return Err(MediaError::InvalidAacPacket);
        }
        let object_type = (data[0] >> 3) & 0x1F;
        let sampling_frequency_index = ((data[0] & 0x07) << 1) | (data[1] >> 7);
        let channel_configuration = (data[1] >> 3) & 0x0F;
        if sampling_frequency_index as usize >= SAMPLE_RATES.len() {
            return Err(MediaError::InvalidAacPacket);
        }
        Ok(AudioSpecificConfig {
            object_type,
            sampling_frequency_index,
            channel_configuration,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[self.sampling_frequency_index as usize]
    }
}

/// Stateful AAC parser
///
/// Remembers the sequence header so subsequent raw frames can be prefixed
/// with ADTS.
#[derive(Debug, Default)]
pub struct AacParser {
    config: Option<AudioSpecificConfig>,
}

impl AacParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one AAC packet. Sequence headers update the stored config;
    /// raw frames are written to `out` as ADTS + payload.
    pub fn parse(
        &mut self,
        data: &[u8],
        packet_type: AacPacketType,
        out: &mut BytesMut,
    ) -> Result<(), MediaError> {
        match packet_type {
            AacPacketType::SequenceHeader => {
                self.config = Some(AudioSpecificConfig::parse(data)?);
                Ok(())
            }
            AacPacketType::Raw => {
                let config = self.config.ok_or(MediaError::InvalidAacPacket)?;
                if data.is_empty() {
                    return Err(MediaError::InvalidAacPacket);
                }
                out.extend_from_slice(&adts_header(&config, data.len()));
                out.extend_from_slice(data);
                Ok(())
            }
        }
    }

    /// Sample rate from the stored config (HLS clock alignment)
    pub fn sample_rate(&self) -> Option<u32> {
        self.config.map(|c| c.sample_rate())
    }

    pub fn has_config(&self) -> bool {
        self.config.is_some()
    }
}

/// Build the 7-byte ADTS header (MPEG-4, layer 0, no CRC) for one frame.
fn adts_header(config: &AudioSpecificConfig, payload_len: usize) -> [u8; ADTS_HEADER_LEN] {
    let profile = config.object_type.saturating_sub(1);
    let freq_idx = config.sampling_frequency_index;
    let channels = config.channel_configuration;
    let frame_len = (payload_len + ADTS_HEADER_LEN) as u16;

    let mut h = [0u8; ADTS_HEADER_LEN];
    h[0] = 0xFF;
    h[1] = 0xF1;
    h[2] = ((profile & 0x03) << 6) | ((freq_idx & 0x0F) << 2) | ((channels >> 2) & 0x01);
    h[3] = ((channels & 0x03) << 6) | ((frame_len >> 11) & 0x03) as u8;
    h[4] = (frame_len >> 3) as u8;
    h[5] = (((frame_len & 0x07) << 5) as u8) | 0x1F;
    h[6] = 0xFC;
    h
}
