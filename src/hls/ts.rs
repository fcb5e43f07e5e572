//! MPEG-TS muxing
//!
//! 188-byte transport packets: PAT/PMT tables at segment starts, PES
//! packets carrying Annex-B video and ADTS audio. Clocks run at 90 kHz;
//! the PCR rides the adaptation field of the first packet of a video
//! keyframe payload.

use bytes::{BufMut, BytesMut};

use crate::media::flv::SoundFormat;

pub const TS_PACKET_LEN: usize = 188;
const TS_PAYLOAD_LEN: usize = 184;

pub const VIDEO_PID: u16 = 0x100;
pub const AUDIO_PID: u16 = 0x101;
const VIDEO_SID: u8 = 0xE0;
const AUDIO_SID: u8 = 0xC0;

/// One frame handed to the muxer
#[derive(Debug)]
pub struct TsFrame<'a> {
    pub is_video: bool,
    pub is_keyframe: bool,
    /// Presentation timestamp, 90 kHz units
    pub pts: u64,
    /// Decode timestamp, 90 kHz units
    pub dts: u64,
    pub data: &'a [u8],
}

/// Stateful TS muxer (continuity counters persist across segments)
#[derive(Debug, Default)]
pub struct TsMuxer {
    video_cc: u8,
    audio_cc: u8,
    pat_cc: u8,
    pmt_cc: u8,
}

impl TsMuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Program association table, one packet
    pub fn pat(&mut self) -> [u8; TS_PACKET_LEN] {
        let mut packet = [0xFFu8; TS_PACKET_LEN];
        let ts_header: [u8; 5] = [0x47, 0x40, 0x00, 0x10 | (self.pat_cc & 0x0F), 0x00];
        self.pat_cc = (self.pat_cc + 1) & 0x0F;

        let pat_section: [u8; 12] = [
            0x00, 0xB0, 0x0D, 0x00, 0x01, 0xC1, 0x00, 0x00, 0x00, 0x01, 0xF0, 0x01,
        ];

        packet[..5].copy_from_slice(&ts_header);
        packet[5..17].copy_from_slice(&pat_section);
        let crc = mpeg_crc32(&pat_section);
        packet[17..21].copy_from_slice(&crc.to_be_bytes());
        packet
    }

    /// Program map table, one packet
    pub fn pmt(&mut self, sound_format: SoundFormat, has_video: bool) -> [u8; TS_PACKET_LEN] {
        let mut packet = [0xFFu8; TS_PACKET_LEN];
        let ts_header: [u8; 5] = [0x47, 0x50, 0x01, 0x10 | (self.pmt_cc & 0x0F), 0x00];
        self.pmt_cc = (self.pmt_cc + 1) & 0x0F;

        let mut pmt_header: [u8; 12] = [
            0x02, 0xB0, 0x00, 0x00, 0x01, 0xC1, 0x00, 0x00, 0xE1, 0x00, 0xF0, 0x00,
        ];
        let mut prog_info: Vec<u8> = if has_video {
            vec![
                0x1B, 0xE1, 0x00, 0xF0, 0x00, // H.264 on the video PID
                0x0F, 0xE1, 0x01, 0xF0, 0x00, // AAC on the audio PID
            ]
        } else {
            pmt_header[9] = 0x01; // PCR PID follows audio
            vec![0x0F, 0xE1, 0x01, 0xF0, 0x00]
        };
        if matches!(sound_format, SoundFormat::Mp3 | SoundFormat::Mp38k) {
            let index = if has_video { 5 } else { 0 };
            prog_info[index] = 0x04;
        }
        pmt_header[2] = (prog_info.len() + 9 + 4) as u8;

        packet[..5].copy_from_slice(&ts_header);
        packet[5..17].copy_from_slice(&pmt_header);
        packet[17..17 + prog_info.len()].copy_from_slice(&prog_info);
        let crc_end = 17 + prog_info.len();
        let crc = mpeg_crc32(&packet[5..crc_end]);
        packet[crc_end..crc_end + 4].copy_from_slice(&crc.to_be_bytes());
        packet
    }

    /// Mux one frame as a run of TS packets appended to `out`.
    pub fn mux(&mut self, frame: &TsFrame<'_>, out: &mut BytesMut) {
        let pid = if frame.is_video { VIDEO_PID } else { AUDIO_PID };
        let pes = pes_header(frame);

        let mut pes_offset = 0usize;
        let mut data_offset = 0usize;
        let mut first = true;

        while pes_offset < pes.len() || data_offset < frame.data.len() {
            let cc = if frame.is_video {
                self.video_cc = (self.video_cc + 1) & 0x0F;
                self.video_cc
            } else {
                self.audio_cc = (self.audio_cc + 1) & 0x0F;
                self.audio_cc
            };

            let payload_left = (pes.len() - pes_offset) + (frame.data.len() - data_offset);

            // adaptation field: PCR on the first keyframe packet, stuffing
            // whenever the remaining payload underfills the packet
            let mut adaptation: Option<Vec<u8>> = None;
            if first && frame.is_video && frame.is_keyframe {
                let mut field = Vec::with_capacity(7);
                field.push(0x50); // random access + PCR flag
                put_pcr(&mut field, frame.dts);
                adaptation = Some(field);
            }

            let occupied = adaptation.as_ref().map(|a| a.len() + 1).unwrap_or(0);
            let space = TS_PAYLOAD_LEN - occupied;
            if payload_left < space {
                let need = space - payload_left;
                match adaptation.as_mut() {
                    Some(field) => field.extend(std::iter::repeat(0xFF).take(need)),
                    None => {
                        if need == 1 {
                            adaptation = Some(Vec::new()); // bare length byte 0
                        } else {
                            let mut field = Vec::with_capacity(need - 1);
                            field.push(0x00);
                            field.extend(std::iter::repeat(0xFF).take(need - 2));
                            adaptation = Some(field);
                        }
                    }
                }
            }

            let mut packet = [0u8; TS_PACKET_LEN];
            packet[0] = 0x47;
            packet[1] = (pid >> 8) as u8 | if first { 0x40 } else { 0x00 };
            packet[2] = pid as u8;
            packet[3] = 0x10 | cc;
            let mut index = 4;

            if let Some(field) = &adaptation {
                packet[3] |= 0x20;
                packet[index] = field.len() as u8;
                index += 1;
                packet[index..index + field.len()].copy_from_slice(field);
                index += field.len();
            }

            if pes_offset < pes.len() {
                let take = (TS_PACKET_LEN - index).min(pes.len() - pes_offset);
                packet[index..index + take].copy_from_slice(&pes[pes_offset..pes_offset + take]);
                pes_offset += take;
                index += take;
            }
            if index < TS_PACKET_LEN {
                let take = (TS_PACKET_LEN - index).min(frame.data.len() - data_offset);
                packet[index..index + take]
                    .copy_from_slice(&frame.data[data_offset..data_offset + take]);
                data_offset += take;
            }

            out.put_slice(&packet);
            first = false;
        }
    }
}

/// PES header: start code, stream id, length, PTS (and DTS when they differ)
fn pes_header(frame: &TsFrame<'_>) -> Vec<u8> {
    let sid = if frame.is_video { VIDEO_SID } else { AUDIO_SID };
    let both_clocks = frame.is_video && frame.pts != frame.dts;
    let header_size: u8 = if both_clocks { 10 } else { 5 };

    let mut size = frame.data.len() + header_size as usize + 3;
    if size > 0xFFFF {
        size = 0;
    }

    let mut pes = Vec::with_capacity(9 + header_size as usize);
    pes.extend_from_slice(&[0x00, 0x00, 0x01, sid]);
    pes.push((size >> 8) as u8);
    pes.push(size as u8);
    pes.push(0x80);
    pes.push(if both_clocks { 0xC0 } else { 0x80 });
    pes.push(header_size);
    put_pes_ts(&mut pes, if both_clocks { 3 } else { 2 }, frame.pts);
    if both_clocks {
        put_pes_ts(&mut pes, 1, frame.dts);
    }
    pes
}

/// 33-bit timestamp with marker bits, 5 bytes
fn put_pes_ts(out: &mut Vec<u8>, prefix: u8, ts: u64) {
    let mut ts = ts;
    if ts > 0x1_FFFF_FFFF {
        ts -= 0x1_FFFF_FFFF;
    }
    out.push((prefix << 4) | (((ts >> 30) as u8 & 0x07) << 1) | 0x01);
    let mid = ((((ts >> 15) & 0x7FFF) << 1) | 1) as u16;
    out.push((mid >> 8) as u8);
    out.push(mid as u8);
    let low = (((ts & 0x7FFF) << 1) | 1) as u16;
    out.push((low >> 8) as u8);
    out.push(low as u8);
}

/// 6-byte PCR (base only, extension zero)
fn put_pcr(out: &mut Vec<u8>, pcr: u64) {
    out.push((pcr >> 25) as u8);
    out.push((pcr >> 17) as u8);
    out.push((pcr >> 9) as u8);
    out.push((pcr >> 1) as u8);
    out.push((((pcr & 0x01) << 7) as u8) | 0x7E);
    out.push(0x00);
}

/// MPEG-2 CRC32 (poly 0x04C11DB7, init all-ones, no reflection)
fn mpeg_crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ 0x04C1_1DB7;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
