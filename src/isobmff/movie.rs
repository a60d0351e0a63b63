//! Movie and track header boxes.

use crate::bits::reader::{
    fourcc_to_string, mac_epoch_to_iso, read_fixed_16_16, read_fourcc, read_u16, read_u32,
    read_u64, read_u8, ByteOrder,
};
use crate::errors::{DecodeError, DecodeResult};

const BE: ByteOrder = ByteOrder::Big;

/// Fields shared by `mvhd` and `mdhd`.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaTimes {
    pub version: u8,
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
}

impl MediaTimes {
    pub fn duration_seconds(&self) -> Option<f64> {
        if self.timescale > 0 {
            Some(self.duration as f64 / self.timescale as f64)
        } else {
            None
        }
    }

    pub fn created(&self) -> Option<String> {
        mac_epoch_to_iso(self.creation_time)
    }

    pub fn modified(&self) -> Option<String> {
        mac_epoch_to_iso(self.modification_time)
    }
}

/// Version 0 stores 32-bit times and duration, version 1 64-bit ones.
/// Returns the parsed times and the offset just past them.
fn parse_times(p: &[u8]) -> DecodeResult<(MediaTimes, usize)> {
    let version = read_u8(p, 0)?;
    match version {
        0 => Ok((
            MediaTimes {
                version,
                creation_time: read_u32(p, 4, BE)? as u64,
                modification_time: read_u32(p, 8, BE)? as u64,
                timescale: read_u32(p, 12, BE)?,
                duration: read_u32(p, 16, BE)? as u64,
            },
            20,
        )),
        1 => Ok((
            MediaTimes {
                version,
                creation_time: read_u64(p, 4, BE)?,
                modification_time: read_u64(p, 12, BE)?,
                timescale: read_u32(p, 20, BE)?,
                duration: read_u64(p, 24, BE)?,
            },
            32,
        )),
        v => Err(DecodeError::unsupported(format!("box version {}", v))),
    }
}

pub fn parse_mvhd(p: &[u8]) -> DecodeResult<MediaTimes> {
    parse_times(p).map(|(times, _)| times)
}

/// Media header: times plus the packed ISO-639-2/T language code.
#[derive(Debug, Clone, PartialEq)]
pub struct Mdhd {
    pub times: MediaTimes,
    pub language: Option<String>,
}

pub fn parse_mdhd(p: &[u8]) -> DecodeResult<Mdhd> {
    let (times, end) = parse_times(p)?;
    let code = read_u16(p, end, BE)?;
    Ok(Mdhd {
        times,
        language: unpack_language(code),
    })
}

/// Three 5-bit letters offset from 0x60. Zero means undetermined.
pub fn unpack_language(code: u16) -> Option<String> {
    if code == 0 {
        return Some("und".to_string());
    }
    let letters: Vec<u8> = [10u16, 5, 0]
        .iter()
        .map(|shift| (((code >> shift) & 0x1F) as u8) + 0x60)
        .collect();
    if letters.iter().all(u8::is_ascii_lowercase) {
        String::from_utf8(letters).ok()
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tkhd {
    pub version: u8,
    pub flags: u32,
    pub track_id: u32,
    pub duration: u64,
    pub width: f64,
    pub height: f64,
}

impl Tkhd {
    pub fn enabled(&self) -> bool {
        self.flags & 0x1 != 0
    }
}

pub fn parse_tkhd(p: &[u8]) -> DecodeResult<Tkhd> {
    let version = read_u8(p, 0)?;
    let flags = read_u32(p, 0, BE)? & 0x00FF_FFFF;
    // creation, modification, track id, reserved, duration
    let (track_id, duration, rest) = match version {
        0 => (read_u32(p, 12, BE)?, read_u32(p, 20, BE)? as u64, 24),
        1 => (read_u32(p, 20, BE)?, read_u64(p, 28, BE)?, 36),
        v => return Err(DecodeError::unsupported(format!("tkhd version {}", v))),
    };
    // reserved(8) layer(2) alternate group(2) volume(2) reserved(2) matrix(36)
    let dims = rest + 52;
    Ok(Tkhd {
        version,
        flags,
        track_id,
        duration,
        width: read_fixed_16_16(p, dims)?,
        height: read_fixed_16_16(p, dims + 4)?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hdlr {
    pub handler_type: [u8; 4],
    pub name: String,
}

impl Hdlr {
    pub fn kind(&self) -> &'static str {
        match &self.handler_type {
            b"vide" => "video",
            b"soun" => "audio",
            b"pict" => "image",
            b"subt" | b"sbtl" | b"text" | b"clcp" => "subtitle",
            b"meta" => "metadata",
            b"hint" => "hint",
            _ => "other",
        }
    }

    pub fn handler_string(&self) -> String {
        fourcc_to_string(&self.handler_type)
    }
}

pub fn parse_hdlr(p: &[u8]) -> DecodeResult<Hdlr> {
    let handler_type = read_fourcc(p, 8)?;
    let name_bytes = p.get(24..).unwrap_or_default();
    let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
    Ok(Hdlr {
        handler_type,
        name: String::from_utf8_lossy(&name_bytes[..end]).trim().to_string(),
    })
}

/// Sample description box header: the entry count.
pub fn parse_stsd_entry_count(p: &[u8]) -> DecodeResult<u32> {
    read_u32(p, 4, BE)
}

/// Bytes between a visual sample entry header and its child boxes.
pub const VISUAL_SAMPLE_ENTRY_LEN: u64 = 78;

/// Sample entry codes followed by the visual sample entry fields.
pub fn is_visual_sample_entry(code: &[u8; 4]) -> bool {
    matches!(
        code,
        b"av01" | b"avc1" | b"avc3" | b"hvc1" | b"hev1" | b"vp08" | b"vp09" | b"mp4v" | b"encv"
            | b"dvh1" | b"dvhe" | b"mjpg" | b"jpeg"
    )
}

pub fn codec_name(code: &[u8; 4]) -> Option<&'static str> {
    let name = match code {
        b"avc1" | b"avc3" => "H.264/AVC",
        b"hev1" | b"hvc1" => "H.265/HEVC",
        b"dvh1" | b"dvhe" => "Dolby Vision",
        b"mp4v" => "MPEG-4 Visual",
        b"av01" => "AV1",
        b"vp08" => "VP8",
        b"vp09" => "VP9",
        b"mp4a" => "AAC",
        b"ac-3" => "AC-3",
        b"ec-3" => "E-AC-3",
        b"Opus" => "Opus",
        b"fLaC" => "FLAC",
        b"tx3g" => "3GPP Timed Text",
        b"wvtt" => "WebVTT",
        b"stpp" => "XML Subtitle",
        _ => return None,
    };
    Some(name)
}

/// Width and height of a visual sample entry, read from its payload.
pub fn parse_visual_sample_entry(p: &[u8]) -> DecodeResult<(u16, u16)> {
    // reserved(6) data reference index(2) pre-defined/reserved(16)
    Ok((read_u16(p, 24, BE)?, read_u16(p, 26, BE)?))
}
