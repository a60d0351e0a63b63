//! Image item properties found under `ipco` and in sample entries.

use crate::bits::reader::{fourcc_to_string, read_fourcc, read_u16, read_u32, read_u8, ByteOrder};
use crate::errors::{DecodeError, DecodeResult};

const BE: ByteOrder = ByteOrder::Big;

/// `ispe`: full box, then image width and height.
pub fn parse_ispe(p: &[u8]) -> DecodeResult<(u32, u32)> {
    Ok((read_u32(p, 4, BE)?, read_u32(p, 8, BE)?))
}

/// `pixi`: full box, channel count, then bits per channel.
pub fn parse_pixi(p: &[u8]) -> DecodeResult<Vec<u8>> {
    let channels = read_u8(p, 4)? as usize;
    let bits = p
        .get(5..5 + channels)
        .ok_or_else(|| DecodeError::truncated(5 + channels, p.len()))?;
    Ok(bits.to_vec())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Colour {
    Nclx {
        primaries: u16,
        transfer: u16,
        matrix: u16,
        full_range: bool,
    },
    /// Restricted (`rICC`) or unrestricted (`prof`) ICC profile.
    Icc { kind: [u8; 4], size: u64 },
}

/// `payload_length` is the whole box payload; `p` may be a prefix of it.
pub fn parse_colr(p: &[u8], payload_length: u64) -> DecodeResult<Colour> {
    let kind = read_fourcc(p, 0)?;
    match &kind {
        b"nclx" => Ok(Colour::Nclx {
            primaries: read_u16(p, 4, BE)?,
            transfer: read_u16(p, 6, BE)?,
            matrix: read_u16(p, 8, BE)?,
            full_range: read_u8(p, 10)? & 0x80 != 0,
        }),
        b"rICC" | b"prof" => Ok(Colour::Icc {
            kind,
            size: payload_length.saturating_sub(4),
        }),
        _ => Err(DecodeError::unsupported(format!(
            "colour type {}",
            fourcc_to_string(&kind)
        ))),
    }
}

/// Names for the common code points of ISO/IEC 23091-2.
pub fn primaries_name(code: u16) -> Option<&'static str> {
    match code {
        1 => Some("BT.709"),
        5 => Some("BT.601 PAL"),
        6 => Some("BT.601 NTSC"),
        9 => Some("BT.2020"),
        12 => Some("Display P3"),
        _ => None,
    }
}

pub fn transfer_name(code: u16) -> Option<&'static str> {
    match code {
        1 | 6 | 14 | 15 => Some("BT.709"),
        8 => Some("linear"),
        13 => Some("sRGB"),
        16 => Some("PQ"),
        18 => Some("HLG"),
        _ => None,
    }
}
