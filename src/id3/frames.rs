//! ID3v2 frames: headers for v2.2, v2.3 and v2.4, and text frame payloads.

use crate::bits::reader::{read_bytes, read_synchsafe_u32, read_u16, read_u24, read_u32, ByteOrder};
use crate::errors::{DecodeError, DecodeResult};

const BE: ByteOrder = ByteOrder::Big;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    pub id: String,
    /// Offset of the frame header inside the tag body.
    pub offset: usize,
    pub flags: u16,
    pub data: &'a [u8],
}

/// What a frame's format flags say about its payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFormat {
    pub compressed: bool,
    pub encrypted: bool,
    pub unsynchronised: bool,
    /// Bytes of grouping id / length indicator before the payload proper.
    pub prefix_len: usize,
}

pub fn frame_format(major: u8, flags: u16) -> FrameFormat {
    let format = (flags & 0xFF) as u8;
    match major {
        3 => FrameFormat {
            compressed: format & 0x80 != 0,
            encrypted: format & 0x40 != 0,
            unsynchronised: false,
            prefix_len: if format & 0x80 != 0 { 4 } else { 0 }
                + usize::from(format & 0x40 != 0)
                + usize::from(format & 0x20 != 0),
        },
        4 => FrameFormat {
            compressed: format & 0x08 != 0,
            encrypted: format & 0x04 != 0,
            unsynchronised: format & 0x02 != 0,
            prefix_len: usize::from(format & 0x40 != 0)
                + usize::from(format & 0x04 != 0)
                + if format & 0x01 != 0 { 4 } else { 0 },
        },
        _ => FrameFormat::default(),
    }
}

pub fn frame_header_len(major: u8) -> usize {
    if major == 2 {
        6
    } else {
        10
    }
}

/// Walk the frames of a tag body. Stops at padding or at the first frame
/// whose header cannot be trusted, returning the frames read so far and the
/// reason it stopped.
pub fn walk_frames(body: &[u8], major: u8) -> (Vec<Frame<'_>>, Option<DecodeError>) {
    let header_len = frame_header_len(major);
    let mut frames = Vec::new();
    let mut offset = 0usize;
    while offset + header_len <= body.len() {
        if body[offset] == 0 {
            break;
        }
        match read_frame(body, offset, major) {
            Ok(frame) => {
                offset += header_len + frame.data.len();
                frames.push(frame);
            }
            Err(e) => return (frames, Some(e)),
        }
    }
    (frames, None)
}

fn read_frame(body: &[u8], offset: usize, major: u8) -> DecodeResult<Frame<'_>> {
    let (id, size, flags, header_len) = if major == 2 {
        let id = read_bytes(body, offset, 3)?;
        (id, read_u24(body, offset + 3, BE)?, 0, 6)
    } else {
        let id = read_bytes(body, offset, 4)?;
        let size = if major >= 4 {
            read_synchsafe_u32(read_bytes(body, offset + 4, 4)?)?
        } else {
            read_u32(body, offset + 4, BE)?
        };
        (id, size, read_u16(body, offset + 8, BE)?, 10)
    };
    if !id.iter().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
        return Err(DecodeError::unsupported(format!(
            "invalid frame id {:02X?} at {}",
            id, offset
        )));
    }
    let start = offset + header_len;
    let available = body.len() - start;
    if size as usize > available {
        return Err(DecodeError::MalformedLength {
            declared: size as u64,
            reason: "frame runs past the end of the tag",
        });
    }
    Ok(Frame {
        id: String::from_utf8_lossy(id).into_owned(),
        offset,
        flags,
        data: &body[start..start + size as usize],
    })
}

/// Undo unsynchronisation: every `FF 00` becomes `FF`.
pub fn remove_unsynchronisation(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut previous = 0u8;
    for &b in data {
        if !(previous == 0xFF && b == 0x00) {
            out.push(b);
        }
        previous = b;
    }
    out
}

/// Text frame payload: encoding byte, then one or more NUL-separated
/// strings. Empty strings are dropped.
pub fn decode_text_frame(data: &[u8]) -> DecodeResult<Vec<String>> {
    let (&encoding, text) = data
        .split_first()
        .ok_or(DecodeError::truncated(1, 0))?;
    let decoded = match encoding {
        0 => text.iter().map(|&b| b as char).collect(),
        1 => decode_utf16_bom(text),
        2 => decode_utf16(text, true),
        3 => String::from_utf8_lossy(text).into_owned(),
        other => {
            return Err(DecodeError::unsupported(format!(
                "text encoding {}",
                other
            )))
        }
    };
    Ok(decoded
        .split('\0')
        .map(|s| s.trim_start_matches('\u{FEFF}').to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// UTF-16 where each string may carry its own byte order mark.
fn decode_utf16_bom(text: &[u8]) -> String {
    let mut big_endian = false;
    let mut units = Vec::with_capacity(text.len() / 2);
    for pair in text.chunks_exact(2) {
        match (pair[0], pair[1]) {
            (0xFF, 0xFE) => big_endian = false,
            (0xFE, 0xFF) => big_endian = true,
            (a, b) => units.push(if big_endian {
                u16::from_be_bytes([a, b])
            } else {
                u16::from_le_bytes([a, b])
            }),
        }
    }
    String::from_utf16_lossy(&units)
}

fn decode_utf16(text: &[u8], big_endian: bool) -> String {
    let units: Vec<u16> = text
        .chunks_exact(2)
        .map(|c| {
            if big_endian {
                u16::from_be_bytes([c[0], c[1]])
            } else {
                u16::from_le_bytes([c[0], c[1]])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}
