//! RIFF form handling shared by the WAV and WebP decoders.
//!
//! A RIFF file is one form chunk (`RIFF`, or `RF64` / `BW64` when sizes may
//! exceed 4 GiB) whose payload starts with a form type and continues with
//! little-endian, even-padded chunks.

pub mod wav;
pub mod webp;

pub use wav::WavDecoder;
pub use webp::WebpDecoder;

use crate::bits::reader::{fourcc_to_string, read_fourcc, read_u32, ByteOrder};
use crate::cursor::ContainerUnit;
use crate::errors::{DecodeError, DecodeResult};

pub const RIFF_HEADER_LEN: u64 = 12;

/// Size field value meaning "see `ds64`".
pub const RF64_SIZE_PLACEHOLDER: u32 = 0xFFFF_FFFF;

/// The 12-byte form header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiffForm {
    pub form: [u8; 4],
    pub kind: [u8; 4],
    pub declared_size: u32,
}

impl RiffForm {
    /// `RF64` and `BW64` carry their real sizes in a `ds64` chunk.
    pub fn is_64bit(&self) -> bool {
        &self.form == b"RF64" || &self.form == b"BW64"
    }

    /// End of the form's chunk list, as declared.
    pub fn declared_end(&self, stream_len: u64) -> u64 {
        if self.is_64bit() && self.declared_size == RF64_SIZE_PLACEHOLDER {
            stream_len
        } else {
            (self.declared_size as u64 + 8).min(stream_len)
        }
    }
}

/// Parse the form header and check the form type.
pub fn parse_form_header(head: &[u8], kind: &'static [u8; 4], format: &'static str) -> DecodeResult<RiffForm> {
    let form = read_fourcc(head, 0).map_err(|_| DecodeError::NotThisFormat { format })?;
    if !matches!(&form, b"RIFF" | b"RF64" | b"BW64") {
        return Err(DecodeError::NotThisFormat { format });
    }
    let declared_size = read_u32(head, 4, ByteOrder::Little)?;
    let found = read_fourcc(head, 8)?;
    if &found != kind {
        return Err(DecodeError::NotThisFormat { format });
    }
    Ok(RiffForm {
        form,
        kind: found,
        declared_size,
    })
}

/// Fixed-width text field: stops at the first NUL, trims whitespace.
pub fn fixed_text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

/// The error recorded for a chunk that ran past its container.
pub(crate) fn truncation_error(unit: &ContainerUnit) -> DecodeError {
    DecodeError::MalformedLength {
        declared: unit.declared_length,
        reason: "clamped to the end of its container",
    }
}

pub(crate) fn chunk_label(code: &[u8; 4]) -> String {
    fourcc_to_string(code).trim_end().to_string()
}
