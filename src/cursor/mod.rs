//! Chunk / box / element cursor.
//!
//! `UnitCursor` reads one header at a time and leaves the payload to the
//! caller, who either skips it, reads it, or enters it as a nested scope.
//! Nested scopes live on an explicit stack of byte ranges: leaving a scope
//! always resumes at the offset recorded when it was entered, so a damaged
//! child can never move the parent's position.

mod unit;

pub use unit::{ContainerUnit, UnitTag};

use std::io::{self, Read, SeekFrom};

use log::{debug, warn};

use crate::bits::reader::{read_u16, read_u32, ByteOrder};
use crate::errors::DecodeError;
use crate::streams::SeekableStream;

/// Header layout of the units being walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderShape {
    /// 4-byte tag, 4-byte little-endian payload length.
    Riff,
    /// 4-byte big-endian box length, 4-byte tag, optional 64-bit length.
    IsoBmff,
    /// Tag pair, VR, then a 2- or 4-byte length depending on the VR.
    DicomExplicitLe,
    /// Tag pair then a 4-byte length.
    DicomImplicitLe,
}

impl HeaderShape {
    /// Smallest header this shape can have.
    pub fn min_header_len(self) -> u64 {
        8
    }
}

/// DICOM VRs whose length field is 4 bytes, preceded by 2 reserved bytes.
pub const LONG_LENGTH_VRS: &[&[u8; 2]] = &[
    b"OB", b"OW", b"OF", b"SQ", b"UN", b"UT", b"UC", b"UR", b"OD", b"OL", b"OV", b"SV", b"UV",
];

pub const DICOM_UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
pub const DICOM_ITEM_GROUP: u16 = 0xFFFE;

/// Result of asking the cursor for the next unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Unit(ContainerUnit),
    /// Not enough bytes left in the current scope for another header.
    End,
    /// The header could not be trusted. The rest of the scope is abandoned.
    Malformed(DecodeError),
}

#[derive(Debug, Clone, Copy)]
struct Scope {
    end: u64,
    resume: u64,
}

pub struct UnitCursor<'s> {
    stream: &'s mut dyn SeekableStream,
    shape: HeaderShape,
    stream_len: u64,
    position: u64,
    root_end: u64,
    scopes: Vec<Scope>,
    max_depth: usize,
    max_units: usize,
    units_read: usize,
    budget_exhausted: bool,
}

impl<'s> UnitCursor<'s> {
    /// Cursor over the whole stream.
    pub fn new(stream: &'s mut dyn SeekableStream, shape: HeaderShape) -> io::Result<Self> {
        let stream_len = stream.total_len()?;
        Ok(Self::with_range(stream, shape, stream_len, 0, stream_len))
    }

    /// Cursor over `start..end`; `end` is clamped to the stream length.
    pub fn with_range(
        stream: &'s mut dyn SeekableStream,
        shape: HeaderShape,
        stream_len: u64,
        start: u64,
        end: u64,
    ) -> Self {
        let root_end = end.min(stream_len);
        Self {
            stream,
            shape,
            stream_len,
            position: start.min(root_end),
            root_end,
            scopes: Vec::new(),
            max_depth: 16,
            max_units: 100_000,
            units_read: 0,
            budget_exhausted: false,
        }
    }

    pub fn with_limits(mut self, max_depth: usize, max_units: usize) -> Self {
        self.max_depth = max_depth;
        self.max_units = max_units;
        self
    }

    pub fn shape(&self) -> HeaderShape {
        self.shape
    }

    pub fn set_shape(&mut self, shape: HeaderShape) {
        self.shape = shape;
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn stream_len(&self) -> u64 {
        self.stream_len
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn units_read(&self) -> usize {
        self.units_read
    }

    /// True once the per-parse unit budget stopped the walk.
    pub fn budget_exhausted(&self) -> bool {
        self.budget_exhausted
    }

    pub fn scope_end(&self) -> u64 {
        self.scopes.last().map_or(self.root_end, |s| s.end)
    }

    /// Shrink or grow the current scope, never past the enclosing one.
    pub fn set_scope_end(&mut self, end: u64) {
        let limit = match self.scopes.len() {
            0 | 1 => self.stream_len,
            n => self.scopes[n - 2].end,
        };
        let end = end.min(limit);
        match self.scopes.last_mut() {
            Some(scope) => scope.end = end,
            None => self.root_end = end,
        }
    }

    /// Read the next header in the current scope and position the cursor at
    /// its payload.
    pub fn next_unit(&mut self) -> io::Result<Step> {
        if self.units_read >= self.max_units {
            if !self.budget_exhausted {
                warn!("unit budget of {} exhausted at {}", self.max_units, self.position);
            }
            self.budget_exhausted = true;
            return Ok(Step::End);
        }
        let scope_end = self.scope_end();
        let remaining = scope_end.saturating_sub(self.position);
        if remaining < self.shape.min_header_len() {
            return Ok(Step::End);
        }

        let header_offset = self.position;
        let mut header = [0u8; 16];
        if self.read_at(header_offset, &mut header[..8])?.is_none() {
            return Ok(Step::End);
        }

        let parsed = match self.shape {
            HeaderShape::Riff => self.parse_riff(&header),
            HeaderShape::IsoBmff => self.parse_isobmff(&mut header, remaining)?,
            HeaderShape::DicomExplicitLe => self.parse_dicom(&mut header, remaining, true)?,
            HeaderShape::DicomImplicitLe => self.parse_dicom(&mut header, remaining, false)?,
        };
        let mut unit = match parsed {
            Parsed::Unit(unit) => unit,
            Parsed::End => return Ok(Step::End),
            Parsed::Malformed(err) => {
                warn!("malformed header at {}: {}", header_offset, err);
                self.position = scope_end;
                return Ok(Step::Malformed(err));
            }
        };

        unit.header_offset = header_offset;
        unit.payload_offset = header_offset + unit.header_len;
        self.clamp_to_scope(&mut unit, scope_end);
        self.units_read += 1;
        self.position = unit.payload_offset;
        debug!(
            "unit {} at {} (payload {} bytes{})",
            unit.tag,
            header_offset,
            unit.payload_length,
            if unit.truncated { ", truncated" } else { "" }
        );
        Ok(Step::Unit(unit))
    }

    /// Move past `unit`.
    pub fn skip(&mut self, unit: &ContainerUnit) {
        self.position = unit.end_offset().min(self.scope_end());
    }

    /// Start walking the payload of `unit` as a nested scope, `skip` bytes in.
    pub fn enter(&mut self, unit: &ContainerUnit, skip: u64) -> Result<(), DecodeError> {
        if self.scopes.len() >= self.max_depth {
            self.skip(unit);
            return Err(DecodeError::unsupported(format!(
                "nesting deeper than {} levels",
                self.max_depth
            )));
        }
        let parent_end = self.scope_end();
        let end = unit.payload_end().min(parent_end);
        let resume = unit.end_offset().min(parent_end);
        self.scopes.push(Scope { end, resume });
        self.position = unit.payload_offset.saturating_add(skip).min(end);
        Ok(())
    }

    /// Return to the parent scope. Returns `false` at the root.
    pub fn leave(&mut self) -> bool {
        match self.scopes.pop() {
            Some(scope) => {
                self.position = scope.resume;
                true
            }
            None => false,
        }
    }

    /// Replace the payload length of `unit`, as RF64 `ds64` overrides do.
    pub fn resize(&mut self, unit: &mut ContainerUnit, payload_length: u64) {
        unit.payload_length = payload_length;
        unit.truncated = false;
        unit.padded = self.shape == HeaderShape::Riff && payload_length % 2 == 1;
        unit.declared_length = match self.shape {
            HeaderShape::IsoBmff => unit.header_len + payload_length,
            _ => payload_length,
        };
        let scope_end = self.scope_end();
        self.clamp_to_scope(unit, scope_end);
    }

    /// Read up to `max` payload bytes. Does not move the cursor.
    pub fn read_payload(&mut self, unit: &ContainerUnit, max: usize) -> io::Result<Vec<u8>> {
        let len = unit.payload_length.min(max as u64);
        self.stream.seek(SeekFrom::Start(unit.payload_offset))?;
        let mut buf = Vec::with_capacity(len as usize);
        let reader: &mut dyn SeekableStream = &mut *self.stream;
        reader.take(len).read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Look at the bytes at the current position without consuming them.
    pub fn peek(&mut self, len: usize) -> io::Result<Option<Vec<u8>>> {
        if self.scope_end().saturating_sub(self.position) < len as u64 {
            return Ok(None);
        }
        let mut buf = vec![0u8; len];
        Ok(self.read_at(self.position, &mut buf)?.map(|_| buf))
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<Option<usize>> {
        self.stream.seek(SeekFrom::Start(offset))?;
        match self.stream.read_exact(buf) {
            Ok(()) => Ok(Some(buf.len())),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn clamp_to_scope(&self, unit: &mut ContainerUnit, scope_end: u64) {
        if unit.padded && unit.payload_end() >= scope_end {
            unit.padded = false;
        }
        let available = scope_end.saturating_sub(unit.payload_offset);
        if unit.payload_length > available {
            warn!(
                "unit {} at {} declares {} payload bytes, only {} available",
                unit.tag, unit.header_offset, unit.payload_length, available
            );
            unit.payload_length = available;
            unit.declared_length = match self.shape {
                HeaderShape::IsoBmff => unit.header_len + available,
                _ => available,
            };
            unit.truncated = true;
        }
    }

    fn parse_riff(&self, header: &[u8; 16]) -> Parsed {
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&header[0..4]);
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as u64;
        Parsed::Unit(blank_unit(UnitTag::FourCc(tag), 8, len, len, len % 2 == 1))
    }

    fn parse_isobmff(&mut self, header: &mut [u8; 16], remaining: u64) -> io::Result<Parsed> {
        let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&header[4..8]);
        let tag = UnitTag::FourCc(tag);

        let parsed = match size32 {
            0 => {
                if !self.scopes.is_empty() {
                    Parsed::Malformed(DecodeError::MalformedLength {
                        declared: 0,
                        reason: "size 0 is only valid for a top-level box",
                    })
                } else {
                    let mut unit = blank_unit(tag, 8, 0, remaining - 8, false);
                    unit.extends_to_end = true;
                    Parsed::Unit(unit)
                }
            }
            1 => {
                if remaining < 16 {
                    return Ok(Parsed::End);
                }
                let offset = self.position + 8;
                if self.read_at(offset, &mut header[8..16])?.is_none() {
                    return Ok(Parsed::End);
                }
                let large = u64::from_be_bytes([
                    header[8], header[9], header[10], header[11], header[12], header[13],
                    header[14], header[15],
                ]);
                if large < 16 {
                    Parsed::Malformed(DecodeError::MalformedLength {
                        declared: large,
                        reason: "64-bit box size smaller than its header",
                    })
                } else {
                    Parsed::Unit(blank_unit(tag, 16, large, large - 16, false))
                }
            }
            n if n < 8 => Parsed::Malformed(DecodeError::MalformedLength {
                declared: n,
                reason: "box size smaller than its header",
            }),
            n => Parsed::Unit(blank_unit(tag, 8, n, n - 8, false)),
        };
        Ok(parsed)
    }

    fn parse_dicom(
        &mut self,
        header: &mut [u8; 16],
        remaining: u64,
        explicit: bool,
    ) -> io::Result<Parsed> {
        let le = ByteOrder::Little;
        let group = read_u16(header, 0, le).unwrap_or_default();
        let element = read_u16(header, 2, le).unwrap_or_default();
        let tag = UnitTag::Element { group, element };

        // Items and delimiters never carry a VR.
        if !explicit || group == DICOM_ITEM_GROUP {
            let len = read_u32(header, 4, le).unwrap_or_default();
            return Ok(Parsed::Unit(dicom_unit(tag, None, 8, len)));
        }

        let vr = [header[4], header[5]];
        if !vr.iter().all(u8::is_ascii_uppercase) {
            return Ok(Parsed::Malformed(DecodeError::unsupported(format!(
                "invalid VR bytes {:02X}{:02X} for element {}",
                vr[0], vr[1], tag
            ))));
        }

        if LONG_LENGTH_VRS.contains(&&vr) {
            if remaining < 12 {
                return Ok(Parsed::End);
            }
            let offset = self.position + 8;
            if self.read_at(offset, &mut header[8..12])?.is_none() {
                return Ok(Parsed::End);
            }
            let len = read_u32(header, 8, le).unwrap_or_default();
            Ok(Parsed::Unit(dicom_unit(tag, Some(vr), 12, len)))
        } else {
            let len = read_u16(header, 6, le).unwrap_or_default() as u32;
            Ok(Parsed::Unit(dicom_unit(tag, Some(vr), 8, len)))
        }
    }
}

enum Parsed {
    Unit(ContainerUnit),
    End,
    Malformed(DecodeError),
}

fn blank_unit(
    tag: UnitTag,
    header_len: u64,
    declared_length: u64,
    payload_length: u64,
    padded: bool,
) -> ContainerUnit {
    ContainerUnit {
        tag,
        vr: None,
        header_offset: 0,
        header_len,
        declared_length,
        payload_offset: 0,
        payload_length,
        truncated: false,
        extends_to_end: false,
        undefined_length: false,
        padded,
    }
}

fn dicom_unit(tag: UnitTag, vr: Option<[u8; 2]>, header_len: u64, len: u32) -> ContainerUnit {
    let undefined = len == DICOM_UNDEFINED_LENGTH;
    let payload = if undefined { 0 } else { len as u64 };
    let mut unit = blank_unit(tag, header_len, payload, payload, false);
    unit.vr = vr;
    unit.undefined_length = undefined;
    unit
}
