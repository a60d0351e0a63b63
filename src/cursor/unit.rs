use std::fmt;

use crate::bits::reader::fourcc_to_string;

/// Identifier of a unit: a four character code for RIFF and ISOBMFF, a
/// group/element pair for DICOM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitTag {
    FourCc([u8; 4]),
    Element { group: u16, element: u16 },
}

impl UnitTag {
    pub fn fourcc(&self) -> Option<&[u8; 4]> {
        match self {
            UnitTag::FourCc(code) => Some(code),
            UnitTag::Element { .. } => None,
        }
    }

    pub fn is(&self, code: &[u8; 4]) -> bool {
        self.fourcc() == Some(code)
    }

    pub fn element(&self) -> Option<(u16, u16)> {
        match self {
            UnitTag::Element { group, element } => Some((*group, *element)),
            UnitTag::FourCc(_) => None,
        }
    }
}

impl fmt::Display for UnitTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitTag::FourCc(code) => f.write_str(&fourcc_to_string(code)),
            UnitTag::Element { group, element } => write!(f, "{:04X},{:04X}", group, element),
        }
    }
}

/// One decoded chunk, box or element header.
///
/// `declared_length` keeps the format's own meaning of the length field: the
/// whole box for ISOBMFF, the payload for RIFF and DICOM. When the unit
/// overruns its enclosing scope it is clamped and `truncated` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerUnit {
    pub tag: UnitTag,
    /// DICOM value representation, explicit VR only.
    pub vr: Option<[u8; 2]>,
    pub header_offset: u64,
    pub header_len: u64,
    pub declared_length: u64,
    pub payload_offset: u64,
    pub payload_length: u64,
    pub truncated: bool,
    /// ISOBMFF `size == 0`: the box runs to the end of the stream.
    pub extends_to_end: bool,
    /// DICOM `0xFFFFFFFF` value length.
    pub undefined_length: bool,
    /// RIFF chunks are padded to an even size.
    pub padded: bool,
}

impl ContainerUnit {
    pub fn payload_end(&self) -> u64 {
        self.payload_offset + self.payload_length
    }

    /// Offset of the first byte after this unit, padding included.
    pub fn end_offset(&self) -> u64 {
        let pad = if self.padded && !self.truncated { 1 } else { 0 };
        self.payload_end() + pad
    }

    pub fn total_length(&self) -> u64 {
        self.header_len + self.payload_length
    }

    pub fn tag_string(&self) -> String {
        self.tag.to_string()
    }

    pub fn vr_string(&self) -> Option<String> {
        self.vr.map(|vr| String::from_utf8_lossy(&vr).into_owned())
    }
}
