//! Bounded decoding of short element values, dispatched on the VR.

use crate::bits::reader::{read_f32, read_f64, read_i16, read_i32, read_u16, read_u32, ByteOrder};
use crate::errors::{DecodeError, DecodeResult};
use crate::metadata::FieldValue;

const LE: ByteOrder = ByteOrder::Little;

/// How the bytes of a value are turned into a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Backslash separated text, trailing spaces and NULs trimmed.
    Text,
    /// Single free-text value; backslashes are literal.
    LongText,
    U16,
    U32,
    I16,
    I32,
    F32,
    F64,
    /// Attribute tag pairs.
    Tag,
    /// Binary or nested data, never decoded inline.
    Opaque,
}

pub fn value_kind(vr: &[u8; 2]) -> ValueKind {
    match vr {
        b"AE" | b"AS" | b"CS" | b"DA" | b"DS" | b"DT" | b"IS" | b"LO" | b"PN" | b"SH" | b"TM"
        | b"UC" | b"UI" => ValueKind::Text,
        b"LT" | b"ST" | b"UR" | b"UT" => ValueKind::LongText,
        b"US" => ValueKind::U16,
        b"UL" => ValueKind::U32,
        b"SS" => ValueKind::I16,
        b"SL" => ValueKind::I32,
        b"FL" => ValueKind::F32,
        b"FD" => ValueKind::F64,
        b"AT" => ValueKind::Tag,
        _ => ValueKind::Opaque,
    }
}

/// Decode `raw` as a value of `vr`. Multi-valued elements become lists.
/// Returns `Ok(None)` for VRs that are not decoded inline.
pub fn decode_value(vr: &[u8; 2], raw: &[u8]) -> DecodeResult<Option<FieldValue>> {
    let kind = value_kind(vr);
    let value = match kind {
        ValueKind::Opaque => return Ok(None),
        ValueKind::Text => {
            let text = trim_value(raw);
            let mut parts: Vec<String> = text.split('\\').map(|s| s.trim().to_string()).collect();
            if parts.len() == 1 {
                FieldValue::Text(parts.remove(0))
            } else {
                FieldValue::from(parts)
            }
        }
        ValueKind::LongText => FieldValue::Text(trim_value(raw)),
        ValueKind::Tag => {
            let tags = numbers(raw, 4, |p, at| {
                Ok(FieldValue::Text(format!(
                    "{:04X},{:04X}",
                    read_u16(p, at, LE)?,
                    read_u16(p, at + 2, LE)?
                )))
            })?;
            collapse(tags)
        }
        ValueKind::U16 => collapse(numbers(raw, 2, |p, at| Ok(read_u16(p, at, LE)?.into()))?),
        ValueKind::U32 => collapse(numbers(raw, 4, |p, at| Ok(read_u32(p, at, LE)?.into()))?),
        ValueKind::I16 => collapse(numbers(raw, 2, |p, at| Ok(read_i16(p, at, LE)?.into()))?),
        ValueKind::I32 => collapse(numbers(raw, 4, |p, at| Ok(read_i32(p, at, LE)?.into()))?),
        ValueKind::F32 => collapse(numbers(raw, 4, |p, at| Ok(read_f32(p, at, LE)?.into()))?),
        ValueKind::F64 => collapse(numbers(raw, 8, |p, at| Ok(read_f64(p, at, LE)?.into()))?),
    };
    Ok(Some(value))
}

fn trim_value(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\0', ' '])
        .trim_start()
        .to_string()
}

fn numbers(
    raw: &[u8],
    width: usize,
    read: impl Fn(&[u8], usize) -> DecodeResult<FieldValue>,
) -> DecodeResult<Vec<FieldValue>> {
    if raw.len() % width != 0 {
        return Err(DecodeError::MalformedLength {
            declared: raw.len() as u64,
            reason: "value length is not a multiple of the VR width",
        });
    }
    (0..raw.len() / width).map(|i| read(raw, i * width)).collect()
}

fn collapse(mut values: Vec<FieldValue>) -> FieldValue {
    if values.len() == 1 {
        values.remove(0)
    } else {
        FieldValue::List(values)
    }
}

/// Well-known tag: name and the VR used when the stream does not carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownTag {
    pub group: u16,
    pub element: u16,
    pub name: &'static str,
    pub vr: [u8; 2],
}

const fn known(group: u16, element: u16, name: &'static str, vr: &[u8; 2]) -> KnownTag {
    KnownTag {
        group,
        element,
        name,
        vr: *vr,
    }
}

/// Sorted by (group, element).
const KNOWN_TAGS: &[KnownTag] = &[
    known(0x0002, 0x0000, "FileMetaInformationGroupLength", b"UL"),
    known(0x0002, 0x0001, "FileMetaInformationVersion", b"OB"),
    known(0x0002, 0x0002, "MediaStorageSOPClassUID", b"UI"),
    known(0x0002, 0x0003, "MediaStorageSOPInstanceUID", b"UI"),
    known(0x0002, 0x0010, "TransferSyntaxUID", b"UI"),
    known(0x0002, 0x0012, "ImplementationClassUID", b"UI"),
    known(0x0002, 0x0013, "ImplementationVersionName", b"SH"),
    known(0x0008, 0x0008, "ImageType", b"CS"),
    known(0x0008, 0x0016, "SOPClassUID", b"UI"),
    known(0x0008, 0x0018, "SOPInstanceUID", b"UI"),
    known(0x0008, 0x0020, "StudyDate", b"DA"),
    known(0x0008, 0x0023, "ContentDate", b"DA"),
    known(0x0008, 0x0030, "StudyTime", b"TM"),
    known(0x0008, 0x0050, "AccessionNumber", b"SH"),
    known(0x0008, 0x0060, "Modality", b"CS"),
    known(0x0008, 0x0068, "PresentationIntentType", b"CS"),
    known(0x0008, 0x0070, "Manufacturer", b"LO"),
    known(0x0008, 0x0080, "InstitutionName", b"LO"),
    known(0x0008, 0x0081, "InstitutionAddress", b"ST"),
    known(0x0008, 0x0104, "CodeMeaning", b"LO"),
    known(0x0008, 0x1030, "StudyDescription", b"LO"),
    known(0x0008, 0x103E, "SeriesDescription", b"LO"),
    known(0x0008, 0x1090, "ManufacturerModelName", b"LO"),
    known(0x0010, 0x0010, "PatientName", b"PN"),
    known(0x0010, 0x0020, "PatientID", b"LO"),
    known(0x0010, 0x0030, "PatientBirthDate", b"DA"),
    known(0x0010, 0x0040, "PatientSex", b"CS"),
    known(0x0010, 0x1010, "PatientAge", b"AS"),
    known(0x0018, 0x0015, "BodyPartExamined", b"CS"),
    known(0x0018, 0x0050, "SliceThickness", b"DS"),
    known(0x0018, 0x1012, "AcquisitionDate", b"DA"),
    known(0x0018, 0x1020, "SoftwareVersions", b"LO"),
    known(0x0018, 0x1164, "ImagerPixelSpacing", b"DS"),
    known(0x0018, 0x5101, "ViewPosition", b"CS"),
    known(0x0020, 0x000D, "StudyInstanceUID", b"UI"),
    known(0x0020, 0x000E, "SeriesInstanceUID", b"UI"),
    known(0x0020, 0x0010, "StudyID", b"SH"),
    known(0x0020, 0x0013, "InstanceNumber", b"IS"),
    known(0x0020, 0x0020, "PatientOrientation", b"CS"),
    known(0x0020, 0x0060, "Laterality", b"CS"),
    known(0x0020, 0x0062, "ImageLaterality", b"CS"),
    known(0x0028, 0x0002, "SamplesPerPixel", b"US"),
    known(0x0028, 0x0004, "PhotometricInterpretation", b"CS"),
    known(0x0028, 0x0008, "NumberOfFrames", b"IS"),
    known(0x0028, 0x0010, "Rows", b"US"),
    known(0x0028, 0x0011, "Columns", b"US"),
    known(0x0028, 0x0030, "PixelSpacing", b"DS"),
    known(0x0028, 0x0100, "BitsAllocated", b"US"),
    known(0x0028, 0x0101, "BitsStored", b"US"),
    known(0x0028, 0x0102, "HighBit", b"US"),
    known(0x0028, 0x0103, "PixelRepresentation", b"US"),
    known(0x0054, 0x0220, "ViewCodeSequence", b"SQ"),
    known(0x7FE0, 0x0010, "PixelData", b"OW"),
];

pub fn known_tag(group: u16, element: u16) -> Option<&'static KnownTag> {
    KNOWN_TAGS
        .binary_search_by_key(&(group, element), |t| (t.group, t.element))
        .ok()
        .map(|i| &KNOWN_TAGS[i])
}

/// Group-length elements `(gggg,0000)` are always UL.
pub fn implicit_vr(group: u16, element: u16) -> Option<[u8; 2]> {
    if element == 0x0000 {
        return Some(*b"UL");
    }
    known_tag(group, element).map(|t| t.vr)
}
