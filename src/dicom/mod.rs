//! DICOM Part 10: preamble, file meta group and a structural walk of the
//! dataset with bounded inline values.

pub mod values;
pub mod walker;

use std::io;

use log::debug;

use crate::errors::DecodeError;
use crate::metadata::{ContainerDecoder, ContainerFormat, DecodeContext, FieldSet, TagDictionary};
use crate::streams::{read_at, SeekableStream};

pub use self::walker::{DicomElement, DicomWalker, WalkStep};

use self::values::{decode_value, known_tag, value_kind, ValueKind};

const PIXEL_DATA: (u16, u16) = (0x7FE0, 0x0010);

pub struct DicomDecoder;

impl ContainerDecoder for DicomDecoder {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Dicom
    }

    fn decode(&self, stream: &mut dyn SeekableStream, ctx: &DecodeContext) -> io::Result<FieldSet> {
        decode_dicom(stream, ctx)
    }
}

/// Field key for a tag: the configured dictionary, the built-in names, then
/// the bare `gggg,eeee` pair.
pub fn tag_key(names: Option<&TagDictionary>, group: u16, element: u16) -> String {
    names
        .and_then(|d| d.name(group, element))
        .or_else(|| known_tag(group, element).map(|t| t.name))
        .map_or_else(|| format!("{:04X},{:04X}", group, element), str::to_string)
}

pub fn decode_dicom(stream: &mut dyn SeekableStream, ctx: &DecodeContext) -> io::Result<FieldSet> {
    let mut fields = FieldSet::new(ContainerFormat::Dicom);
    let mut walker = match DicomWalker::start(stream, &ctx.limits)? {
        Ok(walker) => walker,
        Err(e) => {
            debug!("{}", e);
            return Ok(fields);
        }
    };
    fields.mark_valid();
    let names = ctx.dictionary(ContainerFormat::Dicom);

    let mut element_count = 0usize;
    let mut max_depth = 0usize;
    loop {
        let element = match walker.next_element(stream)? {
            WalkStep::End => break,
            WalkStep::Failed(e) => {
                fields.record_error(format!("element at {}", walker.position()), e);
                continue;
            }
            WalkStep::Element(element) => element,
        };
        element_count += 1;
        max_depth = max_depth.max(element.depth);
        if element.truncated {
            fields.record_error(
                element.tag_string(),
                DecodeError::MalformedLength {
                    declared: element.length.unwrap_or_default(),
                    reason: "value runs past the end of the file",
                },
            );
        }
        // values inside sequences would collide on their keys
        if element.is_structural() || element.depth > 0 {
            continue;
        }
        if (element.group, element.element) == PIXEL_DATA {
            fields.set("dicom.pixel_data_offset", element.value_offset);
            match element.length {
                Some(length) => fields.set("dicom.pixel_data_length", length),
                None => fields.set("dicom.pixel_data_encapsulated", true),
            }
            continue;
        }
        decode_inline(stream, ctx, names, &element, &mut fields)?;
    }

    fields.set("dicom.element_count", element_count);
    fields.set("dicom.max_depth", max_depth);
    fields.set_opt("dicom.transfer_syntax", walker.transfer_syntax());
    fields.set("dicom.implicit_vr", walker.is_implicit());
    if walker.open_scopes() > 0 {
        fields.record_error(
            "dataset",
            DecodeError::MalformedLength {
                declared: u32::MAX as u64,
                reason: "undefined-length sequence not closed before the end of the file",
            },
        );
    }
    Ok(fields)
}

fn decode_inline(
    stream: &mut dyn SeekableStream,
    ctx: &DecodeContext,
    names: Option<&TagDictionary>,
    element: &DicomElement,
    fields: &mut FieldSet,
) -> io::Result<()> {
    let (Some(vr), Some(length)) = (element.vr, element.length) else {
        return Ok(());
    };
    if value_kind(&vr) == ValueKind::Opaque || length > ctx.limits.max_inline_value as u64 {
        return Ok(());
    }
    let raw = read_at(stream, element.value_offset, length as usize)?;
    let key = tag_key(names, element.group, element.element);
    match decode_value(&vr, &raw) {
        Ok(value) => fields.set_opt(key, value),
        Err(e) => fields.record_error(key, e),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::walker::{EXPLICIT_VR_BE, EXPLICIT_VR_LE, IMPLICIT_VR_LE, PREAMBLE_LEN};
    use super::*;
    use crate::config::LimitsConfig;
    use crate::metadata::FieldValue;
    use std::io::Cursor;

    fn explicit(group: u16, element: u16, vr: &[u8; 2], value: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&group.to_le_bytes());
        out.extend_from_slice(&element.to_le_bytes());
        out.extend_from_slice(vr);
        if crate::cursor::LONG_LENGTH_VRS.contains(&vr) {
            out.extend_from_slice(&[0, 0]);
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        } else {
            out.extend_from_slice(&(value.len() as u16).to_le_bytes());
        }
        out.extend_from_slice(value);
        out
    }

    fn implicit(group: u16, element: u16, value: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&group.to_le_bytes());
        out.extend_from_slice(&element.to_le_bytes());
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        out.extend_from_slice(value);
        out
    }

    fn file(transfer_syntax: &str, dataset: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; PREAMBLE_LEN];
        out.extend_from_slice(b"DICM");
        let mut uid = transfer_syntax.as_bytes().to_vec();
        if uid.len() % 2 == 1 {
            uid.push(0);
        }
        out.extend(explicit(0x0002, 0x0010, b"UI", &uid));
        out.extend_from_slice(dataset);
        out
    }

    fn decode(bytes: Vec<u8>, ctx: &DecodeContext) -> FieldSet {
        decode_dicom(&mut Cursor::new(bytes), ctx).unwrap()
    }

    #[test]
    fn test_explicit_values() {
        let mut dataset = explicit(0x0008, 0x0060, b"CS", b"MG");
        dataset.extend(explicit(0x0010, 0x0010, b"PN", b"DOE^JANE"));
        dataset.extend(explicit(0x0028, 0x0010, b"US", &3328u16.to_le_bytes()));
        dataset.extend(explicit(0x0028, 0x0030, b"DS", b"0.07\\0.07 "));
        dataset.extend(explicit(0x0009, 0x1001, b"LO", b"private"));
        dataset.extend(explicit(0x7FE0, 0x0010, b"OW", &[0u8; 16]));
        let fields = decode(file(EXPLICIT_VR_LE, &dataset), &DecodeContext::default());

        assert!(fields.is_valid());
        assert!(fields.errors().is_empty(), "{:?}", fields.errors());
        assert_eq!(fields.get("TransferSyntaxUID").and_then(FieldValue::as_str), Some(EXPLICIT_VR_LE));
        assert_eq!(fields.get("Modality").and_then(FieldValue::as_str), Some("MG"));
        assert_eq!(fields.get("PatientName").and_then(FieldValue::as_str), Some("DOE^JANE"));
        assert_eq!(fields.get("Rows"), Some(&FieldValue::UInt(3328)));
        assert_eq!(fields.get("PixelSpacing"), Some(&FieldValue::from(vec!["0.07", "0.07"])));
        assert_eq!(fields.get("0009,1001").and_then(FieldValue::as_str), Some("private"));
        assert_eq!(fields.get("dicom.pixel_data_length"), Some(&FieldValue::UInt(16)));
        assert_eq!(fields.get("dicom.element_count"), Some(&FieldValue::UInt(7)));
        assert_eq!(fields.get("dicom.implicit_vr"), Some(&FieldValue::Bool(false)));
    }

    #[test]
    fn test_implicit_dataset() {
        let mut dataset = implicit(0x0008, 0x0060, b"CT");
        dataset.extend(implicit(0x0028, 0x0011, &512u16.to_le_bytes()));
        // unknown tag, no VR to decode with
        dataset.extend(implicit(0x0011, 0x0010, b"ABCD"));
        let fields = decode(file(IMPLICIT_VR_LE, &dataset), &DecodeContext::default());
        assert_eq!(fields.get("dicom.implicit_vr"), Some(&FieldValue::Bool(true)));
        assert_eq!(fields.get("Modality").and_then(FieldValue::as_str), Some("CT"));
        assert_eq!(fields.get("Columns"), Some(&FieldValue::UInt(512)));
        assert!(!fields.contains("0011,0010"));
        assert_eq!(fields.get("dicom.element_count"), Some(&FieldValue::UInt(4)));
    }

    #[test]
    fn test_dictionary_names_take_precedence() {
        let mut names = TagDictionary::new();
        names.insert(0x0010, 0x0010, "PatientsName");
        names.insert(0x0009, 0x1001, "VendorNote");
        let ctx = DecodeContext::default().with_dictionary(ContainerFormat::Dicom, names);
        let mut dataset = explicit(0x0009, 0x1001, b"LO", b"note");
        dataset.extend(explicit(0x0010, 0x0010, b"PN", b"DOE"));
        let fields = decode(file(EXPLICIT_VR_LE, &dataset), &ctx);
        assert_eq!(fields.get("VendorNote").and_then(FieldValue::as_str), Some("note"));
        assert_eq!(fields.get("PatientsName").and_then(FieldValue::as_str), Some("DOE"));
        assert!(!fields.contains("PatientName"));
    }

    #[test]
    fn test_long_values_not_inlined() {
        let ctx = DecodeContext::new(LimitsConfig {
            max_inline_value: 4,
            ..LimitsConfig::default()
        });
        let dataset = explicit(0x0008, 0x1030, b"LO", b"SCREENING MAMMO");
        let fields = decode(file(EXPLICIT_VR_LE, &dataset), &ctx);
        assert!(!fields.contains("StudyDescription"));
        assert_eq!(fields.get("dicom.element_count"), Some(&FieldValue::UInt(2)));
    }

    #[test]
    fn test_sequence_depth_and_nested_values_skipped() {
        let mut dataset = vec![0x54, 0x00, 0x20, 0x02, b'S', b'Q', 0, 0];
        dataset.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        dataset.extend_from_slice(&[0xFE, 0xFF, 0x00, 0xE0, 0xFF, 0xFF, 0xFF, 0xFF]);
        dataset.extend(explicit(0x0008, 0x0104, b"LO", b"cranio-caudal"));
        dataset.extend_from_slice(&[0xFE, 0xFF, 0x0D, 0xE0, 0, 0, 0, 0]);
        dataset.extend_from_slice(&[0xFE, 0xFF, 0xDD, 0xE0, 0, 0, 0, 0]);
        let fields = decode(file(EXPLICIT_VR_LE, &dataset), &DecodeContext::default());
        assert_eq!(fields.get("dicom.max_depth"), Some(&FieldValue::UInt(2)));
        assert!(!fields.contains("CodeMeaning"));
        assert!(fields.errors().is_empty());
    }

    #[test]
    fn test_values_after_private_un_sequence() {
        let mut dataset = vec![0x09, 0x00, 0x10, 0x10, b'U', b'N', 0, 0];
        dataset.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        dataset.extend_from_slice(&[0xFE, 0xFF, 0x00, 0xE0, 0xFF, 0xFF, 0xFF, 0xFF]);
        dataset.extend(implicit(0x0009, 0x1011, b"VENDOR"));
        dataset.extend_from_slice(&[0xFE, 0xFF, 0x0D, 0xE0, 0, 0, 0, 0]);
        dataset.extend_from_slice(&[0xFE, 0xFF, 0xDD, 0xE0, 0, 0, 0, 0]);
        dataset.extend(explicit(0x0008, 0x0060, b"CS", b"MG"));
        let fields = decode(file(EXPLICIT_VR_LE, &dataset), &DecodeContext::default());
        assert!(fields.errors().is_empty(), "{:?}", fields.errors());
        assert_eq!(fields.get("Modality").and_then(FieldValue::as_str), Some("MG"));
        assert_eq!(fields.get("dicom.implicit_vr"), Some(&FieldValue::Bool(false)));
        assert_eq!(fields.get("dicom.max_depth"), Some(&FieldValue::UInt(2)));
    }

    #[test]
    fn test_bad_value_is_recorded_and_walk_continues() {
        let mut dataset = explicit(0x0028, 0x0010, b"US", &[1, 2, 3]);
        dataset.extend(explicit(0x0028, 0x0011, b"US", &64u16.to_le_bytes()));
        let fields = decode(file(EXPLICIT_VR_LE, &dataset), &DecodeContext::default());
        assert!(!fields.contains("Rows"));
        assert_eq!(fields.get("Columns"), Some(&FieldValue::UInt(64)));
        assert!(fields.errors()[0].starts_with("Rows: malformed length 3"));
    }

    #[test]
    fn test_big_endian_stops_after_meta() {
        let dataset = explicit(0x0010, 0x0010, b"PN", b"DOE ");
        let fields = decode(file(EXPLICIT_VR_BE, &dataset), &DecodeContext::default());
        assert!(fields.is_valid());
        assert!(!fields.contains("PatientName"));
        assert!(fields.errors()[0].contains("big endian"));
    }

    #[test]
    fn test_truncated_value() {
        let mut bytes = file(EXPLICIT_VR_LE, &explicit(0x0010, 0x0010, b"PN", b"DOE^JANE"));
        bytes.truncate(bytes.len() - 3);
        let fields = decode(bytes, &DecodeContext::default());
        assert!(fields.errors()[0].starts_with("0010,0010: malformed length"));
        assert_eq!(fields.get("PatientName").and_then(FieldValue::as_str), Some("DOE^J"));
    }

    #[test]
    fn test_not_dicom() {
        let fields = decode(vec![0u8; 300], &DecodeContext::default());
        assert!(!fields.is_valid());
        assert_eq!(fields.fields_extracted(), 0);
    }
}
