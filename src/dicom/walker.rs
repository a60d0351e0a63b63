//! Structural walk over the data elements of a DICOM Part 10 file.
//!
//! The walker never materialises values. It keeps its own position and a
//! stack of open sequences and items, and builds a fresh [`UnitCursor`]
//! bounded by the innermost defined-length item for every header it reads.

use std::io;

use log::{debug, warn};

use crate::config::LimitsConfig;
use crate::cursor::{ContainerUnit, HeaderShape, Step, UnitCursor, DICOM_ITEM_GROUP};
use crate::errors::{DecodeError, DecodeResult};
use crate::metadata::read_head;
use crate::streams::{read_at, SeekableStream};

use super::values::implicit_vr;

pub const PREAMBLE_LEN: usize = 128;
pub const DICM_MAGIC: &[u8; 4] = b"DICM";
/// First byte after the preamble and magic.
pub const DATASET_START: u64 = 132;

pub const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
pub const DEFLATED_EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1.99";
pub const EXPLICIT_VR_BE: &str = "1.2.840.10008.1.2.2";

const META_GROUP: u16 = 0x0002;
const TRANSFER_SYNTAX: (u16, u16) = (0x0002, 0x0010);
const PIXEL_DATA: (u16, u16) = (0x7FE0, 0x0010);
const ITEM: u16 = 0xE000;
const ITEM_DELIMITATION: u16 = 0xE00D;
const SEQUENCE_DELIMITATION: u16 = 0xE0DD;

/// Header of one data element, item or delimiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DicomElement {
    pub group: u16,
    pub element: u16,
    /// Explicit VR, or the dictionary VR for implicit streams when known.
    pub vr: Option<[u8; 2]>,
    /// `None` for undefined length.
    pub length: Option<u64>,
    pub offset: u64,
    pub value_offset: u64,
    pub depth: usize,
    pub truncated: bool,
}

impl DicomElement {
    pub fn tag_string(&self) -> String {
        format!("{:04X},{:04X}", self.group, self.element)
    }

    pub fn vr_string(&self) -> Option<String> {
        self.vr.map(|vr| String::from_utf8_lossy(&vr).into_owned())
    }

    pub fn is_structural(&self) -> bool {
        self.group == DICOM_ITEM_GROUP
    }
}

#[derive(Debug)]
pub enum WalkStep {
    Element(DicomElement),
    End,
    /// Something could not be walked. The walker may or may not continue;
    /// keep calling until `End`.
    Failed(DecodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Sequence,
    Item,
    /// Encapsulated pixel data: items hold fragments, not elements.
    Fragments,
}

#[derive(Debug, Clone, Copy)]
struct Scope {
    kind: ScopeKind,
    end: Option<u64>,
    /// Header shape of the elements inside this scope.
    shape: HeaderShape,
}

pub struct DicomWalker {
    position: u64,
    stream_len: u64,
    shape: HeaderShape,
    in_meta: bool,
    transfer_syntax: Option<String>,
    scopes: Vec<Scope>,
    max_depth: usize,
    max_units: usize,
    elements: usize,
    done: bool,
}

impl DicomWalker {
    /// Check the preamble and `DICM` magic and position the walker at the
    /// file meta group.
    pub fn start(
        stream: &mut dyn SeekableStream,
        limits: &LimitsConfig,
    ) -> io::Result<DecodeResult<Self>> {
        let head = read_head(stream, DATASET_START as usize)?;
        if head.len() < DATASET_START as usize || &head[PREAMBLE_LEN..] != DICM_MAGIC {
            return Ok(Err(DecodeError::NotThisFormat { format: "DICOM" }));
        }
        let stream_len = stream.total_len()?;
        Ok(Ok(Self {
            position: DATASET_START,
            stream_len,
            shape: HeaderShape::DicomExplicitLe,
            in_meta: true,
            transfer_syntax: None,
            scopes: Vec::new(),
            max_depth: limits.max_depth,
            max_units: limits.max_units,
            elements: 0,
            done: false,
        }))
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn transfer_syntax(&self) -> Option<&str> {
        self.transfer_syntax.as_deref()
    }

    pub fn is_implicit(&self) -> bool {
        self.shape == HeaderShape::DicomImplicitLe
    }

    /// Sequences and items still open.
    pub fn open_scopes(&self) -> usize {
        self.scopes.len()
    }

    pub fn next_element(&mut self, stream: &mut dyn SeekableStream) -> io::Result<WalkStep> {
        loop {
            if self.done {
                return Ok(WalkStep::End);
            }
            if self.elements >= self.max_units {
                self.done = true;
                return Ok(WalkStep::Failed(DecodeError::unsupported(format!(
                    "more than {} elements",
                    self.max_units
                ))));
            }
            self.close_finished_items();
            if self.in_meta {
                if let Err(e) = self.leave_meta_if_done(stream)? {
                    self.done = true;
                    return Ok(WalkStep::Failed(e));
                }
            }

            let end = self.scope_end();
            let step = {
                let mut cursor =
                    UnitCursor::with_range(stream, self.current_shape(), self.stream_len, self.position, end);
                cursor.next_unit()?
            };
            match step {
                Step::Unit(unit) => return self.on_unit(stream, unit),
                // leftover bytes at the end of a defined-length item
                Step::End => {
                    if !self.abandon_innermost_item() {
                        self.done = true;
                        return Ok(WalkStep::End);
                    }
                }
                Step::Malformed(e) => {
                    if !self.abandon_innermost_item() {
                        self.done = true;
                    }
                    return Ok(WalkStep::Failed(e));
                }
            }
        }
    }

    fn on_unit(
        &mut self,
        stream: &mut dyn SeekableStream,
        unit: ContainerUnit,
    ) -> io::Result<WalkStep> {
        let (group, element) = unit.tag.element().unwrap_or_default();
        self.elements += 1;
        self.position = unit.end_offset();
        let length = (!unit.undefined_length).then_some(unit.payload_length);
        let mut record = DicomElement {
            group,
            element,
            vr: unit.vr.or_else(|| implicit_vr(group, element)),
            length,
            offset: unit.header_offset,
            value_offset: unit.payload_offset,
            depth: self.scopes.len(),
            truncated: unit.truncated,
        };

        if group == DICOM_ITEM_GROUP {
            match element {
                ITEM => {
                    let parent = self.scopes.last().map(|s| s.kind);
                    let enter = parent != Some(ScopeKind::Fragments)
                        && (length.is_none() || parent.is_some());
                    if enter {
                        let end = length.map(|_| unit.payload_end());
                        let shape = self.current_shape();
                        if let Err(e) = self.push(ScopeKind::Item, end, shape, &unit) {
                            self.done = true;
                            return Ok(WalkStep::Failed(e));
                        }
                    }
                }
                ITEM_DELIMITATION => {
                    if matches!(
                        self.scopes.last(),
                        Some(Scope { kind: ScopeKind::Item, end: None, .. })
                    ) {
                        self.scopes.pop();
                    }
                    record.depth = self.scopes.len();
                }
                SEQUENCE_DELIMITATION => {
                    while let Some(scope) = self.scopes.pop() {
                        if scope.kind != ScopeKind::Item {
                            break;
                        }
                    }
                    record.depth = self.scopes.len();
                }
                _ => {}
            }
            return Ok(WalkStep::Element(record));
        }

        if self.in_meta && (group, element) == TRANSFER_SYNTAX {
            let raw = read_at(stream, unit.payload_offset, unit.payload_length.min(64) as usize)?;
            let uid = String::from_utf8_lossy(&raw)
                .trim_end_matches(['\0', ' '])
                .to_string();
            debug!("DICOM transfer syntax {}", uid);
            self.transfer_syntax = Some(uid);
        }

        if unit.undefined_length {
            let kind = if (group, element) == PIXEL_DATA {
                ScopeKind::Fragments
            } else {
                ScopeKind::Sequence
            };
            // undefined-length UN contents are always implicit VR little endian
            let shape = if unit.vr == Some(*b"UN") {
                HeaderShape::DicomImplicitLe
            } else {
                self.current_shape()
            };
            if let Err(e) = self.push(kind, None, shape, &unit) {
                self.done = true;
                return Ok(WalkStep::Failed(e));
            }
        }
        Ok(WalkStep::Element(record))
    }

    fn push(
        &mut self,
        kind: ScopeKind,
        end: Option<u64>,
        shape: HeaderShape,
        unit: &ContainerUnit,
    ) -> DecodeResult<()> {
        if self.scopes.len() >= self.max_depth {
            warn!("DICOM nesting deeper than {} at {}", self.max_depth, unit.header_offset);
            if end.is_none() {
                return Err(DecodeError::unsupported(format!(
                    "nesting deeper than {} levels",
                    self.max_depth
                )));
            }
            // defined length: skip over it
            return Ok(());
        }
        self.scopes.push(Scope { kind, end, shape });
        self.position = unit.payload_offset;
        Ok(())
    }

    /// Resume after the innermost defined-length item, closing everything
    /// opened inside it. Returns `false` when no such item is open.
    fn abandon_innermost_item(&mut self) -> bool {
        let innermost = self
            .scopes
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, s)| s.end.map(|end| (i, end)));
        match innermost {
            Some((i, end)) => {
                self.position = end;
                self.scopes.truncate(i);
                true
            }
            None => false,
        }
    }

    fn close_finished_items(&mut self) {
        while let Some(Scope { end: Some(end), .. }) = self.scopes.last() {
            if self.position < *end {
                break;
            }
            self.scopes.pop();
        }
    }

    fn current_shape(&self) -> HeaderShape {
        self.scopes.last().map_or(self.shape, |s| s.shape)
    }

    fn scope_end(&self) -> u64 {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.end)
            .unwrap_or(self.stream_len)
    }

    /// Switch to the dataset encoding once the next element is outside the
    /// meta group.
    fn leave_meta_if_done(&mut self, stream: &mut dyn SeekableStream) -> io::Result<DecodeResult<()>> {
        let group = read_at(stream, self.position, 2)?;
        if group.len() == 2 && u16::from_le_bytes([group[0], group[1]]) == META_GROUP {
            return Ok(Ok(()));
        }
        self.in_meta = false;
        let shape = match self.transfer_syntax.as_deref() {
            Some(IMPLICIT_VR_LE) => HeaderShape::DicomImplicitLe,
            Some(EXPLICIT_VR_BE) => {
                return Ok(Err(DecodeError::unsupported(
                    "explicit VR big endian transfer syntax",
                )))
            }
            Some(DEFLATED_EXPLICIT_VR_LE) => {
                return Ok(Err(DecodeError::unsupported("deflated transfer syntax")))
            }
            _ => HeaderShape::DicomExplicitLe,
        };
        debug!("DICOM dataset at {} as {:?}", self.position, shape);
        self.shape = shape;
        Ok(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn structural(element: u16, length: u32) -> Vec<u8> {
        let mut out = DICOM_ITEM_GROUP.to_le_bytes().to_vec();
        out.extend_from_slice(&element.to_le_bytes());
        out.extend_from_slice(&length.to_le_bytes());
        out
    }

    fn file(transfer_syntax: &str, dataset: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; PREAMBLE_LEN];
        out.extend_from_slice(DICM_MAGIC);
        let mut uid = transfer_syntax.as_bytes().to_vec();
        if uid.len() % 2 == 1 {
            uid.push(0);
        }
        out.extend(explicit(0x0002, 0x0010, b"UI", &uid));
        out.extend_from_slice(dataset);
        out
    }

    fn walk(data: Vec<u8>) -> (Vec<DicomElement>, Vec<DecodeError>, DicomWalker) {
        let mut stream = Cursor::new(data);
        let mut walker = DicomWalker::start(&mut stream, &LimitsConfig::default())
            .unwrap()
            .unwrap();
        let mut elements = Vec::new();
        let mut errors = Vec::new();
        loop {
            match walker.next_element(&mut stream).unwrap() {
                WalkStep::Element(e) => elements.push(e),
                WalkStep::Failed(e) => errors.push(e),
                WalkStep::End => break,
            }
        }
        (elements, errors, walker)
    }

    #[test]
    fn test_not_dicom() {
        let mut stream = Cursor::new(vec![0u8; 200]);
        let started = DicomWalker::start(&mut stream, &LimitsConfig::default()).unwrap();
        assert!(matches!(started, Err(DecodeError::NotThisFormat { .. })));
    }

    #[test]
    fn test_explicit_dataset() {
        let mut dataset = explicit(0x0010, 0x0010, b"PN", b"DOE^J ");
        dataset.extend(explicit(0x0028, 0x0010, b"US", &512u16.to_le_bytes()));
        let (elements, errors, walker) = walk(file(EXPLICIT_VR_LE, &dataset));
        assert!(errors.is_empty());
        let tags: Vec<String> = elements.iter().map(DicomElement::tag_string).collect();
        assert_eq!(tags, vec!["0002,0010", "0010,0010", "0028,0010"]);
        assert_eq!(walker.transfer_syntax(), Some(EXPLICIT_VR_LE));
        assert!(!walker.is_implicit());
        assert_eq!(elements[1].offset, DATASET_START + 8 + 20);
        assert_eq!(elements[2].length, Some(2));
    }

    #[test]
    fn test_implicit_dataset_uses_dictionary_vr() {
        let mut dataset = Vec::new();
        dataset.extend_from_slice(&[0x28, 0x00, 0x11, 0x00]);
        dataset.extend_from_slice(&2u32.to_le_bytes());
        dataset.extend_from_slice(&256u16.to_le_bytes());
        let (elements, errors, walker) = walk(file(IMPLICIT_VR_LE, &dataset));
        assert!(errors.is_empty());
        assert!(walker.is_implicit());
        assert_eq!(elements[1].vr, Some(*b"US"));
        assert_eq!(elements[1].value_offset, elements[1].offset + 8);
    }

    #[test]
    fn test_undefined_length_sequence_depths() {
        let mut dataset = Vec::new();
        dataset.extend_from_slice(&[0x54, 0x00, 0x20, 0x02, b'S', b'Q', 0, 0]);
        dataset.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        dataset.extend(structural(ITEM, 0xFFFF_FFFF));
        dataset.extend(explicit(0x0008, 0x0104, b"LO", b"CC"));
        dataset.extend(structural(ITEM_DELIMITATION, 0));
        dataset.extend(structural(SEQUENCE_DELIMITATION, 0));
        dataset.extend(explicit(0x0008, 0x0060, b"CS", b"MG"));

        let (elements, errors, walker) = walk(file(EXPLICIT_VR_LE, &dataset));
        assert!(errors.is_empty());
        let depths: Vec<(String, usize)> =
            elements.iter().map(|e| (e.tag_string(), e.depth)).collect();
        assert_eq!(
            depths,
            vec![
                ("0002,0010".to_string(), 0),
                ("0054,0220".to_string(), 0),
                ("FFFE,E000".to_string(), 1),
                ("0008,0104".to_string(), 2),
                ("FFFE,E00D".to_string(), 1),
                ("FFFE,E0DD".to_string(), 0),
                ("0008,0060".to_string(), 0),
            ]
        );
        assert_eq!(elements[1].length, None);
        assert_eq!(walker.open_scopes(), 0);
    }

    #[test]
    fn test_undefined_length_un_contents_are_implicit() {
        let mut dataset = vec![0x09, 0x00, 0x10, 0x10, b'U', b'N', 0, 0];
        dataset.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        dataset.extend(structural(ITEM, 0xFFFF_FFFF));
        // implicit header: tag then a 4-byte length
        dataset.extend_from_slice(&[0x09, 0x00, 0x11, 0x10]);
        dataset.extend_from_slice(&4u32.to_le_bytes());
        dataset.extend_from_slice(b"ABCD");
        dataset.extend(structural(ITEM_DELIMITATION, 0));
        dataset.extend(structural(SEQUENCE_DELIMITATION, 0));
        dataset.extend(explicit(0x0008, 0x0060, b"CS", b"MG"));

        let (elements, errors, walker) = walk(file(EXPLICIT_VR_LE, &dataset));
        assert!(errors.is_empty(), "{:?}", errors);
        let tags: Vec<(String, usize)> =
            elements.iter().map(|e| (e.tag_string(), e.depth)).collect();
        assert_eq!(
            tags,
            vec![
                ("0002,0010".to_string(), 0),
                ("0009,1010".to_string(), 0),
                ("FFFE,E000".to_string(), 1),
                ("0009,1011".to_string(), 2),
                ("FFFE,E00D".to_string(), 1),
                ("FFFE,E0DD".to_string(), 0),
                ("0008,0060".to_string(), 0),
            ]
        );
        assert_eq!(elements[3].length, Some(4));
        assert_eq!(elements[6].vr, Some(*b"CS"));
        assert!(!walker.is_implicit());
        assert_eq!(walker.open_scopes(), 0);
    }

    #[test]
    fn test_defined_length_sequence_is_skipped() {
        let mut item = structural(ITEM, 10);
        item.extend(explicit(0x0008, 0x0104, b"LO", b"CC"));
        let mut dataset = explicit(0x0054, 0x0220, b"SQ", &item);
        dataset.extend(explicit(0x0008, 0x0060, b"CS", b"MG"));
        let (elements, _, _) = walk(file(EXPLICIT_VR_LE, &dataset));
        let tags: Vec<String> = elements.iter().map(DicomElement::tag_string).collect();
        assert_eq!(tags, vec!["0002,0010", "0054,0220", "0008,0060"]);
    }

    #[test]
    fn test_encapsulated_pixel_data_fragments_not_walked() {
        let mut dataset = vec![0xE0, 0x7F, 0x10, 0x00, b'O', b'B', 0, 0];
        dataset.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        dataset.extend(structural(ITEM, 0));
        let mut fragment = structural(ITEM, 8);
        // fragment bytes that would parse as an element header
        fragment.extend_from_slice(&[0x10, 0x00, 0x10, 0x00, b'P', b'N', 0, 0]);
        dataset.extend(fragment);
        dataset.extend(structural(SEQUENCE_DELIMITATION, 0));
        let (elements, errors, walker) = walk(file(EXPLICIT_VR_LE, &dataset));
        assert!(errors.is_empty());
        assert_eq!(elements.len(), 5);
        assert!(elements.iter().all(|e| e.group != 0x0010));
        assert_eq!(walker.open_scopes(), 0);
    }

    #[test]
    fn test_big_endian_is_unsupported() {
        let dataset = explicit(0x0010, 0x0010, b"PN", b"DOE ");
        let (elements, errors, _) = walk(file(EXPLICIT_VR_BE, &dataset));
        assert_eq!(elements.len(), 1);
        assert!(matches!(errors[0], DecodeError::UnsupportedVariant(_)));
    }

    #[test]
    fn test_unclosed_sequence_left_open() {
        let mut dataset = vec![0x54, 0x00, 0x20, 0x02, b'S', b'Q', 0, 0];
        dataset.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        dataset.extend(structural(ITEM, 0xFFFF_FFFF));
        let (_, _, walker) = walk(file(EXPLICIT_VR_LE, &dataset));
        assert_eq!(walker.open_scopes(), 2);
    }
}
