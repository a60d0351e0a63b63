//! HDF5 structural streaming: superblock and root object header.
//!
//! The superblock may sit at offset 0, 512, 1024, 2048 and so on. Versions 0
//! and 1 carry the root group as a symbol table entry; versions 2 and 3 point
//! straight at the root object header.

use std::io;

use log::debug;
use serde::Serialize;

use crate::bits::reader::{read_u16, read_u32, read_u64, read_u8, ByteOrder};
use crate::errors::{DecodeError, DecodeResult};
use crate::metadata::{ContainerDecoder, ContainerFormat, DecodeContext, FieldSet};
use crate::streams::{read_at, SeekableStream};

pub const HDF5_SIGNATURE: &[u8; 8] = b"\x89HDF\r\n\x1a\n";
const UNDEFINED_ADDRESS: u64 = u64::MAX;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum Hdf5Record {
    Superblock {
        offset: u64,
        version: u8,
        size_of_offsets: u8,
        size_of_lengths: u8,
        base_address: u64,
        eof_address: Option<u64>,
        root_object_header_address: Option<u64>,
        consistency_flags: u32,
    },
    RootObjectHeader {
        address: u64,
        version: u8,
        message_count: Option<u16>,
    },
    Error {
        message: String,
    },
}

enum Stage {
    FindSuperblock,
    RootHeader(u64),
    Done,
}

/// Single-pass iterator over the structural records of one HDF5 file.
pub struct Hdf5StructureStream<S: SeekableStream> {
    stream: S,
    stream_len: u64,
    stage: Stage,
}

pub fn stream_hdf5_structure<S: SeekableStream>(mut stream: S) -> io::Result<Hdf5StructureStream<S>> {
    let stream_len = stream.total_len()?;
    Ok(Hdf5StructureStream {
        stream,
        stream_len,
        stage: Stage::FindSuperblock,
    })
}

impl<S: SeekableStream> Hdf5StructureStream<S> {
    fn read_at(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        read_at(&mut self.stream, offset, len)
    }

    fn find_superblock(&mut self) -> io::Result<Option<u64>> {
        let mut offset = 0u64;
        while offset + HDF5_SIGNATURE.len() as u64 <= self.stream_len {
            let sig = self.read_at(offset, HDF5_SIGNATURE.len())?;
            if sig == HDF5_SIGNATURE {
                return Ok(Some(offset));
            }
            offset = if offset == 0 { 512 } else { offset * 2 };
        }
        Ok(None)
    }

    fn step(&mut self) -> io::Result<Option<Hdf5Record>> {
        match std::mem::replace(&mut self.stage, Stage::Done) {
            Stage::FindSuperblock => {
                let Some(offset) = self.find_superblock()? else {
                    return Ok(None);
                };
                debug!("HDF5 superblock at {}", offset);
                let block = self.read_at(offset, 128)?;
                match parse_superblock(&block, offset) {
                    Ok(record) => {
                        if let Hdf5Record::Superblock {
                            base_address,
                            root_object_header_address: Some(root),
                            ..
                        } = record
                        {
                            self.stage = Stage::RootHeader(base_address.saturating_add(root));
                        }
                        Ok(Some(record))
                    }
                    Err(e) => Ok(Some(Hdf5Record::Error {
                        message: format!("superblock: {}", e),
                    })),
                }
            }
            Stage::RootHeader(address) => {
                let header = self.read_at(address, 16)?;
                Ok(Some(match parse_object_header(&header, address) {
                    Ok(record) => record,
                    Err(e) => Hdf5Record::Error {
                        message: format!("root object header: {}", e),
                    },
                }))
            }
            Stage::Done => Ok(None),
        }
    }
}

impl<S: SeekableStream> Iterator for Hdf5StructureStream<S> {
    type Item = io::Result<Hdf5Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.step().transpose()
    }
}

pub struct Hdf5Decoder;

impl ContainerDecoder for Hdf5Decoder {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Hdf5
    }

    fn decode(&self, stream: &mut dyn SeekableStream, _ctx: &DecodeContext) -> io::Result<FieldSet> {
        decode_hdf5(stream)
    }
}

pub fn decode_hdf5(stream: &mut dyn SeekableStream) -> io::Result<FieldSet> {
    let mut fields = FieldSet::new(ContainerFormat::Hdf5);
    let stream_len = stream.total_len()?;
    for record in stream_hdf5_structure(&mut *stream)? {
        match record? {
            Hdf5Record::Superblock {
                offset,
                version,
                size_of_offsets,
                size_of_lengths,
                base_address,
                eof_address,
                root_object_header_address,
                consistency_flags,
            } => {
                fields.mark_valid();
                fields.set("hdf5.superblock_offset", offset);
                fields.set("hdf5.superblock_version", version);
                fields.set("hdf5.size_of_offsets", size_of_offsets);
                fields.set("hdf5.size_of_lengths", size_of_lengths);
                fields.set("hdf5.base_address", base_address);
                fields.set_opt("hdf5.eof_address", eof_address);
                fields.set_opt("hdf5.root_object_header_address", root_object_header_address);
                fields.set("hdf5.consistency_flags", consistency_flags);
                if let Some(eof) = eof_address {
                    let end = base_address.saturating_add(eof);
                    if end > stream_len {
                        fields.record_error(
                            "superblock",
                            DecodeError::truncated(end as usize, stream_len as usize),
                        );
                    }
                }
            }
            Hdf5Record::RootObjectHeader {
                version,
                message_count,
                ..
            } => {
                fields.set("hdf5.root_object_header_version", version);
                fields.set_opt("hdf5.root_message_count", message_count);
            }
            Hdf5Record::Error { message } => {
                // a signature was found even if the superblock is unreadable
                fields.mark_valid();
                fields.record_error("structure", message);
            }
        }
    }
    Ok(fields)
}

fn read_sized(data: &[u8], offset: usize, size: u8) -> DecodeResult<u64> {
    let le = ByteOrder::Little;
    let value = match size {
        2 => read_u16(data, offset, le)? as u64,
        4 => read_u32(data, offset, le)? as u64,
        8 => read_u64(data, offset, le)?,
        other => {
            return Err(DecodeError::unsupported(format!(
                "address size {}",
                other
            )))
        }
    };
    // all ones means "undefined" whatever the width
    let all_ones = if size == 8 { u64::MAX } else { (1u64 << (size as u32 * 8)) - 1 };
    Ok(if value == all_ones { UNDEFINED_ADDRESS } else { value })
}

fn defined(address: u64) -> Option<u64> {
    (address != UNDEFINED_ADDRESS).then_some(address)
}

fn parse_superblock(block: &[u8], offset: u64) -> DecodeResult<Hdf5Record> {
    let version = read_u8(block, 8)?;
    match version {
        0 | 1 => {
            let size_of_offsets = read_u8(block, 13)?;
            let size_of_lengths = read_u8(block, 14)?;
            let consistency_flags = read_u32(block, 20, ByteOrder::Little)?;
            let o = size_of_offsets as usize;
            let addresses = if version == 0 { 24 } else { 28 };
            let base_address = read_sized(block, addresses, size_of_offsets)?;
            let eof_address = read_sized(block, addresses + 2 * o, size_of_offsets)?;
            // root symbol table entry: link name offset, then object header address
            let root_entry = addresses + 4 * o;
            let root = read_sized(block, root_entry + o, size_of_offsets)?;
            Ok(Hdf5Record::Superblock {
                offset,
                version,
                size_of_offsets,
                size_of_lengths,
                base_address: defined(base_address).unwrap_or(0),
                eof_address: defined(eof_address),
                root_object_header_address: defined(root),
                consistency_flags,
            })
        }
        2 | 3 => {
            let size_of_offsets = read_u8(block, 9)?;
            let size_of_lengths = read_u8(block, 10)?;
            let consistency_flags = read_u8(block, 11)? as u32;
            let o = size_of_offsets as usize;
            let base_address = read_sized(block, 12, size_of_offsets)?;
            let eof_address = read_sized(block, 12 + 2 * o, size_of_offsets)?;
            let root = read_sized(block, 12 + 3 * o, size_of_offsets)?;
            Ok(Hdf5Record::Superblock {
                offset,
                version,
                size_of_offsets,
                size_of_lengths,
                base_address: defined(base_address).unwrap_or(0),
                eof_address: defined(eof_address),
                root_object_header_address: defined(root),
                consistency_flags,
            })
        }
        other => Err(DecodeError::unsupported(format!(
            "superblock version {}",
            other
        ))),
    }
}

fn parse_object_header(header: &[u8], address: u64) -> DecodeResult<Hdf5Record> {
    if header.starts_with(b"OHDR") {
        return Ok(Hdf5Record::RootObjectHeader {
            address,
            version: read_u8(header, 4)?,
            message_count: None,
        });
    }
    let version = read_u8(header, 0)?;
    if version != 1 {
        return Err(DecodeError::unsupported(format!(
            "object header version {}",
            version
        )));
    }
    Ok(Hdf5Record::RootObjectHeader {
        address,
        version,
        message_count: Some(read_u16(header, 2, ByteOrder::Little)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn superblock_v0(root: u64) -> Vec<u8> {
        let mut b = HDF5_SIGNATURE.to_vec();
        b.extend_from_slice(&[0, 0, 0, 0, 0, 8, 8, 0]);
        b.extend_from_slice(&4u16.to_le_bytes());
        b.extend_from_slice(&16u16.to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes());
        b.extend_from_slice(&0u64.to_le_bytes()); // base
        b.extend_from_slice(&u64::MAX.to_le_bytes()); // free space
        b.extend_from_slice(&4096u64.to_le_bytes()); // eof
        b.extend_from_slice(&u64::MAX.to_le_bytes()); // driver info
        b.extend_from_slice(&0u64.to_le_bytes()); // link name offset
        b.extend_from_slice(&root.to_le_bytes());
        b
    }

    #[test]
    fn test_v0_superblock_and_root_header() {
        let mut data = superblock_v0(96);
        data.resize(96, 0);
        data.extend_from_slice(&[1, 0, 3, 0, 1, 0, 0, 0]);
        data.resize(4096, 0);

        let records: Vec<Hdf5Record> = stream_hdf5_structure(Cursor::new(data))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0],
            Hdf5Record::Superblock {
                offset: 0,
                version: 0,
                size_of_offsets: 8,
                size_of_lengths: 8,
                base_address: 0,
                eof_address: Some(4096),
                root_object_header_address: Some(96),
                consistency_flags: 0,
            }
        );
        assert_eq!(
            records[1],
            Hdf5Record::RootObjectHeader {
                address: 96,
                version: 1,
                message_count: Some(3),
            }
        );
    }

    #[test]
    fn test_superblock_found_after_user_block() {
        let mut data = vec![0u8; 512];
        let mut sb = HDF5_SIGNATURE.to_vec();
        sb.extend_from_slice(&[2, 8, 8, 0]);
        sb.extend_from_slice(&512u64.to_le_bytes()); // base
        sb.extend_from_slice(&u64::MAX.to_le_bytes()); // extension
        sb.extend_from_slice(&2048u64.to_le_bytes()); // eof
        sb.extend_from_slice(&48u64.to_le_bytes()); // root, relative to base
        data.extend(sb);
        data.resize(560, 0);
        data.extend_from_slice(b"OHDR\x02\x00");
        data.resize(2048, 0);

        let records: Vec<Hdf5Record> = stream_hdf5_structure(Cursor::new(data))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert!(matches!(
            records[0],
            Hdf5Record::Superblock {
                offset: 512,
                version: 2,
                base_address: 512,
                ..
            }
        ));
        assert_eq!(
            records[1],
            Hdf5Record::RootObjectHeader {
                address: 560,
                version: 2,
                message_count: None,
            }
        );
    }

    #[test]
    fn test_not_hdf5() {
        let data = vec![0u8; 5000];
        assert_eq!(stream_hdf5_structure(Cursor::new(data)).unwrap().count(), 0);
    }

    #[test]
    fn test_decoder_fields() {
        let mut data = superblock_v0(96);
        data.resize(96, 0);
        data.extend_from_slice(&[1, 0, 3, 0, 1, 0, 0, 0]);
        data.resize(1024, 0);
        let fields = decode_hdf5(&mut Cursor::new(data)).unwrap();
        assert!(fields.is_valid());
        assert_eq!(fields.get("hdf5.superblock_version").and_then(|v| v.as_u64()), Some(0));
        assert_eq!(fields.get("hdf5.root_object_header_address").and_then(|v| v.as_u64()), Some(96));
        assert_eq!(fields.get("hdf5.root_message_count").and_then(|v| v.as_u64()), Some(3));
        // eof address 4096 but only 1024 bytes present
        assert_eq!(fields.errors().len(), 1);
        assert!(fields.errors()[0].starts_with("superblock: truncated data"));
    }

    #[test]
    fn test_decoder_rejects_other_files() {
        let fields = decode_hdf5(&mut Cursor::new(vec![0u8; 600])).unwrap();
        assert!(!fields.is_valid());
        assert_eq!(fields.fields_extracted(), 0);
    }

    #[test]
    fn test_truncated_superblock_reports_error_record() {
        let mut data = HDF5_SIGNATURE.to_vec();
        data.push(0);
        let records: Vec<_> = stream_hdf5_structure(Cursor::new(data))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert!(matches!(records[0], Hdf5Record::Error { .. }));
    }
}
