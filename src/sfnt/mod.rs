//! TrueType / OpenType fonts: offset table, table directory, and the
//! fixed-layout tables reached through it.

pub mod directory;
pub mod name;
pub mod tables;

use std::io;

use log::debug;

use crate::bits::reader::fourcc_to_string;
use crate::errors::{DecodeError, DecodeResult};
use crate::metadata::{read_head, ContainerDecoder, ContainerFormat, DecodeContext, FieldSet};
use crate::streams::{read_at, SeekableStream};

use self::directory::{
    check_bounds, parse_collection_header, parse_directory, parse_offset_table, OffsetTable,
    ScalerType, TableDirectoryEntry, OFFSET_TABLE_LEN, TABLE_RECORD_LEN,
};
use self::name::{decode_names, parse_name_records};
use self::tables::{
    cmap_record_count, decode_head, decode_hhea, decode_maxp, decode_os2, decode_post,
    parse_cmap_header, table_read_len, CMAP_RECORD_LEN,
};

/// Largest `name` table read.
const MAX_NAME_TABLE: usize = 256 * 1024;
/// Encoding records read from `cmap`.
const MAX_CMAP_RECORDS: usize = 64;

pub struct SfntDecoder;

impl ContainerDecoder for SfntDecoder {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Sfnt
    }

    fn decode(&self, stream: &mut dyn SeekableStream, ctx: &DecodeContext) -> io::Result<FieldSet> {
        decode_sfnt(stream, ctx)
    }
}

/// Offset table plus the directory records the file actually holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    pub offset_table: OffsetTable,
    pub entries: Vec<TableDirectoryEntry>,
    /// Bytes of directory the offset table declared.
    pub declared_len: usize,
}

impl Directory {
    pub fn is_complete(&self) -> bool {
        self.entries.len() * TABLE_RECORD_LEN >= self.declared_len
    }
}

/// Read the offset table and table directory of a single font. Collections
/// have no directory at offset 0.
pub fn read_directory(stream: &mut dyn SeekableStream) -> io::Result<DecodeResult<Directory>> {
    let head = read_head(stream, OFFSET_TABLE_LEN)?;
    let offset_table = match parse_offset_table(&head) {
        Ok(table) => table,
        Err(e) => return Ok(Err(e)),
    };
    if offset_table.scaler == ScalerType::Collection {
        return Ok(Err(DecodeError::unsupported("per-font decoding of font collections")));
    }
    let declared_len = offset_table.num_tables as usize * TABLE_RECORD_LEN;
    let records = read_at(stream, OFFSET_TABLE_LEN as u64, declared_len)?;
    let entries = match parse_directory(&records) {
        Ok(entries) => entries,
        Err(e) => return Ok(Err(e)),
    };
    Ok(Ok(Directory {
        offset_table,
        entries,
        declared_len,
    }))
}

pub fn decode_sfnt(stream: &mut dyn SeekableStream, ctx: &DecodeContext) -> io::Result<FieldSet> {
    let mut fields = FieldSet::new(ContainerFormat::Sfnt);
    let head = read_head(stream, OFFSET_TABLE_LEN)?;
    let offset_table = match parse_offset_table(&head) {
        Ok(table) => table,
        Err(e) => {
            debug!("{}", e);
            return Ok(fields);
        }
    };
    fields.mark_valid();
    fields.set("sfnt.scaler_type", scaler_label(&offset_table.scaler_tag));
    fields.set("sfnt.flavor", offset_table.scaler.flavor());

    if offset_table.scaler == ScalerType::Collection {
        fields.set("sfnt.collection", true);
        match parse_collection_header(&head) {
            Ok(ttc) => {
                fields.set("ttc.version", format!("{}.{}", ttc.major_version, ttc.minor_version));
                fields.set("ttc.font_count", ttc.num_fonts);
            }
            Err(e) => fields.record_error("ttcf", e),
        }
    }

    let directory = match read_directory(stream)? {
        Ok(directory) => directory,
        Err(e) => {
            fields.record_error("table directory", e);
            return Ok(fields);
        }
    };
    fields.set("sfnt.num_tables", directory.offset_table.num_tables);
    if !directory.is_complete() {
        fields.record_error(
            "table directory",
            DecodeError::truncated(directory.declared_len, directory.entries.len() * TABLE_RECORD_LEN),
        );
    }

    let file_len = stream.total_len()?;
    for entry in &directory.entries {
        let tag = entry.tag_string();
        fields.increment("sfnt.tables", &tag);
        if let Err(e) = check_bounds(entry, file_len) {
            fields.record_error(&tag, e);
            continue;
        }
        if let Err(e) = decode_table(stream, entry, ctx, &mut fields)? {
            fields.record_error(&tag, e);
        }
    }
    Ok(fields)
}

/// Decode one directory entry. I/O failures are fatal, decode failures are
/// returned for the caller to record.
fn decode_table(
    stream: &mut dyn SeekableStream,
    entry: &TableDirectoryEntry,
    ctx: &DecodeContext,
    fields: &mut FieldSet,
) -> io::Result<DecodeResult<()>> {
    let offset = entry.offset as u64;
    let length = entry.length as usize;
    let result = match &entry.tag {
        b"name" => {
            let p = read_at(stream, offset, length.min(MAX_NAME_TABLE))?;
            decode_name_table(&p, ctx, fields)
        }
        b"cmap" => decode_cmap(stream, entry, fields)?,
        tag => match table_read_len(tag) {
            Some(max) => {
                let p = read_at(stream, offset, length.min(max))?;
                match tag {
                    b"head" => decode_head(&p, fields),
                    b"hhea" => decode_hhea(&p, fields),
                    b"maxp" => decode_maxp(&p, fields),
                    b"post" => decode_post(&p, fields),
                    _ => decode_os2(&p, fields),
                }
            }
            None => Ok(()),
        },
    };
    Ok(result)
}

fn decode_name_table(p: &[u8], ctx: &DecodeContext, fields: &mut FieldSet) -> DecodeResult<()> {
    let table = parse_name_records(p, ctx.limits.max_name_records)?;
    fields.set("name.format", table.format);
    fields.set("name.record_count", table.count);
    let (names, errors) = decode_names(p, &table);
    for (key, value) in names {
        fields.set(format!("name.{}", key), value);
    }
    for e in errors {
        fields.record_error("name", e);
    }
    if table.records.len() < table.count as usize {
        return Err(DecodeError::unsupported(format!(
            "only the first {} of {} name records read",
            table.records.len(),
            table.count
        )));
    }
    Ok(())
}

/// Encoding records, then the format word of each subtable they point at.
fn decode_cmap(
    stream: &mut dyn SeekableStream,
    entry: &TableDirectoryEntry,
    fields: &mut FieldSet,
) -> io::Result<DecodeResult<()>> {
    let offset = entry.offset as u64;
    let head = read_at(stream, offset, 4)?;
    let count = match cmap_record_count(&head) {
        Ok(count) => (count as usize).min(MAX_CMAP_RECORDS),
        Err(e) => return Ok(Err(e)),
    };
    let header_len = (4 + count * CMAP_RECORD_LEN).min(entry.length as usize);
    let p = read_at(stream, offset, header_len)?;
    let header = match parse_cmap_header(&p, MAX_CMAP_RECORDS) {
        Ok(header) => header,
        Err(e) => return Ok(Err(e)),
    };
    fields.set("cmap.version", header.version);
    fields.set("cmap.num_subtables", header.records.len());

    let mut subtables = Vec::new();
    for record in &header.records {
        let format = if (record.offset as u64) + 2 <= entry.length as u64 {
            let word = read_at(stream, offset + record.offset as u64, 2)?;
            (word.len() == 2).then(|| u16::from_be_bytes([word[0], word[1]]))
        } else {
            None
        };
        let format = format.map_or("?".to_string(), |f| f.to_string());
        subtables.push(format!("{}/{}/{}", record.platform_id, record.encoding_id, format));
    }
    fields.set("cmap.subtables", subtables);
    Ok(Ok(()))
}

fn scaler_label(tag: &[u8; 4]) -> String {
    if tag.iter().all(|b| b.is_ascii_graphic()) {
        fourcc_to_string(tag)
    } else {
        format!("0x{:08X}", u32::from_be_bytes(*tag))
    }
}
