use crate::bits::reader::{fourcc_to_string, read_fourcc, read_u16, read_u32, ByteOrder};
use crate::errors::{DecodeError, DecodeResult};

const BE: ByteOrder = ByteOrder::Big;

pub const OFFSET_TABLE_LEN: usize = 12;
pub const TABLE_RECORD_LEN: usize = 16;

/// Outline flavour announced by the scaler type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalerType {
    TrueType,
    /// Apple's `true` tag, also TrueType outlines.
    AppleTrueType,
    Cff,
    PostScript,
    Collection,
}

impl ScalerType {
    pub fn from_tag(tag: &[u8; 4]) -> Option<Self> {
        match tag {
            [0x00, 0x01, 0x00, 0x00] => Some(ScalerType::TrueType),
            b"true" => Some(ScalerType::AppleTrueType),
            b"OTTO" => Some(ScalerType::Cff),
            b"typ1" => Some(ScalerType::PostScript),
            b"ttcf" => Some(ScalerType::Collection),
            _ => None,
        }
    }

    pub fn flavor(&self) -> &'static str {
        match self {
            ScalerType::TrueType | ScalerType::AppleTrueType => "TrueType",
            ScalerType::Cff => "OpenType CFF",
            ScalerType::PostScript => "PostScript Type 1",
            ScalerType::Collection => "TrueType Collection",
        }
    }
}

/// One table directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDirectoryEntry {
    pub tag: [u8; 4],
    pub checksum: u32,
    pub offset: u32,
    pub length: u32,
}

impl TableDirectoryEntry {
    pub fn tag_string(&self) -> String {
        fourcc_to_string(&self.tag)
    }

    pub fn end(&self) -> u64 {
        self.offset as u64 + self.length as u64
    }
}

/// The offset table at the start of a single font.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetTable {
    pub scaler: ScalerType,
    pub scaler_tag: [u8; 4],
    pub num_tables: u16,
}

pub fn parse_offset_table(head: &[u8]) -> DecodeResult<OffsetTable> {
    let scaler_tag = read_fourcc(head, 0)?;
    let scaler = ScalerType::from_tag(&scaler_tag).ok_or(DecodeError::NotThisFormat { format: "SFNT" })?;
    Ok(OffsetTable {
        scaler,
        scaler_tag,
        num_tables: read_u16(head, 4, BE)?,
    })
}

/// `ttcf` header: version and member font count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHeader {
    pub major_version: u16,
    pub minor_version: u16,
    pub num_fonts: u32,
}

pub fn parse_collection_header(head: &[u8]) -> DecodeResult<CollectionHeader> {
    Ok(CollectionHeader {
        major_version: read_u16(head, 4, BE)?,
        minor_version: read_u16(head, 6, BE)?,
        num_fonts: read_u32(head, 8, BE)?,
    })
}

/// Parse the directory records in `records`. A partial trailing record is
/// ignored.
pub fn parse_directory(records: &[u8]) -> DecodeResult<Vec<TableDirectoryEntry>> {
    records
        .chunks_exact(TABLE_RECORD_LEN)
        .map(|r| {
            Ok(TableDirectoryEntry {
                tag: read_fourcc(r, 0)?,
                checksum: read_u32(r, 4, BE)?,
                offset: read_u32(r, 8, BE)?,
                length: read_u32(r, 12, BE)?,
            })
        })
        .collect()
}

/// A table that lies partly or wholly outside the file.
pub fn check_bounds(entry: &TableDirectoryEntry, file_len: u64) -> DecodeResult<()> {
    if entry.end() > file_len {
        return Err(DecodeError::MalformedLength {
            declared: entry.length as u64,
            reason: "table extends past the end of the file",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_table() {
        let head = [0, 1, 0, 0, 0, 9, 0, 0x80, 0, 3, 0, 0x10];
        let table = parse_offset_table(&head).unwrap();
        assert_eq!(table.scaler, ScalerType::TrueType);
        assert_eq!(table.num_tables, 9);
        assert_eq!(
            parse_offset_table(b"wOFF\0\0\0\0\0\0\0\0"),
            Err(DecodeError::NotThisFormat { format: "SFNT" })
        );
        assert_eq!(ScalerType::from_tag(b"OTTO").unwrap().flavor(), "OpenType CFF");
    }

    #[test]
    fn test_directory_records() {
        let mut records = Vec::new();
        records.extend_from_slice(b"head");
        records.extend_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
        records.extend_from_slice(&44u32.to_be_bytes());
        records.extend_from_slice(&54u32.to_be_bytes());
        records.extend_from_slice(b"nam");
        let entries = parse_directory(&records).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tag_string(), "head");
        assert_eq!(entries[0].end(), 98);
        assert!(check_bounds(&entries[0], 98).is_ok());
        assert!(check_bounds(&entries[0], 97).is_err());
    }

    #[test]
    fn test_collection_header() {
        let head = b"ttcf\x00\x02\x00\x00\x00\x00\x00\x03";
        let ttc = parse_collection_header(head).unwrap();
        assert_eq!(ttc.major_version, 2);
        assert_eq!(ttc.num_fonts, 3);
    }
}
