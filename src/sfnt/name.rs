//! `name` table: records first, strings second.

use std::collections::BTreeMap;

use crate::bits::reader::{read_bytes, read_u16, ByteOrder};
use crate::errors::{DecodeError, DecodeResult};

const BE: ByteOrder = ByteOrder::Big;

pub const NAME_RECORD_LEN: usize = 12;

const WINDOWS_ENGLISH_US: u16 = 0x0409;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameRecord {
    pub platform_id: u16,
    pub encoding_id: u16,
    pub language_id: u16,
    pub name_id: u16,
    pub length: u16,
    pub offset: u16,
}

impl NameRecord {
    /// Higher is better: US English Windows, then Mac Roman English and
    /// Unicode, then anything else.
    fn preference(&self) -> u8 {
        match (self.platform_id, self.language_id) {
            (3, WINDOWS_ENGLISH_US) => 3,
            (1, 0) | (0, _) => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTable {
    pub format: u16,
    pub count: u16,
    pub string_offset: u16,
    pub records: Vec<NameRecord>,
}

/// First pass: the header and up to `max_records` name records.
pub fn parse_name_records(p: &[u8], max_records: usize) -> DecodeResult<NameTable> {
    let format = read_u16(p, 0, BE)?;
    let count = read_u16(p, 2, BE)?;
    let string_offset = read_u16(p, 4, BE)?;
    let records = (0..(count as usize).min(max_records))
        .map(|i| {
            let at = 6 + i * NAME_RECORD_LEN;
            Ok(NameRecord {
                platform_id: read_u16(p, at, BE)?,
                encoding_id: read_u16(p, at + 2, BE)?,
                language_id: read_u16(p, at + 4, BE)?,
                name_id: read_u16(p, at + 6, BE)?,
                length: read_u16(p, at + 8, BE)?,
                offset: read_u16(p, at + 10, BE)?,
            })
        })
        .collect::<DecodeResult<Vec<_>>>()?;
    Ok(NameTable {
        format,
        count,
        string_offset,
        records,
    })
}

/// Field key for a well-known name ID.
pub fn name_id_key(name_id: u16) -> Option<&'static str> {
    let key = match name_id {
        0 => "copyright",
        1 => "font_family",
        2 => "font_subfamily",
        3 => "unique_id",
        4 => "full_name",
        5 => "version",
        6 => "postscript_name",
        7 => "trademark",
        8 => "manufacturer",
        9 => "designer",
        10 => "description",
        11 => "vendor_url",
        12 => "designer_url",
        13 => "license",
        14 => "license_url",
        16 => "typographic_family",
        17 => "typographic_subfamily",
        19 => "sample_text",
        _ => return None,
    };
    Some(key)
}

/// Second pass: decode the preferred record for each well-known name ID.
/// Records whose strings fall outside the table are reported and skipped.
pub fn decode_names(
    p: &[u8],
    table: &NameTable,
) -> (BTreeMap<&'static str, String>, Vec<DecodeError>) {
    let mut best: BTreeMap<u16, &NameRecord> = BTreeMap::new();
    for record in &table.records {
        if name_id_key(record.name_id).is_none() {
            continue;
        }
        match best.get(&record.name_id) {
            Some(current) if current.preference() >= record.preference() => {}
            _ => {
                best.insert(record.name_id, record);
            }
        }
    }

    let mut names = BTreeMap::new();
    let mut errors = Vec::new();
    for (name_id, record) in best {
        let start = table.string_offset as usize + record.offset as usize;
        match read_bytes(p, start, record.length as usize) {
            Ok(raw) => {
                if let Some(key) = name_id_key(name_id) {
                    names.insert(key, decode_name_string(record, raw));
                }
            }
            Err(e) => errors.push(e),
        }
    }
    (names, errors)
}

fn decode_name_string(record: &NameRecord, raw: &[u8]) -> String {
    let text = match (record.platform_id, record.encoding_id) {
        (0, _) | (3, _) | (2, 1) => decode_utf16_be(raw),
        (1, 0) => decode_mac_roman(raw),
        _ => raw.iter().map(|&b| b as char).collect(),
    };
    text.trim_end_matches('\0').to_string()
}

pub fn decode_utf16_be(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Mac OS Roman code points 0x80 to 0xFF.
const MAC_ROMAN_HIGH: [char; 128] = [
    'Ä', 'Å', 'Ç', 'É', 'Ñ', 'Ö', 'Ü', 'á', 'à', 'â', 'ä', 'ã', 'å', 'ç', 'é', 'è', //
    'ê', 'ë', 'í', 'ì', 'î', 'ï', 'ñ', 'ó', 'ò', 'ô', 'ö', 'õ', 'ú', 'ù', 'û', 'ü', //
    '†', '°', '¢', '£', '§', '•', '¶', 'ß', '®', '©', '™', '´', '¨', '≠', 'Æ', 'Ø', //
    '∞', '±', '≤', '≥', '¥', 'µ', '∂', '∑', '∏', 'π', '∫', 'ª', 'º', 'Ω', 'æ', 'ø', //
    '¿', '¡', '¬', '√', 'ƒ', '≈', '∆', '«', '»', '…', '\u{A0}', 'À', 'Ã', 'Õ', 'Œ', 'œ', //
    '–', '—', '“', '”', '‘', '’', '÷', '◊', 'ÿ', 'Ÿ', '⁄', '€', '‹', '›', 'ﬁ', 'ﬂ', //
    '‡', '·', '‚', '„', '‰', 'Â', 'Ê', 'Á', 'Ë', 'È', 'Í', 'Î', 'Ï', 'Ì', 'Ó', 'Ô', //
    '\u{F8FF}', 'Ò', 'Ú', 'Û', 'Ù', 'ı', 'ˆ', '˜', '¯', '˘', '˙', '˚', '¸', '˝', '˛', 'ˇ',
];

pub fn decode_mac_roman(raw: &[u8]) -> String {
    raw.iter()
        .map(|&b| {
            if b < 0x80 {
                b as char
            } else {
                MAC_ROMAN_HIGH[(b - 0x80) as usize]
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Name table with the given (platform, encoding, language, name id, bytes)
    /// records.
    fn name_table(records: &[(u16, u16, u16, u16, Vec<u8>)]) -> Vec<u8> {
        let header_len = 6 + records.len() * NAME_RECORD_LEN;
        let mut p = Vec::new();
        p.extend_from_slice(&0u16.to_be_bytes());
        p.extend_from_slice(&(records.len() as u16).to_be_bytes());
        p.extend_from_slice(&(header_len as u16).to_be_bytes());
        let mut storage = Vec::new();
        for (platform, encoding, language, name_id, bytes) in records {
            for v in [*platform, *encoding, *language, *name_id] {
                p.extend_from_slice(&v.to_be_bytes());
            }
            p.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
            p.extend_from_slice(&(storage.len() as u16).to_be_bytes());
            storage.extend_from_slice(bytes);
        }
        p.extend(storage);
        p
    }

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_be_bytes()).collect()
    }

    #[test]
    fn test_prefers_windows_english() {
        let p = name_table(&[
            (1, 0, 0, 1, b"Mac Family".to_vec()),
            (3, 1, 0x0407, 1, utf16("Familie")),
            (3, 1, 0x0409, 1, utf16("Win Family")),
            (3, 1, 0x0409, 4, utf16("Win Family Bold")),
        ]);
        let table = parse_name_records(&p, 64).unwrap();
        assert_eq!(table.count, 4);
        let (names, errors) = decode_names(&p, &table);
        assert!(errors.is_empty());
        assert_eq!(names["font_family"], "Win Family");
        assert_eq!(names["full_name"], "Win Family Bold");
    }

    #[test]
    fn test_mac_roman_and_latin1() {
        let p = name_table(&[
            (1, 0, 0, 0, b"\xA9 2024 Caf\x8E".to_vec()),
            (2, 0, 0, 9, b"Jos\xE9".to_vec()),
        ]);
        let table = parse_name_records(&p, 64).unwrap();
        let (names, _) = decode_names(&p, &table);
        assert_eq!(names["copyright"], "© 2024 Café");
        assert_eq!(names["designer"], "José");
    }

    #[test]
    fn test_string_outside_table_is_an_error() {
        let mut p = name_table(&[
            (3, 1, 0x0409, 1, utf16("Family")),
            (3, 1, 0x0409, 2, utf16("Regular")),
        ]);
        p.truncate(p.len() - 4);
        let table = parse_name_records(&p, 64).unwrap();
        let (names, errors) = decode_names(&p, &table);
        assert_eq!(names["font_family"], "Family");
        assert!(!names.contains_key("font_subfamily"));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_record_limit() {
        let p = name_table(&[(3, 1, 0x0409, 1, utf16("A")), (3, 1, 0x0409, 2, utf16("B"))]);
        let table = parse_name_records(&p, 1).unwrap();
        assert_eq!(table.count, 2);
        assert_eq!(table.records.len(), 1);
    }

    #[test]
    fn test_mac_roman_table() {
        assert_eq!(decode_mac_roman(b"\x80\xD0\xFF"), "Ä–ˇ");
    }
}
