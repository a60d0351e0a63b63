//! Fixed-layout SFNT tables.

use crate::bits::reader::{
    fourcc_to_string, read_bytes, read_fixed_16_16, read_i16, read_mac_epoch_datetime, read_u16,
    read_u32, ByteOrder,
};
use crate::errors::DecodeResult;
use crate::metadata::FieldSet;

const BE: ByteOrder = ByteOrder::Big;

pub const HEAD_MAGIC: u32 = 0x5F0F_3CF5;

/// Bytes to read for each decoded table.
pub fn table_read_len(tag: &[u8; 4]) -> Option<usize> {
    let len = match tag {
        b"head" => 54,
        b"hhea" => 36,
        b"maxp" => 32,
        b"post" => 32,
        b"OS/2" => 96,
        _ => return None,
    };
    Some(len)
}

pub fn decode_head(p: &[u8], fields: &mut FieldSet) -> DecodeResult<()> {
    fields.set("head.version", read_fixed_16_16(p, 0)?);
    fields.set("head.font_revision", read_fixed_16_16(p, 4)?);
    fields.set("head.checksum_adjustment", read_u32(p, 8, BE)?);
    fields.set("head.magic_number_valid", read_u32(p, 12, BE)? == HEAD_MAGIC);
    fields.set("head.flags", read_u16(p, 16, BE)?);
    fields.set("head.units_per_em", read_u16(p, 18, BE)?);
    fields.set_opt("head.created", read_mac_epoch_datetime(p, 20)?);
    fields.set_opt("head.modified", read_mac_epoch_datetime(p, 28)?);
    fields.set("head.x_min", read_i16(p, 36, BE)?);
    fields.set("head.y_min", read_i16(p, 38, BE)?);
    fields.set("head.x_max", read_i16(p, 40, BE)?);
    fields.set("head.y_max", read_i16(p, 42, BE)?);
    let mac_style = read_u16(p, 44, BE)?;
    fields.set("head.mac_style", mac_style);
    fields.set("head.bold", mac_style & 0x01 != 0);
    fields.set("head.italic", mac_style & 0x02 != 0);
    fields.set("head.lowest_rec_ppem", read_u16(p, 46, BE)?);
    fields.set("head.index_to_loc_format", read_i16(p, 50, BE)?);
    Ok(())
}

pub fn decode_hhea(p: &[u8], fields: &mut FieldSet) -> DecodeResult<()> {
    fields.set("hhea.version", read_fixed_16_16(p, 0)?);
    fields.set("hhea.ascender", read_i16(p, 4, BE)?);
    fields.set("hhea.descender", read_i16(p, 6, BE)?);
    fields.set("hhea.line_gap", read_i16(p, 8, BE)?);
    fields.set("hhea.advance_width_max", read_u16(p, 10, BE)?);
    fields.set("hhea.number_of_h_metrics", read_u16(p, 34, BE)?);
    Ok(())
}

/// Version 0.5 (CFF fonts) stops after the glyph count.
pub fn decode_maxp(p: &[u8], fields: &mut FieldSet) -> DecodeResult<()> {
    let version = read_u32(p, 0, BE)?;
    fields.set("maxp.version", read_fixed_16_16(p, 0)?);
    fields.set("maxp.num_glyphs", read_u16(p, 4, BE)?);
    if version >= 0x0001_0000 {
        for (offset, name) in [
            (6, "max_points"),
            (8, "max_contours"),
            (10, "max_composite_points"),
            (12, "max_composite_contours"),
            (14, "max_zones"),
            (24, "max_stack_elements"),
            (30, "max_component_depth"),
        ] {
            fields.set(format!("maxp.{}", name), read_u16(p, offset, BE)?);
        }
    }
    Ok(())
}

pub fn decode_post(p: &[u8], fields: &mut FieldSet) -> DecodeResult<()> {
    fields.set("post.format", read_fixed_16_16(p, 0)?);
    fields.set("post.italic_angle", read_fixed_16_16(p, 4)?);
    fields.set("post.underline_position", read_i16(p, 8, BE)?);
    fields.set("post.underline_thickness", read_i16(p, 10, BE)?);
    fields.set("post.is_fixed_pitch", read_u32(p, 12, BE)? != 0);
    Ok(())
}

pub fn weight_class_name(weight: u16) -> Option<&'static str> {
    let name = match weight {
        100 => "Thin",
        200 => "Extra-light",
        300 => "Light",
        400 => "Normal",
        500 => "Medium",
        600 => "Semi-bold",
        700 => "Bold",
        800 => "Extra-bold",
        900 => "Black",
        _ => return None,
    };
    Some(name)
}

pub fn decode_os2(p: &[u8], fields: &mut FieldSet) -> DecodeResult<()> {
    let version = read_u16(p, 0, BE)?;
    fields.set("os2.version", version);
    fields.set("os2.avg_char_width", read_i16(p, 2, BE)?);
    let weight = read_u16(p, 4, BE)?;
    fields.set("os2.weight_class", weight);
    fields.set_opt("os2.weight_name", weight_class_name(weight));
    fields.set("os2.width_class", read_u16(p, 6, BE)?);
    fields.set("os2.fs_type", read_u16(p, 8, BE)?);
    let vendor = read_bytes(p, 58, 4)?;
    fields.set("os2.vendor_id", fourcc_to_string(vendor).trim_end().to_string());
    fields.set("os2.fs_selection", read_u16(p, 62, BE)?);
    fields.set("os2.first_char_index", read_u16(p, 64, BE)?);
    fields.set("os2.last_char_index", read_u16(p, 66, BE)?);
    // Version 0 tables from old Apple fonts may stop here.
    if p.len() >= 78 {
        fields.set("os2.typo_ascender", read_i16(p, 68, BE)?);
        fields.set("os2.typo_descender", read_i16(p, 70, BE)?);
        fields.set("os2.typo_line_gap", read_i16(p, 72, BE)?);
        fields.set("os2.win_ascent", read_u16(p, 74, BE)?);
        fields.set("os2.win_descent", read_u16(p, 76, BE)?);
    }
    if version >= 2 && p.len() >= 90 {
        fields.set("os2.x_height", read_i16(p, 86, BE)?);
        fields.set("os2.cap_height", read_i16(p, 88, BE)?);
    }
    Ok(())
}

/// `cmap` header: version and the encoding records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmapHeader {
    pub version: u16,
    pub records: Vec<EncodingRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingRecord {
    pub platform_id: u16,
    pub encoding_id: u16,
    pub offset: u32,
}

pub const CMAP_RECORD_LEN: usize = 8;

/// Number of encoding records the header declares.
pub fn cmap_record_count(p: &[u8]) -> DecodeResult<u16> {
    read_u16(p, 2, BE)
}

/// Header and the first `max_records` encoding records.
pub fn parse_cmap_header(p: &[u8], max_records: usize) -> DecodeResult<CmapHeader> {
    let version = read_u16(p, 0, BE)?;
    let count = (cmap_record_count(p)? as usize).min(max_records);
    let records = (0..count)
        .map(|i| {
            let at = 4 + i * CMAP_RECORD_LEN;
            Ok(EncodingRecord {
                platform_id: read_u16(p, at, BE)?,
                encoding_id: read_u16(p, at + 2, BE)?,
                offset: read_u32(p, at + 4, BE)?,
            })
        })
        .collect::<DecodeResult<Vec<_>>>()?;
    Ok(CmapHeader { version, records })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ContainerFormat, FieldValue};

    fn head_table() -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        p.extend_from_slice(&0x0002_8000u32.to_be_bytes());
        p.extend_from_slice(&0x1234_5678u32.to_be_bytes());
        p.extend_from_slice(&HEAD_MAGIC.to_be_bytes());
        p.extend_from_slice(&0x000Bu16.to_be_bytes());
        p.extend_from_slice(&2048u16.to_be_bytes());
        p.extend_from_slice(&3_600u64.to_be_bytes());
        p.extend_from_slice(&u64::MAX.to_be_bytes());
        for v in [-100i16, -200, 1000, 900] {
            p.extend_from_slice(&v.to_be_bytes());
        }
        p.extend_from_slice(&0x0003u16.to_be_bytes());
        p.extend_from_slice(&9u16.to_be_bytes());
        p.extend_from_slice(&2i16.to_be_bytes());
        p.extend_from_slice(&1i16.to_be_bytes());
        p.extend_from_slice(&0i16.to_be_bytes());
        p
    }

    #[test]
    fn test_head() {
        let mut fields = FieldSet::new(ContainerFormat::Sfnt);
        decode_head(&head_table(), &mut fields).unwrap();
        assert_eq!(fields.get("head.font_revision"), Some(&FieldValue::Float(2.5)));
        assert_eq!(fields.get("head.magic_number_valid"), Some(&FieldValue::Bool(true)));
        assert_eq!(fields.get("head.units_per_em"), Some(&FieldValue::UInt(2048)));
        assert_eq!(
            fields.get("head.created").and_then(FieldValue::as_str),
            Some("1904-01-01T01:00:00")
        );
        // garbage timestamps are dropped, not errors
        assert!(fields.get("head.modified").is_none());
        assert_eq!(fields.get("head.x_min"), Some(&FieldValue::Int(-100)));
        assert_eq!(fields.get("head.bold"), Some(&FieldValue::Bool(true)));
        assert_eq!(fields.get("head.italic"), Some(&FieldValue::Bool(true)));
        assert_eq!(fields.get("head.index_to_loc_format"), Some(&FieldValue::Int(1)));
    }

    #[test]
    fn test_short_head_keeps_leading_fields() {
        let mut fields = FieldSet::new(ContainerFormat::Sfnt);
        assert!(decode_head(&head_table()[..20], &mut fields).is_err());
        assert_eq!(fields.get("head.units_per_em"), Some(&FieldValue::UInt(2048)));
        assert!(fields.get("head.x_min").is_none());
    }

    #[test]
    fn test_maxp_versions() {
        let mut cff = FieldSet::new(ContainerFormat::Sfnt);
        decode_maxp(&[0, 0, 0x50, 0, 0x01, 0x00], &mut cff).unwrap();
        assert_eq!(cff.get("maxp.version"), Some(&FieldValue::Float(0.3125)));
        assert_eq!(cff.get("maxp.num_glyphs"), Some(&FieldValue::UInt(256)));
        assert!(cff.get("maxp.max_points").is_none());

        let mut p = vec![0, 1, 0, 0, 0, 10];
        p.extend_from_slice(&[0, 50]);
        p.extend_from_slice(&[0u8; 24]);
        let mut tt = FieldSet::new(ContainerFormat::Sfnt);
        decode_maxp(&p, &mut tt).unwrap();
        assert_eq!(tt.get("maxp.max_points"), Some(&FieldValue::UInt(50)));
    }

    #[test]
    fn test_post() {
        let mut p = Vec::new();
        p.extend_from_slice(&0x0003_0000u32.to_be_bytes());
        p.extend_from_slice(&(-12i32 << 16).to_be_bytes());
        p.extend_from_slice(&(-75i16).to_be_bytes());
        p.extend_from_slice(&50i16.to_be_bytes());
        p.extend_from_slice(&1u32.to_be_bytes());
        let mut fields = FieldSet::new(ContainerFormat::Sfnt);
        decode_post(&p, &mut fields).unwrap();
        assert_eq!(fields.get("post.italic_angle"), Some(&FieldValue::Float(-12.0)));
        assert_eq!(fields.get("post.is_fixed_pitch"), Some(&FieldValue::Bool(true)));
    }

    #[test]
    fn test_os2_version_zero() {
        let mut p = vec![0u8; 68];
        p[4..6].copy_from_slice(&700u16.to_be_bytes());
        p[58..62].copy_from_slice(b"ADBE");
        let mut fields = FieldSet::new(ContainerFormat::Sfnt);
        decode_os2(&p, &mut fields).unwrap();
        assert_eq!(fields.get("os2.weight_name").and_then(FieldValue::as_str), Some("Bold"));
        assert_eq!(fields.get("os2.vendor_id").and_then(FieldValue::as_str), Some("ADBE"));
        assert!(fields.get("os2.typo_ascender").is_none());
    }

    #[test]
    fn test_cmap_header() {
        let mut p = vec![0, 0, 0, 2];
        p.extend_from_slice(&[0, 3, 0, 1, 0, 0, 0, 20]);
        p.extend_from_slice(&[0, 1, 0, 0, 0, 0, 1, 0]);
        let cmap = parse_cmap_header(&p, 64).unwrap();
        assert_eq!(cmap.records.len(), 2);
        assert_eq!(cmap.records[0].platform_id, 3);
        assert_eq!(cmap.records[1].offset, 256);
        assert!(parse_cmap_header(&p[..10], 64).is_err());
        assert_eq!(parse_cmap_header(&p[..12], 1).unwrap().records.len(), 1);
    }
}
