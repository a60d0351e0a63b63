use std::collections::BTreeMap;
use std::io;

use log::debug;

use super::{chunk_label, parse_form_header, truncation_error, RIFF_HEADER_LEN};
use crate::bits::reader::{read_u16, read_u24, read_u32, read_u8, ByteOrder};
use crate::cursor::{HeaderShape, Step, UnitCursor};
use crate::errors::{DecodeError, DecodeResult};
use crate::metadata::{read_head, ContainerDecoder, ContainerFormat, DecodeContext, FieldSet, FieldValue};
use crate::streams::SeekableStream;

const LE: ByteOrder = ByteOrder::Little;

pub const VP8X_ANIMATION: u8 = 0x02;
pub const VP8X_ALPHA: u8 = 0x04;
pub const VP8X_EXIF: u8 = 0x08;
pub const VP8X_XMP: u8 = 0x10;
pub const VP8X_ICC: u8 = 0x20;

pub const VP8_START_CODE: [u8; 3] = [0x9D, 0x01, 0x2A];
pub const VP8L_SIGNATURE: u8 = 0x2F;

pub struct WebpDecoder;

impl ContainerDecoder for WebpDecoder {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Webp
    }

    fn decode(&self, stream: &mut dyn SeekableStream, ctx: &DecodeContext) -> io::Result<FieldSet> {
        decode_webp(stream, ctx)
    }
}

pub fn decode_webp(stream: &mut dyn SeekableStream, ctx: &DecodeContext) -> io::Result<FieldSet> {
    let mut fields = FieldSet::new(ContainerFormat::Webp);
    let head = read_head(stream, RIFF_HEADER_LEN as usize)?;
    let form = match parse_form_header(&head, b"WEBP", "WebP") {
        Ok(form) => form,
        Err(e) => {
            debug!("{}", e);
            return Ok(fields);
        }
    };
    fields.mark_valid();

    let stream_len = stream.total_len()?;
    let end = form.declared_end(stream_len);
    let mut cursor =
        UnitCursor::with_range(stream, HeaderShape::Riff, stream_len, RIFF_HEADER_LEN, end)
            .with_limits(ctx.limits.max_depth, ctx.limits.max_units);

    loop {
        let unit = match cursor.next_unit()? {
            Step::Unit(unit) => unit,
            Step::End => break,
            Step::Malformed(e) => {
                fields.record_error("chunk header", e);
                break;
            }
        };
        let code = unit.tag.fourcc().copied().unwrap_or_default();
        let label = chunk_label(&code);
        fields.increment("chunk_types", &label);

        let decoded = match &code {
            b"VP8X" => decode_vp8x(&cursor.read_payload(&unit, 10)?, &mut fields),
            b"VP8 " => decode_vp8(&cursor.read_payload(&unit, 10)?, &mut fields),
            b"VP8L" => decode_vp8l(&cursor.read_payload(&unit, 5)?, &mut fields),
            b"ANIM" => decode_anim(&cursor.read_payload(&unit, 6)?, &mut fields),
            b"ANMF" => decode_anmf(&cursor.read_payload(&unit, 16)?, &mut fields),
            b"ALPH" => decode_alph(&cursor.read_payload(&unit, 1)?, &mut fields),
            b"ICCP" => {
                fields.set("iccp.size", unit.payload_length);
                Ok(())
            }
            b"EXIF" => {
                fields.set("exif.size", unit.payload_length);
                Ok(())
            }
            b"XMP " => {
                fields.set("xmp.size", unit.payload_length);
                Ok(())
            }
            _ => {
                debug!("skipping {} chunk ({} bytes)", label, unit.payload_length);
                fields.bump("unknown_chunks");
                Ok(())
            }
        };
        if let Err(e) = decoded {
            fields.record_error(&label, e);
        }
        if unit.truncated {
            fields.record_error(&label, truncation_error(&unit));
        }
        cursor.skip(&unit);
    }

    if cursor.budget_exhausted() {
        fields.record_error(
            "chunks",
            DecodeError::unsupported(format!("more than {} chunks", ctx.limits.max_units)),
        );
    }
    summarize(&mut fields);
    Ok(fields)
}

/// Canvas size and encoding kind, preferring the extended header.
fn summarize(fields: &mut FieldSet) {
    let (kind, prefix) = if fields.contains("vp8x.width") {
        ("extended", "vp8x")
    } else if fields.contains("vp8l.width") {
        ("lossless", "vp8l")
    } else if fields.contains("vp8.width") {
        ("lossy", "vp8")
    } else {
        return;
    };
    let width = fields.get(&format!("{}.width", prefix)).cloned();
    let height = fields.get(&format!("{}.height", prefix)).cloned();
    fields.set("webp.kind", kind);
    fields.set_opt("width", width);
    fields.set_opt("height", height);
}

fn decode_vp8x(p: &[u8], fields: &mut FieldSet) -> DecodeResult<()> {
    let flags = read_u8(p, 0)?;
    let width = read_u24(p, 4, LE)? + 1;
    let height = read_u24(p, 7, LE)? + 1;
    fields.set("vp8x.flags", flags);
    fields.set("vp8x.width", width);
    fields.set("vp8x.height", height);
    fields.set("features.has_animation", flags & VP8X_ANIMATION != 0);
    fields.set("features.has_alpha", flags & VP8X_ALPHA != 0);
    fields.set("features.has_exif", flags & VP8X_EXIF != 0);
    fields.set("features.has_xmp", flags & VP8X_XMP != 0);
    fields.set("features.has_icc", flags & VP8X_ICC != 0);
    Ok(())
}

/// Lossy bitstream: 3-byte frame tag, then on key frames the start code and
/// two 16-bit size fields (14 bits size, 2 bits scale).
fn decode_vp8(p: &[u8], fields: &mut FieldSet) -> DecodeResult<()> {
    let tag = read_u24(p, 0, LE)?;
    let key_frame = tag & 1 == 0;
    fields.set("vp8.key_frame", key_frame);
    fields.set("vp8.version", (tag >> 1) & 0x7);
    fields.set("vp8.show_frame", (tag >> 4) & 1 == 1);
    if !key_frame {
        return Err(DecodeError::unsupported("VP8 interframe has no dimensions"));
    }
    let start_code_valid = p.get(3..6) == Some(&VP8_START_CODE[..]);
    fields.set("vp8.start_code_valid", start_code_valid);
    if !start_code_valid {
        return Err(DecodeError::unsupported("VP8 start code missing"));
    }
    let w = read_u16(p, 6, LE)?;
    let h = read_u16(p, 8, LE)?;
    fields.set("vp8.width", w & 0x3FFF);
    fields.set("vp8.height", h & 0x3FFF);
    fields.set("vp8.horizontal_scale", w >> 14);
    fields.set("vp8.vertical_scale", h >> 14);
    Ok(())
}

/// Lossless header: signature byte, then 14 bits width-1, 14 bits height-1,
/// 1 bit alpha hint and 3 bits version, little-endian. A header without the
/// signature is read from its first four bytes.
fn decode_vp8l(p: &[u8], fields: &mut FieldSet) -> DecodeResult<()> {
    let signature_valid = p.len() >= 5 && p[0] == VP8L_SIGNATURE;
    let bits = read_u32(p, if signature_valid { 1 } else { 0 }, LE)?;
    fields.set("vp8l.signature_valid", signature_valid);
    fields.set("vp8l.width", (bits & 0x3FFF) + 1);
    fields.set("vp8l.height", ((bits >> 14) & 0x3FFF) + 1);
    fields.set("vp8l.alpha_is_used", (bits >> 28) & 1 == 1);
    fields.set("vp8l.version", bits >> 29);
    Ok(())
}

fn decode_anim(p: &[u8], fields: &mut FieldSet) -> DecodeResult<()> {
    let bgra = read_u32(p, 0, ByteOrder::Big)?.to_be_bytes();
    let loop_count = read_u16(p, 4, LE)?;
    fields.set(
        "anim.background_color",
        format!("#{:02X}{:02X}{:02X}{:02X}", bgra[3], bgra[2], bgra[1], bgra[0]),
    );
    fields.set("anim.loop_count", loop_count);
    Ok(())
}

fn decode_anmf(p: &[u8], fields: &mut FieldSet) -> DecodeResult<()> {
    let x = read_u24(p, 0, LE)? * 2;
    let y = read_u24(p, 3, LE)? * 2;
    let width = read_u24(p, 6, LE)? + 1;
    let height = read_u24(p, 9, LE)? + 1;
    let duration = read_u24(p, 12, LE)?;
    let flags = read_u8(p, 15)?;

    let mut frame = BTreeMap::new();
    frame.insert("x".to_string(), FieldValue::from(x));
    frame.insert("y".to_string(), FieldValue::from(y));
    frame.insert("width".to_string(), FieldValue::from(width));
    frame.insert("height".to_string(), FieldValue::from(height));
    frame.insert("duration".to_string(), FieldValue::from(duration));
    frame.insert("dispose_to_background".to_string(), FieldValue::from(flags & 0x01 != 0));
    frame.insert("blend".to_string(), FieldValue::from(flags & 0x02 == 0));
    fields.push("anmf.frames", frame);
    fields.bump("anmf.frame_count");
    Ok(())
}

fn decode_alph(p: &[u8], fields: &mut FieldSet) -> DecodeResult<()> {
    let flags = read_u8(p, 0)?;
    let compression = flags & 0x03;
    let filtering = (flags >> 2) & 0x03;
    fields.set("alph.compression", compression);
    fields.set(
        "alph.compression_name",
        if compression == 0 { "none" } else { "lossless" },
    );
    fields.set("alph.filtering", filtering);
    fields.set(
        "alph.filtering_name",
        ["none", "horizontal", "vertical", "gradient"][filtering as usize],
    );
    fields.set("alph.preprocessing", (flags >> 4) & 0x03);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{make_chunk, make_riff};
    use std::io::Cursor;

    fn vp8x(flags: u8, width: u32, height: u32) -> Vec<u8> {
        let mut p = vec![flags, 0, 0, 0];
        p.extend_from_slice(&(width - 1).to_le_bytes()[..3]);
        p.extend_from_slice(&(height - 1).to_le_bytes()[..3]);
        make_chunk(b"VP8X", &p)
    }

    fn vp8l_header(width: u32, height: u32, alpha: bool) -> [u8; 4] {
        ((width - 1) | ((height - 1) << 14) | ((alpha as u32) << 28)).to_le_bytes()
    }

    fn decode(bytes: Vec<u8>) -> FieldSet {
        let mut stream = Cursor::new(bytes);
        decode_webp(&mut stream, &DecodeContext::default()).unwrap()
    }

    fn flag(fields: &FieldSet, key: &str) -> Option<bool> {
        fields.get(key).and_then(FieldValue::as_bool)
    }

    fn uint(fields: &FieldSet, key: &str) -> Option<u64> {
        fields.get(key).and_then(FieldValue::as_u64)
    }

    #[test]
    fn test_extended_with_alpha_and_lossless() {
        let mut chunks = vp8x(0x04, 100, 100);
        chunks.extend(make_chunk(b"ALPH", &[0x00]));
        chunks.extend(make_chunk(b"VP8L", &vp8l_header(100, 100, false)));
        let fields = decode(make_riff(b"RIFF", b"WEBP", &chunks));

        assert!(fields.is_valid());
        assert_eq!(flag(&fields, "features.has_alpha"), Some(true));
        for other in ["has_animation", "has_exif", "has_xmp", "has_icc"] {
            assert_eq!(flag(&fields, &format!("features.{}", other)), Some(false));
        }
        assert_eq!(uint(&fields, "vp8x.width"), Some(100));
        assert_eq!(uint(&fields, "vp8x.height"), Some(100));
        assert_eq!(uint(&fields, "vp8l.width"), Some(100));
        assert_eq!(flag(&fields, "vp8l.signature_valid"), Some(false));

        let mut expected = BTreeMap::new();
        for tag in ["VP8X", "ALPH", "VP8L"] {
            expected.insert(tag.to_string(), FieldValue::UInt(1));
        }
        assert_eq!(fields.get("chunk_types"), Some(&FieldValue::Map(expected)));
        assert_eq!(fields.get("webp.kind").and_then(FieldValue::as_str), Some("extended"));
    }

    #[test]
    fn test_vp8l_with_signature() {
        let mut p = vec![VP8L_SIGNATURE];
        p.extend_from_slice(&vp8l_header(640, 480, true));
        let fields = decode(make_riff(b"RIFF", b"WEBP", &make_chunk(b"VP8L", &p)));
        assert_eq!(flag(&fields, "vp8l.signature_valid"), Some(true));
        assert_eq!(uint(&fields, "vp8l.width"), Some(640));
        assert_eq!(uint(&fields, "vp8l.height"), Some(480));
        assert_eq!(flag(&fields, "vp8l.alpha_is_used"), Some(true));
        assert_eq!(uint(&fields, "width"), Some(640));
    }

    #[test]
    fn test_vp8_key_frame() {
        // key frame, version 0, shown
        let mut p = vec![0x10, 0x00, 0x00];
        p.extend_from_slice(&VP8_START_CODE);
        p.extend_from_slice(&(320u16 | (1 << 14)).to_le_bytes());
        p.extend_from_slice(&240u16.to_le_bytes());
        let fields = decode(make_riff(b"RIFF", b"WEBP", &make_chunk(b"VP8 ", &p)));
        assert_eq!(flag(&fields, "vp8.key_frame"), Some(true));
        assert_eq!(flag(&fields, "vp8.show_frame"), Some(true));
        assert_eq!(uint(&fields, "vp8.width"), Some(320));
        assert_eq!(uint(&fields, "vp8.horizontal_scale"), Some(1));
        assert_eq!(uint(&fields, "vp8.height"), Some(240));
        assert_eq!(fields.get("webp.kind").and_then(FieldValue::as_str), Some("lossy"));
    }

    #[test]
    fn test_vp8_bad_start_code() {
        let p = [0x00, 0x00, 0x00, 0x01, 0x02, 0x03, 0x40, 0x01, 0xF0, 0x00];
        let fields = decode(make_riff(b"RIFF", b"WEBP", &make_chunk(b"VP8 ", &p)));
        assert_eq!(flag(&fields, "vp8.start_code_valid"), Some(false));
        assert!(fields.get("vp8.width").is_none());
        assert_eq!(fields.errors().len(), 1);
    }

    #[test]
    fn test_animation_chunks() {
        let mut chunks = vp8x(VP8X_ANIMATION, 64, 32);
        chunks.extend(make_chunk(b"ANIM", &[0x10, 0x20, 0x30, 0xFF, 0x00, 0x00]));
        for i in 0..2u32 {
            let mut frame = Vec::new();
            frame.extend_from_slice(&(i * 4).to_le_bytes()[..3]);
            frame.extend_from_slice(&0u32.to_le_bytes()[..3]);
            frame.extend_from_slice(&31u32.to_le_bytes()[..3]);
            frame.extend_from_slice(&31u32.to_le_bytes()[..3]);
            frame.extend_from_slice(&100u32.to_le_bytes()[..3]);
            frame.push(0x03);
            frame.extend(make_chunk(b"VP8L", &vp8l_header(32, 32, false)));
            chunks.extend(make_chunk(b"ANMF", &frame));
        }
        let fields = decode(make_riff(b"RIFF", b"WEBP", &chunks));

        assert_eq!(flag(&fields, "features.has_animation"), Some(true));
        assert_eq!(
            fields.get("anim.background_color").and_then(FieldValue::as_str),
            Some("#FF302010")
        );
        assert_eq!(uint(&fields, "anim.loop_count"), Some(0));
        assert_eq!(uint(&fields, "anmf.frame_count"), Some(2));
        let frames = fields.get("anmf.frames").and_then(FieldValue::as_list).unwrap();
        let second = frames[1].as_map().unwrap();
        assert_eq!(second.get("x"), Some(&FieldValue::UInt(8)));
        assert_eq!(second.get("width"), Some(&FieldValue::UInt(32)));
        assert_eq!(second.get("duration"), Some(&FieldValue::UInt(100)));
        assert_eq!(second.get("dispose_to_background"), Some(&FieldValue::Bool(true)));
        assert_eq!(second.get("blend"), Some(&FieldValue::Bool(false)));
    }

    #[test]
    fn test_alpha_flags_and_metadata_sizes() {
        let mut chunks = vp8x(VP8X_ALPHA | VP8X_EXIF, 10, 10);
        // preprocessing 1, filtering gradient, lossless
        chunks.extend(make_chunk(b"ALPH", &[0b0001_1101]));
        chunks.extend(make_chunk(b"EXIF", &[0u8; 12]));
        let fields = decode(make_riff(b"RIFF", b"WEBP", &chunks));
        assert_eq!(uint(&fields, "alph.compression"), Some(1));
        assert_eq!(uint(&fields, "alph.filtering"), Some(3));
        assert_eq!(
            fields.get("alph.filtering_name").and_then(FieldValue::as_str),
            Some("gradient")
        );
        assert_eq!(uint(&fields, "alph.preprocessing"), Some(1));
        assert_eq!(uint(&fields, "exif.size"), Some(12));
        assert_eq!(flag(&fields, "features.has_exif"), Some(true));
    }

    #[test]
    fn test_unknown_chunk_between_known() {
        let mut chunks = vp8x(0, 8, 8);
        chunks.extend(make_chunk(b"XYZW", &[1, 2, 3]));
        chunks.extend(make_chunk(b"VP8L", &vp8l_header(8, 8, false)));
        let fields = decode(make_riff(b"RIFF", b"WEBP", &chunks));
        assert_eq!(uint(&fields, "vp8x.width"), Some(8));
        assert_eq!(uint(&fields, "vp8l.height"), Some(8));
        assert_eq!(uint(&fields, "unknown_chunks"), Some(1));
        assert!(fields.get("xyzw.size").is_none());
    }

    #[test]
    fn test_short_vp8x_records_error_and_continues() {
        let mut chunks = make_chunk(b"VP8X", &[0x04, 0, 0, 0, 1]);
        chunks.extend(make_chunk(b"ALPH", &[0x00]));
        let fields = decode(make_riff(b"RIFF", b"WEBP", &chunks));
        assert!(fields.get("vp8x.flags").is_none());
        assert_eq!(uint(&fields, "alph.compression"), Some(0));
        assert!(fields.errors()[0].starts_with("VP8X: truncated"));
    }
}
