//! ISO base media file format: MP4, AVIF and HEIF boxes.

pub mod av1c;
pub mod ftyp;
pub mod movie;
pub mod props;

use std::io;

use log::debug;

use crate::bits::reader::fourcc_to_string;
use crate::cursor::{ContainerUnit, HeaderShape, Step, UnitCursor};
use crate::errors::{DecodeError, DecodeResult};
use crate::metadata::{read_head, ContainerDecoder, ContainerFormat, DecodeContext, FieldSet, FieldValue};
use crate::streams::SeekableStream;

use self::av1c::parse_av1c;
use self::ftyp::{brand_description, parse_ftyp};
use self::movie::{
    codec_name, is_visual_sample_entry, parse_hdlr, parse_mdhd, parse_mvhd,
    parse_stsd_entry_count, parse_tkhd, parse_visual_sample_entry, VISUAL_SAMPLE_ENTRY_LEN,
};
use self::props::{parse_colr, parse_ispe, parse_pixi, primaries_name, transfer_name, Colour};

/// Boxes whose payload is nothing but child boxes.
pub const CONTAINER_BOXES: &[&[u8; 4]] = &[
    b"moov", b"trak", b"mdia", b"minf", b"stbl", b"dinf", b"edts", b"udta", b"mvex", b"moof",
    b"traf", b"iprp", b"ipco",
];

pub struct IsoBmffDecoder;

impl ContainerDecoder for IsoBmffDecoder {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::IsoBmff
    }

    fn decode(&self, stream: &mut dyn SeekableStream, ctx: &DecodeContext) -> io::Result<FieldSet> {
        decode_isobmff(stream, ctx)
    }
}

/// Offset into `unit`'s payload where its child boxes start, or `None` for a
/// leaf box.
pub fn children_start(
    cursor: &mut UnitCursor<'_>,
    unit: &ContainerUnit,
    parent: Option<&[u8; 4]>,
) -> io::Result<Option<u64>> {
    let Some(code) = unit.tag.fourcc() else {
        return Ok(None);
    };
    if CONTAINER_BOXES.contains(&code) {
        return Ok(Some(0));
    }
    match code {
        // A full box in ISOBMFF, a plain container in QuickTime.
        b"meta" => {
            let head = cursor.read_payload(unit, 4)?;
            Ok(Some(if head == [0, 0, 0, 0] { 4 } else { 0 }))
        }
        // version/flags and entry count
        b"stsd" => Ok(Some(8)),
        c if parent == Some(b"stsd") && is_visual_sample_entry(c) => {
            Ok(Some(VISUAL_SAMPLE_ENTRY_LEN))
        }
        _ => Ok(None),
    }
}

/// Where decoded fields go: which track, if any, and the enclosing box.
#[derive(Default)]
struct Walk {
    path: Vec<[u8; 4]>,
    tracks: usize,
    track: Option<usize>,
}

impl Walk {
    fn parent(&self) -> Option<&[u8; 4]> {
        self.path.last()
    }

    fn prefix(&self) -> String {
        match self.track {
            Some(n) => format!("track{}.", n),
            None => String::new(),
        }
    }

    fn push(&mut self, code: [u8; 4]) {
        if &code == b"trak" {
            self.tracks += 1;
            self.track = Some(self.tracks);
        }
        self.path.push(code);
    }

    fn pop(&mut self) {
        if self.path.pop() == Some(*b"trak") {
            self.track = None;
        }
    }
}

pub fn decode_isobmff(stream: &mut dyn SeekableStream, ctx: &DecodeContext) -> io::Result<FieldSet> {
    let mut fields = FieldSet::new(ContainerFormat::IsoBmff);
    let head = read_head(stream, 8)?;
    if head.get(4..8) != Some(&b"ftyp"[..]) {
        debug!("{}", DecodeError::NotThisFormat { format: "ISOBMFF" });
        return Ok(fields);
    }
    fields.mark_valid();

    let mut cursor = UnitCursor::new(stream, HeaderShape::IsoBmff)?
        .with_limits(ctx.limits.max_depth, ctx.limits.max_units);
    let mut walk = Walk::default();

    loop {
        let unit = match cursor.next_unit()? {
            Step::Unit(unit) => unit,
            Step::End => {
                if !cursor.leave() {
                    break;
                }
                walk.pop();
                continue;
            }
            Step::Malformed(e) => {
                let context = walk.parent().map_or("file".to_string(), |p| fourcc_to_string(p));
                fields.record_error(context, e);
                continue;
            }
        };
        let code = unit.tag.fourcc().copied().unwrap_or_default();
        let label = fourcc_to_string(&code).trim_end().to_string();
        fields.increment("box_types", &label);
        if unit.truncated {
            fields.record_error(&label, DecodeError::MalformedLength {
                declared: unit.declared_length,
                reason: "clamped to the end of its container",
            });
        }

        if let Some(max) = leaf_read_len(&code, walk.parent()) {
            let payload = cursor.read_payload(&unit, max)?;
            if let Err(e) = decode_leaf(&payload, &unit, &code, &walk, &mut fields) {
                fields.record_error(&label, e);
            }
        }

        match children_start(&mut cursor, &unit, walk.parent())? {
            Some(skip) => match cursor.enter(&unit, skip) {
                Ok(()) => walk.push(code),
                Err(e) => fields.record_error(&label, e),
            },
            None => cursor.skip(&unit),
        }
    }

    if cursor.budget_exhausted() {
        fields.record_error(
            "boxes",
            DecodeError::unsupported(format!("more than {} boxes", ctx.limits.max_units)),
        );
    }
    if walk.tracks > 0 {
        fields.set("isobmff.track_count", walk.tracks);
    }
    summarize(&mut fields, walk.tracks);
    Ok(fields)
}

/// Payload bytes a leaf box needs, or `None` when it is not decoded.
fn leaf_read_len(code: &[u8; 4], parent: Option<&[u8; 4]>) -> Option<usize> {
    if parent == Some(b"stsd") {
        return Some(28);
    }
    let len = match code {
        b"ftyp" | b"hdlr" => 256,
        b"mvhd" => 32,
        b"tkhd" => 96,
        b"mdhd" => 34,
        b"stsd" => 8,
        b"av1C" => 4,
        b"ispe" => 12,
        b"pixi" => 64,
        b"colr" => 16,
        b"mdat" => 0,
        _ => return None,
    };
    Some(len)
}

fn decode_leaf(
    p: &[u8],
    unit: &ContainerUnit,
    code: &[u8; 4],
    walk: &Walk,
    fields: &mut FieldSet,
) -> DecodeResult<()> {
    let prefix = walk.prefix();
    let parent = walk.parent();

    if parent == Some(b"stsd") {
        return decode_sample_entry(p, code, &prefix, fields);
    }

    match code {
        b"ftyp" if parent.is_none() => {
            let ftyp = parse_ftyp(p)?;
            fields.set("ftyp.major_brand", ftyp.major_brand_string());
            fields.set("ftyp.minor_version", ftyp.minor_version);
            fields.set("ftyp.compatible_brands", ftyp.compatible_brand_strings());
            fields.set("ftyp.description", brand_description(&ftyp.major_brand));
            fields.set("isobmff.kind", ftyp.family().as_str());
        }
        b"mvhd" => {
            let mvhd = parse_mvhd(p)?;
            fields.set("mvhd.version", mvhd.version);
            fields.set("mvhd.timescale", mvhd.timescale);
            fields.set("mvhd.duration", mvhd.duration);
            fields.set_opt("mvhd.duration_seconds", mvhd.duration_seconds());
            fields.set_opt("mvhd.creation_time", mvhd.created());
            fields.set_opt("mvhd.modification_time", mvhd.modified());
        }
        b"tkhd" => {
            let tkhd = parse_tkhd(p)?;
            fields.set(format!("{}track_id", prefix), tkhd.track_id);
            fields.set(format!("{}enabled", prefix), tkhd.enabled());
            fields.set(format!("{}width", prefix), tkhd.width);
            fields.set(format!("{}height", prefix), tkhd.height);
        }
        b"mdhd" => {
            let mdhd = parse_mdhd(p)?;
            fields.set(format!("{}timescale", prefix), mdhd.times.timescale);
            fields.set(format!("{}duration", prefix), mdhd.times.duration);
            fields.set_opt(format!("{}duration_seconds", prefix), mdhd.times.duration_seconds());
            fields.set_opt(format!("{}language", prefix), mdhd.language);
        }
        b"hdlr" => {
            let hdlr = parse_hdlr(p)?;
            let prefix = if parent == Some(b"meta") { "meta.".to_string() } else { prefix };
            fields.set(format!("{}handler_type", prefix), hdlr.handler_string());
            fields.set(format!("{}kind", prefix), hdlr.kind());
            if !hdlr.name.is_empty() {
                fields.set(format!("{}handler_name", prefix), hdlr.name);
            }
        }
        b"stsd" => {
            let count = parse_stsd_entry_count(p)?;
            fields.set(format!("{}sample_entries", prefix), count);
        }
        b"av1C" => {
            let av1c = parse_av1c(p)?;
            let key = |name: &str| format!("{}av1c.{}", prefix, name);
            fields.set(key("profile"), av1c.seq_profile);
            fields.set(key("profile_name"), av1c.profile_name());
            fields.set(key("level"), av1c.seq_level_idx_0);
            fields.set(key("tier"), av1c.seq_tier_0);
            fields.set(key("bit_depth"), av1c.bit_depth());
            fields.set(key("monochrome"), av1c.monochrome);
            fields.set(key("chroma_subsampling"), av1c.chroma_subsampling());
            fields.set(key("chroma_sample_position"), av1c.chroma_sample_position);
            fields.set_opt(key("initial_presentation_delay"), av1c.initial_presentation_delay);
        }
        b"ispe" => {
            let (width, height) = parse_ispe(p)?;
            fields.set(format!("{}ispe.width", prefix), width);
            fields.set(format!("{}ispe.height", prefix), height);
        }
        b"pixi" => {
            let bits = parse_pixi(p)?;
            fields.set(format!("{}pixi.bits_per_channel", prefix), bits);
        }
        b"colr" => match parse_colr(p, unit.payload_length)? {
            Colour::Nclx {
                primaries,
                transfer,
                matrix,
                full_range,
            } => {
                let key = |name: &str| format!("{}colr.{}", prefix, name);
                fields.set(key("type"), "nclx");
                fields.set(key("primaries"), primaries);
                fields.set(key("transfer"), transfer);
                fields.set(key("matrix"), matrix);
                fields.set(key("full_range"), full_range);
                fields.set_opt(key("primaries_name"), primaries_name(primaries));
                fields.set_opt(key("transfer_name"), transfer_name(transfer));
            }
            Colour::Icc { kind, size } => {
                fields.set(format!("{}colr.type", prefix), fourcc_to_string(&kind));
                fields.set(format!("{}colr.icc_size", prefix), size);
            }
        },
        b"mdat" => {
            if !fields.contains("mdat.offset") {
                fields.set("mdat.offset", unit.payload_offset);
            }
            let total = fields.get("mdat.size").and_then(FieldValue::as_u64).unwrap_or(0);
            fields.set("mdat.size", total + unit.payload_length);
            fields.set("mdat.extends_to_end", unit.extends_to_end);
        }
        _ => {}
    }
    Ok(())
}

/// First sample entry of a track names its codec.
fn decode_sample_entry(
    p: &[u8],
    code: &[u8; 4],
    prefix: &str,
    fields: &mut FieldSet,
) -> DecodeResult<()> {
    let codec_key = format!("{}codec", prefix);
    if fields.contains(&codec_key) {
        return Ok(());
    }
    fields.set(codec_key, fourcc_to_string(code));
    fields.set_opt(format!("{}codec_name", prefix), codec_name(code));
    if is_visual_sample_entry(code) {
        let (width, height) = parse_visual_sample_entry(p)?;
        fields.set(format!("{}sample_width", prefix), width);
        fields.set(format!("{}sample_height", prefix), height);
    }
    Ok(())
}

/// Image size from the item properties, else the first visual track.
fn summarize(fields: &mut FieldSet, tracks: usize) {
    let mut size = fields
        .get("ispe.width")
        .cloned()
        .zip(fields.get("ispe.height").cloned());
    for n in 1..=tracks {
        if size.is_some() {
            break;
        }
        size = fields
            .get(&format!("track{}.sample_width", n))
            .cloned()
            .zip(fields.get(&format!("track{}.sample_height", n)).cloned());
    }
    if let Some((width, height)) = size {
        fields.set("width", width);
        fields.set("height", height);
    }
    let duration = fields.get("mvhd.duration_seconds").cloned();
    fields.set_opt("duration_seconds", duration);
}
