use std::collections::BTreeMap;
use std::io;

use log::debug;

use super::{
    chunk_label, fixed_text, parse_form_header, truncation_error, RIFF_HEADER_LEN,
    RF64_SIZE_PLACEHOLDER,
};
use crate::bits::reader::{read_bytes, read_fourcc, read_i16, read_u16, read_u32, read_u64, ByteOrder};
use crate::cursor::{ContainerUnit, HeaderShape, Step, UnitCursor};
use crate::errors::{DecodeError, DecodeResult};
use crate::metadata::{read_head, ContainerDecoder, ContainerFormat, DecodeContext, FieldSet, FieldValue};
use crate::streams::SeekableStream;

const LE: ByteOrder = ByteOrder::Little;

pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;
/// Fixed part of a `bext` chunk (EBU Tech 3285); coding history follows.
pub const BEXT_FIXED_LEN: usize = 602;
const MAX_CODING_HISTORY: usize = 4096;
const MAX_INFO_TEXT: usize = 1024;
const MAX_DS64_TABLE: u32 = 256;

/// WAV, RF64 and BW64 decoder, including Broadcast Wave `bext`.
pub struct WavDecoder;

impl ContainerDecoder for WavDecoder {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Wav
    }

    fn decode(&self, stream: &mut dyn SeekableStream, ctx: &DecodeContext) -> io::Result<FieldSet> {
        decode_wav(stream, ctx)
    }
}

/// 64-bit sizes from an RF64 `ds64` chunk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Ds64 {
    pub riff_size: u64,
    pub data_size: u64,
    pub sample_count: u64,
    pub table_length: u32,
    /// Per-chunk size overrides, in file order.
    pub table: Vec<([u8; 4], u64)>,
}

impl Ds64 {
    pub fn size_for(&self, code: &[u8; 4]) -> Option<u64> {
        if code == b"data" {
            return Some(self.data_size);
        }
        self.table
            .iter()
            .find(|(c, _)| c == code)
            .map(|(_, size)| *size)
    }
}

#[derive(Default)]
struct WavState {
    byte_rate: Option<u32>,
    data_size: Option<u64>,
    ds64: Option<Ds64>,
}

pub fn decode_wav(stream: &mut dyn SeekableStream, ctx: &DecodeContext) -> io::Result<FieldSet> {
    let mut fields = FieldSet::new(ContainerFormat::Wav);
    let head = read_head(stream, RIFF_HEADER_LEN as usize)?;
    let form = match parse_form_header(&head, b"WAVE", "WAV") {
        Ok(form) => form,
        Err(e) => {
            debug!("{}", e);
            return Ok(fields);
        }
    };
    fields.mark_valid();
    fields.set("riff.form", chunk_label(&form.form));
    fields.set("riff.declared_size", form.declared_size);

    let stream_len = stream.total_len()?;
    let end = form.declared_end(stream_len);
    let mut cursor =
        UnitCursor::with_range(stream, HeaderShape::Riff, stream_len, RIFF_HEADER_LEN, end)
            .with_limits(ctx.limits.max_depth, ctx.limits.max_units);
    let mut state = WavState::default();

    loop {
        let mut unit = match cursor.next_unit()? {
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

        // RF64 chunks whose 32-bit size is the placeholder take their size from ds64
        if let Some(size) = state.ds64.as_ref().and_then(|d| d.size_for(&code)) {
            if unit.truncated || unit.payload_length == RF64_SIZE_PLACEHOLDER as u64 {
                debug!("{} size {} taken from ds64", label, size);
                cursor.resize(&mut unit, size);
            }
        }

        match &code {
            b"fmt " => {
                let payload = cursor.read_payload(&unit, 64)?;
                if let Err(e) = decode_fmt(&payload, &mut fields, &mut state) {
                    fields.record_error("fmt", e);
                }
            }
            b"fact" => {
                let payload = cursor.read_payload(&unit, 4)?;
                match read_u32(&payload, 0, LE) {
                    Ok(samples) => fields.set("fact.sample_length", samples),
                    Err(e) => fields.record_error("fact", e),
                }
            }
            b"data" => {
                fields.set("data.offset", unit.payload_offset);
                fields.set("data.size", unit.payload_length);
                state.data_size = Some(unit.payload_length);
            }
            b"ds64" => {
                let payload = cursor.read_payload(&unit, 28 + 12 * MAX_DS64_TABLE as usize)?;
                match decode_ds64(&payload) {
                    Ok(ds64) => {
                        record_ds64(&ds64, &mut fields);
                        if form.is_64bit() {
                            if form.declared_size == RF64_SIZE_PLACEHOLDER {
                                cursor.set_scope_end(ds64.riff_size.saturating_add(8));
                            }
                            state.ds64 = Some(ds64);
                        }
                    }
                    Err(e) => fields.record_error("ds64", e),
                }
            }
            b"bext" => {
                let payload = cursor.read_payload(&unit, BEXT_FIXED_LEN + MAX_CODING_HISTORY)?;
                if let Err(e) = decode_bext(&payload, &mut fields) {
                    fields.record_error("bext", e);
                }
            }
            b"LIST" => decode_list(&mut cursor, &unit, &mut fields)?,
            _ => {
                debug!("skipping {} chunk ({} bytes)", label, unit.payload_length);
                fields.bump("unknown_chunks");
            }
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
    if let (Some(size), Some(rate)) = (state.data_size, state.byte_rate) {
        if rate > 0 {
            fields.set("duration_seconds", size as f64 / rate as f64);
        }
    }
    Ok(fields)
}

fn format_name(code: u16) -> &'static str {
    match code {
        0x0001 => "PCM",
        0x0002 => "Microsoft ADPCM",
        0x0003 => "IEEE float",
        0x0006 => "A-law",
        0x0007 => "mu-law",
        0x0011 => "IMA ADPCM",
        0x0050 => "MPEG",
        0x0055 => "MPEG Layer 3",
        WAVE_FORMAT_EXTENSIBLE => "Extensible",
        _ => "Unknown",
    }
}

/// Microsoft GUID layout: three little-endian groups, then eight bytes.
fn guid_string(b: &[u8]) -> DecodeResult<String> {
    let data1 = read_u32(b, 0, LE)?;
    let data2 = read_u16(b, 4, LE)?;
    let data3 = read_u16(b, 6, LE)?;
    let tail = read_bytes(b, 8, 8)?;
    Ok(format!(
        "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{}",
        data1,
        data2,
        data3,
        tail[0],
        tail[1],
        hex(&tail[2..])
    ))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn decode_fmt(p: &[u8], fields: &mut FieldSet, state: &mut WavState) -> DecodeResult<()> {
    let audio_format = read_u16(p, 0, LE)?;
    let channels = read_u16(p, 2, LE)?;
    let sample_rate = read_u32(p, 4, LE)?;
    let byte_rate = read_u32(p, 8, LE)?;
    let block_align = read_u16(p, 12, LE)?;
    let bits_per_sample = read_u16(p, 14, LE)?;

    fields.set("fmt.audio_format", audio_format);
    fields.set("fmt.format_name", format_name(audio_format));
    fields.set("fmt.channels", channels);
    fields.set("fmt.sample_rate", sample_rate);
    fields.set("fmt.byte_rate", byte_rate);
    fields.set("fmt.block_align", block_align);
    fields.set("fmt.bits_per_sample", bits_per_sample);
    state.byte_rate = Some(byte_rate);

    if audio_format == WAVE_FORMAT_EXTENSIBLE {
        let extra = read_u16(p, 16, LE)?;
        if extra < 22 {
            return Err(DecodeError::unsupported(format!(
                "extensible format with {} extension bytes",
                extra
            )));
        }
        let valid_bits = read_u16(p, 18, LE)?;
        let channel_mask = read_u32(p, 20, LE)?;
        let sub_format = read_bytes(p, 24, 16)?;
        let sub_code = read_u16(sub_format, 0, LE)?;
        fields.set("fmt.valid_bits_per_sample", valid_bits);
        fields.set("fmt.channel_mask", channel_mask);
        fields.set("fmt.sub_format", guid_string(sub_format)?);
        fields.set("fmt.sub_format_name", format_name(sub_code));
    }
    Ok(())
}

pub fn decode_ds64(p: &[u8]) -> DecodeResult<Ds64> {
    let mut ds64 = Ds64 {
        riff_size: read_u64(p, 0, LE)?,
        data_size: read_u64(p, 8, LE)?,
        sample_count: read_u64(p, 16, LE)?,
        table_length: read_u32(p, 24, LE)?,
        table: Vec::new(),
    };
    for i in 0..ds64.table_length.min(MAX_DS64_TABLE) as usize {
        let at = 28 + i * 12;
        match (read_fourcc(p, at), read_u64(p, at + 4, LE)) {
            (Ok(code), Ok(size)) => ds64.table.push((code, size)),
            _ => break,
        }
    }
    Ok(ds64)
}

fn record_ds64(ds64: &Ds64, fields: &mut FieldSet) {
    fields.set("ds64.riff_size", ds64.riff_size);
    fields.set("ds64.data_size", ds64.data_size);
    fields.set("ds64.sample_count", ds64.sample_count);
    fields.set("ds64.table_length", ds64.table_length);
    if !ds64.table.is_empty() {
        let overrides: BTreeMap<String, FieldValue> = ds64
            .table
            .iter()
            .map(|(code, size)| (chunk_label(code), FieldValue::from(*size)))
            .collect();
        fields.set("ds64.overrides", overrides);
    }
    if (ds64.table.len() as u32) < ds64.table_length {
        fields.record_error(
            "ds64",
            DecodeError::truncated(28 + ds64.table_length as usize * 12, 28 + ds64.table.len() * 12),
        );
    }
}

/// Broadcast Wave extension, EBU Tech 3285 layout.
fn decode_bext(p: &[u8], fields: &mut FieldSet) -> DecodeResult<()> {
    if p.len() < BEXT_FIXED_LEN {
        return Err(DecodeError::truncated(BEXT_FIXED_LEN, p.len()));
    }
    let time_low = read_u32(p, 338, LE)? as u64;
    let time_high = read_u32(p, 342, LE)? as u64;
    let version = read_u16(p, 346, LE)?;

    fields.set("bext.description", fixed_text(&p[0..256]));
    fields.set("bext.originator", fixed_text(&p[256..288]));
    fields.set("bext.originator_reference", fixed_text(&p[288..320]));
    fields.set("bext.origination_date", fixed_text(&p[320..330]));
    fields.set("bext.origination_time", fixed_text(&p[330..338]));
    fields.set("bext.time_reference", (time_high << 32) | time_low);
    fields.set("bext.version", version);

    if version >= 1 {
        let umid = &p[348..412];
        if umid.iter().any(|&b| b != 0) {
            fields.set("bext.umid", hex(umid));
        }
    }
    if version >= 2 {
        let loudness = |offset: usize| -> DecodeResult<f64> { Ok(read_i16(p, offset, LE)? as f64 / 100.0) };
        fields.set("bext.loudness_value", loudness(412)?);
        fields.set("bext.loudness_range", loudness(414)?);
        fields.set("bext.max_true_peak_level", loudness(416)?);
        fields.set("bext.max_momentary_loudness", loudness(418)?);
        fields.set("bext.max_short_term_loudness", loudness(420)?);
    }
    let history = fixed_text(&p[BEXT_FIXED_LEN..]);
    if !history.is_empty() {
        fields.set("bext.coding_history", history);
    }
    Ok(())
}

/// `LIST` chunk. Only `INFO` lists are walked; their sub-chunks are text.
fn decode_list(
    cursor: &mut UnitCursor<'_>,
    unit: &ContainerUnit,
    fields: &mut FieldSet,
) -> io::Result<()> {
    let head = cursor.read_payload(unit, 4)?;
    let list_type = match read_fourcc(&head, 0) {
        Ok(code) => code,
        Err(e) => {
            fields.record_error("LIST", e);
            return Ok(());
        }
    };
    fields.increment("list_types", &chunk_label(&list_type));
    if &list_type != b"INFO" {
        return Ok(());
    }
    if let Err(e) = cursor.enter(unit, 4) {
        fields.record_error("LIST", e);
        return Ok(());
    }
    loop {
        match cursor.next_unit()? {
            Step::Unit(sub) => {
                let code = sub.tag.fourcc().copied().unwrap_or_default();
                let text = cursor.read_payload(&sub, MAX_INFO_TEXT)?;
                let value = fixed_text(&text);
                if !value.is_empty() {
                    fields.set(format!("info.{}", chunk_label(&code)), value);
                }
                if sub.truncated {
                    fields.record_error(format!("LIST/INFO/{}", chunk_label(&code)), truncation_error(&sub));
                }
                cursor.skip(&sub);
            }
            Step::End => break,
            Step::Malformed(e) => {
                fields.record_error("LIST/INFO", e);
                break;
            }
        }
    }
    cursor.leave();
    Ok(())
}
