//! FITS header streaming.
//!
//! A FITS file is a sequence of HDUs. Each header is a run of 2880-byte
//! blocks holding 80-character cards and ends with an `END` card; the data
//! unit that follows is sized from `BITPIX`, `NAXISn`, `PCOUNT` and `GCOUNT`
//! and padded to a whole block.

use std::collections::HashMap;
use std::io::{self, SeekFrom};

use log::{debug, warn};
use serde::Serialize;

use crate::errors::{DecodeError, DecodeResult};
use crate::metadata::{ContainerDecoder, ContainerFormat, DecodeContext, FieldSet, FieldValue};
use crate::streams::SeekableStream;

pub const FITS_BLOCK: u64 = 2880;
pub const FITS_CARD: usize = 80;
/// Largest axis count a header may declare.
pub const MAX_NAXIS: i64 = 999;

/// One header card.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitsCard {
    pub hdu: usize,
    pub keyword: String,
    pub value: Option<String>,
    pub comment: Option<String>,
}

/// Lazily yields every card of every HDU header; data units are skipped
/// with a seek.
pub struct FitsHeaderStream<S: SeekableStream> {
    stream: S,
    stream_len: u64,
    hdu: usize,
    block: Vec<u8>,
    card_in_block: usize,
    block_loaded: bool,
    header_values: HashMap<String, String>,
    stopped: Option<(usize, DecodeError)>,
    done: bool,
}

pub fn stream_fits_headers<S: SeekableStream>(mut stream: S) -> io::Result<FitsHeaderStream<S>> {
    let stream_len = stream.total_len()?;
    stream.seek(SeekFrom::Start(0))?;
    let mut magic = [0u8; 9];
    let ok = stream_len >= FITS_BLOCK
        && stream.read_exact(&mut magic).is_ok()
        && &magic == b"SIMPLE  =";
    stream.seek(SeekFrom::Start(0))?;
    Ok(FitsHeaderStream {
        stream,
        stream_len,
        hdu: 0,
        block: vec![0u8; FITS_BLOCK as usize],
        card_in_block: 0,
        block_loaded: false,
        header_values: HashMap::new(),
        stopped: None,
        done: !ok,
    })
}

impl<S: SeekableStream> FitsHeaderStream<S> {
    /// The HDU and reason the walk ended early, if a data unit could not be
    /// sized.
    pub fn stopped(&self) -> Option<(usize, &DecodeError)> {
        self.stopped.as_ref().map(|(hdu, e)| (*hdu, e))
    }

    fn load_block(&mut self) -> io::Result<bool> {
        match self.stream.read_exact(&mut self.block) {
            Ok(()) => {
                self.block_loaded = true;
                self.card_in_block = 0;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Seek past the data unit of the header that just ended.
    fn skip_data_unit(&mut self) -> io::Result<()> {
        let size = match data_unit_size(&self.header_values) {
            Ok(size) => size,
            Err(e) => {
                warn!("FITS HDU {}: {}", self.hdu, e);
                self.stopped = Some((self.hdu, e));
                self.done = true;
                return Ok(());
            }
        };
        let padded = size.div_ceil(FITS_BLOCK) * FITS_BLOCK;
        let here = self.stream.stream_position()?;
        let next = here.saturating_add(padded);
        debug!("FITS HDU {} data unit {} bytes, next header at {}", self.hdu, size, next);
        if next + FITS_BLOCK > self.stream_len {
            self.done = true;
        } else {
            self.stream.seek(SeekFrom::Start(next))?;
        }
        self.hdu += 1;
        self.header_values.clear();
        self.block_loaded = false;
        Ok(())
    }

    fn next_card(&mut self) -> io::Result<Option<FitsCard>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if !self.block_loaded || self.card_in_block * FITS_CARD >= self.block.len() {
                if !self.load_block()? {
                    if !self.header_values.is_empty() {
                        warn!("FITS header {} has no END card", self.hdu);
                    }
                    self.done = true;
                    return Ok(None);
                }
            }
            let start = self.card_in_block * FITS_CARD;
            let raw = &self.block[start..start + FITS_CARD];
            self.card_in_block += 1;
            let card = parse_card(raw, self.hdu);

            if card.keyword == "END" {
                self.skip_data_unit()?;
                return Ok(Some(card));
            }
            if card.keyword.is_empty() && card.value.is_none() && card.comment.is_none() {
                continue;
            }
            if let Some(value) = &card.value {
                self.header_values
                    .insert(card.keyword.clone(), value.clone());
            }
            return Ok(Some(card));
        }
    }
}

impl<S: SeekableStream> Iterator for FitsHeaderStream<S> {
    type Item = io::Result<FitsCard>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_card() {
            Ok(Some(card)) => Some(Ok(card)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

pub struct FitsDecoder;

impl ContainerDecoder for FitsDecoder {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Fits
    }

    fn decode(&self, stream: &mut dyn SeekableStream, ctx: &DecodeContext) -> io::Result<FieldSet> {
        decode_fits(stream, ctx)
    }
}

/// Primary header values become `fits.<KEYWORD>`; extensions are listed by
/// their `XTENSION` type.
pub fn decode_fits(stream: &mut dyn SeekableStream, ctx: &DecodeContext) -> io::Result<FieldSet> {
    let mut fields = FieldSet::new(ContainerFormat::Fits);
    let mut cards = stream_fits_headers(&mut *stream)?;
    if cards.done {
        return Ok(fields);
    }
    fields.mark_valid();

    let mut card_count = 0usize;
    let mut hdu_count = 0usize;
    let mut header_open = false;
    for card in cards.by_ref() {
        let card = card?;
        if card_count >= ctx.limits.max_units {
            fields.record_error(
                format!("HDU {}", card.hdu),
                format!("stopped after {} cards", card_count),
            );
            header_open = false;
            break;
        }
        card_count += 1;
        if card.keyword == "END" {
            hdu_count = card.hdu + 1;
            header_open = false;
            continue;
        }
        header_open = true;
        let Some(value) = card.value else {
            continue;
        };
        if card.hdu == 0 {
            fields.set(format!("fits.{}", card.keyword), card_value(&value));
        } else if card.keyword == "XTENSION" {
            fields.push("fits.extensions", value);
        }
    }
    if header_open {
        fields.record_error(format!("HDU {}", hdu_count), "header has no END card");
    }
    if let Some((hdu, e)) = cards.stopped() {
        fields.record_error(format!("HDU {} data unit", hdu), e);
    }
    fields.set("fits.hdu_count", hdu_count);
    fields.set("fits.card_count", card_count);
    Ok(fields)
}

/// Logical, integer and real values are typed; anything else stays text.
fn card_value(value: &str) -> FieldValue {
    match value {
        "T" => return FieldValue::Bool(true),
        "F" => return FieldValue::Bool(false),
        _ => {}
    }
    if let Ok(i) = value.parse::<i64>() {
        return FieldValue::Int(i);
    }
    // FITS allows a D exponent for double precision
    match value.replace(['D', 'd'], "E").parse::<f64>() {
        Ok(f) if f.is_finite() => FieldValue::Float(f),
        _ => FieldValue::Text(value.to_string()),
    }
}

fn parse_card(raw: &[u8], hdu: usize) -> FitsCard {
    let text: String = raw
        .iter()
        .map(|&b| if b.is_ascii() && !b.is_ascii_control() { b as char } else { ' ' })
        .collect();
    let keyword = text[..8].trim_end().to_string();
    if &text[8..10] != "= " {
        let rest = text[8..].trim();
        return FitsCard {
            hdu,
            keyword,
            value: None,
            comment: (!rest.is_empty()).then(|| rest.to_string()),
        };
    }

    let body = &text[10..];
    let (value, comment) = split_value_comment(body);
    FitsCard {
        hdu,
        keyword,
        value: (!value.is_empty()).then_some(value),
        comment,
    }
}

/// Split `value / comment`, honouring quoted strings with `''` escapes.
fn split_value_comment(body: &str) -> (String, Option<String>) {
    let trimmed = body.trim_start();
    if let Some(inner) = trimmed.strip_prefix('\'') {
        let mut value = String::new();
        let mut chars = inner.char_indices().peekable();
        let mut end = inner.len();
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    value.push('\'');
                    chars.next();
                    continue;
                }
                end = i + 1;
                break;
            }
            value.push(c);
        }
        let comment = inner[end..]
            .trim()
            .strip_prefix('/')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        return (value.trim_end().to_string(), comment);
    }
    match trimmed.split_once('/') {
        Some((v, c)) => (
            v.trim().to_string(),
            Some(c.trim().to_string()).filter(|c| !c.is_empty()),
        ),
        None => (trimmed.trim().to_string(), None),
    }
}

fn data_unit_size(values: &HashMap<String, String>) -> DecodeResult<u64> {
    let int = |key: &str| -> Option<i64> { values.get(key)?.trim().parse().ok() };
    let bitpix = int("BITPIX").unwrap_or(8).unsigned_abs();
    let naxis = int("NAXIS").unwrap_or(0);
    if !(0..=MAX_NAXIS).contains(&naxis) {
        return Err(DecodeError::MalformedLength {
            declared: naxis.unsigned_abs(),
            reason: "NAXIS outside 0..=999",
        });
    }
    let naxis = naxis as usize;
    if naxis == 0 {
        return Ok(0);
    }
    // Random groups set NAXIS1 = 0 and leave it out of the product
    let random_groups = int("NAXIS1") == Some(0) && values.contains_key("GROUPS");
    let first = if random_groups { 2 } else { 1 };
    let mut elements: u64 = 1;
    for axis in first..=naxis {
        let n = int(&format!("NAXIS{}", axis)).unwrap_or(0).max(0) as u64;
        elements = elements.saturating_mul(n);
    }
    let pcount = int("PCOUNT").unwrap_or(0).max(0) as u64;
    let gcount = int("GCOUNT").unwrap_or(1).max(1) as u64;
    Ok((bitpix / 8)
        .saturating_mul(gcount)
        .saturating_mul(pcount.saturating_add(elements)))
}
