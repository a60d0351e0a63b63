use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};

/// Container format detected from the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Wav,
    Webp,
    IsoBmff,
    Sfnt,
    Dicom,
    Id3,
    Fits,
    Hdf5,
    Unknown,
}

impl ContainerFormat {
    /// Short name, as used in the `is_valid_<name>` output key.
    pub fn name(&self) -> &'static str {
        match self {
            ContainerFormat::Wav => "wav",
            ContainerFormat::Webp => "webp",
            ContainerFormat::IsoBmff => "isobmff",
            ContainerFormat::Sfnt => "sfnt",
            ContainerFormat::Dicom => "dicom",
            ContainerFormat::Id3 => "id3",
            ContainerFormat::Fits => "fits",
            ContainerFormat::Hdf5 => "hdf5",
            ContainerFormat::Unknown => "unknown",
        }
    }

    /// Get format name as string for display
    pub fn display_name(&self) -> &'static str {
        match self {
            ContainerFormat::Wav => "WAV (RIFF / RF64 / BW64)",
            ContainerFormat::Webp => "WebP (RIFF)",
            ContainerFormat::IsoBmff => "ISO Base Media (AVIF / HEIF / MP4)",
            ContainerFormat::Sfnt => "SFNT (TrueType / OpenType)",
            ContainerFormat::Dicom => "DICOM Part 10",
            ContainerFormat::Id3 => "ID3v2",
            ContainerFormat::Fits => "FITS",
            ContainerFormat::Hdf5 => "HDF5",
            ContainerFormat::Unknown => "Unknown format",
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    UInt(u64),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::UInt(v) => Some(*v),
            FieldValue::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::UInt(v) => Some(*v as f64),
            FieldValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, FieldValue>> {
        match self {
            FieldValue::Map(map) => Some(map),
            _ => None,
        }
    }
}

macro_rules! field_value_from {
    ($variant:ident, $target:ty, $($t:ty),+) => {
        $(impl From<$t> for FieldValue {
            fn from(v: $t) -> Self {
                FieldValue::$variant(v as $target)
            }
        })+
    };
}

field_value_from!(UInt, u64, u8, u16, u32, u64, usize);
field_value_from!(Int, i64, i8, i16, i32, i64);
field_value_from!(Float, f64, f32, f64);

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(v: Vec<T>) -> Self {
        FieldValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, FieldValue>> for FieldValue {
    fn from(v: BTreeMap<String, FieldValue>) -> Self {
        FieldValue::Map(v)
    }
}

/// Decoded fields of one file, plus what failed along the way.
///
/// Keys are unique; setting a key twice keeps the last value. A field that
/// failed to decode is absent from `fields` and present in `errors`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSet {
    format: ContainerFormat,
    valid: bool,
    fields: BTreeMap<String, FieldValue>,
    errors: Vec<String>,
}

impl FieldSet {
    pub fn new(format: ContainerFormat) -> Self {
        Self {
            format,
            valid: false,
            fields: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The signature matched; the file is this format.
    pub fn mark_valid(&mut self) {
        self.valid = true;
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Set `key` when `value` is present.
    pub fn set_opt<V: Into<FieldValue>>(&mut self, key: impl Into<String>, value: Option<V>) {
        if let Some(v) = value {
            self.set(key, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Bump the counter `entry` inside the map stored at `key`.
    pub fn increment(&mut self, key: &str, entry: &str) {
        let slot = self
            .fields
            .entry(key.to_string())
            .or_insert_with(|| FieldValue::Map(BTreeMap::new()));
        if let FieldValue::Map(map) = slot {
            let count = map.entry(entry.to_string()).or_insert(FieldValue::UInt(0));
            if let FieldValue::UInt(n) = count {
                *n += 1;
            }
        }
    }

    /// Bump the plain counter stored at `key`.
    pub fn bump(&mut self, key: &str) {
        let slot = self
            .fields
            .entry(key.to_string())
            .or_insert(FieldValue::UInt(0));
        if let FieldValue::UInt(n) = slot {
            *n += 1;
        }
    }

    /// Append to the list stored at `key`.
    pub fn push(&mut self, key: &str, value: impl Into<FieldValue>) {
        let slot = self
            .fields
            .entry(key.to_string())
            .or_insert_with(|| FieldValue::List(Vec::new()));
        if let FieldValue::List(items) = slot {
            items.push(value.into());
        }
    }

    pub fn record_error(&mut self, context: impl fmt::Display, err: impl fmt::Display) {
        let message = format!("{}: {}", context, err);
        log::warn!("{} extraction: {}", self.format, message);
        self.errors.push(message);
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn fields_extracted(&self) -> usize {
        self.fields.len()
    }

    /// Flat output mapping: decoded fields plus `is_valid_<format>`,
    /// `format`, `fields_extracted` and, when anything failed,
    /// `extraction_errors`.
    pub fn to_output(&self) -> BTreeMap<String, FieldValue> {
        let mut out = self.fields.clone();
        out.insert(
            format!("is_valid_{}", self.format.name()),
            FieldValue::Bool(self.valid),
        );
        out.insert("format".to_string(), self.format.name().into());
        out.insert(
            "fields_extracted".to_string(),
            FieldValue::UInt(self.fields.len() as u64),
        );
        if !self.errors.is_empty() {
            out.insert(
                "extraction_errors".to_string(),
                FieldValue::List(self.errors.iter().map(|e| e.as_str().into()).collect()),
            );
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Serialize for FieldSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_output().serialize(serializer)
    }
}
