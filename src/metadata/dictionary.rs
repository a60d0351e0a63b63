use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use log::warn;
use serde::de::{self, Deserialize, Deserializer, MapAccess, Visitor};

use crate::errors::ConfigError;

/// Tag pair to field name table, supplied as data.
///
/// JSON form is an object keyed by `"gggg,eeee"` (hex, parentheses
/// optional): `{"0010,0010": "PatientName"}`. A tag listed twice keeps the
/// last name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDictionary {
    names: BTreeMap<(u16, u16), String>,
}

impl TagDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the name previously stored for the tag, if any.
    pub fn insert(&mut self, group: u16, element: u16, name: impl Into<String>) -> Option<String> {
        self.names.insert((group, element), name.into())
    }

    pub fn name(&self, group: u16, element: u16) -> Option<&str> {
        self.names.get(&(group, element)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }
}

/// Parse `"gggg,eeee"` or `"(gggg,eeee)"`.
pub fn parse_tag_key(key: &str) -> Option<(u16, u16)> {
    let key = key.trim();
    let key = key
        .strip_prefix('(')
        .and_then(|k| k.strip_suffix(')'))
        .unwrap_or(key);
    let (group, element) = key.split_once(',')?;
    let group = u16::from_str_radix(group.trim(), 16).ok()?;
    let element = u16::from_str_radix(element.trim(), 16).ok()?;
    Some((group, element))
}

struct TagDictionaryVisitor;

impl<'de> Visitor<'de> for TagDictionaryVisitor {
    type Value = TagDictionary;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object mapping \"gggg,eeee\" tags to names")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut dictionary = TagDictionary::new();
        while let Some((key, name)) = map.next_entry::<String, String>()? {
            let (group, element) = parse_tag_key(&key)
                .ok_or_else(|| de::Error::custom(format!("invalid tag key {:?}", key)))?;
            if let Some(previous) = dictionary.insert(group, element, name.clone()) {
                warn!(
                    "tag {:04X},{:04X} listed twice: {:?} replaced by {:?}",
                    group, element, previous, name
                );
            }
        }
        Ok(dictionary)
    }
}

impl<'de> Deserialize<'de> for TagDictionary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(TagDictionaryVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tag_key() {
        assert_eq!(parse_tag_key("0010,0010"), Some((0x0010, 0x0010)));
        assert_eq!(parse_tag_key("(7FE0,0010)"), Some((0x7FE0, 0x0010)));
        assert_eq!(parse_tag_key("0028, 0011"), Some((0x0028, 0x0011)));
        assert_eq!(parse_tag_key("PatientName"), None);
        assert_eq!(parse_tag_key("10000,0000"), None);
    }

    #[test]
    fn test_duplicate_keys_last_write_wins() {
        let dict = TagDictionary::from_json_str(
            r#"{"0010,0010": "PatientsName", "0028,0010": "Rows", "(0010,0010)": "PatientName"}"#,
        )
        .unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.name(0x0010, 0x0010), Some("PatientName"));
        assert_eq!(dict.name(0x0028, 0x0010), Some("Rows"));
    }

    #[test]
    fn test_invalid_key_is_a_parse_error() {
        let err = TagDictionary::from_json_str(r#"{"not a tag": "X"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
