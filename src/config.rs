use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Parser configuration. Every section has defaults, so `{}` is a valid
/// config file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub chunking: ChunkingConfig,
    pub limits: LimitsConfig,
    /// Format name (`"dicom"`) to JSON tag dictionary file.
    pub tag_dictionaries: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    /// Share of currently available memory one chunk may take.
    pub memory_fraction: f64,
    /// Assumed available memory when the system cannot be asked.
    pub fallback_available_memory: u64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: 64 * 1024,
            max_chunk_size: 16 * 1024 * 1024,
            memory_fraction: 0.01,
            fallback_available_memory: 512 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Units read per parse before giving up.
    pub max_units: usize,
    pub max_depth: usize,
    /// Largest DICOM value decoded inline.
    pub max_inline_value: usize,
    /// Bytes read up front for signature detection.
    pub probe_len: usize,
    pub max_name_records: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_units: 100_000,
            max_depth: 16,
            max_inline_value: 256,
            probe_len: 132,
            max_name_records: 512,
        }
    }
}

impl ParserConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ParserConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.chunking;
        if c.min_chunk_size == 0 || c.min_chunk_size > c.max_chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunk size range {}..={} is empty",
                c.min_chunk_size, c.max_chunk_size
            )));
        }
        if !(c.memory_fraction > 0.0 && c.memory_fraction <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "memory_fraction {} outside (0, 1]",
                c.memory_fraction
            )));
        }
        // DICOM needs the 132-byte preamble for detection
        if self.limits.probe_len < 132 {
            return Err(ConfigError::Invalid(format!(
                "probe_len {} is shorter than 132 bytes",
                self.limits.probe_len
            )));
        }
        if self.limits.max_depth == 0 || self.limits.max_units == 0 {
            return Err(ConfigError::Invalid(
                "max_depth and max_units must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
