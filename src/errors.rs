use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Recoverable failure while decoding a single unit or field.
///
/// None of these abort a parse: the decoder records them in the field set's
/// `extraction_errors` and moves on to the next unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Signature mismatch. Tells the dispatcher to try another format.
    #[error("not a {format} file")]
    NotThisFormat { format: &'static str },

    /// Fewer bytes available than a header or payload requires.
    #[error("truncated data: needed {needed} bytes, {available} available")]
    Truncated { needed: u64, available: u64 },

    /// A declared length that cannot be trusted.
    #[error("malformed length {declared}: {reason}")]
    MalformedLength { declared: u64, reason: &'static str },

    /// A recognised feature this decoder does not handle.
    #[error("unsupported variant: {0}")]
    UnsupportedVariant(String),
}

impl DecodeError {
    pub fn truncated(needed: usize, available: usize) -> Self {
        DecodeError::Truncated {
            needed: needed as u64,
            available: available as u64,
        }
    }

    pub fn unsupported(what: impl Into<String>) -> Self {
        DecodeError::UnsupportedVariant(what.into())
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Fatal errors. Only failing to open or read the input ends a parse early.
#[derive(Debug, Error)]
pub enum ContainerParserError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("External parser error: {0}")]
    External(String),
}

// Conversion to io::Error for callers that only deal in io::Result
impl From<ContainerParserError> for io::Error {
    fn from(err: ContainerParserError) -> Self {
        match err {
            ContainerParserError::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}

impl From<DecodeError> for io::Error {
    fn from(err: DecodeError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

pub type ContainerParserResult<T> = Result<T, ContainerParserError>;
pub type DecodeResult<T> = Result<T, DecodeError>;
