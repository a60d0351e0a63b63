mod detector;
mod dictionary;
mod extractor;
mod registry;
mod types;

pub use detector::{detect_format, read_head, SFNT_SCALER_TYPES};
pub use dictionary::{parse_tag_key, TagDictionary};
pub use extractor::ExternalParser;
pub use registry::{ContainerDecoder, DecodeContext, DecoderRegistry};

pub use types::*;
