pub mod bits;
pub use bits::reader::{mask, BitReader, ByteOrder};

pub mod cursor;
pub use cursor::{ContainerUnit, HeaderShape, Step, UnitCursor, UnitTag};

pub mod riff;
pub use riff::{WavDecoder, WebpDecoder};

pub mod isobmff;
pub use isobmff::IsoBmffDecoder;

pub mod sfnt;
pub use sfnt::SfntDecoder;

pub mod dicom;
pub use dicom::DicomDecoder;

pub mod id3;
pub use id3::Id3Decoder;

pub mod streams;
pub use streams::{
    read_chunks, stream_dicom_elements, stream_fits_headers, stream_hdf5_structure,
    AdaptiveChunkSizer, LocalSeekableStream, SeekableStream,
};

pub mod metadata;
pub use metadata::{
    detect_format, ContainerDecoder, ContainerFormat, DecoderRegistry, ExternalParser, FieldSet,
    FieldValue, TagDictionary,
};

pub mod config;
pub use config::ParserConfig;

pub mod errors;
pub use errors::{
    ConfigError, ContainerParserError, ContainerParserResult, DecodeError, DecodeResult,
};

/// Decode `path` with the built-in decoders and default limits.
pub fn extract_metadata<P: AsRef<std::path::Path>>(path: P) -> ContainerParserResult<FieldSet> {
    let registry = DecoderRegistry::new(&ParserConfig::default())?;
    registry.extract_path(path)
}

#[cfg(test)]
pub(crate) mod test_support {
    /// ISOBMFF box: big-endian size, tag, payload.
    pub fn make_box(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 8);
        out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(payload);
        out
    }

    /// ISOBMFF full box: version and 24-bit flags before the payload.
    pub fn make_full_box(name: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
        let mut body = vec![version];
        body.extend_from_slice(&flags.to_be_bytes()[1..]);
        body.extend_from_slice(payload);
        make_box(name, &body)
    }

    /// RIFF chunk: tag, little-endian size, payload, pad byte when odd.
    pub fn make_chunk(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 9);
        out.extend_from_slice(tag);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        if payload.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    /// RIFF file: form header around `chunks`.
    pub fn make_riff(form: &[u8; 4], kind: &[u8; 4], chunks: &[u8]) -> Vec<u8> {
        let mut out = form.to_vec();
        out.extend_from_slice(&((chunks.len() + 4) as u32).to_le_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(chunks);
        out
    }
}
