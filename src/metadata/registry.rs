use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use log::{debug, info};

use super::detector::{detect_format, read_head};
use super::dictionary::TagDictionary;
use super::extractor::{run_external, ExternalOutcome, ExternalParser};
use super::types::{ContainerFormat, FieldSet};
use crate::config::{LimitsConfig, ParserConfig};
use crate::dicom::DicomDecoder;
use crate::errors::{ConfigError, ContainerParserResult, DecodeError};
use crate::id3::Id3Decoder;
use crate::isobmff::IsoBmffDecoder;
use crate::riff::{WavDecoder, WebpDecoder};
use crate::sfnt::SfntDecoder;
use crate::streams::fits::FitsDecoder;
use crate::streams::hdf5::Hdf5Decoder;
use crate::streams::{LocalSeekableStream, SeekableStream};

/// Read-only state shared by every decode of one registry.
#[derive(Debug, Clone, Default)]
pub struct DecodeContext {
    pub limits: LimitsConfig,
    dictionaries: BTreeMap<ContainerFormat, TagDictionary>,
}

impl DecodeContext {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            limits,
            dictionaries: BTreeMap::new(),
        }
    }

    pub fn with_dictionary(mut self, format: ContainerFormat, dictionary: TagDictionary) -> Self {
        self.dictionaries.insert(format, dictionary);
        self
    }

    pub fn dictionary(&self, format: ContainerFormat) -> Option<&TagDictionary> {
        self.dictionaries.get(&format)
    }
}

/// One format's built-in decoder.
pub trait ContainerDecoder: Send + Sync {
    fn format(&self) -> ContainerFormat;

    /// Signature check over the leading bytes of the file.
    fn matches(&self, head: &[u8]) -> bool {
        detect_format(head) == self.format()
    }

    /// Decode the whole stream. A signature mismatch yields an invalid, empty
    /// field set; only I/O failures are errors.
    fn decode(&self, stream: &mut dyn SeekableStream, ctx: &DecodeContext)
        -> io::Result<FieldSet>;
}

/// Built once by the caller and passed by reference to every extraction.
pub struct DecoderRegistry {
    decoders: Vec<Box<dyn ContainerDecoder>>,
    externals: Vec<Box<dyn ExternalParser>>,
    context: DecodeContext,
}

impl DecoderRegistry {
    /// Registry with every built-in decoder and the tag dictionaries named in
    /// `config`.
    pub fn new(config: &ParserConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut context = DecodeContext::new(config.limits.clone());
        for (format, path) in &config.tag_dictionaries {
            let format = parse_format_name(format).ok_or_else(|| {
                ConfigError::Invalid(format!("unknown format {:?} in tag_dictionaries", format))
            })?;
            let dictionary = TagDictionary::from_json_file(path)?;
            debug!("{} tag names for {} from {}", dictionary.len(), format, path.display());
            context = context.with_dictionary(format, dictionary);
        }

        let mut registry = Self::with_context(context);
        registry.register(Box::new(WavDecoder));
        registry.register(Box::new(WebpDecoder));
        registry.register(Box::new(IsoBmffDecoder));
        registry.register(Box::new(SfntDecoder));
        registry.register(Box::new(DicomDecoder));
        registry.register(Box::new(Id3Decoder));
        registry.register(Box::new(FitsDecoder));
        registry.register(Box::new(Hdf5Decoder));
        Ok(registry)
    }

    /// Registry with no decoders.
    pub fn with_context(context: DecodeContext) -> Self {
        Self {
            decoders: Vec::new(),
            externals: Vec::new(),
            context,
        }
    }

    /// Later registrations for the same format take precedence.
    pub fn register(&mut self, decoder: Box<dyn ContainerDecoder>) {
        self.decoders.insert(0, decoder);
    }

    pub fn register_external(&mut self, parser: Box<dyn ExternalParser>) {
        self.externals.insert(0, parser);
    }

    pub fn context(&self) -> &DecodeContext {
        &self.context
    }

    pub fn decoder_for(&self, format: ContainerFormat) -> Option<&dyn ContainerDecoder> {
        self.decoders
            .iter()
            .find(|d| d.format() == format)
            .map(|d| d.as_ref())
    }

    /// First registered decoder whose signature matches.
    pub fn detect(&self, stream: &mut dyn SeekableStream) -> io::Result<ContainerFormat> {
        let head = read_head(stream, self.context.limits.probe_len)?;
        Ok(self
            .decoders
            .iter()
            .find(|d| d.matches(&head))
            .map_or(ContainerFormat::Unknown, |d| d.format()))
    }

    /// Open `path`, detect its format and decode it. Only failing to open or
    /// read the file is an error.
    pub fn extract_path<P: AsRef<Path>>(&self, path: P) -> ContainerParserResult<FieldSet> {
        let path = path.as_ref();
        let mut stream = LocalSeekableStream::open(path)?;
        let format = self.detect(&mut stream)?;

        let mut external_error = None;
        if let Some(parser) = self.externals.iter().find(|p| p.format() == format) {
            match run_external(parser.as_ref(), path) {
                ExternalOutcome::Parsed(fields) => return Ok(fields),
                ExternalOutcome::Failed(message) => external_error = Some(message),
            }
        }

        let mut fields = self.decode_as(format, &mut stream)?;
        if let Some(message) = external_error {
            fields.record_error("fallback", message);
        }
        info!(
            "{}: {} ({} fields, {} errors, {} bytes read)",
            path.display(),
            fields.format().display_name(),
            fields.fields_extracted(),
            fields.errors().len(),
            stream.bytes_read()
        );
        Ok(fields)
    }

    /// Detect and decode an already open stream. External parsers need a
    /// path and are not consulted.
    pub fn extract_stream(&self, stream: &mut dyn SeekableStream) -> ContainerParserResult<FieldSet> {
        let format = self.detect(stream)?;
        Ok(self.decode_as(format, stream)?)
    }

    fn decode_as(
        &self,
        format: ContainerFormat,
        stream: &mut dyn SeekableStream,
    ) -> io::Result<FieldSet> {
        match self.decoder_for(format) {
            Some(decoder) => decoder.decode(stream, &self.context),
            None => {
                let mut fields = FieldSet::new(ContainerFormat::Unknown);
                fields.record_error(
                    "signature",
                    DecodeError::NotThisFormat {
                        format: "registered container",
                    },
                );
                Ok(fields)
            }
        }
    }
}

fn parse_format_name(name: &str) -> Option<ContainerFormat> {
    [
        ContainerFormat::Wav,
        ContainerFormat::Webp,
        ContainerFormat::IsoBmff,
        ContainerFormat::Sfnt,
        ContainerFormat::Dicom,
        ContainerFormat::Id3,
        ContainerFormat::Fits,
        ContainerFormat::Hdf5,
    ]
    .into_iter()
    .find(|f| f.name().eq_ignore_ascii_case(name))
}
