use std::io::{self, Read, SeekFrom};

use super::types::ContainerFormat;
use crate::streams::hdf5::HDF5_SIGNATURE;
use crate::streams::SeekableStream;

/// SFNT scaler types, collections included.
pub const SFNT_SCALER_TYPES: &[&[u8; 4]] = &[b"\x00\x01\x00\x00", b"true", b"OTTO", b"typ1", b"ttcf"];

/// Detect the container format from the leading bytes of a file.
///
/// Only signatures are checked; file extensions are never consulted. DICOM
/// needs at least 132 bytes to be seen.
pub fn detect_format(head: &[u8]) -> ContainerFormat {
    if head.len() >= 12 && matches!(&head[0..4], b"RIFF" | b"RF64" | b"BW64") {
        match &head[8..12] {
            b"WAVE" => return ContainerFormat::Wav,
            b"WEBP" => return ContainerFormat::Webp,
            _ => {}
        }
    }
    if head.len() >= 132 && &head[128..132] == b"DICM" {
        return ContainerFormat::Dicom;
    }
    if head.len() >= 8 && &head[4..8] == b"ftyp" {
        return ContainerFormat::IsoBmff;
    }
    if head.starts_with(b"ID3") {
        return ContainerFormat::Id3;
    }
    if head.starts_with(HDF5_SIGNATURE) {
        return ContainerFormat::Hdf5;
    }
    if head.starts_with(b"SIMPLE  =") {
        return ContainerFormat::Fits;
    }
    if head.len() >= 4 && SFNT_SCALER_TYPES.iter().any(|t| &head[0..4] == *t) {
        return ContainerFormat::Sfnt;
    }
    ContainerFormat::Unknown
}

/// Read up to `len` bytes from the start of the stream, then rewind.
pub fn read_head(stream: &mut dyn SeekableStream, len: usize) -> io::Result<Vec<u8>> {
    stream.seek(SeekFrom::Start(0))?;
    let mut head = Vec::with_capacity(len);
    let reader: &mut dyn SeekableStream = &mut *stream;
    reader.take(len as u64).read_to_end(&mut head)?;
    stream.seek(SeekFrom::Start(0))?;
    Ok(head)
}
