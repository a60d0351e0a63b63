//! Streaming DICOM element headers, one record per element, item or
//! delimiter. Values are never read apart from the transfer syntax.

use std::io;

use log::warn;
use serde::Serialize;

use crate::config::LimitsConfig;
use crate::dicom::{DicomElement, DicomWalker, WalkStep};
use crate::streams::SeekableStream;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DicomElementRecord {
    pub tag: String,
    pub group: u16,
    pub element: u16,
    pub vr: Option<String>,
    /// `None` for undefined length.
    pub length: Option<u64>,
    pub offset: u64,
    pub depth: usize,
}

impl From<DicomElement> for DicomElementRecord {
    fn from(e: DicomElement) -> Self {
        Self {
            tag: e.tag_string(),
            vr: e.vr_string(),
            group: e.group,
            element: e.element,
            length: e.length,
            offset: e.offset,
            depth: e.depth,
        }
    }
}

/// Single-pass iterator over the element headers of one file. Ends early,
/// with a warning, at the first header that cannot be walked past.
pub struct DicomElementStream<S: SeekableStream> {
    stream: S,
    walker: Option<DicomWalker>,
}

pub fn stream_dicom_elements<S: SeekableStream>(stream: S) -> io::Result<DicomElementStream<S>> {
    stream_dicom_elements_with_limits(stream, &LimitsConfig::default())
}

pub fn stream_dicom_elements_with_limits<S: SeekableStream>(
    mut stream: S,
    limits: &LimitsConfig,
) -> io::Result<DicomElementStream<S>> {
    let walker = DicomWalker::start(&mut stream, limits)?.ok();
    Ok(DicomElementStream { stream, walker })
}

impl<S: SeekableStream> Iterator for DicomElementStream<S> {
    type Item = io::Result<DicomElementRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let walker = self.walker.as_mut()?;
        loop {
            match walker.next_element(&mut self.stream) {
                Ok(WalkStep::Element(element)) => return Some(Ok(element.into())),
                Ok(WalkStep::End) => {
                    self.walker = None;
                    return None;
                }
                Ok(WalkStep::Failed(e)) => {
                    warn!("DICOM element stream at {}: {}", walker.position(), e);
                }
                Err(e) => {
                    self.walker = None;
                    return Some(Err(e));
                }
            }
        }
    }
}
