//! ID3v2 tags: header, optional extended header, then frames up to the
//! padding.

pub mod frames;

use std::borrow::Cow;
use std::io;

use log::debug;

use crate::bits::reader::{read_bytes, read_synchsafe_u32, read_u32, read_u8, ByteOrder};
use crate::errors::{DecodeError, DecodeResult};
use crate::metadata::{
    read_head, ContainerDecoder, ContainerFormat, DecodeContext, FieldSet, FieldValue,
};
use crate::streams::{read_at, SeekableStream};

use self::frames::{decode_text_frame, frame_format, remove_unsynchronisation, walk_frames, Frame};

pub const ID3_HEADER_LEN: usize = 10;
/// Largest tag body read.
const MAX_TAG_READ: usize = 16 * 1024 * 1024;

pub struct Id3Decoder;

impl ContainerDecoder for Id3Decoder {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Id3
    }

    fn decode(&self, stream: &mut dyn SeekableStream, ctx: &DecodeContext) -> io::Result<FieldSet> {
        decode_id3(stream, ctx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Id3Header {
    pub major: u8,
    pub revision: u8,
    pub flags: u8,
    /// Tag size after the header, footer excluded.
    pub size: u32,
}

impl Id3Header {
    pub fn unsynchronisation(&self) -> bool {
        self.flags & 0x80 != 0
    }

    /// In v2.2 this bit means compression instead.
    pub fn extended_header(&self) -> bool {
        self.flags & 0x40 != 0
    }

    pub fn experimental(&self) -> bool {
        self.flags & 0x20 != 0
    }

    pub fn footer(&self) -> bool {
        self.major >= 4 && self.flags & 0x10 != 0
    }
}

pub fn parse_header(head: &[u8]) -> DecodeResult<Id3Header> {
    if read_bytes(head, 0, 3).ok() != Some(b"ID3".as_slice()) {
        return Err(DecodeError::NotThisFormat { format: "ID3v2" });
    }
    Ok(Id3Header {
        major: read_u8(head, 3)?,
        revision: read_u8(head, 4)?,
        flags: read_u8(head, 5)?,
        size: read_synchsafe_u32(read_bytes(head, 6, 4)?)?,
    })
}

/// Length of the extended header at the start of `body`.
pub fn extended_header_len(body: &[u8], major: u8) -> DecodeResult<usize> {
    let len = if major >= 4 {
        read_synchsafe_u32(read_bytes(body, 0, 4)?)? as usize
    } else {
        4 + read_u32(body, 0, ByteOrder::Big)? as usize
    };
    if len > body.len() {
        return Err(DecodeError::MalformedLength {
            declared: len as u64,
            reason: "extended header larger than the tag",
        });
    }
    Ok(len)
}

pub fn decode_id3(stream: &mut dyn SeekableStream, _ctx: &DecodeContext) -> io::Result<FieldSet> {
    let mut fields = FieldSet::new(ContainerFormat::Id3);
    let head = read_head(stream, ID3_HEADER_LEN)?;
    let header = match parse_header(&head) {
        Ok(header) => header,
        Err(e @ DecodeError::NotThisFormat { .. }) => {
            debug!("{}", e);
            return Ok(fields);
        }
        Err(e) => {
            fields.mark_valid();
            fields.record_error("header", e);
            return Ok(fields);
        }
    };
    fields.mark_valid();
    fields.set("id3.version", format!("2.{}.{}", header.major, header.revision));
    fields.set("id3.major_version", header.major);
    fields.set("id3.revision", header.revision);
    fields.set("id3.tag_size", header.size);
    fields.set("id3.flags.unsynchronisation", header.unsynchronisation());
    fields.set("id3.flags.extended_header", header.extended_header());
    fields.set("id3.flags.experimental", header.experimental());
    fields.set("id3.flags.footer", header.footer());

    if !(2..=4).contains(&header.major) {
        fields.record_error(
            "header",
            DecodeError::unsupported(format!("ID3v2.{}", header.major)),
        );
        return Ok(fields);
    }
    if header.major == 2 && header.flags & 0x40 != 0 {
        fields.record_error("header", DecodeError::unsupported("compressed ID3v2.2 tag"));
        return Ok(fields);
    }

    let wanted = (header.size as usize).min(MAX_TAG_READ);
    let raw = read_at(stream, ID3_HEADER_LEN as u64, wanted)?;
    if raw.len() < header.size as usize {
        fields.record_error("tag", DecodeError::truncated(header.size as usize, raw.len()));
    }
    // v2.4 unsynchronises per frame
    let body: Cow<[u8]> = if header.unsynchronisation() && header.major < 4 {
        Cow::Owned(remove_unsynchronisation(&raw))
    } else {
        Cow::Borrowed(&raw)
    };

    let start = if header.major >= 3 && header.extended_header() {
        match extended_header_len(&body, header.major) {
            Ok(len) => {
                fields.set("id3.extended_header_size", len);
                len
            }
            Err(e) => {
                fields.record_error("extended header", e);
                return Ok(fields);
            }
        }
    } else {
        0
    };

    let (frames, stopped) = walk_frames(&body[start..], header.major);
    fields.set("id3.frame_count", frames.len());
    for frame in &frames {
        fields.increment("id3.frames", &frame.id);
        if let Err(e) = decode_frame(frame, &header, &mut fields) {
            fields.record_error(&frame.id, e);
        }
    }
    if let Some(e) = stopped {
        fields.record_error("frames", e);
    }
    Ok(fields)
}

/// Common frames also reported under a plain key.
fn summary_key(id: &str) -> Option<&'static str> {
    let key = match id {
        "TIT2" | "TT2" => "title",
        "TPE1" | "TP1" => "artist",
        "TALB" | "TAL" => "album",
        "TRCK" | "TRK" => "track",
        "TCON" | "TCO" => "genre",
        "TYER" | "TYE" | "TDRC" => "year",
        _ => return None,
    };
    Some(key)
}

fn decode_frame(frame: &Frame<'_>, header: &Id3Header, fields: &mut FieldSet) -> DecodeResult<()> {
    if !frame.id.starts_with('T') {
        return Ok(());
    }
    let format = frame_format(header.major, frame.flags);
    if format.compressed || format.encrypted {
        return Err(DecodeError::unsupported("compressed or encrypted frame"));
    }
    let payload_len = frame.data.len().saturating_sub(format.prefix_len);
    let data = read_bytes(frame.data, format.prefix_len, payload_len)?;
    let unsynchronised =
        format.unsynchronised || (header.major >= 4 && header.unsynchronisation());
    let data: Cow<[u8]> = if unsynchronised {
        Cow::Owned(remove_unsynchronisation(data))
    } else {
        Cow::Borrowed(data)
    };

    let mut values = decode_text_frame(&data)?;
    if frame.id == "TXXX" || frame.id == "TXX" {
        if values.is_empty() {
            return Ok(());
        }
        let description = values.remove(0);
        let key = format!("id3.{}.{}", frame.id, description);
        match values.len() {
            0 => {}
            1 => fields.set(key, values.remove(0)),
            _ => fields.set(key, values),
        }
        return Ok(());
    }

    let value = match values.len() {
        0 => return Ok(()),
        1 => FieldValue::Text(values.remove(0)),
        _ => FieldValue::from(values),
    };
    if let Some(key) = summary_key(&frame.id) {
        fields.set(key, value.clone());
    }
    fields.set(format!("id3.{}", frame.id), value);
    Ok(())
}
