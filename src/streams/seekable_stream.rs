use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

/// A seekable byte source a parse reads from
pub trait SeekableStream: Read + Seek {
    /// Total length in bytes. Leaves the position where it was.
    fn total_len(&mut self) -> io::Result<u64> {
        let current = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        if current != end {
            self.seek(SeekFrom::Start(current))?;
        }
        Ok(end)
    }

    /// Bytes handed out by `read` so far, when the source keeps count.
    fn bytes_read(&self) -> u64 {
        0
    }
}

impl<T: AsRef<[u8]>> SeekableStream for Cursor<T> {}

/// Up to `len` bytes at `offset`; shorter at end of stream.
pub fn read_at(stream: &mut dyn SeekableStream, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    stream.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(len);
    (&mut *stream).take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

impl<S: SeekableStream + ?Sized> SeekableStream for &mut S {
    fn total_len(&mut self) -> io::Result<u64> {
        (**self).total_len()
    }

    fn bytes_read(&self) -> u64 {
        (**self).bytes_read()
    }
}

/// Local file wrapper. The handle is closed when the stream is dropped.
pub struct LocalSeekableStream {
    file: File,
    bytes_read: u64,
}

impl LocalSeekableStream {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(LocalSeekableStream {
            file: File::open(path)?,
            bytes_read: 0,
        })
    }
}

impl Read for LocalSeekableStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read(buf)?;
        self.bytes_read += n as u64;
        Ok(n)
    }
}

impl Seek for LocalSeekableStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl SeekableStream for LocalSeekableStream {
    fn total_len(&mut self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_total_len_preserves_position() {
        let mut cursor = Cursor::new(vec![0u8; 10]);
        cursor.seek(SeekFrom::Start(3)).unwrap();
        assert_eq!(cursor.total_len().unwrap(), 10);
        assert_eq!(cursor.stream_position().unwrap(), 3);
    }

    #[test]
    fn test_read_at_is_short_at_end() {
        let mut cursor = Cursor::new(b"0123456789".to_vec());
        assert_eq!(read_at(&mut cursor, 2, 3).unwrap(), b"234");
        assert_eq!(read_at(&mut cursor, 8, 5).unwrap(), b"89");
        assert!(read_at(&mut cursor, 20, 5).unwrap().is_empty());
    }

    #[test]
    fn test_local_stream_counts_bytes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"RIFF0000WAVE").unwrap();
        let mut stream = LocalSeekableStream::open(file.path()).unwrap();
        assert_eq!(stream.total_len().unwrap(), 12);
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"RIFF");
        assert_eq!(stream.bytes_read(), 4);
    }
}
