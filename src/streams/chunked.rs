use std::fs;
use std::io::{self, Read};
use std::path::Path;

use log::debug;

use crate::config::ChunkingConfig;
use crate::streams::{LocalSeekableStream, SeekableStream};

/// Source of the "how much memory is free right now" figure.
pub trait MemoryProbe {
    fn available_memory(&self) -> Option<u64>;
}

/// Reads `MemAvailable` from `/proc/meminfo`. Reports nothing elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcMemInfo;

impl MemoryProbe for ProcMemInfo {
    fn available_memory(&self) -> Option<u64> {
        let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
        parse_meminfo_available(&meminfo)
    }
}

/// Fixed figure, for tests and for deployments that pin it.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory(pub u64);

impl MemoryProbe for FixedMemory {
    fn available_memory(&self) -> Option<u64> {
        Some(self.0)
    }
}

fn parse_meminfo_available(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemAvailable:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    kib.checked_mul(1024)
}

/// Picks a read size from the memory currently available.
pub struct AdaptiveChunkSizer {
    config: ChunkingConfig,
    probe: Box<dyn MemoryProbe + Send + Sync>,
}

impl AdaptiveChunkSizer {
    pub fn new(config: ChunkingConfig) -> Self {
        Self::with_probe(config, Box::new(ProcMemInfo))
    }

    pub fn with_probe(config: ChunkingConfig, probe: Box<dyn MemoryProbe + Send + Sync>) -> Self {
        Self { config, probe }
    }

    /// `memory_fraction` of available memory, clamped to the configured range.
    pub fn optimal_chunk_size(&self) -> usize {
        let available = self
            .probe
            .available_memory()
            .unwrap_or(self.config.fallback_available_memory);
        let proposed = (available as f64 * self.config.memory_fraction) as u64;
        let size = proposed.clamp(
            self.config.min_chunk_size as u64,
            self.config.max_chunk_size as u64,
        ) as usize;
        debug!(
            "chunk size {} from {} bytes available",
            size, available
        );
        size
    }
}

/// Single forward pass over a stream in fixed-size chunks.
///
/// Owns its stream; once exhausted it stays exhausted. Re-reading means
/// opening the source again.
pub struct ChunkReader<S: SeekableStream> {
    stream: S,
    chunk_size: usize,
    done: bool,
}

impl<S: SeekableStream> ChunkReader<S> {
    pub fn new(stream: S, chunk_size: usize) -> Self {
        Self {
            stream,
            chunk_size: chunk_size.max(1),
            done: false,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl<S: SeekableStream> Iterator for ChunkReader<S> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = Vec::with_capacity(self.chunk_size);
        match (&mut self.stream)
            .take(self.chunk_size as u64)
            .read_to_end(&mut buf)
        {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => Some(Ok(buf)),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Open `path` and read it chunk by chunk, sizing chunks with `sizer`.
pub fn read_chunks<P: AsRef<Path>>(
    path: P,
    sizer: &AdaptiveChunkSizer,
) -> io::Result<ChunkReader<LocalSeekableStream>> {
    let stream = LocalSeekableStream::open(path)?;
    Ok(ChunkReader::new(stream, sizer.optimal_chunk_size()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn config() -> ChunkingConfig {
        ChunkingConfig {
            min_chunk_size: 1024,
            max_chunk_size: 1 << 20,
            memory_fraction: 0.01,
            fallback_available_memory: 10 << 20,
        }
    }

    struct NoMemoryInfo;

    impl MemoryProbe for NoMemoryInfo {
        fn available_memory(&self) -> Option<u64> {
            None
        }
    }

    #[test]
    fn test_chunk_size_scales_with_memory() {
        let sizer = AdaptiveChunkSizer::with_probe(config(), Box::new(FixedMemory(50 << 20)));
        assert_eq!(sizer.optimal_chunk_size(), ((50u64 << 20) / 100) as usize);
    }

    #[test]
    fn test_chunk_size_is_clamped() {
        let low = AdaptiveChunkSizer::with_probe(config(), Box::new(FixedMemory(1000)));
        assert_eq!(low.optimal_chunk_size(), 1024);
        let high = AdaptiveChunkSizer::with_probe(config(), Box::new(FixedMemory(1 << 40)));
        assert_eq!(high.optimal_chunk_size(), 1 << 20);
    }

    #[test]
    fn test_fallback_memory_used_when_probe_fails() {
        let sizer = AdaptiveChunkSizer::with_probe(config(), Box::new(NoMemoryInfo));
        assert_eq!(sizer.optimal_chunk_size(), ((10u64 << 20) / 100) as usize);
    }

    #[test]
    fn test_parse_meminfo() {
        let text = "MemTotal:       16000000 kB\nMemFree:  100 kB\nMemAvailable:    8000000 kB\n";
        assert_eq!(parse_meminfo_available(text), Some(8_000_000 * 1024));
        assert_eq!(parse_meminfo_available("MemTotal: 1 kB\n"), None);
    }

    #[test]
    fn test_chunk_reader_single_pass() {
        let data: Vec<u8> = (0..10).collect();
        let mut reader = ChunkReader::new(Cursor::new(data), 4);
        let chunks: Vec<Vec<u8>> = reader.by_ref().map(Result::unwrap).collect();
        assert_eq!(chunks, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_read_chunks_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![7u8; 3000]).unwrap();
        let sizer = AdaptiveChunkSizer::with_probe(config(), Box::new(FixedMemory(0)));
        let total: usize = read_chunks(file.path(), &sizer)
            .unwrap()
            .map(|c| c.unwrap().len())
            .sum();
        assert_eq!(total, 3000);
    }
}
