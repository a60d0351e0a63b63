pub mod chunked;
pub mod dicom;
pub mod fits;
pub mod hdf5;
pub mod seekable_stream;

pub use chunked::{read_chunks, AdaptiveChunkSizer, ChunkReader, FixedMemory, MemoryProbe, ProcMemInfo};
pub use dicom::{stream_dicom_elements, DicomElementRecord, DicomElementStream};
pub use fits::{stream_fits_headers, FitsCard, FitsHeaderStream};
pub use hdf5::{stream_hdf5_structure, Hdf5Record, Hdf5StructureStream};
pub use seekable_stream::{read_at, LocalSeekableStream, SeekableStream};
