pub mod reader;

pub use reader::{BitReader, ByteOrder};
