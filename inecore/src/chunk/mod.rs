//! Chunk format: the common header/CRC codec, the padding generator, and the
//! four typed chunks built on top of them.

pub mod header;
pub mod lcg;
pub mod types;

pub use header::{ChunkHeader, ChunkType};
pub use lcg::Lcg;
pub use types::{FileHeaderChunk, FillChunk, StreamDataChunk, StreamStartChunk};
