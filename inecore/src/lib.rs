#![forbid(unsafe_code)]

//! Single-file, multi-stream container storage: an append-friendly chunk
//! format, a lazily-reconstructed free-space tracker, and per-stream virtual
//! files layered over a pluggable [`device::BlockDevice`].

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod error;

pub mod device;
pub mod chunk;
pub mod freespace;
pub mod engine;
pub mod vfile;
pub mod stream_reader;
pub mod util;

pub use error::{Error, IoOutcome, OpenOutcome, Result};

pub use device::BlockDevice;
pub use device::file::FileBlockDevice;
pub use device::memory::MemoryBlockDevice;

pub use chunk::ChunkHeader;
pub use engine::ContainerEngine;
pub use stream_reader::{StreamSink, traverse};
pub use vfile::VirtualFile;

pub mod prelude {
    pub use crate::Result;
    pub use crate::device::BlockDevice;
    pub use crate::engine::ContainerEngine;
    pub use crate::stream_reader::{StreamSink, traverse};
    pub use crate::vfile::VirtualFile;
}
