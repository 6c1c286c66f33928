//! Error taxonomy for the container engine.
//!
//! The original C++ source models these as a class hierarchy of status
//! objects (some fatal, some "successful with metadata"). Since the variant
//! set is closed we use a single enum instead of dynamic dispatch, with a
//! companion [`Outcome`] type for the return values that carry metadata on
//! success rather than aborting the calling operation.

use thiserror::Error;

/// Fatal or structurally-invalid conditions. Each carries enough context to
/// point at where in the container the problem was detected.
#[derive(Error, Debug)]
pub enum Error {
    /// The container (or the virtual file's owning container) is gone.
    #[error("container is unavailable")]
    ContainerUnavailable,

    /// A stream-data chunk claims a stream id that doesn't match any known
    /// virtual file.
    #[error("stream identifier mismatch at byte offset {at}: found {found}, expected {expected:?}")]
    StreamIdentifierMismatch {
        found: u32,
        expected: Option<u32>,
        at: u64,
    },

    /// A chunk's recorded `offsetInStream` doesn't match where the engine
    /// expected to find it.
    #[error("offset mismatch at byte offset {at}: found {found}, expected {expected}")]
    OffsetMismatch { found: u64, expected: u64, at: u64 },

    /// The number of payload bytes actually read/written didn't match the
    /// chunk's declared payload size.
    #[error("payload size mismatch at byte offset {at}: found {found}, expected {expected}")]
    PayloadSizeMismatch { found: u32, expected: u32, at: u64 },

    /// Two virtual files claim the same name.
    #[error("filename mismatch: {found:?} vs {expected:?} at byte offset {at}")]
    FilenameMismatch {
        found: String,
        expected: String,
        at: u64,
    },

    /// A caller asked to operate on a stream name the container has no
    /// record of (as opposed to [`Error::ContainerUnavailable`], which means
    /// the stream id itself is stale).
    #[error("no such stream: {name:?}")]
    StreamNotFound { name: String },

    /// Structural corruption: wrong chunk type where it cannot occur, a
    /// short header read, or any other invariant violation found while
    /// scanning the container.
    #[error("container data error at byte offset {at}")]
    ContainerDataError { at: u64 },

    /// The file header's magic identifier did not match what was expected.
    #[error("header identifier invalid")]
    HeaderIdentifierInvalid,

    /// The file header's major version is newer than this engine supports.
    #[error("header version invalid: file is major version {found}, engine supports {supported}")]
    HeaderVersionInvalid { found: u8, supported: u8 },

    /// The file header's CRC did not validate.
    #[error("header CRC error")]
    HeaderCrcError,

    /// A chunk's CRC did not validate.
    #[error("chunk CRC error at byte offset {at}")]
    ChunkCrcError { at: u64 },

    /// `set_position` was asked to move past end-of-file.
    #[error("seek error: position {requested} exceeds size {size}")]
    SeekError { requested: u64, size: u64 },

    /// The caller requested an unsupported open mode (e.g. write-only
    /// without create, on a backing store that doesn't support it).
    #[error("invalid open mode")]
    InvalidOpenMode,

    /// An operation was attempted before the container was opened.
    #[error("container is not open")]
    FileContainerNotOpen,

    /// The backing file failed to open.
    #[error("failed to open backing file: {0}")]
    FailedToOpenFile(String),

    /// Closing the backing file failed.
    #[error("failed to close backing file")]
    FileCloseError,

    /// A read against the backing device failed.
    #[error("read error against backing device")]
    FileReadError,

    /// A write against the backing device failed.
    #[error("write error against backing device")]
    FileWriteError,

    /// Truncation of the backing device failed.
    #[error("truncate error against backing device")]
    FileTruncateError,

    /// Flushing the backing device failed.
    #[error("flush error against backing device")]
    FileFlushError,

    /// A `StreamingReader` sink returned an error; traversal aborts with it.
    #[error("streaming read sink error: {0}")]
    StreamingRead(String),

    /// Transparent passthrough for I/O errors raised by a `BlockDevice`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a read or write against a [`crate::device::BlockDevice`] or a
/// [`crate::vfile::VirtualFile`]. Distinguishes "ran to completion" from the
/// short-read/short-write count that's still a success — a "successful with
/// metadata" status distinct from an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutcome {
    Read { bytes: usize },
    Write { bytes: usize },
}

impl IoOutcome {
    pub fn bytes(self) -> usize {
        match self {
            IoOutcome::Read { bytes } | IoOutcome::Write { bytes } => bytes,
        }
    }
}

/// Outcome of [`crate::engine::ContainerEngine::open`]. A downlevel major
/// version is recoverable: the caller gets the container back and can decide
/// whether to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened,
    Downlevel { found_major: u8, supported_major: u8 },
}
