//! Minimal gather helper used when a chunk's payload must be written from
//! more than one caller-owned buffer (e.g. the tail buffer's two ring
//! segments plus the caller's own slice) without an extra copy through an
//! intermediate buffer.

/// A read-only gather list: write these buffers to the device in order.
pub type GatherList<'a> = Vec<&'a [u8]>;

/// Total length across a gather list.
pub fn gather_len(segments: &GatherList<'_>) -> usize {
    segments.iter().map(|s| s.len()).sum()
}
