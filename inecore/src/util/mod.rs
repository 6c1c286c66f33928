//! Small shared helpers that don't belong to one specific layer.

pub mod ringbuf;
pub mod scatter;
