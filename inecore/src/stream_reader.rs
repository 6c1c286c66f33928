//! `StreamingReader`: a one-pass alternative to opening a full
//! [`crate::engine::ContainerEngine`] when the caller just wants to drain
//! every stream's bytes in on-disk order — recovery tooling, `cat`-style
//! dumps, or processing a container too large to hold chunk maps for.
//!
//! Delivers payloads in stream order *within* a stream, but interleaved
//! across streams in on-disk order, since chunks belonging to different
//! streams are not grouped together on disk.

use std::collections::HashMap;

use crate::chunk::header::HEADER_BYTES;
use crate::chunk::{ChunkHeader, ChunkType, FillChunk, StreamDataChunk, StreamStartChunk};
use crate::device::BlockDevice;
use crate::error::{Error, Result};

/// Receives a single stream's payload bytes during a traversal.
pub trait StreamSink {
    fn received_data(&mut self, offset_in_stream: u64, data: &[u8]) -> Result<()>;

    /// Called once traversal reaches end of device. Default no-op.
    fn end_of_file(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Runs a single linear pass over `device` from `starting_offset`, routing
/// each `StreamData` chunk's payload to the sink registered under that
/// stream's name in `sinks`. Streams with no registered sink are skipped.
pub fn traverse<D: BlockDevice>(
    device: &mut D,
    starting_offset: u64,
    sinks: &mut HashMap<String, Box<dyn StreamSink>>,
) -> Result<()> {
    let size = device.size()?;
    let mut offset = starting_offset;
    let mut names: HashMap<u32, String> = HashMap::new();

    while offset < size {
        device.set_position(offset)?;
        let mut hbuf = [0u8; HEADER_BYTES];
        let n = device.read(&mut hbuf)?;
        if n != HEADER_BYTES {
            return Err(Error::ContainerDataError { at: offset });
        }
        let header = ChunkHeader::decode(&hbuf);
        let chunk_size = header.chunk_size() as u64;
        device.set_position(offset)?;

        match header.chunk_type {
            ChunkType::Fill => {
                FillChunk::load(device)?;
            }
            ChunkType::StreamStart => {
                let chunk = StreamStartChunk::load(device)?;
                names.insert(chunk.stream_id, chunk.name());
            }
            ChunkType::StreamData => {
                let chunk = StreamDataChunk::load(device)?;
                let name = names
                    .get(&chunk.stream_id)
                    .ok_or(Error::StreamIdentifierMismatch {
                        found: chunk.stream_id,
                        expected: None,
                        at: offset,
                    })?;
                if let Some(sink) = sinks.get_mut(name) {
                    sink.received_data(chunk.offset_in_stream, &chunk.payload)?;
                }
            }
            ChunkType::FileHeader => return Err(Error::ContainerDataError { at: offset }),
        }

        offset += chunk_size;
    }

    for sink in sinks.values_mut() {
        sink.end_of_file()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::memory::MemoryBlockDevice;
    use crate::engine::ContainerEngine;
    use crate::vfile::VirtualFile;

    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Collected {
        chunks: Vec<(u64, Vec<u8>)>,
        eof: bool,
    }

    struct CollectingSink(Rc<RefCell<Collected>>);

    impl StreamSink for CollectingSink {
        fn received_data(&mut self, offset_in_stream: u64, data: &[u8]) -> Result<()> {
            self.0.borrow_mut().chunks.push((offset_in_stream, data.to_vec()));
            Ok(())
        }

        fn end_of_file(&mut self) -> Result<()> {
            self.0.borrow_mut().eof = true;
            Ok(())
        }
    }

    #[test]
    fn delivers_payloads_in_order_and_signals_eof() {
        let (mut engine, _) = ContainerEngine::open(MemoryBlockDevice::new(), b"inecontainer", false).unwrap();
        {
            let mut f = VirtualFile::open(&mut engine, "log.txt").unwrap();
            f.write(b"abcdefgh").unwrap();
        }
        let starting_offset = engine.starting_offset();
        engine.close().unwrap();
        let mut device = engine.into_device();

        let collected = Rc::new(RefCell::new(Collected::default()));
        let mut sinks: HashMap<String, Box<dyn StreamSink>> = HashMap::new();
        sinks.insert("log.txt".to_string(), Box::new(CollectingSink(collected.clone())));
        traverse(&mut device, starting_offset, &mut sinks).unwrap();

        let collected = collected.borrow();
        assert_eq!(collected.chunks[0], (0, b"abcdefgh".to_vec()));
        assert!(collected.eof);
    }
}
