//! `ContainerEngine`: lifecycle and bookkeeping for an open container.
//!
//! Owns the backing [`BlockDevice`], the lazily-built free-space tracker and
//! per-stream state, and every low-level chunk I/O operation. [`crate::vfile::VirtualFile`]
//! is a thin borrowing handle over this engine keyed by stream id; the real
//! work for read/write/append/truncate/flush/erase/rename lives here so that
//! multiple handles to the same stream share one source of truth, matching
//! the "engine-owned slab" resource model.

use std::collections::{BTreeMap, HashMap};

use crate::chunk::header::{HEADER_BYTES, chunk_size_for_p, fit_valid_bytes};
use crate::chunk::{ChunkHeader, ChunkType, FileHeaderChunk, FillChunk, Lcg, StreamDataChunk, StreamStartChunk};
use crate::device::BlockDevice;
use crate::error::{Error, OpenOutcome, Result};
use crate::freespace::FreeSpaceTracker;
use crate::util::ringbuf::RingBuffer;

pub const CURRENT_MAJOR: u8 = 1;
pub const CURRENT_MINOR: u8 = 0;

/// Fixed padding seed. The original seeds its LCG once at process start from
/// a constant; we hoist that to one instance per open container (spec design
/// note), seeded from the same constant so output is reproducible run to run.
const PADDING_SEED: u32 = 0x2545_F491;

/// A live, on-disk reference to a `StreamData` chunk: where it is, how many
/// payload bytes it holds, and the `p` it was sized at (needed to compute
/// its on-disk span when the chunk is replaced or freed).
#[derive(Debug, Clone, Copy)]
struct ChunkRef {
    offset: u64,
    len: u32,
    p: u8,
}

struct HotChunk {
    chunk_offset: u64,
    offset_in_stream: u64,
    p: u8,
    len: u32,
    data: Vec<u8>,
    dirty: bool,
}

pub(crate) struct FileState {
    pub name: String,
    pub stream_id: u32,
    start_chunk_offset: Option<u64>,
    chunk_map: BTreeMap<u64, ChunkRef>,
    hot: Option<HotChunk>,
    pub tail: RingBuffer,
    pub position: u64,
    stored_size: u64,
}

impl FileState {
    fn new(name: String, stream_id: u32) -> Self {
        Self {
            name,
            stream_id,
            start_chunk_offset: None,
            chunk_map: BTreeMap::new(),
            hot: None,
            tail: RingBuffer::new(),
            position: 0,
            stored_size: 0,
        }
    }

    pub fn size(&self) -> u64 {
        self.stored_size + self.tail.len() as u64
    }

    pub fn bytes_in_write_cache(&self) -> u64 {
        self.tail.len() as u64 + self.hot.as_ref().filter(|h| h.dirty).map(|h| h.len as u64).unwrap_or(0)
    }
}

pub struct ContainerEngine<D: BlockDevice> {
    device: D,
    identifier: Vec<u8>,
    major: u8,
    minor: u8,
    starting_offset: u64,
    maps_populated: bool,
    free: FreeSpaceTracker,
    files: HashMap<u32, FileState>,
    name_to_id: HashMap<String, u32>,
    lcg: Lcg,
    last_status: Option<String>,
}

fn stream_start_chunk_size() -> u64 {
    let (p, _, _) = fit_valid_bytes(ChunkType::StreamStart, 0, 0, true);
    chunk_size_for_p(p) as u64
}

impl<D: BlockDevice> ContainerEngine<D> {
    /// Open (or initialize) a container on `device`. An empty device gets a
    /// fresh `FileHeaderChunk` written with `identifier`; a non-empty device
    /// is validated against it unless `ignore_identifier` is set.
    pub fn open(mut device: D, identifier: &[u8], ignore_identifier: bool) -> Result<(Self, OpenOutcome)> {
        let size = device.size()?;
        let mut lcg = Lcg::new(PADDING_SEED);

        let (header, outcome) = if size == 0 {
            FileHeaderChunk::save(&mut device, CURRENT_MAJOR, CURRENT_MINOR, 0, identifier, &mut lcg)?;
            (
                FileHeaderChunk {
                    p: 0,
                    major: CURRENT_MAJOR,
                    minor: CURRENT_MINOR,
                    reserved: 0,
                    identifier: identifier.to_vec(),
                },
                OpenOutcome::Opened,
            )
        } else {
            device.set_position(0)?;
            let header = FileHeaderChunk::load(&mut device)?;
            if !ignore_identifier && header.identifier != identifier {
                return Err(Error::HeaderIdentifierInvalid);
            }
            let outcome = match header.major.cmp(&CURRENT_MAJOR) {
                std::cmp::Ordering::Less => OpenOutcome::Downlevel {
                    found_major: header.major,
                    supported_major: CURRENT_MAJOR,
                },
                std::cmp::Ordering::Equal => OpenOutcome::Opened,
                std::cmp::Ordering::Greater => {
                    return Err(Error::HeaderVersionInvalid {
                        found: header.major,
                        supported: CURRENT_MAJOR,
                    });
                }
            };
            (header, outcome)
        };

        device.set_position(0)?;
        let probe = {
            let mut hbuf = [0u8; HEADER_BYTES];
            device.read(&mut hbuf)?;
            ChunkHeader::decode(&hbuf)
        };
        let starting_offset = probe.chunk_size() as u64;

        Ok((
            Self {
                device,
                identifier: header.identifier.clone(),
                major: header.major,
                minor: header.minor,
                starting_offset,
                maps_populated: false,
                free: FreeSpaceTracker::new(),
                files: HashMap::new(),
                name_to_id: HashMap::new(),
                lcg,
                last_status: None,
            },
            outcome,
        ))
    }

    pub fn major_version(&self) -> u8 {
        self.major
    }

    pub fn minor_version(&self) -> u8 {
        self.minor
    }

    pub fn identifier(&self) -> &[u8] {
        &self.identifier
    }

    /// The byte offset a fresh traversal should start scanning from (just
    /// past the `FileHeaderChunk`).
    pub fn starting_offset(&self) -> u64 {
        self.starting_offset
    }

    /// Consumes the engine, handing back the underlying device. Useful for
    /// handing a flushed container off to another reader (e.g. a fresh
    /// [`crate::stream_reader`] pass) without keeping two open handles.
    pub fn into_device(self) -> D {
        self.device
    }

    pub fn last_status(&self) -> Option<&str> {
        self.last_status.as_deref()
    }

    fn note<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.last_status = None,
            Err(e) => self.last_status = Some(e.to_string()),
        }
        result
    }

    /// Run `traverseContainer(buildMapsOnly=true)` if it hasn't run yet.
    fn ensure_maps_populated(&mut self) -> Result<()> {
        if self.maps_populated {
            return Ok(());
        }
        self.free.clear();
        self.files.clear();
        self.name_to_id.clear();

        let size = self.device.size()?;
        let mut offset = self.starting_offset;
        while offset < size {
            self.device.set_position(offset)?;
            let mut hbuf = [0u8; HEADER_BYTES];
            let n = self.device.read(&mut hbuf)?;
            if n != HEADER_BYTES {
                log::warn!("short chunk header read at byte offset {offset}, container truncated or corrupt");
                return Err(Error::ContainerDataError { at: offset });
            }
            let peeked = ChunkHeader::decode(&hbuf);
            let chunk_size = peeked.chunk_size() as u64;
            self.device.set_position(offset)?;

            match peeked.chunk_type {
                ChunkType::Fill => {
                    FillChunk::load(&mut self.device)?;
                    self.free.register(offset, offset + chunk_size, false);
                }
                ChunkType::StreamStart => {
                    let chunk = StreamStartChunk::load(&mut self.device)?;
                    let name = chunk.name();
                    let id = chunk.stream_id;
                    if let Some(&existing) = self.name_to_id.get(&name) {
                        if existing != id {
                            log::warn!(
                                "stream {name:?} at byte offset {offset} is already bound to stream id {existing}, found id {id}"
                            );
                            return Err(Error::FilenameMismatch {
                                found: name,
                                expected: format!("#{existing}"),
                                at: offset,
                            });
                        }
                    }
                    let st = self
                        .files
                        .entry(id)
                        .or_insert_with(|| FileState::new(name.clone(), id));
                    st.name = name.clone();
                    st.start_chunk_offset = Some(offset);
                    self.name_to_id.insert(name, id);
                }
                ChunkType::StreamData => {
                    let chunk = StreamDataChunk::load(&mut self.device)?;
                    let id = chunk.stream_id;
                    let st = self.files.get_mut(&id).ok_or_else(|| {
                        log::warn!("stream data chunk at byte offset {offset} references unknown stream id {id}");
                        Error::StreamIdentifierMismatch {
                            found: id,
                            expected: None,
                            at: offset,
                        }
                    })?;
                    let len = chunk.payload.len() as u32;
                    st.chunk_map.insert(
                        chunk.offset_in_stream,
                        ChunkRef {
                            offset,
                            len,
                            p: peeked.p,
                        },
                    );
                    st.stored_size = st.stored_size.max(chunk.offset_in_stream + len as u64);
                }
                ChunkType::FileHeader => return Err(Error::ContainerDataError { at: offset }),
            }

            offset += chunk_size;
        }

        self.maps_populated = true;
        Ok(())
    }

    pub fn directory(&mut self) -> Result<Vec<String>> {
        let r = self.ensure_maps_populated().map(|_| self.name_to_id.keys().cloned().collect());
        self.note(r)
    }

    /// The smallest unused 31-bit stream id.
    pub fn new_stream_identifier(&mut self) -> Result<u32> {
        self.ensure_maps_populated()?;
        let mut id = 0u32;
        while self.files.contains_key(&id) {
            id += 1;
        }
        Ok(id)
    }

    /// Look up (or lazily register) a virtual file by name. Nothing is
    /// written to the device until the stream is first written to.
    pub fn new_virtual_file(&mut self, name: &str) -> Result<u32> {
        let r = (|| {
            self.ensure_maps_populated()?;
            if let Some(&id) = self.name_to_id.get(name) {
                return Ok(id);
            }
            let id = self.new_stream_identifier()?;
            self.files.insert(id, FileState::new(name.to_string(), id));
            self.name_to_id.insert(name.to_string(), id);
            Ok(id)
        })();
        self.note(r)
    }

    pub fn stream_id_for(&mut self, name: &str) -> Result<Option<u32>> {
        self.ensure_maps_populated()?;
        Ok(self.name_to_id.get(name).copied())
    }

    pub fn close(&mut self) -> Result<()> {
        let r = (|| {
            let ids: Vec<u32> = self.files.keys().copied().collect();
            for id in ids {
                self.vfile_flush(id)?;
            }
            self.flush_free_list()?;
            self.device.flush()?;
            Ok(())
        })();
        self.note(r)
    }

    pub(crate) fn file_state(&self, id: u32) -> Result<&FileState> {
        self.files.get(&id).ok_or(Error::ContainerUnavailable)
    }

    pub(crate) fn file_state_mut(&mut self, id: u32) -> Result<&mut FileState> {
        self.files.get_mut(&id).ok_or(Error::ContainerUnavailable)
    }

    /// Reserve exactly `size` bytes, preferring a free region at or after
    /// `min_start` (a locality hint — typically the stream's own
    /// last-known file offset, so a stream's chunks tend to stay physically
    /// close together) and falling back to fresh space past the end of the
    /// device if nothing tracked is big enough. Returns `(offset,
    /// reserved_len)`; since `min_size == preferred_size == size` here,
    /// `reserved_len` is always `size`, but it's threaded through so the
    /// caller can hand it straight to [`FreeSpaceTracker::release`].
    fn reserve_space(&mut self, min_start: u64, size: u64) -> Result<(u64, u64)> {
        if let Some(reserved) = self.free.reserve(min_start, size, size) {
            return Ok(reserved);
        }
        let end = self.device.size()?;
        self.free.reserve_at(end, size);
        Ok((end, size))
    }

    /// The offset a fresh reservation for this stream should start scanning
    /// from: its most recently written chunk if it has one, else its
    /// `StreamStart` chunk, else the start of the container.
    fn last_known_offset(&self, id: u32) -> u64 {
        let Some(st) = self.files.get(&id) else {
            return 0;
        };
        match st.chunk_map.iter().next_back() {
            Some((_, cr)) => cr.offset,
            None => st.start_chunk_offset.unwrap_or(0),
        }
    }

    fn flush_free_list(&mut self) -> Result<()> {
        let dirty = self.free.take_dirty();
        if !dirty.is_empty() {
            log::debug!("flushing {} dirty free-space region(s)", dirty.len());
        }
        let device_size = self.device.size()?;
        for (start, end) in dirty {
            if end == device_size && self.device.supports_truncation() {
                self.device.set_position(start)?;
                self.device.truncate()?;
                continue;
            }
            self.device.set_position(start)?;
            let mut remaining = start;
            while remaining < end {
                let written = FillChunk::save(&mut self.device, (end - remaining) as u32, &mut self.lcg)?;
                remaining += written as u64;
            }
        }
        Ok(())
    }

    fn ensure_stream_start(&mut self, id: u32) -> Result<()> {
        if self.file_state(id)?.start_chunk_offset.is_some() {
            return Ok(());
        }
        let chunk_size = stream_start_chunk_size();
        let (offset, reserved_len) = self.reserve_space(0, chunk_size)?;
        let stream_id = self.file_state(id)?.stream_id;
        let name = self.file_state(id)?.name.clone();
        self.device.set_position(offset)?;
        StreamStartChunk::save(&mut self.device, stream_id, false, name.as_bytes(), &mut self.lcg)?;
        self.free.release(offset, reserved_len, chunk_size);
        self.file_state_mut(id)?.start_chunk_offset = Some(offset);
        Ok(())
    }

    /// Load a `StreamData` chunk off disk into the hot-chunk cache,
    /// cross-checking what's actually there against what the chunk map
    /// promised (the chunk map is rebuilt from the chunks' own declared
    /// `offsetInStream`/payload size during traversal, so a mismatch here
    /// means the container was mutated out from under this engine, or is
    /// corrupt).
    fn load_hot_chunk(&mut self, id: u32, offset_in_stream: u64, chunk_offset: u64, expected_len: u32) -> Result<()> {
        self.device.set_position(chunk_offset)?;
        let chunk = StreamDataChunk::load(&mut self.device)?;
        if chunk.offset_in_stream != offset_in_stream {
            return Err(Error::OffsetMismatch {
                found: chunk.offset_in_stream,
                expected: offset_in_stream,
                at: chunk_offset,
            });
        }
        let found_len = chunk.payload.len() as u32;
        if found_len != expected_len {
            return Err(Error::PayloadSizeMismatch {
                found: found_len,
                expected: expected_len,
                at: chunk_offset,
            });
        }
        self.file_state_mut(id)?.hot = Some(HotChunk {
            chunk_offset,
            offset_in_stream,
            p: chunk.p,
            len: chunk.payload.len() as u32,
            data: chunk.payload,
            dirty: false,
        });
        Ok(())
    }

    fn flush_hot(&mut self, id: u32) -> Result<()> {
        let stream_id = self.file_state(id)?.stream_id;
        let snapshot = self.file_state(id)?.hot.as_ref().filter(|h| h.dirty).map(|h| {
            (h.chunk_offset, h.offset_in_stream, h.p, h.data[..h.len as usize].to_vec())
        });
        if let Some((chunk_offset, offset_in_stream, p, data)) = snapshot {
            self.device.set_position(chunk_offset)?;
            StreamDataChunk::save(&mut self.device, stream_id, false, offset_in_stream, &data, p, false, &mut self.lcg)?;
            if let Some(h) = self.file_state_mut(id)?.hot.as_mut() {
                h.dirty = false;
            }
        }
        Ok(())
    }

    fn load_hot_for(&mut self, id: u32, offset_in_stream: u64, cr: ChunkRef) -> Result<()> {
        let already = matches!(self.file_state(id)?.hot.as_ref(), Some(h) if h.chunk_offset == cr.offset);
        if !already {
            self.flush_hot(id)?;
            self.load_hot_chunk(id, offset_in_stream, cr.offset, cr.len)?;
        }
        Ok(())
    }

    pub(crate) fn vfile_read(&mut self, id: u32, buf: &mut [u8]) -> Result<usize> {
        let (stored_size, total_size, position) = {
            let st = self.file_state(id)?;
            (st.stored_size, st.size(), st.position)
        };
        let to_read = (buf.len() as u64).min(total_size.saturating_sub(position)) as usize;
        let mut filled = 0usize;

        while filled < to_read {
            let pos = position + filled as u64;
            if pos >= stored_size {
                break;
            }
            let (off, cr) = {
                let st = self.file_state(id)?;
                let (&off, cr) = st
                    .chunk_map
                    .range(..=pos)
                    .next_back()
                    .ok_or(Error::ContainerDataError { at: pos })?;
                (off, *cr)
            };
            let within = (pos - off) as u32;
            let avail = cr.len - within;
            let want = ((to_read - filled) as u32).min(avail);

            self.load_hot_for(id, off, cr)?;
            let hot = self.file_state(id)?.hot.as_ref().unwrap();
            buf[filled..filled + want as usize].copy_from_slice(&hot.data[within as usize..(within + want) as usize]);
            filled += want as usize;
        }

        if filled < to_read {
            let st = self.file_state(id)?;
            let tail_pos = (position + filled as u64 - stored_size) as usize;
            let need = to_read - filled;
            let bytes = st.tail.peek_front(tail_pos + need);
            buf[filled..to_read].copy_from_slice(&bytes[tail_pos..tail_pos + need]);
            filled += need;
        }

        self.file_state_mut(id)?.position += filled as u64;
        Ok(filled)
    }

    pub(crate) fn vfile_write(&mut self, id: u32, buf: &[u8]) -> Result<usize> {
        self.ensure_stream_start(id)?;
        let stream_id = self.file_state(id)?.stream_id;
        let mut consumed = 0usize;

        // Phase A: read-modify-write over existing chunks.
        loop {
            let (position, stored_size) = {
                let st = self.file_state(id)?;
                (st.position, st.stored_size)
            };
            if consumed >= buf.len() || position >= stored_size {
                break;
            }
            let (off, cr) = {
                let st = self.file_state(id)?;
                let (&off, cr) = st
                    .chunk_map
                    .range(..=position)
                    .next_back()
                    .ok_or(Error::ContainerDataError { at: position })?;
                (off, *cr)
            };
            let within = (position - off) as u32;
            let avail = cr.len - within;
            let take = ((buf.len() - consumed) as u32).min(avail);

            if within == 0 && take == cr.len {
                if matches!(self.file_state(id)?.hot.as_ref(), Some(h) if h.chunk_offset == cr.offset) {
                    self.file_state_mut(id)?.hot = None;
                }
                self.free.register(cr.offset, cr.offset + chunk_size_for_p(cr.p) as u64, true);
                let (p, _, actual) = fit_valid_bytes(ChunkType::StreamData, take, 0, true);
                let chunk_size = chunk_size_for_p(p) as u64;
                let min_start = self.last_known_offset(id);
                let (new_offset, reserved_len) = self.reserve_space(min_start, chunk_size)?;
                self.device.set_position(new_offset)?;
                let written = StreamDataChunk::save(
                    &mut self.device,
                    stream_id,
                    false,
                    off,
                    &buf[consumed..consumed + take as usize],
                    0,
                    true,
                    &mut self.lcg,
                )?;
                debug_assert_eq!(written, actual);
                self.free.release(new_offset, reserved_len, chunk_size);
                self.file_state_mut(id)?.chunk_map.insert(off, ChunkRef { offset: new_offset, len: written, p });
            } else {
                self.load_hot_for(id, off, cr)?;
                let st = self.file_state_mut(id)?;
                let hot = st.hot.as_mut().unwrap();
                hot.data[within as usize..(within + take) as usize]
                    .copy_from_slice(&buf[consumed..consumed + take as usize]);
                hot.dirty = true;
            }

            consumed += take as usize;
            self.file_state_mut(id)?.position += take as u64;
        }

        // Phase B: overwrite in place inside the tail buffer.
        loop {
            let (position, stored_size, tail_len) = {
                let st = self.file_state(id)?;
                (st.position, st.stored_size, st.tail.len() as u64)
            };
            if consumed >= buf.len() || position >= stored_size + tail_len {
                break;
            }
            let tail_pos = (position - stored_size) as usize;
            let st = self.file_state_mut(id)?;
            st.tail.snoop_set(tail_pos, buf[consumed]);
            st.position += 1;
            consumed += 1;
        }

        // Phase C: whatever's left lands past current EOF.
        if consumed < buf.len() {
            consumed += self.vfile_append(id, &buf[consumed..])?;
        }

        Ok(consumed)
    }

    pub(crate) fn vfile_append(&mut self, id: u32, buf: &[u8]) -> Result<usize> {
        self.ensure_stream_start(id)?;
        let stream_id = self.file_state(id)?.stream_id;
        let mut consumed = 0usize;

        loop {
            let tail_free = self.file_state(id)?.tail.free() as u64;
            let remaining = (buf.len() - consumed) as u64;
            if tail_free > remaining {
                break;
            }

            let tail_bytes = {
                let st = self.file_state(id)?;
                st.tail.peek_front(st.tail.len())
            };
            let mut candidate = tail_bytes.clone();
            candidate.extend_from_slice(&buf[consumed..]);

            let (p, _, actual_len) = fit_valid_bytes(ChunkType::StreamData, candidate.len() as u32, 0, true);
            let chunk_size = chunk_size_for_p(p) as u64;
            let offset_in_stream = self.file_state(id)?.stored_size;
            let min_start = self.last_known_offset(id);
            let (new_offset, reserved_len) = self.reserve_space(min_start, chunk_size)?;

            self.device.set_position(new_offset)?;
            let written = StreamDataChunk::save(
                &mut self.device,
                stream_id,
                false,
                offset_in_stream,
                &candidate[..actual_len as usize],
                0,
                true,
                &mut self.lcg,
            )?;
            self.free.release(new_offset, reserved_len, chunk_size);

            let from_tail = (written as usize).min(tail_bytes.len());
            let from_buf = written as usize - from_tail;

            let st = self.file_state_mut(id)?;
            st.chunk_map.insert(offset_in_stream, ChunkRef { offset: new_offset, len: written, p });
            st.stored_size += written as u64;
            st.tail.drain_front(from_tail);
            consumed += from_buf;
        }

        let st = self.file_state_mut(id)?;
        st.tail.push_back(&buf[consumed..]);
        st.position = st.stored_size + st.tail.len() as u64;
        Ok(buf.len())
    }

    pub(crate) fn vfile_flush(&mut self, id: u32) -> Result<()> {
        self.ensure_stream_start(id)?;
        self.flush_hot(id)?;
        let stream_id = self.file_state(id)?.stream_id;

        loop {
            let tail_len = self.file_state(id)?.tail.len();
            if tail_len == 0 {
                break;
            }
            let tail_bytes = self.file_state(id)?.tail.peek_front(tail_len);
            let (p, _, actual_len) = fit_valid_bytes(ChunkType::StreamData, tail_len as u32, 0, true);
            let chunk_size = chunk_size_for_p(p) as u64;
            let offset_in_stream = self.file_state(id)?.stored_size;
            let min_start = self.last_known_offset(id);
            let (new_offset, reserved_len) = self.reserve_space(min_start, chunk_size)?;

            self.device.set_position(new_offset)?;
            let written = StreamDataChunk::save(
                &mut self.device,
                stream_id,
                false,
                offset_in_stream,
                &tail_bytes[..actual_len as usize],
                0,
                true,
                &mut self.lcg,
            )?;
            self.free.release(new_offset, reserved_len, chunk_size);

            let st = self.file_state_mut(id)?;
            st.chunk_map.insert(offset_in_stream, ChunkRef { offset: new_offset, len: written, p });
            st.stored_size += written as u64;
            st.tail.drain_front(written as usize);
        }

        self.flush_free_list()?;
        self.device.flush()?;
        Ok(())
    }

    pub(crate) fn vfile_truncate(&mut self, id: u32) -> Result<()> {
        self.flush_hot(id)?;
        let (position, stored_size) = {
            let st = self.file_state(id)?;
            (st.position, st.stored_size)
        };

        if position < stored_size {
            let boundary = {
                let st = self.file_state(id)?;
                st.chunk_map.range(..=position).next_back().map(|(&o, cr)| (o, *cr))
            };
            if let Some((off, cr)) = boundary {
                if off < position {
                    let within = (position - off) as u32;
                    self.device.set_position(cr.offset)?;
                    let chunk = StreamDataChunk::load(&mut self.device)?;
                    self.free.register(cr.offset, cr.offset + chunk_size_for_p(cr.p) as u64, true);

                    let (p, _, actual) = fit_valid_bytes(ChunkType::StreamData, within, 0, true);
                    let chunk_size = chunk_size_for_p(p) as u64;
                    let min_start = self.last_known_offset(id);
                    let (new_offset, reserved_len) = self.reserve_space(min_start, chunk_size)?;
                    let stream_id = self.file_state(id)?.stream_id;
                    self.device.set_position(new_offset)?;
                    let written = StreamDataChunk::save(
                        &mut self.device,
                        stream_id,
                        false,
                        off,
                        &chunk.payload[..within as usize],
                        0,
                        true,
                        &mut self.lcg,
                    )?;
                    debug_assert_eq!(written, actual);
                    self.free.release(new_offset, reserved_len, chunk_size);
                    self.file_state_mut(id)?.chunk_map.insert(off, ChunkRef { offset: new_offset, len: written, p });
                }
            }

            let to_drop: Vec<(u64, ChunkRef)> = {
                let st = self.file_state(id)?;
                st.chunk_map.range(position..).map(|(&o, cr)| (o, *cr)).collect()
            };
            for (o, cr) in &to_drop {
                self.file_state_mut(id)?.chunk_map.remove(o);
                self.free.register(cr.offset, cr.offset + chunk_size_for_p(cr.p) as u64, true);
            }
            self.file_state_mut(id)?.stored_size = position;
        } else if position > stored_size {
            let keep = (position - stored_size) as usize;
            let st = self.file_state_mut(id)?;
            let front = st.tail.peek_front(keep);
            st.tail.clear();
            st.tail.push_back(&front);
        }

        if position == stored_size {
            self.file_state_mut(id)?.tail.clear();
        }

        self.flush_free_list()?;
        Ok(())
    }

    pub(crate) fn vfile_erase(&mut self, id: u32) -> Result<()> {
        let st = self.files.remove(&id).ok_or(Error::ContainerUnavailable)?;
        for cr in st.chunk_map.values() {
            self.free.register(cr.offset, cr.offset + chunk_size_for_p(cr.p) as u64, true);
        }
        if let Some(start) = st.start_chunk_offset {
            self.free.register(start, start + stream_start_chunk_size(), true);
        }
        self.name_to_id.remove(&st.name);
        self.flush_free_list()
    }

    pub(crate) fn vfile_rename(&mut self, id: u32, new_name: &str) -> Result<()> {
        let (old_name, start, stream_id) = {
            let st = self.file_state(id)?;
            (st.name.clone(), st.start_chunk_offset, st.stream_id)
        };
        if let Some(offset) = start {
            self.device.set_position(offset)?;
            StreamStartChunk::save(&mut self.device, stream_id, false, new_name.as_bytes(), &mut self.lcg)?;
        }
        self.name_to_id.remove(&old_name);
        self.name_to_id.insert(new_name.to_string(), id);
        self.file_state_mut(id)?.name = new_name.to_string();
        Ok(())
    }
}
