//! The four on-disk chunk kinds, layered on top of the common header codec
//! in [`super::header`]. Each type knows how to lay itself out (`save`) and
//! how to parse itself back out of a positioned [`BlockDevice`] (`load`),
//! including CRC verification.

use super::header::{
    ChunkHeader, ChunkType, HEADER_BYTES, chunk_size_for_p, crc16_update, fit_valid_bytes,
    initial_crc,
};
use super::lcg::Lcg;
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::util::scatter::{GatherList, gather_len};

const STREAM_START_NAME_BYTES: usize = 120;
const LAST_FLAG: u32 = 1 << 31;
const STREAM_ID_MASK: u32 = LAST_FLAG - 1;

fn pack_stream_id(stream_id: u32, last: bool) -> u32 {
    debug_assert!(stream_id <= STREAM_ID_MASK);
    (stream_id & STREAM_ID_MASK) | if last { LAST_FLAG } else { 0 }
}

fn unpack_stream_id(word: u32) -> (u32, bool) {
    (word & STREAM_ID_MASK, word & LAST_FLAG != 0)
}

/// Write a chunk: common header, type-specific additional header, payload,
/// then LCG-noise padding out to `chunk_size_for_p(p)`. The CRC covers
/// everything after the 4-byte header, seeded from its first two bytes.
///
/// `payload` is a gather list rather than one contiguous slice: a caller
/// assembling a chunk out of, say, the tail buffer's unflushed bytes plus a
/// fresh slice from the writer can hand both over directly instead of
/// concatenating them into a temporary buffer first.
fn write_chunk(
    device: &mut dyn BlockDevice,
    chunk_type: ChunkType,
    p: u8,
    invalid: u16,
    additional: &[u8],
    payload: &GatherList<'_>,
    lcg: &mut Lcg,
) -> Result<()> {
    let b0 = (chunk_type.bits() & 0x03) | ((p & 0x07) << 2) | (((invalid & 0x07) as u8) << 5);
    let b1 = (invalid >> 3) as u8;
    let seed = initial_crc(b0, b1);

    let mut crc = crc16_update(seed, additional);
    for segment in payload {
        crc = crc16_update(crc, segment);
    }

    let pad_len = chunk_size_for_p(p) as usize - HEADER_BYTES - additional.len() - gather_len(payload);
    let mut pad = vec![0u8; pad_len];
    lcg.fill(&mut pad);
    crc = crc16_update(crc, &pad);

    let header = ChunkHeader {
        chunk_type,
        p,
        invalid,
        crc,
    };
    let hbuf = header.encode();

    write_all(device, &hbuf)?;
    write_all(device, additional)?;
    for segment in payload {
        write_all(device, segment)?;
    }
    write_all(device, &pad)?;
    Ok(())
}

fn write_all(device: &mut dyn BlockDevice, buf: &[u8]) -> Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    let n = device.write(buf)?;
    if n != buf.len() {
        return Err(Error::FileWriteError);
    }
    Ok(())
}

fn read_exact(device: &mut dyn BlockDevice, buf: &mut [u8], at: u64) -> Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    let n = device.read(buf)?;
    if n != buf.len() {
        return Err(Error::ContainerDataError { at });
    }
    Ok(())
}

/// Read a chunk's header, additional header and payload, verifying its type
/// and CRC. `fixed_additional` is the type's fixed additional-header size
/// (e.g. 10 for `StreamData`, 0 for `Fill`); anything past it up to
/// `number_valid_bytes` is the variable payload.
fn read_chunk(
    device: &mut dyn BlockDevice,
    expected_type: ChunkType,
    fixed_additional: usize,
) -> Result<(ChunkHeader, Vec<u8>, Vec<u8>)> {
    let at = device.position();
    let mut hbuf = [0u8; HEADER_BYTES];
    read_exact(device, &mut hbuf, at)?;
    let header = ChunkHeader::decode(&hbuf);

    if header.chunk_type != expected_type {
        return Err(Error::ContainerDataError { at });
    }

    let nvb = header.number_valid_bytes() as usize;
    if nvb < fixed_additional {
        return Err(Error::ContainerDataError { at });
    }

    let mut additional = vec![0u8; fixed_additional];
    read_exact(device, &mut additional, at)?;

    let mut payload = vec![0u8; nvb - fixed_additional];
    read_exact(device, &mut payload, at)?;

    let pad_len = header.chunk_size() as usize - HEADER_BYTES - nvb;
    let mut pad = vec![0u8; pad_len];
    read_exact(device, &mut pad, at)?;

    let seed = initial_crc(hbuf[0], hbuf[1]);
    let mut crc = crc16_update(seed, &additional);
    crc = crc16_update(crc, &payload);
    crc = crc16_update(crc, &pad);
    if crc != header.crc {
        log::warn!("CRC mismatch on {expected_type:?} chunk at byte offset {at}: computed {crc:#06x}, stored {:#06x}", header.crc);
        return Err(Error::ChunkCrcError { at });
    }

    Ok((header, additional, payload))
}

/// The lone chunk at index 0: format version plus a caller-defined magic
/// identifier string.
#[derive(Debug, Clone)]
pub struct FileHeaderChunk {
    pub p: u8,
    pub major: u8,
    pub minor: u8,
    pub reserved: u16,
    pub identifier: Vec<u8>,
}

impl FileHeaderChunk {
    pub fn save(
        device: &mut dyn BlockDevice,
        major: u8,
        minor: u8,
        reserved: u16,
        identifier: &[u8],
        lcg: &mut Lcg,
    ) -> Result<()> {
        let (p, invalid, actual_len) =
            fit_valid_bytes(ChunkType::FileHeader, identifier.len() as u32, 0, true);
        let mut additional = Vec::with_capacity(4);
        additional.push(major);
        additional.push(minor);
        additional.extend_from_slice(&reserved.to_le_bytes());
        let payload = &identifier[..actual_len as usize];
        write_chunk(
            device,
            ChunkType::FileHeader,
            p,
            invalid,
            &additional,
            &vec![payload],
            lcg,
        )
    }

    pub fn load(device: &mut dyn BlockDevice) -> Result<Self> {
        let (header, additional, payload) = read_chunk(device, ChunkType::FileHeader, 4)?;
        Ok(Self {
            p: header.p,
            major: additional[0],
            minor: additional[1],
            reserved: u16::from_le_bytes([additional[2], additional[3]]),
            identifier: payload,
        })
    }
}

/// Marks the start of a named stream within the container.
#[derive(Debug, Clone)]
pub struct StreamStartChunk {
    pub p: u8,
    pub stream_id: u32,
    pub last: bool,
    name: [u8; STREAM_START_NAME_BYTES],
}

impl StreamStartChunk {
    pub fn new(stream_id: u32, last: bool, name: &[u8]) -> Self {
        let mut buf = [0u8; STREAM_START_NAME_BYTES];
        let n = name.len().min(STREAM_START_NAME_BYTES);
        buf[..n].copy_from_slice(&name[..n]);
        Self {
            p: 0,
            stream_id,
            last,
            name: buf,
        }
    }

    /// The name, trimmed at the first NUL padding byte. Lossy-decoded since
    /// nothing requires the name to be valid UTF-8 on disk.
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    pub fn save(device: &mut dyn BlockDevice, stream_id: u32, last: bool, name: &[u8], lcg: &mut Lcg) -> Result<()> {
        let this = Self::new(stream_id, last, name);
        let (p, invalid, _) = fit_valid_bytes(ChunkType::StreamStart, 0, 0, true);
        let mut additional = Vec::with_capacity(4 + STREAM_START_NAME_BYTES);
        additional.extend_from_slice(&pack_stream_id(stream_id, last).to_le_bytes());
        additional.extend_from_slice(&this.name);
        write_chunk(device, ChunkType::StreamStart, p, invalid, &additional, &vec![], lcg)
    }

    pub fn load(device: &mut dyn BlockDevice) -> Result<Self> {
        let (header, additional, _payload) =
            read_chunk(device, ChunkType::StreamStart, 4 + STREAM_START_NAME_BYTES)?;
        let word = u32::from_le_bytes(additional[0..4].try_into().unwrap());
        let (stream_id, last) = unpack_stream_id(word);
        let mut name = [0u8; STREAM_START_NAME_BYTES];
        name.copy_from_slice(&additional[4..4 + STREAM_START_NAME_BYTES]);
        Ok(Self {
            p: header.p,
            stream_id,
            last,
            name,
        })
    }
}

/// A window of a stream's contents, addressed by `offset_in_stream`.
#[derive(Debug, Clone)]
pub struct StreamDataChunk {
    pub p: u8,
    pub stream_id: u32,
    pub last: bool,
    pub offset_in_stream: u64,
    pub payload: Vec<u8>,
}

impl StreamDataChunk {
    /// Fixed part of the additional header: packed stream id/flag (4) plus a
    /// 6-byte little-endian stream offset.
    const FIXED_ADDITIONAL: usize = 10;

    /// Writes as much of `payload` as fits in a chunk sized `p` (or, if
    /// `allow_grow`, the smallest `p` that fits it all). Returns the number
    /// of payload bytes actually written, since the caller may need to
    /// split a large write across several chunks.
    #[allow(clippy::too_many_arguments)]
    pub fn save(
        device: &mut dyn BlockDevice,
        stream_id: u32,
        last: bool,
        offset_in_stream: u64,
        payload: &[u8],
        current_p: u8,
        allow_grow: bool,
        lcg: &mut Lcg,
    ) -> Result<u32> {
        let (p, invalid, actual_len) = fit_valid_bytes(
            ChunkType::StreamData,
            payload.len() as u32,
            current_p,
            allow_grow,
        );
        let mut additional = Vec::with_capacity(Self::FIXED_ADDITIONAL);
        additional.extend_from_slice(&pack_stream_id(stream_id, last).to_le_bytes());
        additional.extend_from_slice(&offset_in_stream.to_le_bytes()[..6]);
        write_chunk(
            device,
            ChunkType::StreamData,
            p,
            invalid,
            &additional,
            &vec![&payload[..actual_len as usize]],
            lcg,
        )?;
        Ok(actual_len)
    }

    pub fn load(device: &mut dyn BlockDevice) -> Result<Self> {
        let (header, additional, payload) =
            read_chunk(device, ChunkType::StreamData, Self::FIXED_ADDITIONAL)?;
        let word = u32::from_le_bytes(additional[0..4].try_into().unwrap());
        let (stream_id, last) = unpack_stream_id(word);
        let mut offset_bytes = [0u8; 8];
        offset_bytes[..6].copy_from_slice(&additional[4..10]);
        Ok(Self {
            p: header.p,
            stream_id,
            last,
            offset_in_stream: u64::from_le_bytes(offset_bytes),
            payload,
        })
    }
}

/// A chunk whose contents are entirely don't-care padding; marks free space
/// in the container without claiming to be a real stream.
#[derive(Debug, Clone, Copy)]
pub struct FillChunk {
    pub p: u8,
}

impl FillChunk {
    /// Picks the largest `p` that still fits within `available_space`, so a
    /// gap is plugged without spilling into whatever follows it.
    pub fn save(device: &mut dyn BlockDevice, available_space: u32, lcg: &mut Lcg) -> Result<u32> {
        let p = super::header::closest_smaller_p2(available_space);
        let invalid = (chunk_size_for_p(p) - HEADER_BYTES as u32) as u16;
        write_chunk(device, ChunkType::Fill, p, invalid, &[], &vec![], lcg)?;
        Ok(chunk_size_for_p(p))
    }

    pub fn load(device: &mut dyn BlockDevice) -> Result<Self> {
        let (header, _additional, _payload) = read_chunk(device, ChunkType::Fill, 0)?;
        Ok(Self { p: header.p })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::memory::MemoryBlockDevice;

    #[test]
    fn file_header_round_trips() {
        let mut dev = MemoryBlockDevice::new();
        let mut lcg = Lcg::new(1);
        FileHeaderChunk::save(&mut dev, 1, 0, 0, b"inecontainer", &mut lcg).unwrap();
        dev.set_position(0).unwrap();
        let chunk = FileHeaderChunk::load(&mut dev).unwrap();
        assert_eq!(chunk.major, 1);
        assert_eq!(chunk.identifier, b"inecontainer");
    }

    #[test]
    fn stream_start_round_trips_and_trims_name() {
        let mut dev = MemoryBlockDevice::new();
        let mut lcg = Lcg::new(2);
        StreamStartChunk::save(&mut dev, 5, true, b"notes.txt", &mut lcg).unwrap();
        dev.set_position(0).unwrap();
        let chunk = StreamStartChunk::load(&mut dev).unwrap();
        assert_eq!(chunk.stream_id, 5);
        assert!(chunk.last);
        assert_eq!(chunk.name(), "notes.txt");
    }

    #[test]
    fn stream_data_round_trips_and_reports_actual_length() {
        let mut dev = MemoryBlockDevice::new();
        let mut lcg = Lcg::new(3);
        let data = vec![0xABu8; 50];
        let written = StreamDataChunk::save(&mut dev, 1, false, 100, &data, 0, true, &mut lcg).unwrap();
        assert_eq!(written, 50);
        dev.set_position(0).unwrap();
        let chunk = StreamDataChunk::load(&mut dev).unwrap();
        assert_eq!(chunk.offset_in_stream, 100);
        assert_eq!(chunk.payload, data);
    }

    #[test]
    fn stream_data_truncates_payload_when_grow_disallowed() {
        let mut dev = MemoryBlockDevice::new();
        let mut lcg = Lcg::new(4);
        let data = vec![0x11u8; 500];
        let written = StreamDataChunk::save(&mut dev, 1, false, 0, &data, 0, false, &mut lcg).unwrap();
        assert!(written < 500);
    }

    #[test]
    fn fill_chunk_round_trips_and_fits_available_space() {
        let mut dev = MemoryBlockDevice::new();
        let mut lcg = Lcg::new(5);
        let written = FillChunk::save(&mut dev, 200, &mut lcg).unwrap();
        assert!(written <= 200);
        dev.set_position(0).unwrap();
        FillChunk::load(&mut dev).unwrap();
    }

    #[test]
    fn corrupted_payload_fails_crc_check() {
        let mut dev = MemoryBlockDevice::new();
        let mut lcg = Lcg::new(6);
        StreamDataChunk::save(&mut dev, 1, false, 0, b"hello world", 0, true, &mut lcg).unwrap();
        let mut bytes = dev.into_vec();
        bytes[6] ^= 0xFF;
        let mut dev2 = MemoryBlockDevice::new();
        dev2.write(&bytes).unwrap();
        dev2.set_position(0).unwrap();
        let err = StreamDataChunk::load(&mut dev2).unwrap_err();
        assert!(matches!(err, Error::ChunkCrcError { .. }));
    }
}
