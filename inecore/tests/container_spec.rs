//! End-to-end scenarios against a full open/write/close/reopen cycle, run
//! over both backing devices so neither implementation drifts from the
//! other's observable behavior.

use inecore::chunk::header::HEADER_BYTES;
use inecore::{ChunkHeader, ContainerEngine, MemoryBlockDevice, VirtualFile};

const IDENTIFIER: &[u8] = b"Inesonic, LLC.\nAleph";

#[test]
fn s1_empty_open_produces_a_single_32_byte_header_chunk() {
    let (mut engine, outcome) =
        ContainerEngine::open(MemoryBlockDevice::new(), IDENTIFIER, false).unwrap();
    assert_eq!(outcome, inecore::OpenOutcome::Opened);
    engine.close().unwrap();
    let bytes = engine.into_device().into_vec();

    assert_eq!(bytes.len(), 32);
    assert_eq!(bytes[0] & 0x03, 0, "low two bits select FileHeader type");
    let header = ChunkHeader::decode(&bytes[0..HEADER_BYTES].try_into().unwrap());
    assert_eq!(header.p, 0);
    assert_eq!(header.chunk_size(), 32);
}

#[test]
fn s2_single_stream_round_trip_over_a_real_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("container.ine");

    let device = inecore::FileBlockDevice::open(&path).unwrap();
    let (mut engine, _) = ContainerEngine::open(device, IDENTIFIER, false).unwrap();
    let pattern: Vec<u8> = (0..65536u32).map(|i| (i % 254) as u8).collect();
    {
        let mut f = VirtualFile::open(&mut engine, "test.dat").unwrap();
        f.write(&pattern).unwrap();
    }
    engine.close().unwrap();
    drop(engine);

    let device = inecore::FileBlockDevice::open(&path).unwrap();
    let (mut engine, _) = ContainerEngine::open(device, IDENTIFIER, false).unwrap();
    let dir_listing = engine.directory().unwrap();
    assert_eq!(dir_listing, vec!["test.dat".to_string()]);

    let mut f = VirtualFile::open(&mut engine, "test.dat").unwrap();
    assert_eq!(f.size().unwrap(), 65536);
    f.set_position(0).unwrap();
    let mut read_back = vec![0u8; 65536];
    let mut filled = 0;
    while filled < read_back.len() {
        let n = f.read(&mut read_back[filled..]).unwrap();
        assert!(n > 0);
        filled += n;
    }
    assert_eq!(read_back, pattern);
}

#[test]
fn s3_delete_truncates_back_to_just_the_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("container.ine");

    let device = inecore::FileBlockDevice::open(&path).unwrap();
    let (mut engine, _) = ContainerEngine::open(device, IDENTIFIER, false).unwrap();
    let pattern: Vec<u8> = (0..65536u32).map(|i| (i % 254) as u8).collect();
    {
        let mut f = VirtualFile::open(&mut engine, "test.dat").unwrap();
        f.write(&pattern).unwrap();
    }
    engine.close().unwrap();
    drop(engine);

    let device = inecore::FileBlockDevice::open(&path).unwrap();
    let (mut engine, _) = ContainerEngine::open(device, IDENTIFIER, false).unwrap();
    let f = VirtualFile::open(&mut engine, "test.dat").unwrap();
    f.erase().unwrap();
    engine.close().unwrap();
    let mut device = engine.into_device();
    assert_eq!(inecore::BlockDevice::size(&mut device).unwrap(), 32);
}

#[test]
fn s4_random_rmw_leaves_untouched_bytes_at_0xff() {
    let (mut engine, _) =
        ContainerEngine::open(MemoryBlockDevice::new(), IDENTIFIER, false).unwrap();
    let size = 2 * 65536usize;
    {
        let mut f = VirtualFile::open(&mut engine, "rmw.bin").unwrap();
        f.write(&vec![0xFFu8; size]).unwrap();
        f.flush().unwrap();
    }

    // Representative (offset, len) windows in place of true randomness — a
    // run near the start, one straddling a chunk boundary, one at the tail.
    // `model` tracks the expected bytes cumulatively across windows.
    let windows = [(17usize, 5000usize), (65000, 2000), (size - 100, 90)];
    let mut model = vec![0xFFu8; size];
    for &(off, len) in &windows {
        let cycled: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
        model[off..off + len].copy_from_slice(&cycled);

        let mut f = VirtualFile::open(&mut engine, "rmw.bin").unwrap();
        f.set_position(off as u64).unwrap();
        f.write(&cycled).unwrap();

        let mut whole = vec![0u8; size];
        f.set_position(0).unwrap();
        let mut filled = 0;
        while filled < size {
            let n = f.read(&mut whole[filled..]).unwrap();
            assert!(n > 0);
            filled += n;
        }
        assert_eq!(whole, model);
    }
}

#[test]
fn s5_multi_stream_interleaved_appends_preserve_each_streams_size() {
    let (mut engine, _) =
        ContainerEngine::open(MemoryBlockDevice::new(), IDENTIFIER, false).unwrap();
    let names = ["a.bin", "b.bin", "c.bin", "d.bin"];
    let mut expected = [0u64; 4];
    // Scaled down from a 128 MiB aggregate for test speed; the
    // interleaving pattern (round-robin, varying slice sizes) is unchanged.
    let slice_sizes = [97usize, 251, 4096, 13];

    for round in 0..200 {
        for (i, name) in names.iter().enumerate() {
            let len = slice_sizes[(round + i) % slice_sizes.len()];
            let buf = vec![((round + i) % 256) as u8; len];
            let mut f = VirtualFile::open(&mut engine, name).unwrap();
            f.append(&buf).unwrap();
            expected[i] += len as u64;
        }
    }
    engine.close().unwrap();
    let bytes = engine.into_device().into_vec();

    let (mut engine, _) =
        ContainerEngine::open(MemoryBlockDevice::from_vec(bytes), IDENTIFIER, false).unwrap();
    for (i, name) in names.iter().enumerate() {
        let f = VirtualFile::open(&mut engine, name).unwrap();
        assert_eq!(f.size().unwrap(), expected[i], "stream {name} size mismatch after reopen");
    }
}

#[test]
fn s6_crc_detection_flags_corrupted_stream_data_payload() {
    let (mut engine, _) =
        ContainerEngine::open(MemoryBlockDevice::new(), IDENTIFIER, false).unwrap();
    {
        let mut f = VirtualFile::open(&mut engine, "test.dat").unwrap();
        f.write(&vec![0xAAu8; 4096]).unwrap();
    }
    engine.close().unwrap();
    let mut bytes = engine.into_device().into_vec();

    // Flip 15 contiguous bits inside the StreamData chunk's payload. The
    // layout is: 32-byte FileHeaderChunk, 128-byte StreamStartChunk, then
    // the StreamDataChunk (4-byte header + 10-byte additional header) —
    // offset 200 lands well inside its payload.
    let corrupt_at = 200;
    for bit in 0..15 {
        let byte = corrupt_at + bit / 8;
        bytes[byte] ^= 1 << (bit % 8);
    }

    let (mut engine, _) =
        ContainerEngine::open(MemoryBlockDevice::from_vec(bytes), IDENTIFIER, false).unwrap();
    // Traversal validates every chunk's CRC while building maps, so the
    // corruption surfaces as soon as the stream is looked up.
    let err = VirtualFile::open(&mut engine, "test.dat").unwrap_err();
    assert!(matches!(err, inecore::Error::ChunkCrcError { .. }));
}
