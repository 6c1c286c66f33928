//! `VirtualFile`: a named, independently seekable byte stream inside a
//! container, addressed through a borrowed [`ContainerEngine`]. All the
//! actual state (chunk map, hot-chunk cache, tail buffer) lives in the
//! engine's per-stream slab; this type is a cheap handle around a stream id.

use crate::device::BlockDevice;
use crate::engine::ContainerEngine;
use crate::error::Result;

pub struct VirtualFile<'a, D: BlockDevice> {
    engine: &'a mut ContainerEngine<D>,
    stream_id: u32,
}

impl<'a, D: BlockDevice> VirtualFile<'a, D> {
    /// Open (creating if absent) the named stream, returning a handle
    /// borrowing the engine exclusively for the handle's lifetime.
    pub fn open(engine: &'a mut ContainerEngine<D>, name: &str) -> Result<Self> {
        let stream_id = engine.new_virtual_file(name)?;
        Ok(Self { engine, stream_id })
    }

    pub fn name(&self) -> Result<String> {
        Ok(self.engine.file_state(self.stream_id)?.name.clone())
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.engine.file_state(self.stream_id)?.size())
    }

    pub fn position(&self) -> Result<u64> {
        Ok(self.engine.file_state(self.stream_id)?.position)
    }

    pub fn bytes_in_write_cache(&self) -> Result<u64> {
        Ok(self.engine.file_state(self.stream_id)?.bytes_in_write_cache())
    }

    pub fn set_position(&mut self, offset: u64) -> Result<()> {
        let size = self.engine.file_state(self.stream_id)?.size();
        if offset > size {
            return Err(crate::error::Error::SeekError {
                requested: offset,
                size,
            });
        }
        self.engine.file_state_mut(self.stream_id)?.position = offset;
        Ok(())
    }

    pub fn set_position_last(&mut self) -> Result<()> {
        let size = self.engine.file_state(self.stream_id)?.size();
        self.engine.file_state_mut(self.stream_id)?.position = size;
        Ok(())
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.engine.vfile_read(self.stream_id, buf)
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.engine.vfile_write(self.stream_id, buf)
    }

    pub fn append(&mut self, buf: &[u8]) -> Result<usize> {
        self.engine.vfile_append(self.stream_id, buf)
    }

    pub fn truncate(&mut self) -> Result<()> {
        self.engine.vfile_truncate(self.stream_id)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.engine.vfile_flush(self.stream_id)
    }

    /// Erases the stream from the container and consumes this handle — every
    /// subsequent operation on it would otherwise see a container that no
    /// longer recognizes the stream id.
    pub fn erase(self) -> Result<()> {
        self.engine.vfile_erase(self.stream_id)
    }

    pub fn rename(&mut self, new_name: &str) -> Result<()> {
        self.engine.vfile_rename(self.stream_id, new_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::memory::MemoryBlockDevice;

    fn open_engine() -> ContainerEngine<MemoryBlockDevice> {
        let (engine, _) = ContainerEngine::open(MemoryBlockDevice::new(), b"inecontainer", false).unwrap();
        engine
    }

    #[test]
    fn write_then_read_back_small_file() {
        let mut engine = open_engine();
        let mut f = VirtualFile::open(&mut engine, "notes.txt").unwrap();
        f.write(b"hello, container").unwrap();
        f.set_position(0).unwrap();
        let mut buf = [0u8; 17];
        let n = f.read(&mut buf).unwrap();
        assert_eq!(n, 17);
        assert_eq!(&buf, b"hello, container");
    }

    #[test]
    fn append_past_a_full_tail_buffer_spills_into_chunks() {
        let mut engine = open_engine();
        let mut f = VirtualFile::open(&mut engine, "big.bin").unwrap();
        let data = vec![0x42u8; 9000];
        f.write(&data).unwrap();
        assert_eq!(f.size().unwrap(), 9000);
        f.set_position(0).unwrap();
        let mut read_back = vec![0u8; 9000];
        let mut filled = 0;
        while filled < read_back.len() {
            let n = f.read(&mut read_back[filled..]).unwrap();
            assert!(n > 0);
            filled += n;
        }
        assert_eq!(read_back, data);
    }

    #[test]
    fn rmw_overwrite_in_the_middle_of_existing_data() {
        let mut engine = open_engine();
        let mut f = VirtualFile::open(&mut engine, "mid.bin").unwrap();
        f.write(&vec![0xAAu8; 5000]).unwrap();
        f.flush().unwrap();
        f.set_position(100).unwrap();
        f.write(&[0xBBu8; 20]).unwrap();
        f.set_position(100).unwrap();
        let mut buf = [0u8; 20];
        f.read(&mut buf).unwrap();
        assert_eq!(buf, [0xBBu8; 20]);
        assert_eq!(f.size().unwrap(), 5000);
    }

    #[test]
    fn set_position_past_end_of_file_is_rejected() {
        let mut engine = open_engine();
        let mut f = VirtualFile::open(&mut engine, "bounds.bin").unwrap();
        f.write(b"abc").unwrap();
        let err = f.set_position(4).unwrap_err();
        assert!(matches!(err, crate::error::Error::SeekError { requested: 4, size: 3 }));
    }

    #[test]
    fn set_position_last_clamps_instead_of_erroring() {
        let mut engine = open_engine();
        let mut f = VirtualFile::open(&mut engine, "bounds2.bin").unwrap();
        f.write(b"abc").unwrap();
        f.set_position_last().unwrap();
        assert_eq!(f.position().unwrap(), 3);
    }

    #[test]
    fn truncate_drops_everything_past_the_cursor() {
        let mut engine = open_engine();
        let mut f = VirtualFile::open(&mut engine, "shrink.bin").unwrap();
        f.write(&vec![1u8; 6000]).unwrap();
        f.set_position(4096).unwrap();
        f.truncate().unwrap();
        assert_eq!(f.size().unwrap(), 4096);
    }

    #[test]
    fn erase_then_reopen_does_not_resurrect_the_stream() {
        let mut engine = open_engine();
        {
            let mut f = VirtualFile::open(&mut engine, "gone.bin").unwrap();
            f.write(b"bye").unwrap();
            f.flush().unwrap();
        }
        {
            let f = VirtualFile::open(&mut engine, "gone.bin").unwrap();
            f.erase().unwrap();
        }
        let dir = engine.directory().unwrap();
        assert!(!dir.contains(&"gone.bin".to_string()));
    }

    #[test]
    fn rename_updates_directory_listing() {
        let mut engine = open_engine();
        {
            let mut f = VirtualFile::open(&mut engine, "old.bin").unwrap();
            f.write(b"x").unwrap();
            f.rename("new.bin").unwrap();
        }
        let dir = engine.directory().unwrap();
        assert!(dir.contains(&"new.bin".to_string()));
        assert!(!dir.contains(&"old.bin".to_string()));
    }
}
