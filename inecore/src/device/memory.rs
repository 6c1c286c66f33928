use super::BlockDevice;
use crate::error::{Error, Result};

/// A [`BlockDevice`] backed by a growable in-memory buffer. Always supports
/// truncation; used heavily by tests and suitable for building a container
/// in memory before flushing it elsewhere.
#[derive(Default)]
pub struct MemoryBlockDevice {
    data: Vec<u8>,
    position: u64,
}

impl MemoryBlockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap pre-existing bytes as a device, cursor at the start. Useful for
    /// replaying a container after corrupting its raw bytes in a test.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }

    /// Borrow the current contents. Mostly useful in tests.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl BlockDevice for MemoryBlockDevice {
    fn size(&mut self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn set_position(&mut self, offset: u64) -> Result<()> {
        if offset > self.data.len() as u64 {
            return Err(Error::SeekError {
                requested: offset,
                size: self.data.len() as u64,
            });
        }
        self.position = offset;
        Ok(())
    }

    fn set_position_last(&mut self) -> Result<()> {
        self.position = self.data.len() as u64;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let start = self.position as usize;
        if start >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let start = self.position as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(buf);
        self.position = end as u64;
        Ok(buf.len())
    }

    fn supports_truncation(&self) -> bool {
        true
    }

    fn truncate(&mut self) -> Result<()> {
        self.data.truncate(self.position as usize);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
