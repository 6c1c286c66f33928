use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::BlockDevice;
use crate::error::{Error, Result};

/// A [`BlockDevice`] backed by a real file. Supports truncation on every
/// platform `std::fs::File::set_len` supports.
pub struct FileBlockDevice {
    file: File,
    position: u64,
}

impl FileBlockDevice {
    /// Open (creating if necessary) the file at `path` for positioned
    /// read/write access.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| Error::FailedToOpenFile(format!("{}: {e}", path.display())))?;
        Ok(Self { file, position: 0 })
    }
}

impl BlockDevice for FileBlockDevice {
    fn size(&mut self) -> Result<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|_| Error::FileReadError)
    }

    fn set_position(&mut self, offset: u64) -> Result<()> {
        let len = self.size()?;
        if offset > len {
            return Err(Error::SeekError {
                requested: offset,
                size: len,
            });
        }
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|_| Error::SeekError {
                requested: offset,
                size: len,
            })?;
        self.position = offset;
        Ok(())
    }

    fn set_position_last(&mut self) -> Result<()> {
        let len = self.size()?;
        self.file
            .seek(SeekFrom::Start(len))
            .map_err(|_| Error::SeekError {
                requested: len,
                size: len,
            })?;
        self.position = len;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut total = 0usize;
        while total < buf.len() {
            match self.file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => return Err(Error::FileReadError),
            }
        }
        self.position += total as u64;
        Ok(total)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.file.write_all(buf).map_err(|_| Error::FileWriteError)?;
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn supports_truncation(&self) -> bool {
        true
    }

    fn truncate(&mut self) -> Result<()> {
        self.file
            .set_len(self.position)
            .map_err(|_| Error::FileTruncateError)
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush().map_err(|_| Error::FileFlushError)
    }
}
