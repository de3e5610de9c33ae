//! File-backed data container rooted in a capability directory.

use std::io::{Read, Seek, SeekFrom, Write};

use camino::Utf8Path;
use cap_std::fs_utf8::{Dir, File, OpenOptions};

use super::{DataContainer, DataContainerError, rewound};

/// Message content stored in a file opened through [`Dir`].
///
/// The container keeps its own read cursor and seeks before every access, so
/// random `get` calls never disturb sequential reads.
#[derive(Debug)]
pub struct FileContainer {
    file: File,
    read_pos: u64,
    size: u64,
    filled: u64,
}

impl FileContainer {
    /// Create (or truncate) `name` inside `dir` for incoming content.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create(dir: &Dir, name: &Utf8Path) -> Result<Self, DataContainerError> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(true);
        let file = dir.open_with(name, &options)?;
        Ok(Self {
            file,
            read_pos: 0,
            size: 0,
            filled: 0,
        })
    }

    /// Open existing content inside `dir` for sending.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or inspected.
    pub fn open(dir: &Dir, name: &Utf8Path) -> Result<Self, DataContainerError> {
        let file = dir.open(name)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file,
            read_pos: 0,
            size,
            filled: size,
        })
    }
}

impl DataContainer for FileContainer {
    fn put(&mut self, offset: u64, data: &[u8]) -> Result<(), DataContainerError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        let end = offset + data.len() as u64;
        self.size = self.size.max(end);
        if offset <= self.filled {
            self.filled = self.filled.max(end);
        }
        Ok(())
    }

    fn get(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, DataContainerError> {
        if offset.saturating_add(len as u64) > self.size {
            return Err(DataContainerError::OutOfBounds {
                offset,
                len: len as u64,
                size: self.size,
            });
        }
        let mut buf = vec![0; len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DataContainerError> {
        let remaining = self.size.saturating_sub(self.read_pos);
        let want = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let Some(dst) = buf.get_mut(..want) else {
            return Ok(0);
        };
        self.file.seek(SeekFrom::Start(self.read_pos))?;
        let n = self.file.read(dst)?;
        self.read_pos += n as u64;
        Ok(n)
    }

    fn rewind_read(&mut self, n: u64) -> Result<(), DataContainerError> {
        self.read_pos = rewound(self.read_pos, n)?;
        Ok(())
    }

    fn read_position(&self) -> u64 { self.read_pos }

    fn size(&self) -> u64 { self.size }

    fn is_complete(&self, total: u64) -> bool { self.filled >= total }
}
