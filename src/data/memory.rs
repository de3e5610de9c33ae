//! In-memory data container.

use bytes::{Bytes, BytesMut};

use super::{DataContainer, DataContainerError, rewound};

/// Message content held in a growable buffer.
#[derive(Debug, Default)]
pub struct MemoryContainer {
    data: BytesMut,
    read_pos: usize,
    filled: u64,
}

impl MemoryContainer {
    /// Create an empty container for incoming content.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Create an empty container with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Wrap existing content for sending.
    #[must_use]
    pub fn from_bytes(content: impl Into<Bytes>) -> Self {
        let data = BytesMut::from(content.into().as_ref());
        let filled = data.len() as u64;
        Self {
            data,
            read_pos: 0,
            filled,
        }
    }

    /// Borrow everything stored so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.data }

    fn bounds(&self, offset: u64, len: usize) -> Result<(usize, usize), DataContainerError> {
        let out_of_bounds = || DataContainerError::OutOfBounds {
            offset,
            len: len as u64,
            size: self.data.len() as u64,
        };
        let start = usize::try_from(offset).map_err(|_| out_of_bounds())?;
        let end = start.checked_add(len).ok_or_else(out_of_bounds)?;
        Ok((start, end))
    }
}

impl DataContainer for MemoryContainer {
    fn put(&mut self, offset: u64, data: &[u8]) -> Result<(), DataContainerError> {
        let (start, end) = self.bounds(offset, data.len())?;
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        let Some(slot) = self.data.get_mut(start..end) else {
            return Err(DataContainerError::OutOfBounds {
                offset,
                len: data.len() as u64,
                size: self.data.len() as u64,
            });
        };
        slot.copy_from_slice(data);
        if offset <= self.filled {
            self.filled = self.filled.max(end as u64);
        }
        Ok(())
    }

    fn get(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, DataContainerError> {
        let (start, end) = self.bounds(offset, len)?;
        self.data
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or(DataContainerError::OutOfBounds {
                offset,
                len: len as u64,
                size: self.data.len() as u64,
            })
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DataContainerError> {
        let remaining = self.data.get(self.read_pos..).unwrap_or_default();
        let n = remaining.len().min(buf.len());
        if let (Some(dst), Some(src)) = (buf.get_mut(..n), remaining.get(..n)) {
            dst.copy_from_slice(src);
        }
        self.read_pos += n;
        Ok(n)
    }

    fn rewind_read(&mut self, n: u64) -> Result<(), DataContainerError> {
        let position = rewound(self.read_pos as u64, n)?;
        self.read_pos = usize::try_from(position).unwrap_or(0);
        Ok(())
    }

    fn read_position(&self) -> u64 { self.read_pos as u64 }

    fn size(&self) -> u64 { self.data.len() as u64 }

    fn is_complete(&self, total: u64) -> bool { self.filled >= total }
}
