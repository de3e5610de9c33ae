//! Random-access stores backing message content.
//!
//! A [`DataContainer`] is addressed by absolute, zero-based message offset.
//! Incoming messages receive ordered [`put`](DataContainer::put) calls as
//! chunks land; outgoing messages are drained through a sequential read
//! cursor that can be backed off with
//! [`rewind_read`](DataContainer::rewind_read) when a chunk has to be cut
//! short.

use std::fmt;

use thiserror::Error;

pub mod file;
pub mod memory;

pub use file::FileContainer;
pub use memory::MemoryContainer;

/// Errors raised by data containers.
#[derive(Debug, Error)]
pub enum DataContainerError {
    /// Underlying storage failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A read or write fell outside the addressable range.
    #[error("range {offset}+{len} out of bounds (size {size})")]
    OutOfBounds {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: u64,
        /// Current container size.
        size: u64,
    },
    /// A rewind asked to move the cursor before the first byte.
    #[error("cannot rewind {requested} bytes from position {position}")]
    RewindPastStart {
        /// Requested rewind distance.
        requested: u64,
        /// Cursor position at the time.
        position: u64,
    },
    /// The message has no container attached.
    #[error("message has no data container")]
    Missing,
}

/// Abstract byte store for one message body.
pub trait DataContainer: Send + fmt::Debug {
    /// Write `data` at absolute `offset`.
    ///
    /// # Errors
    /// Returns an error if the store cannot hold the bytes.
    fn put(&mut self, offset: u64, data: &[u8]) -> Result<(), DataContainerError>;

    /// Read `len` bytes starting at absolute `offset`.
    ///
    /// # Errors
    /// Returns [`DataContainerError::OutOfBounds`] if the range is not stored.
    fn get(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, DataContainerError>;

    /// Fill `buf` from the read cursor, advancing it. Returns the byte count.
    ///
    /// # Errors
    /// Returns an error if the underlying storage fails.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DataContainerError>;

    /// Move the read cursor back by `n` bytes.
    ///
    /// # Errors
    /// Returns [`DataContainerError::RewindPastStart`] if `n` exceeds the
    /// cursor position.
    fn rewind_read(&mut self, n: u64) -> Result<(), DataContainerError>;

    /// Current read cursor.
    fn read_position(&self) -> u64;

    /// Number of bytes stored.
    fn size(&self) -> u64;

    /// Whether bytes remain after the read cursor.
    fn has_data_to_read(&self) -> bool { self.read_position() < self.size() }

    /// Whether the first `total` bytes have been stored contiguously.
    fn is_complete(&self, total: u64) -> bool;
}

fn rewound(position: u64, n: u64) -> Result<u64, DataContainerError> {
    position
        .checked_sub(n)
        .ok_or(DataContainerError::RewindPastStart {
            requested: n,
            position,
        })
}
