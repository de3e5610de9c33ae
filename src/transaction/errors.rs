//! Error types for MSRP transaction parsing, framing and serialisation.

use thiserror::Error;
use tokio::io;

use crate::data::DataContainerError;

/// Errors that can occur when parsing, producing or framing transactions.
///
/// Protocol faults caused by the peer ([`is_protocol`](Self::is_protocol))
/// are answered on the wire and leave the connection usable. Contract
/// violations by the calling code surface as [`TransactionError::IllegalUse`]
/// and must not be retried.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The header violates the MSRP grammar.
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    /// The header exceeded the configured byte budget.
    #[error("header too large: {len} bytes exceeds limit of {limit}")]
    HeaderTooLarge {
        /// Number of header bytes accumulated including the offending slice.
        len: usize,
        /// Configured maximum.
        limit: usize,
    },
    /// No session matched the request's target path.
    #[error("no session for request (responded {code})")]
    NoSession {
        /// Response code sent to the peer (481 or 506).
        code: u16,
    },
    /// The session listener declined the incoming message.
    #[error("message rejected by user (responded {code})")]
    RejectedByUser {
        /// Response code sent to the peer.
        code: u16,
    },
    /// The request method is not SEND or REPORT.
    #[error("unsupported method")]
    UnsupportedMethod,
    /// A body without an associated message overflowed the local buffer.
    #[error("body exceeds local buffer of {limit} bytes")]
    BodyTooLarge {
        /// Configured maximum.
        limit: usize,
    },
    /// A SEND's `Byte-Range` skips ahead of the received content or runs
    /// past the message's total size.
    #[error("byte range starting at {start} is out of bounds (received {received}, total {total:?})")]
    ByteRangeOutOfBounds {
        /// 1-based start of the offending range.
        start: u64,
        /// Bytes of the message received before this chunk.
        received: u64,
        /// Declared total size, if known.
        total: Option<u64>,
    },
    /// The first line of a transaction could not be parsed.
    #[error("invalid start line: {0}")]
    InvalidStartLine(String),
    /// Reading or writing message content failed.
    #[error("data container: {0}")]
    DataContainer(#[from] DataContainerError),
    /// The caller violated the transaction's usage contract.
    #[error("illegal use: {0}")]
    IllegalUse(&'static str),
    /// I/O error occurred during read or write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Operation timed out.
    #[error("I/O timeout")]
    Timeout,
}

impl TransactionError {
    /// Whether the error was caused by the peer and answered on the wire.
    #[must_use]
    pub const fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::InvalidHeader(_)
                | Self::HeaderTooLarge { .. }
                | Self::NoSession { .. }
                | Self::RejectedByUser { .. }
                | Self::UnsupportedMethod
                | Self::BodyTooLarge { .. }
                | Self::ByteRangeOutOfBounds { .. }
                | Self::DataContainer(_)
        )
    }

    /// Whether the error reports a defect in the calling code.
    #[must_use]
    pub const fn is_illegal_use(&self) -> bool { matches!(self, Self::IllegalUse(_)) }
}
