//! Async writer draining outgoing transactions and responses.
//!
//! [`TransactionWriter`] pulls bytes from a [`Transaction`] in fixed-size
//! pieces and scans the body for the transaction's own end-line. A
//! collision cuts the chunk before the match and interrupts it, so the
//! remaining content follows in a new SEND with a different id. The last
//! few body bytes of each piece are held back and re-read with the next
//! one, so a match spanning two pieces is still found.

use std::time::Duration;

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    time::timeout,
};
use tracing::{trace, warn};

use super::{IO_TIMEOUT, INTERRUPTIBLE_THRESHOLD, Transaction, TransactionError, TransactionResponse};

const MIN_CHUNK: usize = 64;

async fn io_with_timeout<F, T>(timeout_dur: Duration, operation: F) -> Result<T, TransactionError>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    timeout(timeout_dur, operation)
        .await
        .map_err(|_| TransactionError::Timeout)?
        .map_err(Into::into)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Writer for outgoing transactions and responses.
pub struct TransactionWriter<W> {
    writer: W,
    timeout: Duration,
    chunk: usize,
}

impl<W> TransactionWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Create a new writer with default timeout and chunk size.
    #[must_use = "create a writer"]
    #[expect(
        clippy::missing_const_for_fn,
        reason = "const fn with non-const trait bounds (AsyncWrite + Unpin) is misleading"
    )]
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            timeout: IO_TIMEOUT,
            chunk: INTERRUPTIBLE_THRESHOLD,
        }
    }

    /// Override the I/O timeout used for writes.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the number of bytes pulled per write.
    ///
    /// Values below 64 are raised so a held-back end-line prefix never
    /// stalls progress.
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk: usize) -> Self {
        self.chunk = if chunk < MIN_CHUNK { MIN_CHUNK } else { chunk };
        self
    }

    /// Consume the writer, returning the underlying stream.
    pub fn into_inner(self) -> W { self.writer }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransactionError> {
        io_with_timeout(self.timeout, self.writer.write_all(bytes)).await
    }

    async fn flush_timeout(&mut self) -> Result<(), TransactionError> {
        io_with_timeout(self.timeout, self.writer.flush()).await
    }

    /// Write an outgoing transaction up to and including its end-line.
    ///
    /// Stops sending body bytes as soon as the transaction is interrupted or
    /// aborted and closes it with the matching flag.
    ///
    /// # Errors
    /// Returns an error if writing fails or times out, or if the transaction
    /// rejects a pull.
    #[must_use = "handle the result"]
    pub async fn write_transaction(&mut self, tx: &mut Transaction) -> Result<(), TransactionError> {
        let mut marker = b"-------".to_vec();
        marker.extend_from_slice(tx.id().as_bytes());
        let mut buf = vec![0u8; self.chunk];
        while tx.has_more_data() {
            let header_part = tx.remaining_header_len();
            let n = match tx.next_data_bytes(&mut buf) {
                Ok(n) => n,
                Err(err) if err.is_illegal_use() && tx.is_interrupted() => break,
                Err(err) => return Err(err),
            };
            if n == 0 {
                break;
            }
            let body_start = header_part.min(n);
            let body = buf.get(body_start..n).unwrap_or_default();
            let keep = if let Some(k) = find(body, &marker) {
                let cut = body_start + k;
                warn!(tid = %tx.id(), offset = k, "end-line found in content; cutting chunk");
                tx.rewind(n - cut)?;
                tx.interrupt()?;
                cut
            } else if tx.has_more_data() && !body.is_empty() {
                let hold = body.len().min(marker.len() - 1);
                tx.rewind(hold)?;
                n - hold
            } else {
                n
            };
            let out = buf.get(..keep).unwrap_or_default();
            io_with_timeout(self.timeout, self.writer.write_all(out)).await?;
            trace!(tid = %tx.id(), bytes = keep, "transaction data written");
        }
        let mut end_line = Vec::with_capacity(marker.len() + 5);
        while tx.end_line_pending() {
            end_line.push(tx.next_end_line_byte()?);
        }
        self.write_all(&end_line).await?;
        self.flush_timeout().await
    }

    /// Write a pre-serialised response.
    ///
    /// # Errors
    /// Returns an error if writing fails or times out.
    #[must_use = "handle the result"]
    pub async fn write_response(
        &mut self,
        response: &mut TransactionResponse,
    ) -> Result<(), TransactionError> {
        let mut buf = vec![0u8; self.chunk];
        while response.has_data() {
            let n = response.next_bytes(&mut buf);
            let out = buf.get(..n).unwrap_or_default();
            io_with_timeout(self.timeout, self.writer.write_all(out)).await?;
        }
        self.flush_timeout().await
    }
}
