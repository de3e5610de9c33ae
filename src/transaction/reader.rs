//! Async reader yielding framed transactions.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    time::timeout,
};

use super::{Framer, IO_TIMEOUT, Transaction, TransactionError, TransactionManager};

const READ_CHUNK: usize = 8 * 1024;

/// Reader for assembling transactions from a byte stream.
///
/// Each read is bounded by the configured timeout. Bodies stream into their
/// message containers as bytes arrive; a transaction is yielded once its
/// end-line has been read.
pub struct TransactionReader<R> {
    reader: R,
    framer: Framer,
    ready: VecDeque<Transaction>,
    timeout: Duration,
    buf: Vec<u8>,
}

impl<R> TransactionReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Create a new reader with the default timeout.
    #[must_use = "create a reader"]
    pub fn new(reader: R, manager: Arc<dyn TransactionManager>) -> Self {
        Self {
            reader,
            framer: Framer::new(manager),
            ready: VecDeque::new(),
            timeout: IO_TIMEOUT,
            buf: vec![0; READ_CHUNK],
        }
    }

    /// Override the I/O timeout used for reads.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read the next complete transaction.
    ///
    /// Returns `Ok(None)` when the stream ends between transactions.
    ///
    /// # Errors
    /// Returns [`TransactionError::Timeout`] if a read stalls, an I/O error
    /// if the stream fails or ends mid-transaction, and framing errors from
    /// [`Framer::feed`].
    #[must_use = "handle the result"]
    pub async fn read_transaction(&mut self) -> Result<Option<Transaction>, TransactionError> {
        loop {
            if let Some(tx) = self.ready.pop_front() {
                return Ok(Some(tx));
            }
            let n = timeout(self.timeout, self.reader.read(&mut self.buf))
                .await
                .map_err(|_| TransactionError::Timeout)??;
            if n == 0 {
                if self.framer.is_idle() {
                    return Ok(None);
                }
                return Err(TransactionError::Io(std::io::Error::from(
                    std::io::ErrorKind::UnexpectedEof,
                )));
            }
            let data = self.buf.get(..n).unwrap_or_default();
            self.ready.extend(self.framer.feed(data)?);
        }
    }
}
