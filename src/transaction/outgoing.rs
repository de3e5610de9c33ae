//! Construction and byte production of outgoing transactions.
//!
//! An outgoing SEND is drained in three phases: the serialised header, body
//! bytes pulled from the message's container, and the end-line. The header
//! always goes out whole. Once the transaction is interrupted or aborted no
//! further body bytes are handed out and only the end-line remains.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use super::{
    ByteRange,
    Direction,
    FailureReport,
    StatusHeader,
    Transaction,
    TransactionError,
    TransactionId,
    TransactionKind,
    TransactionType,
};
use crate::{message::Message, session::Session};

/// Content type announced when the message declares none.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

const END_LINE_DASHES: usize = 7;

fn join_paths(session: &Session) -> String {
    session
        .to_path()
        .iter()
        .map(url::Url::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

impl Transaction {
    fn outgoing(
        tid: TransactionId,
        ty: TransactionType,
        message: &Arc<Message>,
        session: &Arc<Session>,
    ) -> Self {
        let mut tx = Self::blank(tid, TransactionKind::Request(ty), Direction::Outbound, None);
        tx.to_path = session.to_path().to_vec();
        tx.from_path = vec![session.uri().clone()];
        tx.message_id = Some(message.id().clone());
        tx.message = Some(Arc::clone(message));
        tx.session = Some(Arc::clone(session));
        tx.header_complete = true;
        tx
    }

    /// Build the next SEND chunk of an outgoing message.
    ///
    /// The chunk starts after the bytes already sent, so an interrupted
    /// message resumes where its previous chunk stopped.
    ///
    /// # Errors
    /// Returns [`TransactionError::IllegalUse`] for an incoming message or one
    /// that has already been sent completely.
    pub fn outgoing_send(
        tid: TransactionId,
        message: &Arc<Message>,
        session: &Arc<Session>,
    ) -> Result<Self, TransactionError> {
        if message.direction() != Direction::Outbound {
            return Err(TransactionError::IllegalUse("sending an incoming message"));
        }
        if message.is_fully_sent() && message.size() != Some(0) {
            return Err(TransactionError::IllegalUse("message already fully sent"));
        }
        let range = ByteRange::open(message.progress() + 1, message.size());
        let content_type = message.content_type().unwrap_or(DEFAULT_CONTENT_TYPE);
        let mut text = format!(
            "MSRP {tid} SEND\r\nTo-Path: {}\r\nFrom-Path: {}\r\nMessage-ID: {}\r\n",
            join_paths(session),
            session.uri(),
            message.id()
        );
        if message.success_report() {
            text.push_str("Success-Report: yes\r\n");
        }
        if message.failure_report() != FailureReport::Yes {
            text.push_str(&format!("Failure-Report: {}\r\n", message.failure_report().as_str()));
        }
        text.push_str(&format!("Byte-Range: {range}\r\nContent-Type: {content_type}\r\n\r\n"));

        let mut tx = Self::outgoing(tid, TransactionType::Send, message, session);
        tx.header_bytes = Bytes::from(text);
        tx.content_type = Some(content_type.to_owned());
        tx.byte_range = Some(range);
        tx.success_report = message.success_report();
        tx.failure_report = message.failure_report();
        tx.interruptible = true;
        message.set_last_send_transaction(&tx.id);
        debug!(tid = %tx.id, message_id = %message.id(), %range, "outgoing SEND prepared");
        Ok(tx)
    }

    /// Build a REPORT about `message` carrying `status`.
    ///
    /// The `Byte-Range` covers the bytes received so far. REPORTs carry no
    /// body and cannot be interrupted.
    #[must_use]
    pub fn outgoing_report(
        tid: TransactionId,
        message: &Arc<Message>,
        session: &Arc<Session>,
        status: StatusHeader,
    ) -> Self {
        let range = ByteRange {
            start: 1,
            end: Some(message.progress()),
            total: message.size(),
        };
        let text = format!(
            "MSRP {tid} REPORT\r\nTo-Path: {}\r\nFrom-Path: {}\r\nMessage-ID: {}\r\nByte-Range: \
             {range}\r\nStatus: {status}\r\n",
            join_paths(session),
            session.uri(),
            message.id()
        );
        let mut tx = Self::outgoing(tid, TransactionType::Report, message, session);
        tx.header_bytes = Bytes::from(text);
        tx.byte_range = Some(range);
        tx.status = Some(status);
        debug!(tid = %tx.id, message_id = %message.id(), "outgoing REPORT prepared");
        tx
    }

    fn sends_body(&self) -> bool {
        self.direction == Direction::Outbound
            && self.kind == TransactionKind::Request(TransactionType::Send)
    }

    /// Header bytes not yet handed out.
    #[must_use]
    pub fn remaining_header_len(&self) -> usize {
        self.header_bytes.len().saturating_sub(self.write.header)
    }

    fn end_line_len(&self) -> usize { END_LINE_DASHES + self.id.as_bytes().len() + 3 }

    /// Whether header or body bytes remain to be pulled.
    ///
    /// Turns false as soon as the transaction is interrupted or aborted once
    /// the header is out.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        if self.direction != Direction::Outbound || self.write.crlf > 0 || self.write.end_line > 0 {
            return false;
        }
        if self.remaining_header_len() > 0 {
            return true;
        }
        !self.control.is_stopped()
            && self.sends_body()
            && self.message.as_ref().is_some_and(|m| m.has_data())
    }

    /// Copy the next header or body bytes into `out`.
    ///
    /// # Errors
    /// Returns [`TransactionError::IllegalUse`] for incoming transactions,
    /// when called after interruption or once the end-line started, and a
    /// container error if the message content cannot be read.
    pub fn next_data_bytes(&mut self, out: &mut [u8]) -> Result<usize, TransactionError> {
        if self.direction != Direction::Outbound {
            return Err(TransactionError::IllegalUse(
                "pulling data from an incoming transaction",
            ));
        }
        if self.write.crlf > 0 || self.write.end_line > 0 {
            return Err(TransactionError::IllegalUse(
                "pulling data after the end-line started",
            ));
        }
        let header = self.header_bytes.get(self.write.header..).unwrap_or_default();
        if header.is_empty() && self.control.is_stopped() {
            return Err(TransactionError::IllegalUse(
                "pulling data from an interrupted transaction",
            ));
        }
        let n = header.len().min(out.len());
        if let (Some(dst), Some(src)) = (out.get_mut(..n), header.get(..n)) {
            dst.copy_from_slice(src);
        }
        self.write.header += n;
        let mut written = n;
        if self.remaining_header_len() > 0 || !self.sends_body() || self.control.is_stopped() {
            return Ok(written);
        }
        if let (Some(message), Some(rest)) = (self.message.clone(), out.get_mut(written..)) {
            if !rest.is_empty() {
                let read = message.read_body(rest)?;
                if read > 0 {
                    self.has_content_stuff = true;
                    self.real_chunk_size += read as u64;
                }
                written += read;
            }
        }
        Ok(written)
    }

    /// Whether end-line bytes remain once the data is drained.
    #[must_use]
    pub fn end_line_pending(&self) -> bool {
        self.direction == Direction::Outbound
            && !self.has_more_data()
            && self.write.end_line < self.end_line_len()
    }

    /// Next byte of the trailing `CRLF -------tid<flag> CRLF`.
    ///
    /// The CRLF before the end-line is only emitted when body bytes were
    /// sent. The flag byte is fixed when it is produced; later interrupts
    /// and aborts no longer change it.
    ///
    /// # Errors
    /// Returns [`TransactionError::IllegalUse`] while data remains, for
    /// incoming transactions, or once the end-line is complete.
    pub fn next_end_line_byte(&mut self) -> Result<u8, TransactionError> {
        if self.direction != Direction::Outbound {
            return Err(TransactionError::IllegalUse(
                "pulling the end-line of an incoming transaction",
            ));
        }
        if self.has_more_data() {
            return Err(TransactionError::IllegalUse(
                "end-line requested while data remains",
            ));
        }
        if self.has_content_stuff && self.write.crlf < 2 {
            let byte = if self.write.crlf == 0 { b'\r' } else { b'\n' };
            self.write.crlf += 1;
            return Ok(byte);
        }
        let pos = self.write.end_line;
        let tid_len = self.id.as_bytes().len();
        let byte = if pos < END_LINE_DASHES {
            b'-'
        } else if let Some(b) = self.id.as_bytes().get(pos - END_LINE_DASHES) {
            *b
        } else {
            match pos - END_LINE_DASHES - tid_len {
                0 => {
                    let flag = self.control.seal();
                    self.continuation = Some(flag);
                    debug!(tid = %self.id, flag = %char::from(flag.as_byte()), sent = self.real_chunk_size, "end-line flag emitted");
                    flag.as_byte()
                }
                1 => b'\r',
                2 => {
                    self.complete = true;
                    b'\n'
                }
                _ => return Err(TransactionError::IllegalUse("end-line already complete")),
            }
        };
        self.write.end_line += 1;
        Ok(byte)
    }

    /// Give back the last `n` body bytes so a later chunk resends them.
    ///
    /// # Errors
    /// Returns [`TransactionError::IllegalUse`] for responses, incoming
    /// transactions, before the header is out, without body bytes, after the
    /// end-line started, or beyond the chunk start.
    pub fn rewind(&mut self, n: usize) -> Result<(), TransactionError> {
        if self.has_response() || matches!(self.kind, TransactionKind::Response { .. }) {
            return Err(TransactionError::IllegalUse("rewinding a response"));
        }
        if self.direction != Direction::Outbound {
            return Err(TransactionError::IllegalUse(
                "rewinding an incoming transaction",
            ));
        }
        if self.remaining_header_len() > 0 {
            return Err(TransactionError::IllegalUse("rewinding into the header"));
        }
        if !self.has_content_stuff {
            return Err(TransactionError::IllegalUse(
                "rewinding a transaction without body bytes",
            ));
        }
        if self.write.crlf > 0 || self.write.end_line > 0 {
            return Err(TransactionError::IllegalUse(
                "rewinding after the end-line started",
            ));
        }
        let n64 = n as u64;
        if n64 > self.real_chunk_size {
            return Err(TransactionError::IllegalUse("rewinding past the chunk start"));
        }
        let Some(message) = &self.message else {
            return Err(TransactionError::IllegalUse(
                "rewinding a transaction without a message",
            ));
        };
        message.rewind(n64)?;
        self.real_chunk_size -= n64;
        debug!(tid = %self.id, n, "body bytes rewound");
        Ok(())
    }

    /// Cut an outgoing SEND short with `+`.
    ///
    /// Does nothing if the message was already sent in full.
    ///
    /// # Errors
    /// Returns [`TransactionError::IllegalUse`] if the transaction is not an
    /// interruptible outgoing SEND.
    pub fn interrupt(&self) -> Result<(), TransactionError> { self.handle().interrupt() }

    /// End the transaction with `#`. Idempotent.
    pub fn abort(&self) { self.handle().abort(); }
}
