//! The [`Transaction`] record and its accessors.
//!
//! Parsing lives in `incoming`, byte production in `outgoing`; both extend
//! the type defined here.

use std::{fmt, sync::Arc};

use bytes::{Bytes, BytesMut};
use url::Url;

use super::{
    ByteRange,
    ContinuationFlag,
    Direction,
    FailureReport,
    MessageId,
    StatusCode,
    StatusHeader,
    TransactionError,
    TransactionId,
    TransactionLimits,
    TransactionManager,
    TransactionType,
    control::{TransactionControl, TransactionHandle},
    header::{Grammar, HeaderBuffer},
};
use crate::{message::Message, session::Session};

/// Whether a transaction is a request or a response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionKind {
    /// Request with its method.
    Request(TransactionType),
    /// Response with the peer's code and comment.
    Response {
        /// Three-digit status code.
        code: u16,
        /// Text after the code.
        comment: Option<String>,
    },
}

/// Progress of an outgoing transaction through its three phases.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct WriteCursor {
    pub(crate) header: usize,
    pub(crate) crlf: u8,
    pub(crate) end_line: usize,
}

/// One MSRP request or response, incoming or outgoing.
pub struct Transaction {
    pub(crate) id: TransactionId,
    pub(crate) kind: TransactionKind,
    pub(crate) direction: Direction,
    pub(crate) manager: Option<Arc<dyn TransactionManager>>,
    pub(crate) limits: TransactionLimits,
    pub(crate) headers: HeaderBuffer,
    pub(crate) header_bytes: Bytes,
    pub(crate) to_path: Vec<Url>,
    pub(crate) from_path: Vec<Url>,
    pub(crate) message_id: Option<MessageId>,
    pub(crate) content_type: Option<String>,
    pub(crate) failure_report: FailureReport,
    pub(crate) success_report: bool,
    pub(crate) byte_range: Option<ByteRange>,
    pub(crate) status: Option<StatusHeader>,
    pub(crate) body: BytesMut,
    pub(crate) real_chunk_size: u64,
    pub(crate) valid: bool,
    pub(crate) header_complete: bool,
    pub(crate) complete: bool,
    pub(crate) continuation: Option<ContinuationFlag>,
    pub(crate) interruptible: bool,
    pub(crate) response: Option<StatusCode>,
    pub(crate) message: Option<Arc<Message>>,
    pub(crate) session: Option<Arc<Session>>,
    pub(crate) control: Arc<TransactionControl>,
    pub(crate) write: WriteCursor,
    pub(crate) has_content_stuff: bool,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("direction", &self.direction)
            .field("message_id", &self.message_id)
            .field("byte_range", &self.byte_range)
            .field("valid", &self.valid)
            .field("complete", &self.complete)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) fn blank(
        id: TransactionId,
        kind: TransactionKind,
        direction: Direction,
        manager: Option<Arc<dyn TransactionManager>>,
    ) -> Self {
        let limits = manager
            .as_ref()
            .map_or_else(TransactionLimits::default, |m| m.limits());
        Self {
            id,
            kind,
            direction,
            manager,
            limits,
            headers: HeaderBuffer::new(limits.max_header_bytes),
            header_bytes: Bytes::new(),
            to_path: Vec::new(),
            from_path: Vec::new(),
            message_id: None,
            content_type: None,
            failure_report: FailureReport::default(),
            success_report: false,
            byte_range: None,
            status: None,
            body: BytesMut::new(),
            real_chunk_size: 0,
            valid: true,
            header_complete: false,
            complete: false,
            continuation: None,
            interruptible: false,
            response: None,
            message: None,
            session: None,
            control: Arc::new(TransactionControl::default()),
            write: WriteCursor::default(),
            has_content_stuff: false,
        }
    }

    /// Start an incoming request announced by `MSRP tid METHOD`.
    #[must_use]
    pub fn incoming_request(
        id: TransactionId,
        ty: TransactionType,
        manager: Arc<dyn TransactionManager>,
    ) -> Self {
        Self::blank(id, TransactionKind::Request(ty), Direction::Inbound, Some(manager))
    }

    /// Start an incoming response announced by `MSRP tid code [comment]`.
    #[must_use]
    pub fn incoming_response(
        id: TransactionId,
        code: u16,
        comment: Option<String>,
        manager: Arc<dyn TransactionManager>,
    ) -> Self {
        Self::blank(
            id,
            TransactionKind::Response { code, comment },
            Direction::Inbound,
            Some(manager),
        )
    }

    pub(crate) const fn grammar(&self) -> Grammar {
        match self.kind {
            TransactionKind::Request(ty) => Grammar::Request(ty),
            TransactionKind::Response { .. } => Grammar::Response,
        }
    }

    pub(crate) fn is_inbound_send(&self) -> bool {
        self.direction == Direction::Inbound
            && self.kind == TransactionKind::Request(TransactionType::Send)
    }

    /// Transaction identifier.
    #[must_use]
    pub const fn id(&self) -> &TransactionId { &self.id }

    /// Request method or response code.
    #[must_use]
    pub const fn kind(&self) -> &TransactionKind { &self.kind }

    /// Request method; `None` for responses.
    #[must_use]
    pub const fn transaction_type(&self) -> Option<TransactionType> {
        match self.kind {
            TransactionKind::Request(ty) => Some(ty),
            TransactionKind::Response { .. } => None,
        }
    }

    /// Whether this is an incoming response to one of our requests.
    #[must_use]
    pub const fn is_incoming_response(&self) -> bool {
        matches!(self.kind, TransactionKind::Response { .. })
            && matches!(self.direction, Direction::Inbound)
    }

    /// Direction of the transaction.
    #[must_use]
    pub const fn direction(&self) -> Direction { self.direction }

    /// Parsed or outgoing `To-Path`.
    #[must_use]
    pub fn to_path(&self) -> &[Url] { &self.to_path }

    /// Parsed or outgoing `From-Path`.
    #[must_use]
    pub fn from_path(&self) -> &[Url] { &self.from_path }

    /// `Message-ID`, once known.
    #[must_use]
    pub const fn message_id(&self) -> Option<&MessageId> { self.message_id.as_ref() }

    /// `Content-Type` as `type/subtype`.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> { self.content_type.as_deref() }

    /// `Failure-Report` value, `yes` by default.
    #[must_use]
    pub const fn failure_report(&self) -> FailureReport { self.failure_report }

    /// `Success-Report` value, `false` by default.
    #[must_use]
    pub const fn success_report(&self) -> bool { self.success_report }

    /// `Byte-Range`, finalised to the real byte count after the end-line.
    #[must_use]
    pub const fn byte_range(&self) -> Option<ByteRange> { self.byte_range }

    /// `Status` of a REPORT.
    #[must_use]
    pub const fn status(&self) -> Option<&StatusHeader> { self.status.as_ref() }

    /// Body bytes counted in this transaction.
    #[must_use]
    pub const fn body_len(&self) -> u64 { self.real_chunk_size }

    /// Whether no grammar or association failure has been seen.
    #[must_use]
    pub const fn is_valid(&self) -> bool { self.valid }

    /// Whether the header has been recognised.
    #[must_use]
    pub const fn is_header_complete(&self) -> bool { self.header_complete }

    /// Whether an incoming transaction received its end-line.
    #[must_use]
    pub const fn is_complete(&self) -> bool { self.complete }

    /// Whether this transaction can be cut short with `+`.
    #[must_use]
    pub const fn is_interruptible(&self) -> bool { self.interruptible }

    /// Whether an outgoing transaction was interrupted or aborted.
    #[must_use]
    pub fn is_interrupted(&self) -> bool { self.control.is_stopped() }

    /// Continuation flag: the received flag for incoming transactions, the
    /// flag that will be or was emitted for outgoing ones.
    #[must_use]
    pub fn continuation_flag(&self) -> Option<ContinuationFlag> {
        match self.direction {
            Direction::Inbound => self.continuation,
            Direction::Outbound => self.continuation.or_else(|| Some(self.control.flag())),
        }
    }

    /// Whether a response was generated for this incoming request.
    #[must_use]
    pub const fn has_response(&self) -> bool { self.response.is_some() }

    /// Code of the response generated for this incoming request.
    #[must_use]
    pub const fn response_code(&self) -> Option<StatusCode> { self.response }

    /// Message carried by this transaction, once resolved.
    #[must_use]
    pub const fn message(&self) -> Option<&Arc<Message>> { self.message.as_ref() }

    /// Session this transaction belongs to, once resolved.
    #[must_use]
    pub const fn session(&self) -> Option<&Arc<Session>> { self.session.as_ref() }

    /// Header bytes: serialised for outgoing transactions, frozen at the
    /// end-line for incoming ones.
    #[must_use]
    pub fn header_bytes(&self) -> &[u8] {
        if self.header_bytes.is_empty() {
            self.headers.as_bytes()
        } else {
            &self.header_bytes
        }
    }

    /// Handle for interrupting or aborting from another task.
    #[must_use]
    pub fn handle(&self) -> TransactionHandle {
        TransactionHandle::new(
            self.id.clone(),
            self.interruptible && self.direction == Direction::Outbound,
            self.message
                .as_ref()
                .filter(|m| m.direction() == Direction::Outbound)
                .map(Arc::clone),
            Arc::clone(&self.control),
        )
    }

    /// Body bytes received in this transaction.
    ///
    /// # Errors
    /// Returns an error if the message's container cannot return the range.
    pub fn body(&self) -> Result<Vec<u8>, TransactionError> {
        match (&self.message, self.is_inbound_send()) {
            (Some(message), true) => {
                let offset = self.byte_range.map_or(0, |r| r.offset());
                let len = usize::try_from(self.real_chunk_size).map_err(|_| {
                    TransactionError::BodyTooLarge {
                        limit: usize::MAX,
                    }
                })?;
                Ok(message.read_range(offset, len)?)
            }
            _ => Ok(self.body.to_vec()),
        }
    }
}
