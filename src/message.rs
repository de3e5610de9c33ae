//! MSRP messages and their transfer progress.
//!
//! One [`Message`] type covers both directions; the [`Direction`] tag decides
//! whether progress counts bytes sent from the container or bytes received
//! into it. Messages are shared behind [`Arc`] between the session tables and
//! the transactions carrying their chunks, so progress and abort state are
//! atomics and the container sits behind a mutex.

use std::{
    fmt,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use tracing::{debug, info};

use crate::{
    data::{DataContainer, DataContainerError},
    lock_or_recover,
    report::ReportMechanism,
    transaction::{Direction, FailureReport, MessageId, TransactionId},
};

/// One logical message exchanged within a session.
pub struct Message {
    id: MessageId,
    direction: Direction,
    content_type: Option<String>,
    size: Option<u64>,
    success_report: bool,
    failure_report: FailureReport,
    progress: AtomicU64,
    aborted: AtomicBool,
    container: Mutex<Option<Box<dyn DataContainer>>>,
    last_send_transaction: Mutex<Option<TransactionId>>,
    report_mechanism: Arc<dyn ReportMechanism>,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .field("progress", &self.progress())
            .field("aborted", &self.was_aborted())
            .finish_non_exhaustive()
    }
}

impl Message {
    fn with_parts(
        id: MessageId,
        direction: Direction,
        size: Option<u64>,
        container: Option<Box<dyn DataContainer>>,
        report_mechanism: Arc<dyn ReportMechanism>,
    ) -> Self {
        Self {
            id,
            direction,
            content_type: None,
            size,
            success_report: false,
            failure_report: FailureReport::default(),
            progress: AtomicU64::new(0),
            aborted: AtomicBool::new(false),
            container: Mutex::new(container),
            last_send_transaction: Mutex::new(None),
            report_mechanism,
        }
    }

    /// Create a message to send whose size is the container's size.
    #[must_use]
    pub fn outgoing(
        id: MessageId,
        container: Box<dyn DataContainer>,
        report_mechanism: Arc<dyn ReportMechanism>,
    ) -> Self {
        let size = Some(container.size());
        Self::with_parts(id, Direction::Outbound, size, Some(container), report_mechanism)
    }

    /// Create a message announced by a peer's first chunk.
    #[must_use]
    pub fn incoming(
        id: MessageId,
        size: Option<u64>,
        report_mechanism: Arc<dyn ReportMechanism>,
    ) -> Self {
        Self::with_parts(id, Direction::Inbound, size, None, report_mechanism)
    }

    /// Set the MIME type; outgoing chunks default to `text/plain`.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Declare the total size unknown, for streamed content.
    #[must_use]
    pub const fn with_unknown_size(mut self) -> Self {
        self.size = None;
        self
    }

    /// Request or record a success report.
    #[must_use]
    pub const fn with_success_report(mut self, success_report: bool) -> Self {
        self.success_report = success_report;
        self
    }

    /// Request or record the failure-report policy.
    #[must_use]
    pub const fn with_failure_report(mut self, failure_report: FailureReport) -> Self {
        self.failure_report = failure_report;
        self
    }

    /// Message identifier.
    #[must_use]
    pub const fn id(&self) -> &MessageId { &self.id }

    /// Direction of the message.
    #[must_use]
    pub const fn direction(&self) -> Direction { self.direction }

    /// MIME type, if declared.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> { self.content_type.as_deref() }

    /// Declared total size; `None` when unknown.
    #[must_use]
    pub const fn size(&self) -> Option<u64> { self.size }

    /// Whether a success report was requested.
    #[must_use]
    pub const fn success_report(&self) -> bool { self.success_report }

    /// Failure-report policy.
    #[must_use]
    pub const fn failure_report(&self) -> FailureReport { self.failure_report }

    /// Report mechanism fed by this message's transactions.
    #[must_use]
    pub fn report_mechanism(&self) -> &Arc<dyn ReportMechanism> { &self.report_mechanism }

    /// Bytes sent (outgoing) or received (incoming) so far.
    #[must_use]
    pub fn progress(&self) -> u64 { self.progress.load(Ordering::Acquire) }

    /// Total size as written in a `Byte-Range`, `*` when unknown.
    #[must_use]
    pub fn size_token(&self) -> String {
        self.size.map_or_else(|| "*".to_owned(), |s| s.to_string())
    }

    /// Whether an outgoing message has delivered every declared byte.
    #[must_use]
    pub fn is_fully_sent(&self) -> bool {
        self.direction == Direction::Outbound && self.size.is_some_and(|s| self.progress() >= s)
    }

    /// Whether an incoming message has every declared byte stored.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        let Some(size) = self.size else {
            return false;
        };
        lock_or_recover(&self.container)
            .as_ref()
            .is_some_and(|c| c.is_complete(size))
    }

    /// Whether the message was aborted.
    #[must_use]
    pub fn was_aborted(&self) -> bool { self.aborted.load(Ordering::Acquire) }

    /// Whether the message has a container attached.
    #[must_use]
    pub fn has_container(&self) -> bool { lock_or_recover(&self.container).is_some() }

    /// Attach the container chosen by the session listener.
    pub fn attach_container(&self, container: Box<dyn DataContainer>) {
        *lock_or_recover(&self.container) = Some(container);
    }

    /// Release the container, returning it to the caller.
    pub fn take_container(&self) -> Option<Box<dyn DataContainer>> {
        lock_or_recover(&self.container).take()
    }

    /// Whether an outgoing message still has content to hand out.
    #[must_use]
    pub fn has_data(&self) -> bool {
        if self.direction != Direction::Outbound || self.was_aborted() {
            return false;
        }
        lock_or_recover(&self.container)
            .as_ref()
            .is_some_and(|c| c.has_data_to_read())
    }

    /// Read the next content bytes of an outgoing message into `buf`.
    ///
    /// # Errors
    /// Returns an error if no container is attached or it fails to read.
    pub fn read_body(&self, buf: &mut [u8]) -> Result<usize, DataContainerError> {
        let mut guard = lock_or_recover(&self.container);
        let container = guard.as_mut().ok_or(DataContainerError::Missing)?;
        let n = container.read(buf)?;
        self.progress.store(container.read_position(), Ordering::Release);
        Ok(n)
    }

    /// Give back `n` bytes handed out by [`read_body`](Self::read_body).
    ///
    /// # Errors
    /// Returns an error if no container is attached or the rewind is invalid.
    pub fn rewind(&self, n: u64) -> Result<(), DataContainerError> {
        let mut guard = lock_or_recover(&self.container);
        let container = guard.as_mut().ok_or(DataContainerError::Missing)?;
        container.rewind_read(n)?;
        self.progress.store(container.read_position(), Ordering::Release);
        Ok(())
    }

    /// Store incoming content at absolute `offset`.
    ///
    /// # Errors
    /// Returns an error if no container is attached or the write fails.
    pub fn put_body(&self, offset: u64, data: &[u8]) -> Result<(), DataContainerError> {
        let mut guard = lock_or_recover(&self.container);
        let container = guard.as_mut().ok_or(DataContainerError::Missing)?;
        container.put(offset, data)?;
        self.progress
            .fetch_max(offset.saturating_add(data.len() as u64), Ordering::AcqRel);
        Ok(())
    }

    /// Read `len` stored bytes starting at absolute `offset`.
    ///
    /// # Errors
    /// Returns an error if no container is attached or the range is missing.
    pub fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>, DataContainerError> {
        let mut guard = lock_or_recover(&self.container);
        let container = guard.as_mut().ok_or(DataContainerError::Missing)?;
        container.get(offset, len)
    }

    /// Mark the message aborted by the peer through `transaction`.
    pub fn got_aborted(&self, transaction: &TransactionId) {
        if !self.aborted.swap(true, Ordering::AcqRel) {
            info!(message_id = %self.id, tid = %transaction, "message aborted");
        }
    }

    /// Mark the message aborted locally.
    pub fn abort(&self) {
        if !self.aborted.swap(true, Ordering::AcqRel) {
            info!(message_id = %self.id, "message abort requested");
        }
    }

    /// Remember the most recent SEND carrying this message.
    pub fn set_last_send_transaction(&self, transaction: &TransactionId) {
        debug!(message_id = %self.id, tid = %transaction, "last SEND updated");
        *lock_or_recover(&self.last_send_transaction) = Some(transaction.clone());
    }

    /// Most recent SEND carrying this message.
    #[must_use]
    pub fn last_send_transaction(&self) -> Option<TransactionId> {
        lock_or_recover(&self.last_send_transaction).clone()
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{data::MemoryContainer, report::DefaultReportMechanism};

    #[fixture]
    fn mechanism() -> Arc<dyn ReportMechanism> { Arc::new(DefaultReportMechanism::default()) }

    #[rstest]
    fn outgoing_progress_follows_reads(mechanism: Arc<dyn ReportMechanism>) {
        let message = Message::outgoing(
            MessageId::parse("out0001").expect("id"),
            Box::new(MemoryContainer::from_bytes(&b"hello"[..])),
            mechanism,
        );
        assert_eq!(message.size(), Some(5));
        let mut buf = [0u8; 3];
        assert_eq!(message.read_body(&mut buf).expect("read"), 3);
        assert_eq!(message.progress(), 3);
        message.rewind(2).expect("rewind");
        assert_eq!(message.progress(), 1);
        assert!(message.has_data());
        assert!(!message.is_fully_sent());
    }

    #[rstest]
    fn incoming_completes_when_filled(mechanism: Arc<dyn ReportMechanism>) {
        let message = Message::incoming(MessageId::parse("in00001").expect("id"), Some(4), mechanism);
        assert!(matches!(message.put_body(0, b"ab"), Err(DataContainerError::Missing)));
        message.attach_container(Box::new(MemoryContainer::new()));
        message.put_body(0, b"ab").expect("put");
        assert!(!message.is_complete());
        message.put_body(2, b"cd").expect("put");
        assert!(message.is_complete());
        assert_eq!(message.progress(), 4);
        assert_eq!(message.read_range(1, 2).expect("range"), b"bc");
    }

    #[rstest]
    fn aborted_message_has_no_data(mechanism: Arc<dyn ReportMechanism>) {
        let message = Message::outgoing(
            MessageId::parse("out0002").expect("id"),
            Box::new(MemoryContainer::from_bytes(&b"x"[..])),
            mechanism,
        );
        message.abort();
        message.abort();
        assert!(message.was_aborted());
        assert!(!message.has_data());
    }

    #[rstest]
    fn unknown_size_token(mechanism: Arc<dyn ReportMechanism>) {
        let message = Message::outgoing(
            MessageId::parse("out0003").expect("id"),
            Box::new(MemoryContainer::from_bytes(&b"stream"[..])),
            mechanism,
        )
        .with_unknown_size();
        assert_eq!(message.size_token(), "*");
        assert!(!message.is_fully_sent());
    }
}
