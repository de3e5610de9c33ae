//! Delivery-report policy interface.
//!
//! The transaction engine tells a [`ReportMechanism`] how many body bytes
//! landed and when a message ended; the mechanism decides whether and when
//! success reports go out. [`DefaultReportMechanism`] queues a due report for
//! every completed message that asked for one and leaves sending to the
//! owning connection.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use tracing::{debug, info};

use crate::{
    lock_or_recover,
    message::Message,
    transaction::{MessageId, TransactionId},
};

/// Default number of bytes written per granularity block.
pub const DEFAULT_REPORT_GRANULARITY: usize = 1024;

/// Receives byte accounting from incoming transactions.
pub trait ReportMechanism: Send + Sync {
    /// Maximum bytes written to a container before the next callback.
    fn trigger_granularity(&self) -> usize { DEFAULT_REPORT_GRANULARITY }

    /// Called after each block of `len` bytes is stored at `offset`.
    fn count_received_body_block(
        &self,
        message: &Message,
        transaction: &TransactionId,
        offset: u64,
        len: usize,
    );

    /// Called once when a chunk closes the message with `$`.
    fn received_end_of_message(&self, message: &Message);

    /// Called when the peer aborts the message with `#`.
    fn received_aborted_message(&self, _message: &Message) {}
}

/// Success report owed to the peer for a completed message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DueReport {
    /// Message the report concerns.
    pub message_id: MessageId,
    /// Bytes received when the message ended.
    pub received: u64,
}

/// Counts received bytes and queues success reports on completion.
#[derive(Debug)]
pub struct DefaultReportMechanism {
    granularity: usize,
    received: Mutex<HashMap<MessageId, u64>>,
    due: Mutex<Vec<DueReport>>,
}

impl Default for DefaultReportMechanism {
    fn default() -> Self { Self::new(DEFAULT_REPORT_GRANULARITY) }
}

impl DefaultReportMechanism {
    /// Create a mechanism writing blocks of at most `granularity` bytes.
    #[must_use]
    pub fn new(granularity: usize) -> Self {
        Self {
            granularity: granularity.max(1),
            received: Mutex::new(HashMap::new()),
            due: Mutex::new(Vec::new()),
        }
    }

    /// Bytes counted so far for `message_id`.
    #[must_use]
    pub fn received(&self, message_id: &str) -> u64 {
        lock_or_recover(&self.received)
            .get(message_id)
            .copied()
            .unwrap_or(0)
    }

    /// Drain the reports that became due.
    #[must_use]
    pub fn take_due_reports(&self) -> Vec<DueReport> {
        std::mem::take(&mut *lock_or_recover(&self.due))
    }
}

impl ReportMechanism for DefaultReportMechanism {
    fn trigger_granularity(&self) -> usize { self.granularity }

    fn count_received_body_block(
        &self,
        message: &Message,
        transaction: &TransactionId,
        offset: u64,
        len: usize,
    ) {
        let mut received = lock_or_recover(&self.received);
        let total = received.entry(message.id().clone()).or_insert(0);
        *total += len as u64;
        debug!(tid = %transaction, message_id = %message.id(), offset, len, total = *total, "body block stored");
    }

    fn received_end_of_message(&self, message: &Message) {
        let received = lock_or_recover(&self.received)
            .remove(message.id().as_str())
            .unwrap_or(0);
        if !message.success_report() {
            return;
        }
        info!(message_id = %message.id(), received, "success report due");
        lock_or_recover(&self.due).push(DueReport {
            message_id: message.id().clone(),
            received,
        });
    }

    fn received_aborted_message(&self, message: &Message) {
        if let Some(received) = lock_or_recover(&self.received).remove(message.id().as_str()) {
            debug!(message_id = %message.id(), received, "byte count of aborted message dropped");
        }
    }
}
