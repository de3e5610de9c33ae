//! Interrupt and abort control shared between a transaction and its handles.
//!
//! The state lives in one atomic word: the low bits hold the run state and a
//! separate bit seals the word once the end-line flag byte has been emitted.
//! Every transition is a single read-modify-write, so a producer never sees a
//! half-applied interruption and a sealed flag never changes.

use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};

use tokio::sync::Notify;
use tracing::{debug, info};

use super::{ContinuationFlag, TransactionError, TransactionId};
use crate::message::Message;

const ACTIVE: u8 = 0;
const INTERRUPTED: u8 = 1;
const ABORTED: u8 = 2;
const STATE_MASK: u8 = 0b11;
const SEALED: u8 = 0b100;

const fn flag_for(state: u8) -> ContinuationFlag {
    match state & STATE_MASK {
        INTERRUPTED => ContinuationFlag::Interrupted,
        ABORTED => ContinuationFlag::Aborted,
        _ => ContinuationFlag::Complete,
    }
}

#[derive(Debug, Default)]
pub(crate) struct TransactionControl {
    state: AtomicU8,
    wake: Notify,
}

impl TransactionControl {
    pub(crate) fn flag(&self) -> ContinuationFlag { flag_for(self.state.load(Ordering::Acquire)) }

    pub(crate) fn is_stopped(&self) -> bool {
        self.state.load(Ordering::Acquire) & STATE_MASK != ACTIVE
    }

    /// Move from active to interrupted. Returns whether the state changed.
    fn interrupt(&self) -> bool {
        let changed = self
            .state
            .compare_exchange(ACTIVE, INTERRUPTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if changed {
            self.wake.notify_waiters();
        }
        changed
    }

    /// Move to aborted unless the flag is sealed. Returns whether the state
    /// changed.
    fn abort(&self) -> bool {
        let changed = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s & SEALED == 0 && s != ABORTED).then_some(ABORTED)
            })
            .is_ok();
        self.wake.notify_waiters();
        changed
    }

    /// Freeze the state and return the flag to emit.
    pub(crate) fn seal(&self) -> ContinuationFlag {
        flag_for(self.state.fetch_or(SEALED, Ordering::AcqRel))
    }

    async fn stopped(&self) {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

/// Cloneable handle for interrupting or aborting a transaction from another
/// task while its bytes are being produced.
#[derive(Clone, Debug)]
pub struct TransactionHandle {
    tid: TransactionId,
    interruptible: bool,
    message: Option<Arc<Message>>,
    control: Arc<TransactionControl>,
}

impl TransactionHandle {
    pub(crate) const fn new(
        tid: TransactionId,
        interruptible: bool,
        message: Option<Arc<Message>>,
        control: Arc<TransactionControl>,
    ) -> Self {
        Self {
            tid,
            interruptible,
            message,
            control,
        }
    }

    /// Identifier of the controlled transaction.
    #[must_use]
    pub const fn tid(&self) -> &TransactionId { &self.tid }

    /// End the chunk early with `+` so the rest follows in a new SEND.
    ///
    /// Does nothing if every byte of the message was already handed out.
    ///
    /// # Errors
    /// Returns [`TransactionError::IllegalUse`] if the transaction is not an
    /// interruptible outgoing SEND.
    pub fn interrupt(&self) -> Result<(), TransactionError> {
        if !self.interruptible {
            return Err(TransactionError::IllegalUse(
                "interrupting a non-interruptible transaction",
            ));
        }
        let Some(message) = &self.message else {
            return Err(TransactionError::IllegalUse(
                "interrupting a transaction without an outgoing message",
            ));
        };
        if message.is_fully_sent() {
            debug!(tid = %self.tid, "interrupt ignored; message fully sent");
            return Ok(());
        }
        if self.control.interrupt() {
            info!(tid = %self.tid, sent = message.progress(), "transaction interrupted");
        }
        Ok(())
    }

    /// End the transaction with `#` and wake any waiting writer.
    ///
    /// Idempotent and valid in every state; once the flag byte is on the
    /// wire the call only wakes waiters.
    pub fn abort(&self) {
        if self.control.abort() {
            info!(tid = %self.tid, "transaction aborted");
        }
    }

    /// Whether the transaction was interrupted or aborted.
    #[must_use]
    pub fn is_stopped(&self) -> bool { self.control.is_stopped() }

    /// Current continuation flag.
    #[must_use]
    pub fn flag(&self) -> ContinuationFlag { self.control.flag() }

    /// Wait until the transaction is interrupted or aborted.
    pub async fn stopped(&self) { self.control.stopped().await; }
}
