//! Message Session Relay Protocol (RFC 4975) transaction engine.
//!
//! The crate parses incoming MSRP transactions incrementally, tracks the
//! chunks of each message as they arrive, serialises outgoing SEND and
//! REPORT requests and answers requests with responses. Sessions, messages
//! and their data containers are resolved through a
//! [`TransactionManager`](transaction::TransactionManager) supplied by the
//! embedding connection.

use std::sync::{Mutex, MutexGuard};

pub mod config;
pub mod data;
pub mod message;
pub mod registry;
pub mod report;
pub mod session;
pub mod transaction;

#[cfg(any(test, feature = "test-support"))]
pub mod test_helpers;

/// Lock `mutex`, recovering the guard if a previous holder panicked.
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
