//! Interface between transactions and the connection that owns them.
//!
//! Incoming transactions never reach for global state: session lookups and
//! response delivery go through the [`TransactionManager`] injected when the
//! transaction is created.

use std::sync::Arc;

use url::Url;

use super::{DEFAULT_MAX_HEADER_BYTES, DEFAULT_MAX_NONSEND_BODY, TransactionResponse};
use crate::session::Session;

/// Size limits applied while parsing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransactionLimits {
    /// Maximum bytes accumulated for a header.
    pub max_header_bytes: usize,
    /// Maximum body bytes buffered when no message owns the content.
    pub max_nonsend_body: usize,
}

impl Default for TransactionLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_nonsend_body: DEFAULT_MAX_NONSEND_BODY,
        }
    }
}

/// Connection-scoped services used by incoming transactions.
pub trait TransactionManager: Send + Sync {
    /// Parsing limits for transactions on this connection.
    fn limits(&self) -> TransactionLimits { TransactionLimits::default() }

    /// Queue a response for sending to the peer.
    fn generate_response(&self, response: TransactionResponse);

    /// Session already bound to this connection and identified by `uri`.
    fn session_for_path(&self, uri: &Url) -> Option<Arc<Session>>;

    /// Session awaiting its first request on `uri`.
    fn session_to_identify(&self, uri: &Url) -> Option<Arc<Session>>;

    /// Bind a session returned by
    /// [`session_to_identify`](Self::session_to_identify) to this connection.
    ///
    /// Returns `false` if another connection claimed it first.
    fn identified_session(&self, session: &Arc<Session>) -> bool;

    /// Whether `uri` is bound to any connection.
    fn is_active(&self, uri: &Url) -> bool;
}
