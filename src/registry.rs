//! Shared session tables and per-connection transaction managers.
//!
//! A [`SessionRegistry`] is created by the embedding server and shared by
//! all connections. Each connection wraps it in a [`ConnectionContext`],
//! which implements [`TransactionManager`] for that connection's
//! transactions and releases the connection's sessions when dropped.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    lock_or_recover,
    session::Session,
    transaction::{TransactionLimits, TransactionManager, TransactionResponse},
};

/// Identifier allocated to each connection using the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    /// Return the raw identifier.
    #[must_use]
    pub const fn as_u64(self) -> u64 { self.0 }
}

#[derive(Default)]
struct RegistryState {
    pending: HashMap<Url, Arc<Session>>,
    bound: HashMap<Url, (ConnectionId, Arc<Session>)>,
}

/// Sessions awaiting their first request and sessions bound to connections.
pub struct SessionRegistry {
    next_id: AtomicU64,
    state: Mutex<RegistryState>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(RegistryState::default()),
        }
    }
}

impl SessionRegistry {
    /// Allocate a new connection identifier.
    #[must_use]
    pub fn allocate_id(&self) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        ConnectionId::new(id)
    }

    /// Register a session that will be bound by the first request naming it.
    pub fn add_session_to_identify(&self, session: Arc<Session>) {
        let uri = session.uri().clone();
        debug!(%uri, "session awaiting identification");
        lock_or_recover(&self.state).pending.insert(uri, session);
    }

    /// Bind a session directly to a connection, as for locally initiated
    /// connections.
    ///
    /// Returns `false` if the URI is already bound.
    pub fn bind(&self, connection: ConnectionId, session: Arc<Session>) -> bool {
        let mut state = lock_or_recover(&self.state);
        let uri = session.uri().clone();
        if state.bound.contains_key(&uri) {
            warn!(%uri, connection = connection.as_u64(), "session already bound");
            return false;
        }
        state.pending.remove(&uri);
        state.bound.insert(uri, (connection, session));
        true
    }

    fn bound_session(&self, connection: ConnectionId, uri: &Url) -> Option<Arc<Session>> {
        lock_or_recover(&self.state)
            .bound
            .get(uri)
            .filter(|(owner, _)| *owner == connection)
            .map(|(_, session)| Arc::clone(session))
    }

    fn pending_session(&self, uri: &Url) -> Option<Arc<Session>> {
        lock_or_recover(&self.state).pending.get(uri).cloned()
    }

    /// Whether `uri` is bound to any connection.
    #[must_use]
    pub fn is_active(&self, uri: &Url) -> bool {
        lock_or_recover(&self.state).bound.contains_key(uri)
    }

    /// Sessions bound to `connection`.
    #[must_use]
    pub fn sessions_of(&self, connection: ConnectionId) -> Vec<Arc<Session>> {
        lock_or_recover(&self.state)
            .bound
            .values()
            .filter(|(owner, _)| *owner == connection)
            .map(|(_, session)| Arc::clone(session))
            .collect()
    }

    /// Unbind every session of a closed connection.
    pub fn release_connection(&self, connection: ConnectionId) {
        let mut state = lock_or_recover(&self.state);
        let before = state.bound.len();
        state.bound.retain(|_, (owner, _)| *owner != connection);
        let released = before - state.bound.len();
        if released > 0 {
            info!(connection = connection.as_u64(), released, "connection sessions released");
        }
    }
}

/// Transaction manager for one connection.
///
/// Responses are queued on an unbounded channel drained by the
/// connection's writer task.
pub struct ConnectionContext {
    id: ConnectionId,
    registry: Arc<SessionRegistry>,
    responses: mpsc::UnboundedSender<TransactionResponse>,
    limits: TransactionLimits,
}

impl ConnectionContext {
    /// Create the context for a new connection.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        limits: TransactionLimits,
    ) -> (Self, mpsc::UnboundedReceiver<TransactionResponse>) {
        let (responses, rx) = mpsc::unbounded_channel();
        let id = registry.allocate_id();
        (
            Self {
                id,
                registry,
                responses,
                limits,
            },
            rx,
        )
    }

    /// Return the connection identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId { self.id }

    /// Shared registry.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry { &self.registry }
}

impl TransactionManager for ConnectionContext {
    fn limits(&self) -> TransactionLimits { self.limits }

    fn generate_response(&self, response: TransactionResponse) {
        let tid = response.tid().clone();
        if self.responses.send(response).is_err() {
            warn!(%tid, connection = self.id.as_u64(), "response dropped; writer closed");
        }
    }

    fn session_for_path(&self, uri: &Url) -> Option<Arc<Session>> {
        self.registry.bound_session(self.id, uri)
    }

    fn session_to_identify(&self, uri: &Url) -> Option<Arc<Session>> {
        self.registry.pending_session(uri)
    }

    fn identified_session(&self, session: &Arc<Session>) -> bool {
        self.registry.bind(self.id, Arc::clone(session))
    }

    fn is_active(&self, uri: &Url) -> bool { self.registry.is_active(uri) }
}

impl Drop for ConnectionContext {
    fn drop(&mut self) { self.registry.release_connection(self.id); }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{
        message::Message,
        report::DefaultReportMechanism,
        session::{AcceptDecision, SessionListener},
        transaction::{StatusCode, TransactionId},
    };

    struct RejectAll;

    impl SessionListener for RejectAll {
        fn accept_hook(&self, _session: &Session, _message: &Message) -> AcceptDecision {
            AcceptDecision::Reject(403)
        }
    }

    fn uri() -> Url { Url::parse("msrp://bob.example:2855/bs;tcp").expect("uri") }

    #[fixture]
    fn registry() -> Arc<SessionRegistry> {
        let registry = Arc::new(SessionRegistry::default());
        registry.add_session_to_identify(Arc::new(Session::new(
            uri(),
            vec![Url::parse("msrp://alice.example:2855/as;tcp").expect("uri")],
            Arc::new(RejectAll),
            Arc::new(DefaultReportMechanism::default()),
        )));
        registry
    }

    #[rstest]
    fn first_connection_binds_pending_session(registry: Arc<SessionRegistry>) {
        let (first, _rx1) = ConnectionContext::new(Arc::clone(&registry), TransactionLimits::default());
        let (second, _rx2) = ConnectionContext::new(Arc::clone(&registry), TransactionLimits::default());
        let session = first.session_to_identify(&uri()).expect("pending");
        assert!(first.identified_session(&session));
        assert!(first.session_for_path(&uri()).is_some());
        assert!(second.session_for_path(&uri()).is_none());
        assert!(second.session_to_identify(&uri()).is_none());
        assert!(second.is_active(&uri()));
        assert!(!second.identified_session(&session));
    }

    #[rstest]
    fn dropping_connection_releases_sessions(registry: Arc<SessionRegistry>) {
        let (ctx, _rx) = ConnectionContext::new(Arc::clone(&registry), TransactionLimits::default());
        let session = ctx.session_to_identify(&uri()).expect("pending");
        assert!(ctx.identified_session(&session));
        assert_eq!(registry.sessions_of(ctx.id()).len(), 1);
        drop(ctx);
        assert!(!registry.is_active(&uri()));
    }

    #[rstest]
    #[tokio::test]
    async fn responses_reach_the_writer_queue(registry: Arc<SessionRegistry>) {
        let (ctx, mut rx) = ConnectionContext::new(registry, TransactionLimits::default());
        ctx.generate_response(TransactionResponse::new(
            TransactionId::parse("abcd1").expect("tid"),
            StatusCode::OK,
            None,
            &[],
            &[],
        ));
        let response = rx.recv().await.expect("queued");
        assert_eq!(response.code(), StatusCode::OK);
    }

    #[rstest]
    fn allocates_unique_ids() {
        let registry = SessionRegistry::default();
        assert_ne!(registry.allocate_id(), registry.allocate_id());
    }
}
