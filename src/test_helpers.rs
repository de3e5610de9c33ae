//! Shared test doubles for transaction, session and framing tests.
//!
//! Enabled for unit tests and, through the `test-support` feature, for the
//! integration suites under `tests/`.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use url::Url;

use crate::{
    data::MemoryContainer,
    lock_or_recover,
    message::Message,
    report::{DEFAULT_REPORT_GRANULARITY, ReportMechanism},
    session::{AcceptDecision, Session, SessionListener},
    transaction::{
        MessageId,
        StatusHeader,
        TransactionId,
        TransactionLimits,
        TransactionManager,
        TransactionResponse,
    },
};

pub mod tracing;

/// Parse a URI used by a test fixture.
///
/// # Panics
/// Panics if `uri` is not a valid URL.
#[must_use]
#[expect(clippy::expect_used, reason = "test helper with literal input")]
pub fn uri(uri: &str) -> Url { Url::parse(uri).expect("valid test uri") }

/// How a [`ScriptedListener`] answers incoming messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerScript {
    /// Accept into a fresh in-memory container.
    AcceptInMemory,
    /// Accept without supplying a container.
    AcceptWithoutContainer,
    /// Reject with the given code.
    Reject(u16),
}

/// Listener that answers from a script and records every callback.
#[derive(Debug)]
pub struct ScriptedListener {
    script: Mutex<ListenerScript>,
    offered: Mutex<Vec<MessageId>>,
    received: Mutex<Vec<Arc<Message>>>,
    reports: Mutex<Vec<(MessageId, StatusHeader)>>,
}

impl ScriptedListener {
    /// Create a listener following `script`.
    #[must_use]
    pub const fn new(script: ListenerScript) -> Self {
        Self {
            script: Mutex::new(script),
            offered: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
        }
    }

    /// Change the answer for subsequent messages.
    pub fn set_script(&self, script: ListenerScript) { *lock_or_recover(&self.script) = script; }

    /// Message ids offered to the accept hook.
    #[must_use]
    pub fn offered(&self) -> Vec<MessageId> { lock_or_recover(&self.offered).clone() }

    /// Messages delivered as complete.
    #[must_use]
    pub fn received(&self) -> Vec<Arc<Message>> { lock_or_recover(&self.received).clone() }

    /// Reports delivered for known messages.
    #[must_use]
    pub fn reports(&self) -> Vec<(MessageId, StatusHeader)> {
        lock_or_recover(&self.reports).clone()
    }
}

impl SessionListener for ScriptedListener {
    fn accept_hook(&self, _session: &Session, message: &Message) -> AcceptDecision {
        lock_or_recover(&self.offered).push(message.id().clone());
        match *lock_or_recover(&self.script) {
            ListenerScript::AcceptInMemory => {
                AcceptDecision::Accept(Some(Box::new(MemoryContainer::new())))
            }
            ListenerScript::AcceptWithoutContainer => AcceptDecision::Accept(None),
            ListenerScript::Reject(code) => AcceptDecision::Reject(code),
        }
    }

    fn received_message(&self, _session: &Session, message: &Arc<Message>) {
        lock_or_recover(&self.received).push(Arc::clone(message));
    }

    fn received_report(&self, _session: &Session, message: &Arc<Message>, status: &StatusHeader) {
        lock_or_recover(&self.reports).push((message.id().clone(), status.clone()));
    }
}

/// Report mechanism recording every block and end-of-message callback.
#[derive(Debug)]
pub struct CountingReports {
    granularity: usize,
    blocks: Mutex<Vec<(TransactionId, u64, usize)>>,
    ends: AtomicUsize,
    aborts: AtomicUsize,
}

impl Default for CountingReports {
    fn default() -> Self { Self::with_granularity(DEFAULT_REPORT_GRANULARITY) }
}

impl CountingReports {
    /// Create a mechanism triggering every `granularity` bytes.
    #[must_use]
    pub const fn with_granularity(granularity: usize) -> Self {
        Self {
            granularity,
            blocks: Mutex::new(Vec::new()),
            ends: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
        }
    }

    /// Recorded `(transaction, offset, len)` block callbacks.
    #[must_use]
    pub fn blocks(&self) -> Vec<(TransactionId, u64, usize)> {
        lock_or_recover(&self.blocks).clone()
    }

    /// Number of end-of-message callbacks.
    #[must_use]
    pub fn end_of_message_count(&self) -> usize { self.ends.load(Ordering::Acquire) }

    /// Number of aborted-message callbacks.
    #[must_use]
    pub fn aborted_count(&self) -> usize { self.aborts.load(Ordering::Acquire) }
}

impl ReportMechanism for CountingReports {
    fn trigger_granularity(&self) -> usize { self.granularity }

    fn count_received_body_block(
        &self,
        _message: &Message,
        transaction: &TransactionId,
        offset: u64,
        len: usize,
    ) {
        lock_or_recover(&self.blocks).push((transaction.clone(), offset, len));
    }

    fn received_end_of_message(&self, _message: &Message) {
        self.ends.fetch_add(1, Ordering::AcqRel);
    }

    fn received_aborted_message(&self, _message: &Message) {
        self.aborts.fetch_add(1, Ordering::AcqRel);
    }
}

/// Transaction manager that records responses instead of sending them.
#[derive(Default)]
pub struct RecordingManager {
    limits: TransactionLimits,
    bound: Mutex<HashMap<Url, Arc<Session>>>,
    pending: Mutex<HashMap<Url, Arc<Session>>>,
    active_elsewhere: Mutex<HashSet<Url>>,
    responses: Mutex<Vec<TransactionResponse>>,
}

impl RecordingManager {
    /// Create a manager with default limits and no sessions.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Replace the parsing limits.
    #[must_use]
    pub fn with_limits(mut self, limits: TransactionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Register a session already bound to this connection.
    pub fn bind(&self, session: Arc<Session>) {
        lock_or_recover(&self.bound).insert(session.uri().clone(), session);
    }

    /// Register a session awaiting identification.
    pub fn await_identification(&self, session: Arc<Session>) {
        lock_or_recover(&self.pending).insert(session.uri().clone(), session);
    }

    /// Pretend `uri` is bound to another connection.
    pub fn mark_active_elsewhere(&self, uri: Url) {
        lock_or_recover(&self.active_elsewhere).insert(uri);
    }

    /// Responses generated so far.
    #[must_use]
    pub fn responses(&self) -> Vec<TransactionResponse> { lock_or_recover(&self.responses).clone() }

    /// Status codes of the responses generated so far.
    #[must_use]
    pub fn response_codes(&self) -> Vec<u16> {
        lock_or_recover(&self.responses)
            .iter()
            .map(|r| r.code().as_u16())
            .collect()
    }
}

impl TransactionManager for RecordingManager {
    fn limits(&self) -> TransactionLimits { self.limits }

    fn generate_response(&self, response: TransactionResponse) {
        lock_or_recover(&self.responses).push(response);
    }

    fn session_for_path(&self, uri: &Url) -> Option<Arc<Session>> {
        lock_or_recover(&self.bound).get(uri).cloned()
    }

    fn session_to_identify(&self, uri: &Url) -> Option<Arc<Session>> {
        lock_or_recover(&self.pending).get(uri).cloned()
    }

    fn identified_session(&self, session: &Arc<Session>) -> bool {
        if self.is_active(session.uri()) {
            return false;
        }
        lock_or_recover(&self.pending).remove(session.uri());
        self.bind(Arc::clone(session));
        true
    }

    fn is_active(&self, uri: &Url) -> bool {
        lock_or_recover(&self.active_elsewhere).contains(uri)
            || lock_or_recover(&self.bound).contains_key(uri)
    }
}

/// A session plus the doubles observing it.
pub struct SessionFixture {
    /// The session under test.
    pub session: Arc<Session>,
    /// Its listener.
    pub listener: Arc<ScriptedListener>,
    /// Its report mechanism.
    pub reports: Arc<CountingReports>,
}

/// Local URI used by [`session_fixture`].
pub const LOCAL_URI: &str = "msrp://bob.example.com:8888/9di4eae923wzd;tcp";
/// Remote URI used by [`session_fixture`].
pub const REMOTE_URI: &str = "msrp://alice.example.com:7777/iau39soe2843z;tcp";

/// Build a session between [`LOCAL_URI`] and [`REMOTE_URI`].
#[must_use]
pub fn session_fixture(script: ListenerScript, granularity: usize) -> SessionFixture {
    let listener = Arc::new(ScriptedListener::new(script));
    let reports = Arc::new(CountingReports::with_granularity(granularity));
    let session = Arc::new(Session::new(
        uri(LOCAL_URI),
        vec![uri(REMOTE_URI)],
        Arc::clone(&listener) as Arc<dyn SessionListener>,
        Arc::clone(&reports) as Arc<dyn ReportMechanism>,
    ));
    SessionFixture {
        session,
        listener,
        reports,
    }
}
