//! MSRP sessions and the hooks their owners implement.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use tracing::{debug, warn};
use url::Url;

use crate::{
    data::DataContainer,
    lock_or_recover,
    message::Message,
    report::ReportMechanism,
    transaction::{MessageId, StatusHeader},
};

/// Answer of a [`SessionListener`] to an incoming message.
#[derive(Debug)]
pub enum AcceptDecision {
    /// Accept the message, storing content in the container if supplied.
    ///
    /// Accepting without a container rejects the message with 413.
    Accept(Option<Box<dyn DataContainer>>),
    /// Reject the message with the given response code.
    ///
    /// Codes outside the response registry, or 200, fall back to 413.
    Reject(u16),
}

/// Callbacks from the transaction engine to the owner of a session.
pub trait SessionListener: Send + Sync {
    /// Decide whether to accept a message announced by its first chunk.
    fn accept_hook(&self, session: &Session, message: &Message) -> AcceptDecision;

    /// Called when an incoming message closed with `$`.
    fn received_message(&self, _session: &Session, _message: &Arc<Message>) {}

    /// Called when a REPORT for a known message arrives.
    fn received_report(&self, _session: &Session, _message: &Arc<Message>, _status: &StatusHeader) {
    }
}

/// One endpoint of an MSRP session.
pub struct Session {
    uri: Url,
    to_path: Vec<Url>,
    listener: Arc<dyn SessionListener>,
    report_mechanism: Arc<dyn ReportMechanism>,
    receiving: Mutex<HashMap<MessageId, Arc<Message>>>,
    sent: Mutex<HashMap<MessageId, Arc<Message>>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("uri", &self.uri.as_str())
            .field("to_path", &self.to_path)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session identified by `uri` talking to `to_path`.
    #[must_use]
    pub fn new(
        uri: Url,
        to_path: Vec<Url>,
        listener: Arc<dyn SessionListener>,
        report_mechanism: Arc<dyn ReportMechanism>,
    ) -> Self {
        Self {
            uri,
            to_path,
            listener,
            report_mechanism,
            receiving: Mutex::new(HashMap::new()),
            sent: Mutex::new(HashMap::new()),
        }
    }

    /// Local URI identifying the session.
    #[must_use]
    pub const fn uri(&self) -> &Url { &self.uri }

    /// Remote path used as `To-Path` of outgoing requests.
    #[must_use]
    pub fn to_path(&self) -> &[Url] { &self.to_path }

    /// Report mechanism for messages of this session.
    #[must_use]
    pub const fn report_mechanism(&self) -> &Arc<dyn ReportMechanism> { &self.report_mechanism }

    /// Ask the listener about an incoming message.
    #[must_use]
    pub fn accept_incoming(&self, message: &Message) -> AcceptDecision {
        self.listener.accept_hook(self, message)
    }

    /// Message currently being received under `message_id`.
    #[must_use]
    pub fn receiving_message(&self, message_id: &str) -> Option<Arc<Message>> {
        lock_or_recover(&self.receiving).get(message_id).cloned()
    }

    /// Register a message being received.
    pub fn put_receiving_message(&self, message: Arc<Message>) {
        debug!(session = %self.uri, message_id = %message.id(), "receiving message registered");
        lock_or_recover(&self.receiving).insert(message.id().clone(), message);
    }

    /// Forget a message being received.
    pub fn remove_receiving_message(&self, message_id: &str) -> Option<Arc<Message>> {
        lock_or_recover(&self.receiving).remove(message_id)
    }

    /// Message sent or being sent under `message_id`.
    #[must_use]
    pub fn sent_or_sending_message(&self, message_id: &str) -> Option<Arc<Message>> {
        lock_or_recover(&self.sent).get(message_id).cloned()
    }

    /// Register an outgoing message so REPORTs can find it.
    pub fn add_sent_message(&self, message: Arc<Message>) {
        lock_or_recover(&self.sent).insert(message.id().clone(), message);
    }

    /// Finish delivery of an incoming message and notify the listener.
    pub fn complete_receiving(&self, message: &Arc<Message>) {
        if self.remove_receiving_message(message.id().as_str()).is_none() {
            warn!(session = %self.uri, message_id = %message.id(), "completed message was not registered");
        }
        self.listener.received_message(self, message);
    }

    /// Hand a REPORT's status to the listener.
    pub fn deliver_report(&self, message: &Arc<Message>, status: &StatusHeader) {
        self.listener.received_report(self, message, status);
    }
}
