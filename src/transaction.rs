//! MSRP transactions: parsing, chunk accounting and serialisation.
//!
//! A [`Transaction`] is one request or response. Incoming transactions are
//! fed by the [`Framer`] one header line or content slice at a time and
//! resolve their [`Session`](crate::session::Session) and
//! [`Message`](crate::message::Message) through the connection's
//! [`TransactionManager`]. Outgoing transactions are pulled byte-wise by the
//! [`TransactionWriter`] and can be interrupted or aborted through a
//! [`TransactionHandle`].

use std::time::Duration;

mod control;
pub mod errors;
pub mod framer;
mod header;
pub mod ids;
mod incoming;
pub mod manager;
mod outgoing;
pub mod reader;
pub mod response;
mod state;
pub mod types;
pub mod writer;

pub use control::TransactionHandle;
pub use errors::TransactionError;
pub use framer::Framer;
pub use ids::{MessageId, StatusCode, TransactionId, is_ident};
pub use incoming::Region;
pub use manager::{TransactionLimits, TransactionManager};
pub use outgoing::DEFAULT_CONTENT_TYPE;
pub use reader::TransactionReader;
pub use response::TransactionResponse;
pub use state::{Transaction, TransactionKind};
pub use types::{
    ByteRange,
    ContinuationFlag,
    Direction,
    FailureReport,
    StatusHeader,
    TransactionType,
};
pub use writer::TransactionWriter;

/// Maximum header bytes accepted per transaction.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 3024;
/// Maximum body bytes buffered for a transaction without a message.
pub const DEFAULT_MAX_NONSEND_BODY: usize = 10 * 1024;
/// Body size above which RFC 4975 requires a SEND to be interruptible.
pub const INTERRUPTIBLE_THRESHOLD: usize = 2048;
/// Default I/O timeout when reading or writing transactions.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);
