//! Splits a received byte stream into transactions.
//!
//! The [`Framer`] owns the phase boundaries: it parses start lines, hands
//! header lines to the transaction one at a time, switches to content at
//! the blank line and scans content for `CRLF -------tid` followed by a flag
//! and CRLF. Bytes that might be the start of an end-line are held back
//! until the next read decides them, so content is never handed over past
//! the boundary.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tracing::{debug, trace, warn};

use super::{
    ContinuationFlag,
    Region,
    Transaction,
    TransactionError,
    TransactionId,
    TransactionManager,
    TransactionType,
};

const DASHES: &[u8] = b"-------";

enum State {
    StartLine,
    Headers(Box<Transaction>),
    Content {
        tx: Box<Transaction>,
        fed: bool,
    },
}

enum Step {
    Progress,
    Done(Box<Transaction>),
    NeedMore,
}

/// Incremental parser turning received bytes into complete transactions.
pub struct Framer {
    manager: Arc<dyn TransactionManager>,
    pending: BytesMut,
    state: State,
    max_line: usize,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn absorb(tid: &TransactionId, result: Result<(), TransactionError>) -> Result<(), TransactionError> {
    match result {
        Err(err) if err.is_protocol() => {
            debug!(%tid, error = %err, "transaction failed; framing continues");
            Ok(())
        }
        other => other,
    }
}

fn end_line_flag(line: &[u8], tid: &TransactionId) -> Option<ContinuationFlag> {
    let rest = line.strip_prefix(DASHES)?.strip_prefix(tid.as_bytes())?;
    match rest {
        [flag] => ContinuationFlag::from_byte(*flag),
        _ => None,
    }
}

fn invalid_start(reason: &str) -> TransactionError {
    TransactionError::InvalidStartLine(reason.to_owned())
}

fn is_method(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_uppercase())
}

impl Framer {
    /// Create a framer whose transactions use `manager`.
    #[must_use]
    pub fn new(manager: Arc<dyn TransactionManager>) -> Self {
        let max_line = manager.limits().max_header_bytes;
        Self {
            manager,
            pending: BytesMut::new(),
            state: State::StartLine,
            max_line,
        }
    }

    /// Whether the framer sits between transactions with nothing buffered.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::StartLine) && self.pending.is_empty()
    }

    /// Feed received bytes and collect every transaction they complete.
    ///
    /// Protocol failures of individual transactions are answered on the
    /// wire and do not interrupt framing.
    ///
    /// # Errors
    /// Returns [`TransactionError::InvalidStartLine`] when the stream cannot
    /// be framed, and [`TransactionError::IllegalUse`] if a transaction
    /// rejects the bytes handed to it.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Transaction>, TransactionError> {
        self.pending.extend_from_slice(data);
        let mut done = Vec::new();
        loop {
            match self.step()? {
                Step::Progress => {}
                Step::Done(tx) => done.push(*tx),
                Step::NeedMore => return Ok(done),
            }
        }
    }

    fn step(&mut self) -> Result<Step, TransactionError> {
        match std::mem::replace(&mut self.state, State::StartLine) {
            State::StartLine => self.start_line(),
            State::Headers(tx) => self.header_line(tx),
            State::Content { tx, fed } => self.content(tx, fed),
        }
    }

    fn start_line(&mut self) -> Result<Step, TransactionError> {
        let Some(end) = find(&self.pending, b"\r\n") else {
            if self.pending.len() > self.max_line {
                self.pending.clear();
                return Err(invalid_start("start line too long"));
            }
            return Ok(Step::NeedMore);
        };
        let line = self.pending.split_to(end + 2);
        let Some(text) = line.get(..end) else {
            return Ok(Step::Progress);
        };
        if text.is_empty() {
            trace!("blank line between transactions skipped");
            return Ok(Step::Progress);
        }
        let tx = self.parse_start_line(text)?;
        self.state = State::Headers(Box::new(tx));
        Ok(Step::Progress)
    }

    fn parse_start_line(&self, line: &[u8]) -> Result<Transaction, TransactionError> {
        let text = std::str::from_utf8(line)
            .ok()
            .filter(|t| t.is_ascii())
            .ok_or_else(|| invalid_start("non-ASCII start line"))?;
        let mut parts = text.splitn(4, ' ');
        let (Some("MSRP"), Some(tid), Some(third)) = (parts.next(), parts.next(), parts.next())
        else {
            warn!(line = text, "unrecognised start line");
            return Err(invalid_start(text));
        };
        let tid = TransactionId::parse(tid).ok_or_else(|| invalid_start("malformed transaction id"))?;
        let manager = Arc::clone(&self.manager);
        if third.len() == 3 && third.bytes().all(|b| b.is_ascii_digit()) {
            let code = third.parse().map_err(|_| invalid_start("malformed status code"))?;
            let comment = parts.next().map(str::to_owned);
            debug!(%tid, code, "response started");
            return Ok(Transaction::incoming_response(tid, code, comment, manager));
        }
        if !is_method(third) || parts.next().is_some() {
            warn!(line = text, "unrecognised start line");
            return Err(invalid_start(text));
        }
        let ty = TransactionType::from_method(third);
        debug!(%tid, method = third, "request started");
        Ok(Transaction::incoming_request(tid, ty, manager))
    }

    fn header_line(&mut self, mut tx: Box<Transaction>) -> Result<Step, TransactionError> {
        let Some(end) = find(&self.pending, b"\r\n") else {
            if self.pending.len() > self.max_line {
                let overflow = self.pending.split();
                let tid = tx.id().clone();
                if tx.is_header_complete() {
                    warn!(%tid, len = overflow.len(), "oversized line after the header completed dropped");
                } else {
                    absorb(&tid, tx.parse(&overflow, Region::Header))?;
                }
            }
            self.state = State::Headers(tx);
            return Ok(Step::NeedMore);
        };
        let line = self.pending.split_to(end + 2);
        let text = line.get(..end).unwrap_or_default();
        let tid = tx.id().clone();
        if let Some(flag) = end_line_flag(text, &tid) {
            absorb(&tid, tx.signal_end(flag))?;
            return Ok(Step::Done(tx));
        }
        if tx.is_header_complete() {
            warn!(tid = %tx.id(), "header line after the header completed ignored");
            self.state = State::Headers(tx);
            return Ok(Step::Progress);
        }
        absorb(&tid, tx.parse(&line, Region::Header))?;
        self.state = if text.is_empty() {
            State::Content { tx, fed: false }
        } else {
            State::Headers(tx)
        };
        Ok(Step::Progress)
    }

    fn content(&mut self, mut tx: Box<Transaction>, mut fed: bool) -> Result<Step, TransactionError> {
        let tid = tx.id().clone();
        let mut marker = b"\r\n".to_vec();
        marker.extend_from_slice(DASHES);
        marker.extend_from_slice(tid.as_bytes());

        if !fed {
            let bare = marker.get(2..).unwrap_or_default();
            let probe = self.pending.get(..bare.len().min(self.pending.len())).unwrap_or_default();
            if bare.starts_with(probe) && self.pending.len() < bare.len() + 3 {
                self.state = State::Content { tx, fed };
                return Ok(Step::NeedMore);
            }
            if let Some(flag) = self
                .pending
                .starts_with(bare)
                .then(|| self.terminator_at(0, bare.len()))
                .flatten()
            {
                self.pending.advance(bare.len() + 3);
                absorb(&tid, tx.signal_end(flag))?;
                return Ok(Step::Done(tx));
            }
        }

        let Some(pos) = find(&self.pending, &marker) else {
            let safe = self.pending.len().saturating_sub(marker.len() - 1);
            if safe > 0 {
                let chunk = self.pending.split_to(safe);
                absorb(&tid, tx.parse(&chunk, Region::Content))?;
                fed = true;
            }
            self.state = State::Content { tx, fed };
            return Ok(Step::NeedMore);
        };
        if self.pending.len() < pos + marker.len() + 3 {
            if pos > 0 {
                let chunk = self.pending.split_to(pos);
                absorb(&tid, tx.parse(&chunk, Region::Content))?;
                fed = true;
            }
            self.state = State::Content { tx, fed };
            return Ok(Step::NeedMore);
        }
        if let Some(flag) = self.terminator_at(pos, marker.len()) {
            let chunk = self.pending.split_to(pos);
            if !chunk.is_empty() {
                absorb(&tid, tx.parse(&chunk, Region::Content))?;
            }
            self.pending.advance(marker.len() + 3);
            absorb(&tid, tx.signal_end(flag))?;
            return Ok(Step::Done(tx));
        }
        // Not an end-line: the CR belongs to the content.
        let chunk = self.pending.split_to(pos + 1);
        absorb(&tid, tx.parse(&chunk, Region::Content))?;
        self.state = State::Content { tx, fed: true };
        Ok(Step::Progress)
    }

    /// Flag of an end-line whose marker of `len` bytes starts at `pos`, if
    /// the flag byte and CRLF follow it.
    fn terminator_at(&self, pos: usize, len: usize) -> Option<ContinuationFlag> {
        let tail = self.pending.get(pos + len..pos + len + 3)?;
        match tail {
            [flag, b'\r', b'\n'] => ContinuationFlag::from_byte(*flag),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{
        test_helpers::{
            ListenerScript,
            LOCAL_URI,
            REMOTE_URI,
            RecordingManager,
            SessionFixture,
            session_fixture,
        },
        transaction::{DEFAULT_MAX_HEADER_BYTES, TransactionKind},
    };

    struct Setup {
        framer: Framer,
        manager: Arc<RecordingManager>,
        _fixture: SessionFixture,
    }

    #[fixture]
    fn setup() -> Setup {
        let fixture = session_fixture(ListenerScript::AcceptInMemory, 1024);
        let manager = Arc::new(RecordingManager::new());
        manager.bind(Arc::clone(&fixture.session));
        Setup {
            framer: Framer::new(Arc::clone(&manager) as Arc<dyn TransactionManager>),
            manager,
            _fixture: fixture,
        }
    }

    fn send(tid: &str, body: &str, flag: char) -> String {
        format!(
            "MSRP {tid} SEND\r\nTo-Path: {LOCAL_URI}\r\nFrom-Path: {REMOTE_URI}\r\nMessage-ID: \
             m{tid}\r\nByte-Range: 1-*/*\r\n\r\n{body}\r\n-------{tid}{flag}\r\n"
        )
    }

    #[rstest]
    #[case::http("GET / HTTP/1.1\r\n")]
    #[case::lowercase_method("MSRP abcd1 send\r\n")]
    #[case::short_tid("MSRP ab SEND\r\n")]
    #[case::trailing_token("MSRP abcd1 SEND extra\r\n")]
    fn rejects_malformed_start_lines(mut setup: Setup, #[case] line: &str) {
        let result = setup.framer.feed(line.as_bytes());
        assert!(matches!(result, Err(TransactionError::InvalidStartLine(_))));
        assert!(setup.framer.is_idle());
    }

    #[rstest]
    fn oversized_start_line_is_dropped(mut setup: Setup) {
        let junk = vec![b'M'; DEFAULT_MAX_HEADER_BYTES + 1];
        let result = setup.framer.feed(&junk);
        assert!(matches!(result, Err(TransactionError::InvalidStartLine(_))));
        assert!(setup.framer.is_idle());
    }

    #[rstest]
    fn frames_back_to_back_transactions(mut setup: Setup) {
        let wire = format!("\r\n{}{}", send("abcd1", "one", '$'), send("abcd2", "two", '+'));
        let done = setup.framer.feed(wire.as_bytes()).expect("frame");
        let ids: Vec<_> = done.iter().map(|tx| tx.id().as_str().to_owned()).collect();
        assert_eq!(ids, ["abcd1", "abcd2"]);
        let flags: Vec<_> = done.iter().filter_map(Transaction::continuation_flag).collect();
        assert_eq!(flags, [ContinuationFlag::Complete, ContinuationFlag::Interrupted]);
        assert_eq!(setup.manager.response_codes(), vec![200, 200]);
    }

    #[rstest]
    fn empty_body_ends_right_after_the_blank_line(mut setup: Setup) {
        let wire = format!(
            "MSRP empty1 SEND\r\nTo-Path: {LOCAL_URI}\r\nFrom-Path: {REMOTE_URI}\r\nMessage-ID: \
             mempty\r\nByte-Range: 1-0/0\r\n\r\n-------empty1$\r\n"
        );
        let done = setup.framer.feed(wire.as_bytes()).expect("frame");
        let [tx] = done.as_slice() else {
            panic!("one transaction expected");
        };
        assert_eq!(tx.body_len(), 0);
        assert!(tx.is_valid());
    }

    #[rstest]
    fn partial_end_line_is_held_back(mut setup: Setup) {
        let wire = send("hold1", "data", '$');
        let cut = wire.find("-------hold1").expect("end-line") + 4;
        let (head, tail) = wire.split_at(cut);
        assert!(setup.framer.feed(head.as_bytes()).expect("head").is_empty());
        let done = setup.framer.feed(tail.as_bytes()).expect("tail");
        let tx = done.first().expect("transaction");
        assert_eq!(tx.body().expect("body"), b"data");
    }

    #[rstest]
    fn false_end_line_stays_content(mut setup: Setup) {
        let body = "a\r\n-------fals1x\r\nb";
        let done = setup
            .framer
            .feed(send("fals1", body, '$').as_bytes())
            .expect("frame");
        let tx = done.first().expect("transaction");
        assert_eq!(tx.body().expect("body"), body.as_bytes());
    }

    #[rstest]
    fn responses_are_framed(mut setup: Setup) {
        let wire = format!(
            "MSRP resp1 200 OK\r\nTo-Path: {REMOTE_URI}\r\nFrom-Path: {LOCAL_URI}\r\n-------resp1$\r\n"
        );
        let done = setup.framer.feed(wire.as_bytes()).expect("frame");
        let tx = done.first().expect("response");
        assert!(tx.is_incoming_response());
        assert!(tx.is_valid());
        assert!(matches!(
            tx.kind(),
            TransactionKind::Response { code: 200, comment: Some(c) } if c == "OK"
        ));
        assert!(setup.manager.responses().is_empty());
    }
}
