//! Parsing of incoming transactions.
//!
//! Bytes arrive through [`Transaction::parse`] tagged with the region they
//! belong to. Header bytes accumulate until the header is complete, which
//! triggers field recognition and session/message association. Content
//! bytes stream into the message's container, and
//! [`Transaction::signal_end`] finalises the chunk.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info, trace, warn};

use super::{
    ContinuationFlag,
    Direction,
    FailureReport,
    MessageId,
    StatusCode,
    Transaction,
    TransactionError,
    TransactionKind,
    TransactionManager,
    TransactionResponse,
    TransactionType,
    header::{HeaderFields, recognize},
};
use crate::{
    message::Message,
    session::{AcceptDecision, Session},
};

/// Part of a transaction a slice of bytes belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    /// Header lines after the start line, up to the blank line.
    Header,
    /// Body bytes between the blank line and the end-line.
    Content,
}

fn next_line(data: &[u8]) -> (&[u8], &[u8]) {
    let cut = data
        .windows(2)
        .position(|w| w == b"\r\n")
        .map_or(data.len(), |p| p + 2);
    data.split_at(cut)
}

impl Transaction {
    /// Feed received bytes.
    ///
    /// # Errors
    /// Protocol failures ([`TransactionError::is_protocol`]) have already
    /// been answered on the wire and leave the transaction invalid; later
    /// calls are ignored. [`TransactionError::IllegalUse`] reports bytes fed
    /// to an outgoing or completed transaction, or content handed over in
    /// the header region.
    pub fn parse(&mut self, data: &[u8], region: Region) -> Result<(), TransactionError> {
        if self.direction == Direction::Outbound {
            return Err(TransactionError::IllegalUse(
                "parsing into an outgoing transaction",
            ));
        }
        if self.complete {
            return Err(TransactionError::IllegalUse(
                "parsing into a completed transaction",
            ));
        }
        match region {
            Region::Header => self.parse_header(data),
            Region::Content => self.parse_content(data),
        }
    }

    fn parse_header(&mut self, data: &[u8]) -> Result<(), TransactionError> {
        if !self.valid {
            trace!(tid = %self.id, len = data.len(), "header bytes of invalid transaction ignored");
            return Ok(());
        }
        if self.header_complete {
            return Err(TransactionError::IllegalUse(
                "header bytes after the header completed",
            ));
        }
        let grammar = self.grammar();
        let mut rest = data;
        while !rest.is_empty() {
            let (line, tail) = next_line(rest);
            if let Err(err) = self.headers.push(line) {
                return Err(self.reject_header(err));
            }
            rest = tail;
            if self.headers.is_complete(grammar) {
                if !rest.is_empty() {
                    error!(tid = %self.id, extra = rest.len(), "content handed over in the header region");
                    return Err(TransactionError::IllegalUse(
                        "content handed over in the header region",
                    ));
                }
                return self.complete_header();
            }
        }
        Ok(())
    }

    fn complete_header(&mut self) -> Result<(), TransactionError> {
        match recognize(self.headers.as_bytes(), self.grammar(), &self.id) {
            Ok(fields) => {
                self.apply_fields(fields);
                self.header_complete = true;
                trace!(tid = %self.id, "header complete");
                self.associate()
            }
            Err(err) => Err(self.reject_header(err)),
        }
    }

    fn apply_fields(&mut self, fields: HeaderFields) {
        self.to_path = fields.to_path;
        self.from_path = fields.from_path;
        self.message_id = fields.message_id;
        self.byte_range = fields.byte_range;
        self.content_type = fields.content_type;
        self.failure_report = fields.failure_report;
        self.success_report = fields.success_report;
        self.status = fields.status;
    }

    fn reject_header(&mut self, err: TransactionError) -> TransactionError {
        warn!(tid = %self.id, error = %err, "rejecting transaction header");
        self.valid = false;
        self.respond(StatusCode::BAD_REQUEST);
        err
    }

    /// Queue a response unless one was already sent or the peer opted out.
    fn respond(&mut self, code: StatusCode) {
        if self.response.is_some() || !matches!(self.kind, TransactionKind::Request(_)) {
            return;
        }
        if self.is_inbound_send() && self.failure_report == FailureReport::No {
            debug!(tid = %self.id, %code, "response suppressed by Failure-Report: no");
            return;
        }
        let Some(manager) = &self.manager else {
            return;
        };
        self.response = Some(code);
        debug!(tid = %self.id, %code, "response generated");
        manager.generate_response(TransactionResponse::new(
            self.id.clone(),
            code,
            None,
            &self.to_path,
            &self.from_path,
        ));
    }

    fn associate(&mut self) -> Result<(), TransactionError> {
        let TransactionKind::Request(ty) = self.kind else {
            return Ok(());
        };
        let Some(manager) = self.manager.clone() else {
            return Ok(());
        };
        if ty == TransactionType::Unsupported {
            warn!(tid = %self.id, "unsupported method");
            self.valid = false;
            self.respond(StatusCode::UNKNOWN_METHOD);
            return Err(TransactionError::UnsupportedMethod);
        }
        let session = self.resolve_session(manager.as_ref())?;
        self.session = Some(Arc::clone(&session));
        self.associate_message(&session, ty)
    }

    fn resolve_session(
        &mut self,
        manager: &dyn TransactionManager,
    ) -> Result<Arc<Session>, TransactionError> {
        let Some(target) = self.to_path.first().cloned() else {
            let err = TransactionError::InvalidHeader("empty To-Path".to_owned());
            return Err(self.reject_header(err));
        };
        if let Some(session) = manager.session_for_path(&target) {
            return Ok(session);
        }
        let code = match manager.session_to_identify(&target) {
            Some(session) if !manager.is_active(&target) && manager.identified_session(&session) => {
                debug!(tid = %self.id, uri = %target, "session identified by first request");
                return Ok(session);
            }
            Some(_) => StatusCode::WRONG_CONNECTION,
            None if manager.is_active(&target) => StatusCode::WRONG_CONNECTION,
            None => StatusCode::NO_SUCH_SESSION,
        };
        warn!(tid = %self.id, uri = %target, %code, "no session for request");
        self.valid = false;
        self.respond(code);
        Err(TransactionError::NoSession {
            code: code.as_u16(),
        })
    }

    fn live_receiving(&self, session: &Session, mid: &MessageId) -> Option<Arc<Message>> {
        let message = session.receiving_message(mid.as_str())?;
        if message.was_aborted() {
            debug!(tid = %self.id, message_id = %mid, "discarding aborted message");
            session.remove_receiving_message(mid.as_str());
            return None;
        }
        Some(message)
    }

    fn associate_message(
        &mut self,
        session: &Arc<Session>,
        ty: TransactionType,
    ) -> Result<(), TransactionError> {
        let Some(mid) = self.message_id.clone() else {
            return Ok(());
        };
        let existing = match ty {
            TransactionType::Report => session
                .sent_or_sending_message(mid.as_str())
                .or_else(|| self.live_receiving(session, &mid)),
            _ => self.live_receiving(session, &mid),
        };
        match (existing, ty) {
            (Some(message), TransactionType::Send) => {
                self.check_byte_range(message.progress(), message.size())?;
                message.set_last_send_transaction(&self.id);
                self.message = Some(message);
                Ok(())
            }
            (Some(message), _) => {
                self.message = Some(message);
                Ok(())
            }
            (None, TransactionType::Send) => {
                self.check_byte_range(0, None)?;
                self.offer_incoming(session, mid)
            }
            (None, _) => {
                warn!(tid = %self.id, message_id = %mid, "REPORT for unknown message dropped");
                self.valid = false;
                Ok(())
            }
        }
    }

    /// Chunks are stored in arrival order: a SEND may rewrite bytes already
    /// received but never start past them or reach beyond the total size.
    fn check_byte_range(&mut self, received: u64, total: Option<u64>) -> Result<(), TransactionError> {
        let Some(range) = self.byte_range else {
            return Ok(());
        };
        let total = total.or(range.total);
        let past_total =
            total.is_some_and(|t| range.offset() > t || range.end.is_some_and(|end| end > t));
        if range.offset() <= received && !past_total {
            return Ok(());
        }
        warn!(tid = %self.id, start = range.start, received, ?total, "Byte-Range out of bounds");
        self.valid = false;
        self.respond(StatusCode::BAD_REQUEST);
        Err(TransactionError::ByteRangeOutOfBounds {
            start: range.start,
            received,
            total,
        })
    }

    fn offer_incoming(
        &mut self,
        session: &Arc<Session>,
        mid: MessageId,
    ) -> Result<(), TransactionError> {
        let mut message = Message::incoming(
            mid,
            self.byte_range.and_then(|r| r.total),
            Arc::clone(session.report_mechanism()),
        )
        .with_success_report(self.success_report)
        .with_failure_report(self.failure_report);
        if let Some(content_type) = &self.content_type {
            message = message.with_content_type(content_type.clone());
        }
        let code = match session.accept_incoming(&message) {
            AcceptDecision::Accept(Some(container)) => {
                message.attach_container(container);
                let message = Arc::new(message);
                message.set_last_send_transaction(&self.id);
                session.put_receiving_message(Arc::clone(&message));
                debug!(tid = %self.id, message_id = %message.id(), "incoming message accepted");
                self.message = Some(message);
                return Ok(());
            }
            AcceptDecision::Accept(None) => {
                warn!(tid = %self.id, message_id = %message.id(), "message accepted without a data container");
                StatusCode::STOP_SENDING
            }
            AcceptDecision::Reject(code) => {
                if let Some(valid) = StatusCode::new(code).filter(|c| c.is_rejection()) {
                    valid
                } else {
                    warn!(tid = %self.id, code, "invalid rejection code; using 413");
                    StatusCode::STOP_SENDING
                }
            }
        };
        info!(tid = %self.id, message_id = %message.id(), %code, "incoming message rejected");
        self.valid = false;
        self.respond(code);
        Err(TransactionError::RejectedByUser {
            code: code.as_u16(),
        })
    }

    fn parse_content(&mut self, data: &[u8]) -> Result<(), TransactionError> {
        if !self.valid {
            trace!(tid = %self.id, len = data.len(), "content of invalid transaction ignored");
            return Ok(());
        }
        if !self.header_complete {
            return Err(TransactionError::IllegalUse(
                "content before the header completed",
            ));
        }
        let result = match self.message.clone() {
            Some(message) if self.is_inbound_send() => self.store_body(&message, data),
            _ => self.buffer_body(data),
        };
        if let Err(err) = result {
            warn!(tid = %self.id, error = %err, "failed to accept body bytes");
            self.valid = false;
            self.respond(StatusCode::BAD_REQUEST);
            return Err(err);
        }
        Ok(())
    }

    fn store_body(&mut self, message: &Message, data: &[u8]) -> Result<(), TransactionError> {
        let mechanism = Arc::clone(message.report_mechanism());
        let granularity = mechanism.trigger_granularity().max(1);
        let base = self.byte_range.map_or(0, |r| r.offset());
        let out_of_bounds = || TransactionError::ByteRangeOutOfBounds {
            start: base.saturating_add(1),
            received: message.progress(),
            total: message.size(),
        };
        for block in data.chunks(granularity) {
            let offset = base
                .checked_add(self.real_chunk_size)
                .ok_or_else(out_of_bounds)?;
            let end = offset.checked_add(block.len() as u64);
            if end.is_none_or(|end| message.size().is_some_and(|total| end > total)) {
                return Err(out_of_bounds());
            }
            message.put_body(offset, block)?;
            self.real_chunk_size += block.len() as u64;
            mechanism.count_received_body_block(message, &self.id, offset, block.len());
        }
        Ok(())
    }

    fn buffer_body(&mut self, data: &[u8]) -> Result<(), TransactionError> {
        let limit = self.limits.max_nonsend_body;
        if self.body.len() + data.len() > limit {
            return Err(TransactionError::BodyTooLarge { limit });
        }
        self.body.extend_from_slice(data);
        self.real_chunk_size += data.len() as u64;
        Ok(())
    }

    /// Record the end-line flag and finalise the transaction.
    ///
    /// A header that never completed gets one last recognition pass. For a
    /// SEND the `Byte-Range` end becomes the real byte count, `$` tells the
    /// report mechanism the message ended, and `#` aborts the message.
    ///
    /// # Errors
    /// Returns a protocol error if the last recognition pass fails, and
    /// [`TransactionError::IllegalUse`] for an outgoing transaction, a second
    /// flag, or an abort of a SEND that has no message.
    pub fn signal_end(&mut self, flag: ContinuationFlag) -> Result<(), TransactionError> {
        if self.direction == Direction::Outbound {
            return Err(TransactionError::IllegalUse(
                "signalling the end of an outgoing transaction",
            ));
        }
        if self.continuation.is_some() {
            return Err(TransactionError::IllegalUse("continuation flag already set"));
        }
        self.continuation = Some(flag);
        let mut result = Ok(());
        if !self.header_complete && self.valid {
            result = self.complete_header();
        }
        if self.header_complete {
            result = result.and(self.finish(flag));
        }
        self.header_bytes = Bytes::copy_from_slice(self.headers.as_bytes());
        self.complete = true;
        trace!(tid = %self.id, flag = %char::from(flag.as_byte()), valid = self.valid, "transaction complete");
        result
    }

    fn finish(&mut self, flag: ContinuationFlag) -> Result<(), TransactionError> {
        if self.is_inbound_send() && self.real_chunk_size > 0 {
            if let Some(range) = self.byte_range.as_mut() {
                range.end = Some(range.offset().saturating_add(self.real_chunk_size));
            }
        }
        if !self.valid {
            return Ok(());
        }
        match self.transaction_type() {
            Some(TransactionType::Send) => self.finish_send(flag),
            Some(TransactionType::Report) => {
                self.finish_report();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn finish_send(&mut self, flag: ContinuationFlag) -> Result<(), TransactionError> {
        let Some(message) = self.message.clone() else {
            if flag == ContinuationFlag::Aborted {
                error!(tid = %self.id, "aborted SEND has no associated message");
                return Err(TransactionError::IllegalUse(
                    "aborted SEND without an associated message",
                ));
            }
            return Ok(());
        };
        match flag {
            ContinuationFlag::Complete => {
                message.report_mechanism().received_end_of_message(&message);
                if let Some(session) = &self.session {
                    session.complete_receiving(&message);
                }
            }
            ContinuationFlag::Aborted => {
                message.got_aborted(&self.id);
                message.report_mechanism().received_aborted_message(&message);
                if let Some(session) = &self.session {
                    session.remove_receiving_message(message.id().as_str());
                }
            }
            ContinuationFlag::Interrupted => {}
        }
        if self.failure_report == FailureReport::Yes {
            self.respond(StatusCode::OK);
        }
        Ok(())
    }

    fn finish_report(&self) {
        if let (Some(session), Some(message), Some(status)) =
            (&self.session, &self.message, &self.status)
        {
            debug!(tid = %self.id, message_id = %message.id(), code = status.code, "REPORT received");
            session.deliver_report(message, status);
        }
    }
}

#[cfg(test)]
mod tests;
