//! Tests for incoming header handling, body streaming and finalisation.

use std::sync::Arc;

use rstest::{fixture, rstest};
use tracing::Level;

use super::*;
use crate::{
    data::MemoryContainer,
    report::DefaultReportMechanism,
    test_helpers::{
        ListenerScript,
        LOCAL_URI,
        REMOTE_URI,
        RecordingManager,
        SessionFixture,
        session_fixture,
        tracing::capture_events,
    },
    transaction::{ByteRange, TransactionId, TransactionLimits},
};

struct Harness {
    manager: Arc<RecordingManager>,
    fixture: SessionFixture,
}

impl Harness {
    fn request(&self, tid: &str, ty: TransactionType) -> Transaction {
        Transaction::incoming_request(
            TransactionId::parse(tid).expect("tid"),
            ty,
            Arc::clone(&self.manager) as Arc<dyn TransactionManager>,
        )
    }
}

#[fixture]
fn harness() -> Harness {
    let manager = Arc::new(RecordingManager::new().with_limits(TransactionLimits {
        max_header_bytes: 1024,
        max_nonsend_body: 16,
    }));
    let fixture = session_fixture(ListenerScript::AcceptInMemory, 4);
    manager.bind(Arc::clone(&fixture.session));
    Harness { manager, fixture }
}

fn send_header(extra: &str) -> String {
    format!(
        "To-Path: {LOCAL_URI}\r\nFrom-Path: {REMOTE_URI}\r\nMessage-ID: msg1234\r\n{extra}\r\n"
    )
}

#[rstest]
fn body_is_stored_in_granularity_blocks(harness: Harness) {
    let mut first = harness.request("blk0001", TransactionType::Send);
    first
        .parse(send_header("Byte-Range: 1-10/20\r\n").as_bytes(), Region::Header)
        .expect("header");
    first.parse(b"abcdefghij", Region::Content).expect("content");
    first.signal_end(ContinuationFlag::Interrupted).expect("end");

    let mut tx = harness.request("blk0002", TransactionType::Send);
    tx.parse(send_header("Byte-Range: 11-20/20\r\n").as_bytes(), Region::Header)
        .expect("header");
    assert!(tx.is_header_complete());
    tx.parse(b"0123456789", Region::Content).expect("content");
    let tid = tx.id().clone();
    let blocks: Vec<_> = harness
        .fixture
        .reports
        .blocks()
        .into_iter()
        .filter(|(block_tid, _, _)| *block_tid == tid)
        .collect();
    assert_eq!(
        blocks,
        vec![(tid.clone(), 10, 4), (tid.clone(), 14, 4), (tid, 18, 2)]
    );
    tx.signal_end(ContinuationFlag::Interrupted).expect("end");
    assert_eq!(
        tx.byte_range(),
        Some(ByteRange {
            start: 11,
            end: Some(20),
            total: Some(20)
        })
    );
    assert_eq!(harness.fixture.reports.end_of_message_count(), 0);
    assert_eq!(harness.manager.response_codes(), vec![200, 200]);
    let message = harness
        .fixture
        .session
        .receiving_message("msg1234")
        .expect("still receiving");
    assert_eq!(message.read_range(0, 20).expect("stored"), b"abcdefghij0123456789");
}

#[rstest]
#[case::near_u64_max("18446744073709551000-*/*")]
#[case::gap_before_start("4000000001-*/*")]
#[case::end_past_total("1-30/20")]
#[case::start_past_total("25-*/20")]
fn out_of_bounds_byte_range_is_refused(harness: Harness, #[case] range: &str) {
    let mut tx = harness.request("obr0001", TransactionType::Send);
    let header = send_header(&format!("Byte-Range: {range}\r\n"));
    let result = tx.parse(header.as_bytes(), Region::Header);
    assert!(matches!(result, Err(TransactionError::ByteRangeOutOfBounds { .. })));
    assert!(!tx.is_valid());
    tx.parse(b"abc", Region::Content).expect("ignored");
    tx.signal_end(ContinuationFlag::Complete).expect("end");
    assert_eq!(harness.manager.response_codes(), vec![400]);
    assert!(harness.fixture.listener.offered().is_empty());
    assert!(harness.fixture.reports.blocks().is_empty());
}

#[rstest]
fn continuation_may_not_skip_ahead(harness: Harness) {
    let mut first = harness.request("skp0001", TransactionType::Send);
    first
        .parse(send_header("Byte-Range: 1-*/*\r\n").as_bytes(), Region::Header)
        .expect("header");
    first.parse(b"abc", Region::Content).expect("content");
    first.signal_end(ContinuationFlag::Interrupted).expect("end");

    let mut skip = harness.request("skp0002", TransactionType::Send);
    let result = skip.parse(send_header("Byte-Range: 10-*/*\r\n").as_bytes(), Region::Header);
    assert!(matches!(
        result,
        Err(TransactionError::ByteRangeOutOfBounds {
            start: 10,
            received: 3,
            total: None
        })
    ));

    let mut resend = harness.request("skp0003", TransactionType::Send);
    resend
        .parse(send_header("Byte-Range: 3-*/*\r\n").as_bytes(), Region::Header)
        .expect("rewriting received bytes is allowed");
    assert_eq!(harness.manager.response_codes(), vec![200, 400]);
}

#[rstest]
fn body_longer_than_total_is_refused(harness: Harness) {
    let mut tx = harness.request("big0001", TransactionType::Send);
    tx.parse(send_header("Byte-Range: 1-*/4\r\n").as_bytes(), Region::Header)
        .expect("header");
    let result = tx.parse(b"abcdef", Region::Content);
    assert!(matches!(result, Err(TransactionError::ByteRangeOutOfBounds { .. })));
    assert!(!tx.is_valid());
    assert_eq!(harness.manager.response_codes(), vec![400]);
    let message = tx.message().expect("message");
    assert_eq!(message.progress(), 4);
}

#[rstest]
fn lowercase_header_fields_are_accepted(harness: Harness) {
    let mut tx = harness.request("low0001", TransactionType::Send);
    let header = format!(
        "to-path: {LOCAL_URI}\r\nfrom-path: {REMOTE_URI}\r\nmessage-id: msg1234\r\nbyte-range: \
         1-3/3\r\nfailure-report: YES\r\n\r\n"
    );
    tx.parse(header.as_bytes(), Region::Header).expect("header");
    tx.parse(b"abc", Region::Content).expect("content");
    tx.signal_end(ContinuationFlag::Complete).expect("end");
    assert_eq!(harness.manager.response_codes(), vec![200]);
    assert_eq!(tx.byte_range().and_then(|r| r.total), Some(3));
    assert_eq!(harness.fixture.listener.received().len(), 1);
}

#[rstest]
fn declared_end_is_replaced_by_received_count(harness: Harness) {
    let mut tx = harness.request("cnt0001", TransactionType::Send);
    tx.parse(send_header("Byte-Range: 1-100/100\r\n").as_bytes(), Region::Header)
        .expect("header");
    tx.parse(b"abc", Region::Content).expect("content");
    tx.signal_end(ContinuationFlag::Interrupted).expect("end");
    assert_eq!(tx.byte_range().and_then(|r| r.end), Some(3));
    assert_eq!(tx.body().expect("body"), b"abc");
}

#[rstest]
fn failure_report_no_suppresses_every_response(harness: Harness) {
    harness.fixture.listener.set_script(ListenerScript::Reject(403));
    let mut tx = harness.request("frn0001", TransactionType::Send);
    let result = tx.parse(send_header("Failure-Report: no\r\n").as_bytes(), Region::Header);
    assert!(matches!(result, Err(TransactionError::RejectedByUser { code: 403 })));
    assert!(!tx.is_valid());
    assert!(harness.manager.responses().is_empty());

    harness.fixture.listener.set_script(ListenerScript::AcceptInMemory);
    let mut tx = harness.request("frn0002", TransactionType::Send);
    tx.parse(send_header("Failure-Report: no\r\n").as_bytes(), Region::Header)
        .expect("header");
    tx.parse(b"hi", Region::Content).expect("content");
    tx.signal_end(ContinuationFlag::Complete).expect("end");
    assert!(harness.manager.responses().is_empty());
    assert_eq!(harness.fixture.listener.received().len(), 1);
}

#[rstest]
#[case::partial("Failure-Report: partial\r\n")]
#[case::no("Failure-Report: no\r\n")]
fn success_responses_need_failure_report_yes(harness: Harness, #[case] field: &str) {
    let mut tx = harness.request("frp0001", TransactionType::Send);
    tx.parse(send_header(field).as_bytes(), Region::Header).expect("header");
    tx.signal_end(ContinuationFlag::Complete).expect("end");
    assert!(harness.manager.responses().is_empty());
}

#[rstest]
fn invalid_rejection_code_falls_back_to_413(harness: Harness) {
    harness.fixture.listener.set_script(ListenerScript::Reject(299));
    let mut tx = harness.request("rej0001", TransactionType::Send);
    let result = tx.parse(send_header("").as_bytes(), Region::Header);
    assert!(matches!(result, Err(TransactionError::RejectedByUser { code: 413 })));
    assert_eq!(harness.manager.response_codes(), vec![413]);
    assert!(harness.fixture.session.receiving_message("msg1234").is_none());
}

#[rstest]
fn bad_request_is_answered_once(harness: Harness) {
    let mut tx = harness.request("bad0001", TransactionType::Send);
    let result = tx.parse(b"To-Path: short\r\nFrom-Path: x\r\n\r\n", Region::Header);
    assert!(matches!(result, Err(TransactionError::InvalidHeader(_))));
    tx.parse(b"ignored", Region::Content).expect("ignored");
    tx.signal_end(ContinuationFlag::Complete).expect("end");
    assert_eq!(harness.manager.response_codes(), vec![400]);
    let response = harness.manager.responses();
    let wire = response.first().expect("response").as_bytes();
    assert_eq!(wire, b"MSRP bad0001 400 Bad Request\r\n-------bad0001$\r\n");
}

#[rstest]
fn report_body_is_buffered_up_to_the_limit(harness: Harness) {
    let outgoing = Arc::new(Message::outgoing(
        MessageId::parse("msg1234").expect("mid"),
        Box::new(MemoryContainer::from_bytes(&b"sent"[..])),
        Arc::new(DefaultReportMechanism::default()),
    ));
    harness.fixture.session.add_sent_message(Arc::clone(&outgoing));
    let mut tx = harness.request("rpb0001", TransactionType::Report);
    tx.parse(send_header("Status: 000 200 OK\r\n").as_bytes(), Region::Header)
        .expect("header");
    assert!(Arc::ptr_eq(tx.message().expect("message"), &outgoing));
    tx.parse(b"0123456789abcdef", Region::Content).expect("fits");
    let result = tx.parse(b"!", Region::Content);
    assert!(matches!(result, Err(TransactionError::BodyTooLarge { limit: 16 })));
    assert!(!tx.is_valid());
    assert_eq!(tx.body().expect("body"), b"0123456789abcdef");
}

#[rstest]
fn report_without_blank_line_completes_at_end(harness: Harness) {
    let outgoing = Arc::new(Message::outgoing(
        MessageId::parse("msg1234").expect("mid"),
        Box::new(MemoryContainer::from_bytes(&b"sent"[..])),
        Arc::new(DefaultReportMechanism::default()),
    ));
    harness.fixture.session.add_sent_message(outgoing);
    let mut tx = harness.request("rpe0001", TransactionType::Report);
    let header = format!(
        "To-Path: {LOCAL_URI}\r\nFrom-Path: {REMOTE_URI}\r\nMessage-ID: msg1234\r\nStatus: 000 413 stop\r\n"
    );
    tx.parse(header.as_bytes(), Region::Header).expect("header");
    assert!(!tx.is_header_complete());
    tx.signal_end(ContinuationFlag::Complete).expect("end");
    assert!(tx.is_header_complete());
    let reports = harness.fixture.listener.reports();
    let [(mid, status)] = reports.as_slice() else {
        panic!("one report delivered");
    };
    assert_eq!(mid.as_str(), "msg1234");
    assert_eq!(status.code, 413);
    assert_eq!(status.comment.as_deref(), Some("stop"));
}

#[rstest]
fn unknown_report_is_logged_not_answered(harness: Harness) {
    let mut tx = harness.request("unk0001", TransactionType::Report);
    let header = send_header("").replace("msg1234", "unknown123");
    let (result, events) = capture_events(Level::WARN, || {
        tx.parse(header.as_bytes(), Region::Header)
    });
    assert!(result.is_ok());
    assert!(!tx.is_valid());
    assert!(harness.manager.responses().is_empty());
    let event = events.first().expect("warning logged");
    assert_eq!(event.level(), Level::WARN);
    assert_eq!(event.field("message_id"), Some("unknown123"));
}

#[rstest]
fn aborted_chunk_marks_the_message(harness: Harness) {
    let mut tx = harness.request("abt0001", TransactionType::Send);
    tx.parse(send_header("").as_bytes(), Region::Header).expect("header");
    tx.parse(b"part", Region::Content).expect("content");
    tx.signal_end(ContinuationFlag::Aborted).expect("end");
    assert!(tx.message().expect("message").was_aborted());
    assert!(harness.fixture.session.receiving_message("msg1234").is_none());
    assert_eq!(harness.fixture.reports.aborted_count(), 1);

    let mut next = harness.request("abt0002", TransactionType::Send);
    next.parse(send_header("").as_bytes(), Region::Header).expect("header");
    assert_eq!(harness.fixture.listener.offered().len(), 2);
}

#[rstest]
fn contract_violations_are_illegal_use(harness: Harness) {
    let mut tx = harness.request("ill0001", TransactionType::Send);
    let early = tx.parse(b"body", Region::Content);
    assert!(matches!(early, Err(TransactionError::IllegalUse(_))));

    let mut header = send_header("").into_bytes();
    header.extend_from_slice(b"body");
    let mixed = tx.parse(&header, Region::Header);
    assert!(matches!(mixed, Err(TransactionError::IllegalUse(_))));

    tx.signal_end(ContinuationFlag::Complete).expect("end");
    let again = tx.signal_end(ContinuationFlag::Complete);
    assert!(again.as_ref().is_err_and(TransactionError::is_illegal_use));
    let late = tx.parse(b"x", Region::Content);
    assert!(matches!(late, Err(TransactionError::IllegalUse(_))));
}
