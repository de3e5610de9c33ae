//! AFL harness feeding arbitrary bytes to the transaction framer.
//!
//! Each input is split in two at a position taken from its first byte so
//! partial-read paths are exercised as well.

use std::sync::Arc;

use msrp::{
    test_helpers::{ListenerScript, RecordingManager, session_fixture},
    transaction::{Framer, TransactionManager},
};

fn run(data: &[u8]) {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let fixture = session_fixture(ListenerScript::AcceptInMemory, 64);
    let manager = Arc::new(RecordingManager::new());
    manager.bind(Arc::clone(&fixture.session));
    let mut framer = Framer::new(manager as Arc<dyn TransactionManager>);
    let (head, tail) = rest.split_at(usize::from(split).min(rest.len()));
    // Framing errors are expected on garbage; only panics matter.
    if framer.feed(head).is_ok() {
        drop(framer.feed(tail));
    }
}

fn main() {
    afl::fuzz!(|data: &[u8]| run(data));
}
