#![allow(dead_code)]

use std::sync::Once;

use collab_doc::{ActorId, Change, Document, TimeTicket};
use serde_json::Value;

static INIT_LOGGING: Once = Once::new();

/// Routes `tracing` output to the test harness. `RUST_LOG` picks the level.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

pub fn actor(n: u8) -> ActorId {
    ActorId::new([n; 12])
}

/// Fresh document whose actor is `[n; 12]`.
pub fn doc(n: u8) -> Document {
    init_test_logging();
    let mut doc = Document::new("test-doc");
    doc.set_actor(actor(n));
    doc
}

pub const ROOT: TimeTicket = TimeTicket::INITIAL;

/// Delivers every pending local change of each document to all others.
pub fn sync_all(docs: &mut [Document]) {
    let pending: Vec<Vec<Change>> = docs.iter_mut().map(Document::take_local_changes).collect();
    for (i, doc) in docs.iter_mut().enumerate() {
        for (j, changes) in pending.iter().enumerate() {
            if i != j {
                doc.apply_changes(changes).expect("remote changes apply");
            }
        }
    }
}

/// Delivers `from`'s pending changes to `to` only.
pub fn send(from: &mut Document, to: &mut Document) -> Vec<Change> {
    let changes = from.take_local_changes();
    to.apply_changes(&changes).expect("remote changes apply");
    changes
}

pub fn json(doc: &Document) -> Value {
    serde_json::from_str(&doc.to_json()).expect("document json parses")
}

pub fn ticket_at(doc: &Document, path: &str) -> TimeTicket {
    doc.root()
        .find_by_path(path)
        .expect("valid path")
        .unwrap_or_else(|| panic!("nothing at {path}"))
        .created_at()
}

pub fn text_at(doc: &Document, path: &str) -> String {
    doc.root()
        .find_by_path(path)
        .expect("valid path")
        .and_then(|e| e.as_text())
        .map(|t| t.to_string())
        .unwrap_or_else(|| panic!("no text at {path}"))
}

pub fn xml_at(doc: &Document, path: &str) -> String {
    doc.root()
        .find_by_path(path)
        .expect("valid path")
        .and_then(|e| e.as_tree())
        .map(|t| t.to_xml())
        .unwrap_or_else(|| panic!("no tree at {path}"))
}
