mod common;

use std::collections::BTreeMap;

use collab_doc::{DocError, Document, DocumentOptions, ElementInit, Schema, TreeNodeSpec, ValueType};
use common::{actor, init_test_logging, json, send, text_at, ticket_at, xml_at, ROOT};
use serde_json::json;

fn guarded(n: u8) -> Document {
    init_test_logging();
    let schema = Schema::default()
        .rule("$.title", ValueType::String)
        .rule("$.body", ValueType::Text)
        .rule("$.outline", ValueType::Tree);
    let options = DocumentOptions {
        schema: Some(schema),
        ..DocumentOptions::default()
    };
    let mut d = Document::with_options("guarded", options);
    d.set_actor(actor(n));
    d
}

fn seeded(n: u8) -> Document {
    let mut d = guarded(n);
    d.update(Some("seed"), |ctx| {
        ctx.set_field(ROOT, "title", json!("draft"))?;
        ctx.set_field(ROOT, "body", ElementInit::text("hello"))?;
        let outline = TreeNodeSpec::element("doc")
            .with_children(vec![TreeNodeSpec::element("p").with_children(vec![TreeNodeSpec::text("one")])]);
        ctx.set_field(ROOT, "outline", ElementInit::Tree(outline))?;
        Ok(())
    })
    .unwrap();
    d
}

#[test]
fn violations_are_reported_together() {
    let mut d = guarded(1);
    let err = d
        .update(None, |ctx| {
            ctx.set_field(ROOT, "title", json!(5))?;
            ctx.set_field(ROOT, "body", json!("plain"))?;
            Ok(())
        })
        .unwrap_err();
    let DocError::SchemaValidation(errors) = err else {
        panic!("expected a schema error, got {err:?}");
    };
    assert_eq!(
        errors,
        vec![
            "$.title: expected string, found integer".to_string(),
            "$.body: expected text, found string".to_string(),
        ]
    );
    assert_eq!(json(&d), json!({}));
}

#[test]
fn rejected_batch_leaves_no_trace() {
    let mut d = seeded(1);
    let before = d.to_sorted_json();
    let id_before = *d.change_id();
    let body = ticket_at(&d, "$.body");
    let outline = ticket_at(&d, "$.outline");

    let err = d
        .update(None, |ctx| {
            ctx.edit_text(body, 0, 5, "bye", None)?;
            ctx.style_text(body, 0, 3, &BTreeMap::from([("bold".to_string(), json!(true))]))?;
            ctx.edit_tree(outline, 1, 1, &[TreeNodeSpec::text("zero ")], 0)?;
            ctx.set_field(ROOT, "extra", json!([1, 2]))?;
            ctx.remove_field(ROOT, "title")?;
            ctx.set_field(ROOT, "body", json!(42))?;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, DocError::SchemaValidation(_)));

    assert_eq!(d.to_sorted_json(), before);
    assert_eq!(text_at(&d, "$.body"), "hello");
    assert_eq!(xml_at(&d, "$.outline"), "<doc><p>one</p></doc>");
    assert_eq!(d.change_id().client_seq, id_before.client_seq);
    assert!(d.change_id().lamport > id_before.lamport);
    assert_eq!(d.local_changes().len(), 1);

    d.undo().unwrap();
    assert_eq!(json(&d), json!({}));
}

#[test]
fn edits_after_a_rejection_replicate() {
    let mut a = seeded(1);
    let mut b = guarded(2);
    send(&mut a, &mut b);
    let body = ticket_at(&a, "$.body");

    a.update(None, |ctx| {
        ctx.edit_text(body, 5, 5, " world", None)?;
        ctx.set_field(ROOT, "title", json!(null))?;
        Ok(())
    })
    .unwrap_err();
    a.update(None, |ctx| {
        ctx.edit_text(body, 5, 5, "!", None)?;
        ctx.set_field(ROOT, "title", json!("final"))?;
        Ok(())
    })
    .unwrap();
    send(&mut a, &mut b);

    assert_eq!(text_at(&b, "$.body"), "hello!");
    assert_eq!(json(&b)["title"], "final");
    assert_eq!(a.to_sorted_json(), b.to_sorted_json());
}

#[test]
fn remote_changes_are_not_validated() {
    let mut plain = common::doc(1);
    let mut d = guarded(2);
    plain
        .update(None, |ctx| ctx.set_field(ROOT, "title", json!(1)).map(|_| ()))
        .unwrap();
    send(&mut plain, &mut d);
    assert_eq!(json(&d), json!({"title": 1}));
}

#[test]
fn schema_from_options_json() {
    init_test_logging();
    let options =
        DocumentOptions::from_json(r#"{"schema": {"rules": [{"path": "$.n", "type": "counter"}]}}"#)
            .unwrap();
    let mut d = Document::with_options("from-json", options);
    let err = d
        .update(None, |ctx| ctx.set_field(ROOT, "n", json!(0)).map(|_| ()))
        .unwrap_err();
    assert!(matches!(err, DocError::SchemaValidation(_)));
    assert!(!d.has_local_changes());
}
