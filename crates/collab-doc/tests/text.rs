mod common;

use std::collections::BTreeMap;

use collab_doc::{ElementInit, OpInfo};
use common::{doc, json, send, sync_all, text_at, ticket_at, ROOT};
use serde_json::json;

fn with_text(content: &str) -> collab_doc::Document {
    let mut d = doc(1);
    d.update(None, |ctx| {
        ctx.set_field(ROOT, "t", ElementInit::text(content))?;
        Ok(())
    })
    .unwrap();
    d
}

#[test]
fn replace_reports_the_edit() {
    let mut d = with_text("ABCD");
    let t = ticket_at(&d, "$.t");
    let infos = d
        .update(None, |ctx| ctx.edit_text(t, 1, 3, "12", None))
        .unwrap();
    assert_eq!(text_at(&d, "$.t"), "A12D");
    let [OpInfo::Edit { path, from, to, value: Some(value) }] = &infos[..] else {
        panic!("expected one edit, got {infos:?}");
    };
    assert_eq!((path.as_str(), *from, *to), ("$.t", 1, 3));
    assert_eq!(value.content, "12");
}

#[test]
fn out_of_range_edit_is_rejected() {
    let mut d = with_text("ab");
    let t = ticket_at(&d, "$.t");
    let err = d.update(None, |ctx| ctx.edit_text(t, 1, 5, "x", None)).unwrap_err();
    assert!(matches!(err, collab_doc::DocError::InvalidArgument(_)));
    assert_eq!(text_at(&d, "$.t"), "ab");
}

#[test]
fn concurrent_inserts_at_the_same_place_converge() {
    let mut a = with_text("ab");
    let mut b = doc(2);
    send(&mut a, &mut b);
    let t = ticket_at(&a, "$.t");

    a.update(None, |ctx| ctx.edit_text(t, 1, 1, "x", None)).unwrap();
    b.update(None, |ctx| ctx.edit_text(t, 1, 1, "y", None)).unwrap();
    let mut docs = [a, b];
    sync_all(&mut docs);

    let [a, b] = &docs;
    assert_eq!(a.to_sorted_json(), b.to_sorted_json());
    let merged = text_at(a, "$.t");
    assert_eq!(merged.len(), 4);
    assert!(merged.starts_with('a') && merged.ends_with('b'));
}

#[test]
fn deletion_spares_concurrent_insertions() {
    let mut a = with_text("ABCD");
    let mut b = doc(2);
    send(&mut a, &mut b);
    let t = ticket_at(&a, "$.t");

    a.update(None, |ctx| ctx.edit_text(t, 1, 3, "", None)).unwrap();
    b.update(None, |ctx| ctx.edit_text(t, 2, 2, "Z", None)).unwrap();
    let mut docs = [a, b];
    sync_all(&mut docs);

    assert_eq!(text_at(&docs[0], "$.t"), "AZD");
    assert_eq!(text_at(&docs[1], "$.t"), "AZD");
}

#[test]
fn styles_show_up_in_the_projection() {
    let mut d = with_text("ABCD");
    let t = ticket_at(&d, "$.t");
    let bold = BTreeMap::from([("bold".to_owned(), json!(true))]);
    let infos = d.update(None, |ctx| ctx.style_text(t, 1, 3, &bold)).unwrap();
    assert!(matches!(&infos[..], [OpInfo::Style { from: 1, to: 3, .. }]));
    assert_eq!(
        json(&d),
        json!({"t": [{"val": "A"}, {"attrs": {"bold": true}, "val": "BC"}, {"val": "D"}]})
    );

    d.update(None, |ctx| ctx.remove_text_style(t, 0, 4, &["bold".to_owned()]))
        .unwrap();
    assert_eq!(text_at(&d, "$.t"), "ABCD");
    assert!(!d.to_json().contains("bold"));
}

#[test]
fn styled_insertions_carry_attributes() {
    let mut d = with_text("");
    let t = ticket_at(&d, "$.t");
    let italic = BTreeMap::from([("italic".to_owned(), json!(true))]);
    d.update(None, |ctx| ctx.edit_text(t, 0, 0, "hi", Some(&italic)))
        .unwrap();
    assert_eq!(json(&d), json!({"t": [{"attrs": {"italic": true}, "val": "hi"}]}));
}
