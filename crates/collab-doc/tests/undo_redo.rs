mod common;

use collab_doc::crdt::CounterValue;
use collab_doc::{DocError, Document, ElementInit, TreeNodeSpec};
use common::{doc, json, send, sync_all, text_at, ticket_at, xml_at, ROOT};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Undoes everything, checking each earlier state on the way back, then
/// redoes everything, checking each later state.
fn walk_history(d: &mut Document, states: &[Value]) {
    for expected in states.iter().rev().skip(1) {
        d.undo().unwrap();
        assert_eq!(&json(d), expected);
    }
    assert!(!d.can_undo());
    for expected in states.iter().skip(1) {
        d.redo().unwrap();
        assert_eq!(&json(d), expected);
    }
    assert!(!d.can_redo());
}

#[test]
fn nested_values_round_trip_through_history() {
    let mut d = doc(1);
    let mut states = vec![json(&d)];
    d.update(None, |ctx| ctx.set_field(ROOT, "a", json!(1)).map(|_| ())).unwrap();
    states.push(json(&d));
    d.update(None, |ctx| ctx.set_field(ROOT, "b", json!({"c": [1, 2]})).map(|_| ()))
        .unwrap();
    states.push(json(&d));
    let c = ticket_at(&d, "$.b.c");
    d.update(None, |ctx| ctx.push_item(c, json!(3)).map(|_| ())).unwrap();
    states.push(json(&d));
    d.update(None, |ctx| ctx.set_field(ROOT, "a", json!(2)).map(|_| ())).unwrap();
    states.push(json(&d));
    d.update(None, |ctx| ctx.remove_field(ROOT, "b").map(|_| ())).unwrap();
    states.push(json(&d));
    assert_eq!(json(&d), json!({"a": 2}));

    walk_history(&mut d, &states);
    assert_eq!(json(&d), json!({"a": 2}));
}

#[test]
fn chained_text_edits_step_back_in_order() {
    let mut d = doc(1);
    d.update(None, |ctx| ctx.set_field(ROOT, "t", ElementInit::text("")).map(|_| ()))
        .unwrap();
    let t = ticket_at(&d, "$.t");
    let mut states = vec![text_at(&d, "$.t")];
    for (from, to, content) in [(0, 0, "abc"), (1, 2, ""), (0, 1, "XY")] {
        d.update(None, |ctx| ctx.edit_text(t, from, to, content, None)).unwrap();
        states.push(text_at(&d, "$.t"));
    }
    assert_eq!(states, vec!["", "abc", "ac", "XYc"]);

    for expected in states.iter().rev().skip(1) {
        d.undo().unwrap();
        assert_eq!(&text_at(&d, "$.t"), expected);
    }
    for expected in states.iter().skip(1) {
        d.redo().unwrap();
        assert_eq!(&text_at(&d, "$.t"), expected);
    }
}

#[test]
fn counter_and_move_are_reversed() {
    let mut d = doc(1);
    d.update(None, |ctx| {
        ctx.set_field(ROOT, "n", ElementInit::Counter(CounterValue::Integer(10)))?;
        ctx.set_field(ROOT, "list", json!(["a", "b", "c"]))?;
        Ok(())
    })
    .unwrap();
    let n = ticket_at(&d, "$.n");
    let list = ticket_at(&d, "$.list");
    let c = ticket_at(&d, "$.list[2]");
    d.update(None, |ctx| {
        ctx.increase_counter(n, 5)?;
        ctx.move_item_after(list, ROOT, c)
    })
    .unwrap();
    assert_eq!(json(&d), json!({"n": 15, "list": ["c", "a", "b"]}));
    d.undo().unwrap();
    assert_eq!(json(&d), json!({"n": 10, "list": ["a", "b", "c"]}));
    d.redo().unwrap();
    assert_eq!(json(&d), json!({"n": 15, "list": ["c", "a", "b"]}));
}

#[test]
fn deleted_paragraph_comes_back() {
    let mut d = doc(1);
    d.update(None, |ctx| {
        let root = TreeNodeSpec::element("doc").with_children(vec![
            TreeNodeSpec::element("p").with_children(vec![TreeNodeSpec::text("ab")]),
            TreeNodeSpec::element("p").with_children(vec![TreeNodeSpec::text("cd")]),
        ]);
        ctx.set_field(ROOT, "t", ElementInit::Tree(root)).map(|_| ())
    })
    .unwrap();
    let t = ticket_at(&d, "$.t");
    d.update(None, |ctx| ctx.edit_tree(t, 4, 8, &[], 0)).unwrap();
    d.update(None, |ctx| ctx.edit_tree(t, 1, 1, &[TreeNodeSpec::text("x")], 0))
        .unwrap();
    assert_eq!(xml_at(&d, "$.t"), "<doc><p>xab</p></doc>");
    d.undo().unwrap();
    assert_eq!(xml_at(&d, "$.t"), "<doc><p>ab</p></doc>");
    d.undo().unwrap();
    assert_eq!(xml_at(&d, "$.t"), "<doc><p>ab</p><p>cd</p></doc>");
    d.redo().unwrap();
    assert_eq!(xml_at(&d, "$.t"), "<doc><p>ab</p></doc>");
}

#[test]
fn presence_is_restored() {
    let mut d = doc(1);
    d.update(None, |ctx| {
        ctx.set_presence("color", json!("red"));
        Ok(())
    })
    .unwrap();
    assert!(!d.can_undo());
    d.update(None, |ctx| {
        ctx.set_presence("color", json!("blue"));
        Ok(())
    })
    .unwrap();
    d.undo().unwrap();
    assert_eq!(d.my_presence().unwrap()["color"], json!("red"));
    d.redo().unwrap();
    assert_eq!(d.my_presence().unwrap()["color"], json!("blue"));
}

#[test]
fn undo_skips_targets_removed_remotely() {
    let mut a = doc(1);
    let mut b = doc(2);
    a.update(None, |ctx| ctx.set_field(ROOT, "obj", json!({"x": 1})).map(|_| ()))
        .unwrap();
    send(&mut a, &mut b);
    let obj = ticket_at(&a, "$.obj");
    a.update(None, |ctx| ctx.set_field(obj, "x", json!(2)).map(|_| ())).unwrap();
    b.update(None, |ctx| ctx.remove_field(ROOT, "obj").map(|_| ())).unwrap();
    let mut docs = [a, b];
    sync_all(&mut docs);
    let [a, b] = &mut docs;
    assert_eq!(json(a), json!({}));

    assert!(a.undo().unwrap().is_empty());
    assert!(a.can_undo());
    a.undo().unwrap();
    send(a, b);
    assert_eq!(a.to_sorted_json(), b.to_sorted_json());
}

#[test]
fn undo_only_touches_local_changes() {
    let mut a = doc(1);
    let mut b = doc(2);
    a.update(None, |ctx| ctx.set_field(ROOT, "mine", json!(1)).map(|_| ())).unwrap();
    b.update(None, |ctx| ctx.set_field(ROOT, "theirs", json!(2)).map(|_| ()))
        .unwrap();
    let mut docs = [a, b];
    sync_all(&mut docs);
    docs[0].undo().unwrap();
    assert!(matches!(docs[0].undo(), Err(DocError::Refused(_))));
    sync_all(&mut docs);
    assert_eq!(json(&docs[0]), json!({"theirs": 2}));
    assert_eq!(json(&docs[1]), json!({"theirs": 2}));
}

#[test]
fn redo_chain_lands_where_it_was_typed() {
    let mut d = doc(1);
    d.update(None, |ctx| ctx.set_field(ROOT, "t", ElementInit::text("abcd")).map(|_| ()))
        .unwrap();
    let t = ticket_at(&d, "$.t");
    d.update(None, |ctx| ctx.edit_text(t, 0, 0, "aaa", None)).unwrap();
    d.update(None, |ctx| ctx.edit_text(t, 1, 1, "b", None)).unwrap();
    assert_eq!(text_at(&d, "$.t"), "abaaabcd");
    d.undo().unwrap();
    d.undo().unwrap();
    assert_eq!(text_at(&d, "$.t"), "abcd");
    d.redo().unwrap();
    assert_eq!(text_at(&d, "$.t"), "aaaabcd");
    d.redo().unwrap();
    assert_eq!(text_at(&d, "$.t"), "abaaabcd");
    d.undo().unwrap();
    assert_eq!(text_at(&d, "$.t"), "aaaabcd");
}

#[test]
fn insert_inside_a_restored_paragraph_is_undone() {
    let mut d = doc(1);
    d.update(None, |ctx| {
        let root = TreeNodeSpec::element("doc").with_children(vec![
            TreeNodeSpec::element("p").with_children(vec![TreeNodeSpec::text("ab")]),
            TreeNodeSpec::element("p").with_children(vec![TreeNodeSpec::text("cd")]),
        ]);
        ctx.set_field(ROOT, "t", ElementInit::Tree(root)).map(|_| ())
    })
    .unwrap();
    let t = ticket_at(&d, "$.t");
    d.update(None, |ctx| ctx.edit_tree(t, 1, 1, &[TreeNodeSpec::text("a")], 0))
        .unwrap();
    d.update(None, |ctx| ctx.edit_tree(t, 0, 5, &[], 0)).unwrap();
    assert_eq!(xml_at(&d, "$.t"), "<doc><p>cd</p></doc>");
    d.undo().unwrap();
    assert_eq!(xml_at(&d, "$.t"), "<doc><p>aab</p><p>cd</p></doc>");
    d.undo().unwrap();
    assert_eq!(xml_at(&d, "$.t"), "<doc><p>ab</p><p>cd</p></doc>");
    d.redo().unwrap();
    d.redo().unwrap();
    assert_eq!(xml_at(&d, "$.t"), "<doc><p>cd</p></doc>");
}

#[test]
fn remote_edits_shift_local_history() {
    let mut a = doc(1);
    let mut b = doc(2);
    a.update(None, |ctx| ctx.set_field(ROOT, "t", ElementInit::text("abc")).map(|_| ()))
        .unwrap();
    send(&mut a, &mut b);
    let t = ticket_at(&a, "$.t");
    a.update(None, |ctx| ctx.edit_text(t, 1, 2, "X", None)).unwrap();
    b.update(None, |ctx| ctx.edit_text(t, 0, 0, "123", None)).unwrap();
    let mut docs = [a, b];
    sync_all(&mut docs);
    assert_eq!(text_at(&docs[0], "$.t"), "123aXc");

    docs[0].undo().unwrap();
    assert_eq!(text_at(&docs[0], "$.t"), "123abc");
    docs[1].update(None, |ctx| ctx.edit_text(t, 0, 2, "", None)).unwrap();
    sync_all(&mut docs);
    docs[0].redo().unwrap();
    sync_all(&mut docs);
    assert_eq!(text_at(&docs[0], "$.t"), "3aXc");
    assert_eq!(docs[0].to_sorted_json(), docs[1].to_sorted_json());
}

#[derive(Debug, Clone)]
enum Step {
    Set(u8, i32),
    Remove(u8),
    Push(i32),
    DeleteItem(usize),
    Insert(usize, String),
    Delete(usize, usize),
    Increase(i32),
    Paragraph(String),
    ParagraphText(String),
    DropParagraph,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u8..3, any::<i32>()).prop_map(|(k, v)| Step::Set(k, v)),
        (0u8..3).prop_map(Step::Remove),
        any::<i32>().prop_map(Step::Push),
        (0usize..8).prop_map(Step::DeleteItem),
        (0usize..8, "[a-z]{1,3}").prop_map(|(i, s)| Step::Insert(i, s)),
        (0usize..8, 1usize..4).prop_map(|(i, n)| Step::Delete(i, n)),
        (-5i32..5).prop_map(Step::Increase),
        "[a-z]{1,3}".prop_map(Step::Paragraph),
        "[a-z]{1,3}".prop_map(Step::ParagraphText),
        Just(Step::DropParagraph),
    ]
}

/// Applies `step` as one update; `false` when it changed nothing.
fn apply(d: &mut Document, step: &Step) -> bool {
    let before = d.local_changes().len();
    let list = ticket_at(d, "$.list");
    let text = ticket_at(d, "$.text");
    let counter = ticket_at(d, "$.counter");
    let list_len = d.root().find(&list).and_then(|e| e.as_array()).map_or(0, |a| a.len());
    let text_len = text_at(d, "$.text").chars().count();
    let tree = ticket_at(d, "$.tree");
    let tree_json = d.root().find(&tree).and_then(|e| e.as_tree()).map(|t| t.to_json_value());
    // every top-level child is a paragraph of text nodes
    let first_size = tree_json.as_ref().and_then(|v| v["children"].get(0)).map(|p| {
        let chars: usize = p["children"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|c| c["value"].as_str().map_or(0, |s| s.chars().count()))
            .sum();
        chars + 2
    });
    d.update(None, |ctx| {
        match step {
            Step::Set(k, v) => {
                ctx.set_field(ROOT, &format!("k{k}"), json!(v))?;
            }
            Step::Remove(k) => {
                ctx.remove_field(ROOT, &format!("k{k}"))?;
            }
            Step::Push(v) => {
                ctx.push_item(list, json!(v))?;
            }
            Step::DeleteItem(i) if list_len > 0 => {
                ctx.delete_by_index(list, i % list_len)?;
            }
            Step::Insert(i, s) => {
                let at = i % (text_len + 1);
                ctx.edit_text(text, at, at, s, None)?;
            }
            Step::Delete(i, n) if text_len > 0 => {
                let from = i % text_len;
                ctx.edit_text(text, from, (from + n).min(text_len), "", None)?;
            }
            Step::Increase(v) => ctx.increase_counter(counter, *v)?,
            Step::Paragraph(s) => {
                let p = TreeNodeSpec::element("p").with_children(vec![TreeNodeSpec::text(s.as_str())]);
                ctx.edit_tree(tree, 0, 0, &[p], 0)?;
            }
            Step::ParagraphText(s) if first_size.is_some() => {
                ctx.edit_tree(tree, 1, 1, &[TreeNodeSpec::text(s.as_str())], 0)?;
            }
            Step::DropParagraph => {
                if let Some(size) = first_size {
                    ctx.edit_tree(tree, 0, size, &[], 0)?;
                }
            }
            _ => {}
        }
        Ok(())
    })
    .unwrap();
    d.local_changes().len() > before
}

/// Document JSON with the text and the tree read as plain strings; run and
/// text-node boundaries are not part of the content.
fn state(d: &Document) -> Value {
    let mut value = json(d);
    value["text"] = Value::String(text_at(d, "$.text"));
    value["tree"] = Value::String(xml_at(d, "$.tree"));
    value
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn undoing_every_change_restores_every_state(steps in prop::collection::vec(step(), 1..12)) {
        let mut d = Document::with_options("prop", collab_doc::DocumentOptions {
            max_undo_depth: 64,
            ..Default::default()
        });
        d.update(None, |ctx| {
            ctx.set_field(ROOT, "list", json!([]))?;
            ctx.set_field(ROOT, "text", ElementInit::text(""))?;
            ctx.set_field(ROOT, "counter", ElementInit::Counter(CounterValue::Long(0)))?;
            ctx.set_field(ROOT, "tree", ElementInit::Tree(TreeNodeSpec::element("doc")))?;
            Ok(())
        }).unwrap();
        let mut states = vec![state(&d)];
        for s in &steps {
            if apply(&mut d, s) {
                states.push(state(&d));
            }
        }
        for expected in states.iter().rev().skip(1) {
            d.undo().unwrap();
            prop_assert_eq!(&state(&d), expected);
        }
        for expected in states.iter().skip(1) {
            d.redo().unwrap();
            prop_assert_eq!(&state(&d), expected);
        }
        prop_assert!(!d.can_redo());
    }
}
