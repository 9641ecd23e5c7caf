mod common;

use std::collections::BTreeMap;

use collab_doc::crdt::CounterValue;
use collab_doc::{Change, Document, ElementInit, TimeTicket, TreeNodeSpec};
use common::{doc, json, text_at, ticket_at, xml_at, ROOT};
use proptest::prelude::*;
use serde_json::json;

#[derive(Debug, Clone)]
enum Action {
    SetKey(u8, i32),
    RemoveKey(u8),
    Push(i32),
    InsertItem(usize, i32),
    DeleteItem(usize),
    MoveItem(usize, usize),
    InsertText(usize, String),
    DeleteText(usize, usize),
    StyleText(usize, usize, bool),
    UnstyleText(usize, usize),
    Increase(i32),
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0u8..3, -100i32..100).prop_map(|(k, v)| Action::SetKey(k, v)),
        (0u8..3).prop_map(Action::RemoveKey),
        (-100i32..100).prop_map(Action::Push),
        (0usize..10, -100i32..100).prop_map(|(i, v)| Action::InsertItem(i, v)),
        (0usize..10).prop_map(Action::DeleteItem),
        (0usize..10, 0usize..10).prop_map(|(a, b)| Action::MoveItem(a, b)),
        (0usize..10, "[a-z]{1,4}").prop_map(|(i, s)| Action::InsertText(i, s)),
        (0usize..10, 1usize..4).prop_map(|(i, n)| Action::DeleteText(i, n)),
        (0usize..10, 1usize..4, any::<bool>()).prop_map(|(i, n, b)| Action::StyleText(i, n, b)),
        (0usize..10, 1usize..4).prop_map(|(i, n)| Action::UnstyleText(i, n)),
        (-10i32..10).prop_map(Action::Increase),
    ]
}

fn apply(d: &mut Document, action: &Action) {
    let list = ticket_at(d, "$.list");
    let text = ticket_at(d, "$.text");
    let counter = ticket_at(d, "$.counter");
    let items: Vec<TimeTicket> = d
        .root()
        .find(&list)
        .and_then(|e| e.as_array())
        .map(|a| a.iter().map(|e| e.created_at()).collect())
        .unwrap_or_default();
    let text_len = text_at(d, "$.text").chars().count();
    d.update(None, |ctx| {
        match action {
            Action::SetKey(k, v) => {
                ctx.set_field(ROOT, &format!("k{k}"), json!(v))?;
            }
            Action::RemoveKey(k) => {
                ctx.remove_field(ROOT, &format!("k{k}"))?;
            }
            Action::Push(v) => {
                ctx.push_item(list, json!(v))?;
            }
            Action::InsertItem(i, v) => {
                ctx.insert_item(list, i % (items.len() + 1), json!(v))?;
            }
            Action::DeleteItem(i) if !items.is_empty() => {
                ctx.delete_by_id(list, items[i % items.len()])?;
            }
            Action::MoveItem(from, to) if items.len() > 1 => {
                let target = items[from % items.len()];
                let prev = match to % (items.len() + 1) {
                    0 => ROOT,
                    j => items[j - 1],
                };
                if prev != target {
                    ctx.move_item_after(list, prev, target)?;
                }
            }
            Action::InsertText(i, s) => {
                let at = i % (text_len + 1);
                ctx.edit_text(text, at, at, s, None)?;
            }
            Action::DeleteText(i, n) if text_len > 0 => {
                let from = i % text_len;
                ctx.edit_text(text, from, (from + n).min(text_len), "", None)?;
            }
            Action::StyleText(i, n, bold) if text_len > 0 => {
                let from = i % text_len;
                let attributes = BTreeMap::from([("bold".to_owned(), json!(bold))]);
                ctx.style_text(text, from, (from + n).min(text_len), &attributes)?;
            }
            Action::UnstyleText(i, n) if text_len > 0 => {
                let from = i % text_len;
                ctx.remove_text_style(text, from, (from + n).min(text_len), &["bold".to_owned()])?;
            }
            Action::Increase(v) => ctx.increase_counter(counter, *v)?,
            _ => {}
        }
        Ok(())
    })
    .unwrap();
}

/// Each replica receives the others' changes starting from a different
/// replica, so delivery orders differ between receivers.
fn exchange(docs: &mut [Document]) {
    let pending: Vec<Vec<Change>> = docs.iter_mut().map(Document::take_local_changes).collect();
    let n = docs.len();
    for (i, doc) in docs.iter_mut().enumerate() {
        for k in 1..n {
            let j = (i + k) % n;
            doc.apply_changes(&pending[j]).unwrap();
        }
    }
}

fn replicas(n: u8) -> Vec<Document> {
    let mut docs: Vec<Document> = (1..=n).map(doc).collect();
    docs[0]
        .update(None, |ctx| {
            ctx.set_field(ROOT, "list", json!([]))?;
            ctx.set_field(ROOT, "text", ElementInit::text(""))?;
            ctx.set_field(ROOT, "counter", ElementInit::Counter(CounterValue::Long(0)))?;
            let tree = TreeNodeSpec::element("doc").with_children(vec![paragraph("ab")]);
            ctx.set_field(ROOT, "tree", ElementInit::Tree(tree))?;
            Ok(())
        })
        .unwrap();
    exchange(&mut docs);
    docs
}

fn paragraph(text: &str) -> TreeNodeSpec {
    TreeNodeSpec::element("p").with_children(vec![TreeNodeSpec::text(text)])
}

// ── trees ─────────────────────────────────────────────────────────────────

/// Every top-level child of `$.tree` is a paragraph of text nodes; actions
/// name a paragraph and an offset into its text.
#[derive(Debug, Clone)]
enum TreeAction {
    InsertText(usize, usize, String),
    InsertParagraph(usize, String),
    DeleteText(usize, usize, usize),
    DropParagraph(usize),
    Split(usize, usize),
    Style(usize, u8, bool),
    Unstyle(usize, u8),
}

fn tree_action() -> impl Strategy<Value = TreeAction> {
    prop_oneof![
        (0usize..4, 0usize..6, "[a-z]{1,3}").prop_map(|(p, o, s)| TreeAction::InsertText(p, o, s)),
        (0usize..5, "[a-z]{1,3}").prop_map(|(b, s)| TreeAction::InsertParagraph(b, s)),
        (0usize..4, 0usize..6, 1usize..3).prop_map(|(p, o, n)| TreeAction::DeleteText(p, o, n)),
        (0usize..4).prop_map(TreeAction::DropParagraph),
        (0usize..4, 0usize..6).prop_map(|(p, o)| TreeAction::Split(p, o)),
        (0usize..4, 0u8..2, any::<bool>()).prop_map(|(p, k, v)| TreeAction::Style(p, k, v)),
        (0usize..4, 0u8..2).prop_map(|(p, k)| TreeAction::Unstyle(p, k)),
    ]
}

/// `(start index, text length)` of each paragraph.
fn paragraphs(d: &Document, tree: TimeTicket) -> Vec<(usize, usize)> {
    let value = d
        .root()
        .find(&tree)
        .and_then(|e| e.as_tree())
        .map(|t| t.to_json_value())
        .unwrap_or_default();
    let mut out = Vec::new();
    let mut at = 0;
    for p in value["children"].as_array().into_iter().flatten() {
        let len: usize = p["children"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|c| c["value"].as_str().map_or(0, |s| s.chars().count()))
            .sum();
        out.push((at, len));
        at += len + 2;
    }
    out
}

fn apply_tree(d: &mut Document, action: &TreeAction) {
    let tree = ticket_at(d, "$.tree");
    let paras = paragraphs(d, tree);
    let end = paras.last().map_or(0, |&(at, len)| at + len + 2);
    let pick = |i: usize| paras.get(i % paras.len().max(1)).copied();
    d.update(None, |ctx| {
        match action {
            TreeAction::InsertText(p, offset, s) => {
                if let Some((at, len)) = pick(*p) {
                    let i = at + 1 + offset % (len + 1);
                    ctx.edit_tree(tree, i, i, &[TreeNodeSpec::text(s.as_str())], 0)?;
                }
            }
            TreeAction::InsertParagraph(b, s) => {
                let i = paras.get(b % (paras.len() + 1)).map_or(end, |&(at, _)| at);
                ctx.edit_tree(tree, i, i, &[paragraph(s)], 0)?;
            }
            TreeAction::DeleteText(p, offset, n) => {
                if let Some((at, len)) = pick(*p).filter(|&(_, len)| len > 0) {
                    let from = offset % len;
                    let to = (from + n).min(len);
                    ctx.edit_tree(tree, at + 1 + from, at + 1 + to, &[], 0)?;
                }
            }
            TreeAction::DropParagraph(p) => {
                if let Some((at, len)) = pick(*p) {
                    ctx.edit_tree(tree, at, at + len + 2, &[], 0)?;
                }
            }
            TreeAction::Split(p, offset) => {
                if let Some((at, len)) = pick(*p) {
                    let i = at + 1 + offset % (len + 1);
                    ctx.edit_tree(tree, i, i, &[], 1)?;
                }
            }
            TreeAction::Style(p, k, v) => {
                if let Some((at, _)) = pick(*p) {
                    let attributes = BTreeMap::from([(format!("a{k}"), json!(v))]);
                    ctx.style_tree(tree, at, at + 1, &attributes)?;
                }
            }
            TreeAction::Unstyle(p, k) => {
                if let Some((at, _)) = pick(*p) {
                    ctx.remove_tree_style(tree, at, at + 1, &[format!("a{k}")])?;
                }
            }
        }
        Ok(())
    })
    .unwrap();
}

fn tree_rounds() -> impl Strategy<Value = Vec<Vec<Vec<TreeAction>>>> {
    prop::collection::vec(
        prop::collection::vec(prop::collection::vec(tree_action(), 0..4), 3),
        1..4,
    )
}

type Round = Vec<Vec<Action>>;

fn rounds() -> impl Strategy<Value = Vec<Round>> {
    prop::collection::vec(
        prop::collection::vec(prop::collection::vec(action(), 0..5), 3),
        1..4,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn replicas_converge_after_exchanging_changes(rounds in rounds(), collect in any::<bool>()) {
        let mut docs = replicas(3);
        for round in &rounds {
            for (d, actions) in docs.iter_mut().zip(round) {
                for a in actions {
                    apply(d, a);
                }
            }
            exchange(&mut docs);
            let expected = docs[0].to_sorted_json();
            for d in &docs[1..] {
                prop_assert_eq!(&d.to_sorted_json(), &expected);
            }
            if collect {
                for d in docs.iter_mut() {
                    d.garbage_collect(&TimeTicket::MAX);
                    prop_assert_eq!(d.garbage_len(), 0);
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn tree_replicas_converge_after_exchanging_changes(rounds in tree_rounds(), collect in any::<bool>()) {
        let mut docs = replicas(3);
        for round in &rounds {
            for (d, actions) in docs.iter_mut().zip(round) {
                for a in actions {
                    apply_tree(d, a);
                }
            }
            exchange(&mut docs);
            let expected = xml_at(&docs[0], "$.tree");
            for d in &docs[1..] {
                prop_assert_eq!(&xml_at(d, "$.tree"), &expected);
            }
            if collect {
                for d in docs.iter_mut() {
                    d.garbage_collect(&TimeTicket::MAX);
                    prop_assert_eq!(d.garbage_len(), 0);
                }
            }
        }
    }
}

#[test]
fn counter_increments_commute() {
    let mut docs = replicas(3);
    let counter = ticket_at(&docs[0], "$.counter");
    for (i, d) in docs.iter_mut().enumerate() {
        let delta = (i as i64 + 1) * 10;
        d.update(None, |ctx| ctx.increase_counter(counter, delta)).unwrap();
    }
    exchange(&mut docs);
    for d in &docs {
        assert_eq!(json(d)["counter"], json!(60));
    }
}

#[test]
fn last_writer_wins_on_the_same_key() {
    let mut docs = replicas(2);
    docs[0]
        .update(None, |ctx| ctx.set_field(ROOT, "k", json!("first")).map(|_| ()))
        .unwrap();
    docs[1]
        .update(None, |ctx| ctx.set_field(ROOT, "k", json!("second")).map(|_| ()))
        .unwrap();
    exchange(&mut docs);
    assert_eq!(docs[0].to_sorted_json(), docs[1].to_sorted_json());
    // same lamport, so the larger actor wins
    assert_eq!(json(&docs[0])["k"], json!("second"));
}
