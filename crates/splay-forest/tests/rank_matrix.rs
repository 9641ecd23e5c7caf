use proptest::prelude::*;

use splay_forest::types::{Node, WeightedNode};
use splay_forest::{find, first, index_of, insert_after, locate, next, remove};

#[derive(Clone, Debug)]
struct TestNode {
    p: Option<u32>,
    l: Option<u32>,
    r: Option<u32>,
    len: usize,
    weight: usize,
}

impl TestNode {
    fn new(len: usize) -> Self {
        Self {
            p: None,
            l: None,
            r: None,
            len,
            weight: len,
        }
    }
}

impl Node for TestNode {
    fn p(&self) -> Option<u32> {
        self.p
    }

    fn l(&self) -> Option<u32> {
        self.l
    }

    fn r(&self) -> Option<u32> {
        self.r
    }

    fn set_p(&mut self, v: Option<u32>) {
        self.p = v;
    }

    fn set_l(&mut self, v: Option<u32>) {
        self.l = v;
    }

    fn set_r(&mut self, v: Option<u32>) {
        self.r = v;
    }
}

impl WeightedNode for TestNode {
    fn len(&self) -> usize {
        self.len
    }

    fn weight(&self) -> usize {
        self.weight
    }

    fn set_weight(&mut self, weight: usize) {
        self.weight = weight;
    }
}

fn in_order(arena: &[TestNode], root: Option<u32>) -> Vec<u32> {
    let mut out = Vec::new();
    let mut curr = first(arena, root);
    while let Some(idx) = curr {
        out.push(idx);
        curr = next(arena, idx);
    }
    out
}

#[test]
fn insert_after_keeps_sequence_order() {
    let mut arena = vec![TestNode::new(0), TestNode::new(3), TestNode::new(2), TestNode::new(4)];
    let mut root = insert_after(&mut arena, None, None, 0);
    root = insert_after(&mut arena, root, Some(0), 1);
    root = insert_after(&mut arena, root, Some(1), 2);
    root = insert_after(&mut arena, root, Some(0), 3);
    assert_eq!(in_order(&arena, root), vec![0, 3, 1, 2]);
    assert_eq!(arena[root.unwrap() as usize].weight, 9);
    assert_eq!(index_of(&arena, 1), 4);
    assert_eq!(index_of(&arena, 2), 7);
}

#[test]
fn find_prefers_the_left_node_on_boundaries() {
    let mut arena = vec![TestNode::new(0), TestNode::new(3), TestNode::new(2)];
    let mut root = insert_after(&mut arena, None, None, 0);
    root = insert_after(&mut arena, root, Some(0), 1);
    root = insert_after(&mut arena, root, Some(1), 2);
    assert_eq!(locate(&arena, root, 0), Some((0, 0)));
    assert_eq!(locate(&arena, root, 3), Some((1, 3)));
    assert_eq!(locate(&arena, root, 4), Some((2, 1)));
    assert_eq!(locate(&arena, root, 5), Some((2, 2)));
    assert_eq!(locate(&arena, root, 6), None);
}

#[test]
fn find_splays_the_found_node() {
    let mut arena: Vec<TestNode> = (0..6).map(|i| TestNode::new(i % 3)).collect();
    let mut root = insert_after(&mut arena, None, None, 0);
    for idx in 1..6 {
        root = insert_after(&mut arena, root, Some(idx - 1), idx);
    }
    assert_eq!(root, Some(5));
    // lengths 0 1 2 0 1 2: position 2 is inside node 2
    assert_eq!(find(&mut arena, &mut root, 2), Some((2, 1)));
    assert_eq!(root, Some(2));
    assert_eq!(arena[2].p, None);
    assert_eq!(arena[2].weight, 6);
    assert_eq!(in_order(&arena, root), (0..6).collect::<Vec<_>>());
    assert_eq!(find(&mut arena, &mut root, 7), None);
    assert_eq!(root, Some(2));
}

#[test]
fn remove_detaches_and_reweights() {
    let mut arena = vec![TestNode::new(1), TestNode::new(1), TestNode::new(1)];
    let mut root = insert_after(&mut arena, None, None, 0);
    root = insert_after(&mut arena, root, Some(0), 1);
    root = insert_after(&mut arena, root, Some(1), 2);
    root = remove(&mut arena, root, 1);
    assert_eq!(in_order(&arena, root), vec![0, 2]);
    assert_eq!(arena[root.unwrap() as usize].weight, 2);
    assert_eq!(arena[1].p, None);
    assert_eq!(index_of(&arena, 2), 1);
}

proptest! {
    #[test]
    fn matches_a_vector_model(
        steps in proptest::collection::vec((0usize..64, 0usize..5), 1..64)
    ) {
        let mut arena = vec![TestNode::new(0)];
        let mut root = insert_after(&mut arena, None, None, 0);
        let mut model: Vec<u32> = vec![0];
        for (at, len) in steps {
            let idx = arena.len() as u32;
            arena.push(TestNode::new(len));
            let target = model[at % model.len()];
            root = insert_after(&mut arena, root, Some(target), idx);
            let pos = model.iter().position(|&m| m == target).unwrap();
            model.insert(pos + 1, idx);
        }
        prop_assert_eq!(in_order(&arena, root), model.clone());
        let mut start = 0;
        for &idx in &model {
            prop_assert_eq!(index_of(&arena, idx), start);
            let len = arena[idx as usize].len;
            if len > 0 {
                prop_assert_eq!(find(&mut arena, &mut root, start + 1), Some((idx, 1)));
                prop_assert_eq!(root, Some(idx));
            }
            start += len;
        }
    }
}
