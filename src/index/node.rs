//! Copy-on-write B+tree node arena (§4.C). Each `BulkInsert` walks the path
//! from root to the touched leaves, cloning only the nodes on that path and
//! sharing everything else via `Arc` — the previous root stays valid (and
//! cheap) for as long as a `Snapshot` holds it.

use std::sync::Arc;

use super::entry::{IndexValue, LeafEntry};

pub type Key = Vec<u8>;

#[derive(Debug)]
pub enum Node {
    Leaf { entries: Vec<(Key, LeafEntry)> },
    Internal { seps: Vec<Key>, children: Vec<Arc<Node>> },
}

impl Node {
    pub fn empty_leaf() -> Arc<Node> {
        Arc::new(Node::Leaf { entries: vec![] })
    }

    pub fn len(&self) -> usize {
        match self {
            Node::Leaf { entries } => entries.len(),
            Node::Internal { children, .. } => children.iter().map(|c| c.len()).sum(),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&LeafEntry> {
        match self {
            Node::Leaf { entries } => entries
                .binary_search_by(|(k, _)| k.as_slice().cmp(key))
                .ok()
                .map(|i| &entries[i].1),
            Node::Internal { seps, children } => children[child_index(seps, key)].get(key),
        }
    }

    /// In-order collection of `(key, entry)` honoring `[lo, hi)` bounds
    /// (`None` = unbounded on that side).
    pub fn collect_range(&self, lo: Option<&[u8]>, hi: Option<&[u8]>, out: &mut Vec<(Key, LeafEntry)>) {
        match self {
            Node::Leaf { entries } => {
                for (k, e) in entries {
                    if lo.map_or(true, |lo| k.as_slice() >= lo) && hi.map_or(true, |hi| k.as_slice() < hi) {
                        out.push((k.clone(), e.clone()));
                    }
                }
            }
            Node::Internal { children, .. } => {
                for c in children {
                    c.collect_range(lo, hi, out);
                }
            }
        }
    }
}

fn child_index(seps: &[Key], key: &[u8]) -> usize {
    match seps.binary_search_by(|s| s.as_slice().cmp(key)) {
        Ok(i) => i + 1,
        Err(i) => i,
    }
}

/// Result of inserting into a subtree: the (possibly new) node, and — if it
/// outgrew `fanout` — a right sibling plus the separator key between them.
enum Insert {
    Done(Arc<Node>),
    Split(Arc<Node>, Key, Arc<Node>),
}

/// Apply `tx_id`/`value` at `key` within `node`, splitting on overflow.
/// `on_existing` decides whether a present key keeps its history
/// (`LeafEntry::update`) or is replaced outright.
pub fn insert(node: &Arc<Node>, fanout: usize, key: &[u8], tx_id: u64, value: IndexValue) -> Arc<Node> {
    match insert_rec(node, fanout, key, tx_id, value) {
        Insert::Done(n) => n,
        Insert::Split(l, sep, r) => Arc::new(Node::Internal { seps: vec![sep], children: vec![l, r] }),
    }
}

fn insert_rec(node: &Arc<Node>, fanout: usize, key: &[u8], tx_id: u64, value: IndexValue) -> Insert {
    match node.as_ref() {
        Node::Leaf { entries } => {
            let mut entries = entries.clone();
            match entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
                Ok(i) => entries[i].1.update(tx_id, value),
                Err(i) => entries.insert(i, (key.to_vec(), LeafEntry::fresh(tx_id, value))),
            }
            if entries.len() <= fanout {
                Insert::Done(Arc::new(Node::Leaf { entries }))
            } else {
                let mid = entries.len() / 2;
                let right = entries.split_off(mid);
                let sep = right[0].0.clone();
                Insert::Split(
                    Arc::new(Node::Leaf { entries }),
                    sep,
                    Arc::new(Node::Leaf { entries: right }),
                )
            }
        }
        Node::Internal { seps, children } => {
            let idx = child_index(seps, key);
            match insert_rec(&children[idx], fanout, key, tx_id, value) {
                Insert::Done(new_child) => {
                    let mut children = children.clone();
                    children[idx] = new_child;
                    Insert::Done(Arc::new(Node::Internal { seps: seps.clone(), children }))
                }
                Insert::Split(l, sep, r) => {
                    let mut seps = seps.clone();
                    let mut children = children.clone();
                    children[idx] = l;
                    children.insert(idx + 1, r);
                    seps.insert(idx, sep);
                    if children.len() <= fanout {
                        Insert::Done(Arc::new(Node::Internal { seps, children }))
                    } else {
                        let mid = children.len() / 2;
                        let right_children = children.split_off(mid);
                        let right_seps = seps.split_off(mid);
                        let up_sep = seps.pop().unwrap();
                        Insert::Split(
                            Arc::new(Node::Internal { seps, children }),
                            up_sep,
                            Arc::new(Node::Internal { seps: right_seps, children: right_children }),
                        )
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod node_test {
    use super::*;
    use crate::hash;

    fn iv(n: u32) -> IndexValue {
        IndexValue { v_len: n, v_off: n as u64, v_hash: hash::sum(&n.to_be_bytes()) }
    }

    #[test]
    fn test_insert_get_many_triggers_splits() {
        let mut root = Node::empty_leaf();
        for i in 0..500u32 {
            root = insert(&root, 8, format!("k{:04}", i).as_bytes(), i as u64, iv(i));
        }
        assert_eq!(root.len(), 500);
        for i in 0..500u32 {
            let e = root.get(format!("k{:04}", i).as_bytes()).unwrap();
            assert_eq!(e.insert_tx_id, i as u64);
        }
        assert!(root.get(b"missing").is_none());
    }

    #[test]
    fn test_update_preserves_history() {
        let mut root = Node::empty_leaf();
        root = insert(&root, 8, b"k", 1, iv(1));
        root = insert(&root, 8, b"k", 2, iv(2));
        root = insert(&root, 8, b"k", 3, iv(3));
        let e = root.get(b"k").unwrap();
        assert_eq!(e.insert_tx_id, 3);
        assert_eq!(e.history, vec![2, 1]);
    }

    #[test]
    fn test_old_root_unaffected_by_later_insert() {
        let root0 = Node::empty_leaf();
        let root1 = insert(&root0, 8, b"a", 1, iv(1));
        let root2 = insert(&root1, 8, b"b", 2, iv(2));
        assert_eq!(root1.len(), 1);
        assert_eq!(root2.len(), 2);
        assert!(root1.get(b"b").is_none());
    }
}
