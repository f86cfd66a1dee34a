//! Read-only views over a tree root (§4.C `Snapshot`/range scan), following
//! `robt::reader`'s shape: a cursor that owns an immutable root and serves
//! `get`/ascending/descending scans without ever touching the live tree.

use std::ops::Bound;
use std::sync::Arc;

use super::entry::LeafEntry;
use super::node::Node;

/// A point-in-time, read-only view of the index. Cheap to create (one `Arc`
/// clone) and cheap to hold (the shared nodes it pins are immutable).
#[derive(Clone)]
pub struct Snapshot {
    pub(super) root: Arc<Node>,
    pub(super) timestamp: u64,
}

impl Snapshot {
    /// Tx-id this snapshot was taken at (the indexer's progress watermark).
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn len(&self) -> usize {
        self.root.len()
    }

    pub fn get(&self, key: &[u8]) -> Option<LeafEntry> {
        self.root.get(key).cloned()
    }

    /// Ascending or descending scan over `range`, inclusive/exclusive bounds
    /// per the usual `Bound` semantics.
    pub fn range(&self, range: (Bound<&[u8]>, Bound<&[u8]>), desc: bool) -> Vec<(Vec<u8>, LeafEntry)> {
        let (lo_incl, lo_excl) = match range.0 {
            Bound::Included(b) => (Some(b), None),
            Bound::Excluded(b) => (None, Some(b)),
            Bound::Unbounded => (None, None),
        };
        let hi_bound = match range.1 {
            Bound::Included(b) => bump(b),
            Bound::Excluded(b) => b.to_vec(),
            Bound::Unbounded => vec![],
        };
        let hi = match range.1 {
            Bound::Unbounded => None,
            _ => Some(hi_bound.as_slice()),
        };
        let mut out = vec![];
        self.root.collect_range(lo_incl, hi, &mut out);
        if let Some(excl) = lo_excl {
            out.retain(|(k, _)| k.as_slice() != excl);
        }
        if desc {
            out.reverse();
        }
        out
    }
}

/// Smallest byte string strictly greater than `b`, used to turn an inclusive
/// upper bound into the exclusive one `collect_range` expects.
fn bump(b: &[u8]) -> Vec<u8> {
    let mut v = b.to_vec();
    v.push(0);
    v
}

#[cfg(test)]
mod reader_test {
    use super::*;
    use crate::hash;
    use crate::index::entry::IndexValue;
    use crate::index::node::{insert, Node as N};

    fn iv(n: u32) -> IndexValue {
        IndexValue { v_len: n, v_off: n as u64, v_hash: hash::sum(&n.to_be_bytes()) }
    }

    #[test]
    fn test_range_scan_ascending_and_descending() {
        let mut root = N::empty_leaf();
        for i in 0..20u32 {
            root = insert(&root, 4, format!("k{:02}", i).as_bytes(), i as u64, iv(i));
        }
        let snap = Snapshot { root, timestamp: 20 };
        let asc = snap.range((Bound::Included(b"k05"), Bound::Excluded(b"k10")), false);
        assert_eq!(asc.len(), 5);
        assert_eq!(asc[0].0, b"k05");
        let desc = snap.range((Bound::Included(b"k05"), Bound::Excluded(b"k10")), true);
        assert_eq!(desc[0].0, b"k09");
    }
}
