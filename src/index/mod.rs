//! Persistent, snapshot-capable B-tree index (§4.C): the structure the
//! store's indexer feeds one committed transaction at a time, and that SQL
//! scans and point lookups read through a [Snapshot].

mod config;
mod entry;
mod node;
mod reader;

pub use config::Config;
pub use entry::{IndexValue, LeafEntry};
pub use reader::Snapshot;

use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};

use node::Node;

use crate::appendable::Appendable;
use crate::{err_at, Result};

struct State {
    root: Arc<Node>,
    timestamp: u64,
    /// Snapshots handed out and not yet dropped, tracked so `MaxActiveSnapshots`
    /// can be enforced without relying on `Arc::strong_count` races.
    live_snapshots: usize,
}

/// The persistent B-tree index. `bulk_insert` is the indexer's only write
/// path; every other method reads through an immutable root.
pub struct Index {
    state: Mutex<State>,
    advanced: Condvar,
    config: Config,
}

impl Index {
    pub fn new(config: Config) -> Index {
        Index {
            state: Mutex::new(State { root: Node::empty_leaf(), timestamp: 0, live_snapshots: 0 }),
            advanced: Condvar::new(),
            config,
        }
    }

    /// Apply one committed transaction's key/value entries, advancing the
    /// index's timestamp to `tx_id` and waking any reader blocked in
    /// `snapshot_since`.
    pub fn bulk_insert(&self, tx_id: u64, kvs: &[(Vec<u8>, IndexValue)]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let mut root = state.root.clone();
        for (k, v) in kvs {
            root = node::insert(&root, self.config.fanout, k, tx_id, *v);
        }
        state.root = root;
        state.timestamp = tx_id;
        drop(state);
        self.advanced.notify_all();
        Ok(())
    }

    /// Latest value for `key`: `(value, tx_id_of_insert, prior_version_count)`.
    pub fn get(&self, key: &[u8]) -> Result<Option<(IndexValue, u64, usize)>> {
        let state = self.state.lock().unwrap();
        Ok(state.root.get(key).map(|e| (e.value, e.insert_tx_id, e.history_count())))
    }

    /// Historical tx-ids for `key` (current version first), paginated.
    pub fn get_ts(&self, key: &[u8], offset: usize, desc: bool, limit: usize) -> Result<Vec<u64>> {
        let state = self.state.lock().unwrap();
        let entry = match state.root.get(key) {
            Some(e) => e,
            None => return err_at!(KeyNotFound, msg: "get_ts: key not found"),
        };
        let mut all = Vec::with_capacity(1 + entry.history.len());
        all.push(entry.insert_tx_id);
        all.extend_from_slice(&entry.history);
        if desc {
            all.reverse();
        }
        Ok(all.into_iter().skip(offset).take(limit.max(1)).collect())
    }

    /// A read-only view of the index as of the most recent `bulk_insert`.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let mut state = self.state.lock().unwrap();
        if state.live_snapshots >= self.config.max_active_snapshots {
            return err_at!(TooManyActiveSnapshots, msg: "max_active_snapshots={}", self.config.max_active_snapshots);
        }
        state.live_snapshots += 1;
        Ok(Snapshot { root: state.root.clone(), timestamp: state.timestamp })
    }

    /// As `snapshot`, but blocks until the indexer's timestamp has reached
    /// at least `tx_id`.
    pub fn snapshot_since(&self, tx_id: u64) -> Result<Snapshot> {
        let mut state = self.state.lock().unwrap();
        while state.timestamp < tx_id {
            state = self.advanced.wait(state).unwrap();
        }
        if state.live_snapshots >= self.config.max_active_snapshots {
            return err_at!(TooManyActiveSnapshots, msg: "max_active_snapshots={}", self.config.max_active_snapshots);
        }
        state.live_snapshots += 1;
        Ok(Snapshot { root: state.root.clone(), timestamp: state.timestamp })
    }

    /// Release a snapshot slot acquired by `snapshot`/`snapshot_since`. The
    /// caller is expected to invoke this once it drops the returned
    /// [Snapshot]; there is no automatic refcount hookup since `Snapshot`
    /// only borrows an `Arc`, which is cheap to keep around past the slot.
    pub fn release_snapshot(&self) {
        let mut state = self.state.lock().unwrap();
        state.live_snapshots = state.live_snapshots.saturating_sub(1);
    }

    pub fn timestamp(&self) -> u64 {
        self.state.lock().unwrap().timestamp
    }

    /// Offline compaction: write every live key/entry, in key order, as a
    /// flat append-only dump at `path`, for the store to atomically rename
    /// in once written. `quiesce` blocks concurrent `bulk_insert`s for the
    /// duration (callers otherwise see a point-in-time but possibly stale
    /// dump, which is fine for a background compaction).
    pub fn dump_to(&self, path: &Path, quiesce: bool) -> Result<()> {
        let guard;
        let root = if quiesce {
            guard = Some(self.state.lock().unwrap());
            guard.as_ref().unwrap().root.clone()
        } else {
            self.state.lock().unwrap().root.clone()
        };
        let mut entries = vec![];
        root.collect_range(None, None, &mut entries);

        let mut out = Appendable::create(path, "dump", "idx", crate::appendable::DEFAULT_FILE_SIZE, true)?;
        for (k, e) in entries {
            let mut buf = Vec::with_capacity(8 + k.len() + 8 + 4 + 4 + 8 + 32);
            buf.extend_from_slice(&(k.len() as u32).to_be_bytes());
            buf.extend_from_slice(&k);
            buf.extend_from_slice(&e.insert_tx_id.to_be_bytes());
            buf.extend_from_slice(&e.value.v_len.to_be_bytes());
            buf.extend_from_slice(&e.value.v_off.to_be_bytes());
            buf.extend_from_slice(&e.value.v_hash);
            out.append(&buf)?;
        }
        out.sync()
    }
}

#[cfg(test)]
mod index_test {
    use super::*;
    use crate::hash;
    use std::ops::Bound;

    fn iv(n: u32) -> IndexValue {
        IndexValue { v_len: n, v_off: n as u64, v_hash: hash::sum(&n.to_be_bytes()) }
    }

    #[test]
    fn test_bulk_insert_get_roundtrip() {
        let idx = Index::new(Config::new());
        idx.bulk_insert(1, &[(b"a".to_vec(), iv(1)), (b"b".to_vec(), iv(2))]).unwrap();
        let (v, tx, hc) = idx.get(b"a").unwrap().unwrap();
        assert_eq!((v.v_len, tx, hc), (1, 1, 0));
        assert!(idx.get(b"missing").unwrap().is_none());
    }

    #[test]
    fn test_get_ts_paginates_history() {
        let idx = Index::new(Config::new());
        for tx in 1..=5u64 {
            idx.bulk_insert(tx, &[(b"k".to_vec(), iv(tx as u32))]).unwrap();
        }
        let all = idx.get_ts(b"k", 0, false, 10).unwrap();
        assert_eq!(all, vec![5, 4, 3, 2, 1]);
        let page = idx.get_ts(b"k", 1, false, 2).unwrap();
        assert_eq!(page, vec![4, 3]);
    }

    #[test]
    fn test_snapshot_isolated_from_later_writes() {
        let idx = Index::new(Config::new());
        idx.bulk_insert(1, &[(b"k".to_vec(), iv(1))]).unwrap();
        let snap = idx.snapshot().unwrap();
        idx.bulk_insert(2, &[(b"k".to_vec(), iv(2))]).unwrap();
        assert_eq!(snap.get(b"k").unwrap().insert_tx_id, 1);
        assert_eq!(idx.get(b"k").unwrap().unwrap().1, 2);
    }

    #[test]
    fn test_too_many_active_snapshots() {
        let mut cfg = Config::new();
        cfg.set_max_active_snapshots(2);
        let idx = Index::new(cfg);
        idx.bulk_insert(1, &[(b"k".to_vec(), iv(1))]).unwrap();
        let _s1 = idx.snapshot().unwrap();
        let _s2 = idx.snapshot().unwrap();
        assert!(idx.snapshot().is_err());
    }

    #[test]
    fn test_range_scan_via_index() {
        let idx = Index::new(Config::new());
        for i in 0..10u64 {
            idx.bulk_insert(i + 1, &[(format!("k{:02}", i).into_bytes(), iv(i as u32))]).unwrap();
        }
        let snap = idx.snapshot().unwrap();
        let r = snap.range((Bound::Included(b"k02"), Bound::Included(b"k05")), false);
        assert_eq!(r.len(), 4);
    }
}
