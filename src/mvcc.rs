//! SQL-level transaction manager (§4.G): autocommit vs explicit `BEGIN`,
//! snapshot selection, and read-set/write-set conflict detection at commit.
//! Layered over [crate::store::Store] the way the teacher's single-version,
//! in-memory `mvcc` module layers over `llrb` — this is the multi-version
//! analogue operating over store snapshots instead of tree nodes.

use std::ops::Bound;
use std::sync::Mutex;

use crate::store::{Store, TxHeader};
use crate::{err_at, Result};

/// A range of raw key bytes a scan touched, recorded so `COMMIT` can check
/// it against concurrent writers' write-sets.
#[derive(Debug, Clone)]
pub struct ReadSetEntry {
    pub lo: Bound<Vec<u8>>,
    pub hi: Bound<Vec<u8>>,
}

impl ReadSetEntry {
    pub fn whole_table(prefix: Vec<u8>) -> ReadSetEntry {
        ReadSetEntry { lo: Bound::Included(prefix), hi: Bound::Unbounded }
    }

    fn intersects(&self, key: &[u8]) -> bool {
        let above_lo = match &self.lo {
            Bound::Included(b) => key >= b.as_slice(),
            Bound::Excluded(b) => key > b.as_slice(),
            Bound::Unbounded => true,
        };
        let below_hi = match &self.hi {
            Bound::Included(b) => key <= b.as_slice(),
            Bound::Excluded(b) => key < b.as_slice(),
            Bound::Unbounded => true,
        };
        above_lo && below_hi
    }
}

/// One SQL-level transaction's accumulated state between `BEGIN` and
/// `COMMIT`/`CANCEL`.
pub struct SqlTx {
    pub snapshot_tx_id: u64,
    read_set: Vec<ReadSetEntry>,
    write_set: Vec<(Vec<u8>, Vec<u8>)>,
}

impl SqlTx {
    pub fn record_read(&mut self, entry: ReadSetEntry) {
        self.read_set.push(entry);
    }

    pub fn record_write(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.write_set.push((key, value));
    }
}

/// Per-session transaction manager: either autocommitting (every statement
/// is its own tx) or holding one open `SqlTx` (`NestedTxNotSupported`
/// otherwise).
pub struct TxManager {
    store: std::sync::Arc<Store>,
    open: Mutex<Option<SqlTx>>,
}

impl TxManager {
    pub fn new(store: std::sync::Arc<Store>) -> TxManager {
        TxManager { store, open: Mutex::new(None) }
    }

    pub fn begin(&self) -> Result<()> {
        let mut open = self.open.lock().unwrap();
        if open.is_some() {
            return err_at!(NestedTxNotSupported, msg: "a transaction is already open on this session");
        }
        *open = Some(SqlTx {
            snapshot_tx_id: self.store.committed_tx_id(),
            read_set: vec![],
            write_set: vec![],
        });
        Ok(())
    }

    /// Run `f` against the session's current transaction, opening an
    /// implicit autocommit one around it when none is open.
    pub fn with_tx<T>(&self, f: impl FnOnce(&mut SqlTx) -> Result<T>) -> Result<T> {
        let mut guard = self.open.lock().unwrap();
        match guard.as_mut() {
            Some(tx) => f(tx),
            None => {
                let mut tx = SqlTx { snapshot_tx_id: self.store.committed_tx_id(), read_set: vec![], write_set: vec![] };
                let result = f(&mut tx)?;
                self.finish(tx)?;
                Ok(result)
            }
        }
    }

    /// `COMMIT`: conflict-check the read-set against everything committed
    /// since the snapshot, then apply the write-set as one KV commit.
    pub fn commit(&self) -> Result<Option<TxHeader>> {
        let tx = self.open.lock().unwrap().take();
        match tx {
            Some(tx) => self.finish(tx).map(Some),
            None => Ok(None),
        }
    }

    pub fn cancel(&self) {
        *self.open.lock().unwrap() = None;
    }

    fn finish(&self, tx: SqlTx) -> Result<TxHeader> {
        self.check_conflicts(&tx)?;
        if tx.write_set.is_empty() {
            // A read-only transaction still needs a header for callers that
            // want one; reuse the snapshot's last committed header.
            return self.store.tx_header(tx.snapshot_tx_id.max(1));
        }
        self.store.commit(tx.write_set)
    }

    /// Walk txs committed after `snapshot_tx_id` and test every entry's key
    /// against the recorded read-set ranges (§4.G step 2).
    fn check_conflicts(&self, tx: &SqlTx) -> Result<()> {
        if tx.read_set.is_empty() {
            return Ok(());
        }
        let committed = self.store.committed_tx_id();
        for id in (tx.snapshot_tx_id + 1)..=committed {
            let other = self.store.tx(id)?;
            for entry in &other.entries {
                if tx.read_set.iter().any(|r| r.intersects(&entry.key)) {
                    return err_at!(TxReadConflict, msg: "read-set conflicts with tx {}", id);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod mvcc_test {
    use super::*;
    use crate::store::StoreOptions;
    use std::sync::Arc;

    #[test]
    fn test_autocommit_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), StoreOptions::new()).unwrap());
        let mgr = TxManager::new(store.clone());
        mgr.with_tx(|tx| {
            tx.record_write(b"k".to_vec(), b"v".to_vec());
            Ok(())
        })
        .unwrap();
        assert_eq!(store.committed_tx_id(), 1);
    }

    #[test]
    fn test_read_conflict_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), StoreOptions::new()).unwrap());
        let mgr = TxManager::new(store.clone());

        mgr.begin().unwrap();
        {
            let mut guard = mgr.open.lock().unwrap();
            let tx = guard.as_mut().unwrap();
            tx.record_read(ReadSetEntry { lo: Bound::Included(b"id".to_vec()), hi: Bound::Unbounded });
        }

        // a concurrent writer commits a key inside that range first.
        store.commit(vec![(b"id:1".to_vec(), b"x".to_vec())]).unwrap();

        {
            let mut guard = mgr.open.lock().unwrap();
            let tx = guard.as_mut().unwrap();
            tx.record_write(b"id:2".to_vec(), b"y".to_vec());
        }
        assert!(mgr.commit().is_err());
    }

    #[test]
    fn test_nested_transaction_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), StoreOptions::new()).unwrap());
        let mgr = TxManager::new(store);
        mgr.begin().unwrap();
        assert!(mgr.begin().is_err());
    }
}
