//! Transactional log / KV store (§4.D): the commit path that binds every
//! batch of entries into the hash chain and the AHT, plus the background
//! indexer that feeds the B-tree. This is the crate's top-level embedded
//! handle — `Store::open` recovers a directory, `Store::commit` is the only
//! write path.

mod config;
mod proof;
pub mod tx;

pub use config::StoreOptions;
pub use proof::DualProof;
pub use tx::{Tx, TxEntry, TxHeader};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::ahtree::AHTree;
use crate::appendable::Appendable;
use crate::hash::{self, Digest32};
use crate::index::{Index, IndexValue};
use crate::util::thread::Thread;
use crate::{err_at, Result};

const CLOG_ENTRY_SIZE: u64 = 8 + 4;

struct CommitState {
    tx_log: Appendable,
    commit_log: Appendable,
    committed_tx_id: u64,
    committed_alh: Digest32,
    committed_tx_log_size: u64,
}

struct Shared {
    vlogs: Vec<Mutex<Appendable>>,
    next_vlog: AtomicUsize,
    commit: Mutex<CommitState>,
    aht: AHTree,
    index: Index,
    opts: StoreOptions,
}

/// An embedded, append-only, cryptographically verifiable key-value store.
pub struct Store {
    shared: Arc<Shared>,
    indexer: Option<Thread<(), (), ()>>,
}

impl Shared {
    fn read_tx_by_offset(&self, offset: u64, size: u32) -> Result<Tx> {
        let mut buf = vec![0u8; size as usize];
        self.commit.lock().unwrap().tx_log.read_at(&mut buf, offset)?;
        Tx::decode(&buf)
    }

    /// Look up the `(offset, size)` commit-log entry for tx `id` and decode it.
    fn read_tx(&self, id: u64) -> Result<Tx> {
        if id == 0 {
            return err_at!(TxNotFound, msg: "tx id 0 does not exist");
        }
        let mut entry = [0u8; CLOG_ENTRY_SIZE as usize];
        {
            let commit = self.commit.lock().unwrap();
            if id > commit.committed_tx_id {
                return err_at!(TxNotFound, msg: "tx {} not committed", id);
            }
            commit.commit_log.read_at(&mut entry, (id - 1) * CLOG_ENTRY_SIZE)?;
        }
        let offset = u64::from_be_bytes(entry[0..8].try_into().unwrap());
        let size = u32::from_be_bytes(entry[8..12].try_into().unwrap());
        self.read_tx_by_offset(offset, size)
    }

    fn read_inner_hash(&self, id: u64) -> Result<Digest32> {
        Ok(self.read_tx(id)?.header.inner_hash)
    }
}

impl Store {
    /// Open (creating if absent) the store rooted at `dir`, recovering any
    /// torn tail left by a crash mid-commit.
    pub fn open(dir: &Path, opts: StoreOptions) -> Result<Store> {
        std::fs::create_dir_all(dir).ok();

        let mut vlogs = vec![];
        for i in 0..opts.n_vlogs {
            let vdir = dir.join(format!("vlog-{}", i));
            vlogs.push(Mutex::new(Appendable::open(&vdir, "val", "val", crate::appendable::DEFAULT_FILE_SIZE, false)?));
        }

        let mut tx_log = Appendable::open(&dir.join("tx"), "tx", "log", crate::appendable::DEFAULT_FILE_SIZE, false)?;
        let mut commit_log = Appendable::open(&dir.join("commit"), "commit", "log", crate::appendable::DEFAULT_FILE_SIZE, false)?;
        let aht = AHTree::open(&dir.join("aht"), opts.aht_cache_slots, opts.aht_sync_thld).or_else(|_| {
            AHTree::create(&dir.join("aht"), opts.aht_cache_slots, opts.aht_sync_thld)
        })?;

        let committed_tx_count = commit_log.size() / CLOG_ENTRY_SIZE;
        commit_log.set_offset(committed_tx_count * CLOG_ENTRY_SIZE)?;

        let committed_alh = if committed_tx_count > 0 {
            let mut entry = [0u8; CLOG_ENTRY_SIZE as usize];
            commit_log.read_at(&mut entry, (committed_tx_count - 1) * CLOG_ENTRY_SIZE)?;
            let offset = u64::from_be_bytes(entry[0..8].try_into().unwrap());
            let size = u32::from_be_bytes(entry[8..12].try_into().unwrap());
            let mut buf = vec![0u8; size as usize];
            tx_log.read_at(&mut buf, offset)?;
            let tx = Tx::decode(&buf)?;
            tx_log.set_offset(offset + size as u64)?;
            tx.header.alh
        } else {
            tx_log.set_offset(0)?;
            hash::ZERO_DIGEST
        };

        if aht.size() > committed_tx_count {
            return err_at!(CorruptedCLog, msg: "AHT ahead of commit log: {} > {}", aht.size(), committed_tx_count);
        }

        let shared = Arc::new(Shared {
            vlogs,
            next_vlog: AtomicUsize::new(0),
            commit: Mutex::new(CommitState {
                tx_log,
                commit_log,
                committed_tx_id: committed_tx_count,
                committed_alh,
                committed_tx_log_size: 0, // recomputed below via tx_log's recovered size
            }),
            aht,
            index: Index::new({
                let mut c = crate::index::Config::new();
                c.set_max_active_snapshots(opts.max_active_snapshots);
                c
            }),
            opts,
        });
        shared.commit.lock().unwrap().committed_tx_log_size = shared.commit.lock().unwrap().tx_log.size();

        if shared.aht.size() < committed_tx_count {
            warn!("aht behind commit log, replaying binary linking {}..={}", shared.aht.size() + 1, committed_tx_count);
            for id in (shared.aht.size() + 1)..=committed_tx_count {
                let tx = shared.read_tx(id)?;
                shared.aht.append(&tx.header.alh)?;
            }
            shared.aht.sync()?;
        }

        let indexer_shared = shared.clone();
        let indexer = Thread::new("indexer", move |rx| {
            move || {
                for (_, _resp) in rx.iter() {
                    drain_indexer(&indexer_shared);
                }
            }
        });

        let store = Store { shared, indexer: Some(indexer) };
        // catch the indexer up with anything already committed at open time.
        if let Some(th) = &store.indexer {
            th.to_tx().post(()).ok();
        }
        Ok(store)
    }

    /// Commit a batch of `(key, value)` entries, returning the committed
    /// tx's header. Keys must be unique within the batch.
    pub fn commit(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<TxHeader> {
        let opts = &self.shared.opts;
        if entries.is_empty() || entries.len() as u32 > opts.max_tx_entries {
            return err_at!(IllegalArguments, msg: "tx has {} entries, max {}", entries.len(), opts.max_tx_entries);
        }
        let mut seen = HashSet::with_capacity(entries.len());
        for (k, v) in &entries {
            if k.is_empty() || k.len() as u32 > opts.max_key_len {
                return err_at!(MaxKeyLengthExceeded, msg: "key length {}", k.len());
            }
            if v.len() as u32 > opts.max_value_len {
                return err_at!(MaxValueLengthExceeded, msg: "value length {}", v.len());
            }
            if !seen.insert(k.clone()) {
                return err_at!(DuplicatedKey, msg: "duplicate key in tx batch");
            }
        }

        let n_vlogs = self.shared.vlogs.len();
        let vlog_id = (self.shared.next_vlog.fetch_add(1, Ordering::Relaxed) % n_vlogs) as u8;
        let mut tx_entries = Vec::with_capacity(entries.len());
        {
            let mut vlog = self.shared.vlogs[vlog_id as usize].lock().unwrap();
            for (key, value) in &entries {
                let (offset, _) = vlog.append(value)?;
                tx_entries.push(TxEntry {
                    key: key.clone(),
                    v_len: value.len() as u32,
                    v_off: tx::pack_voff(vlog_id, offset),
                    v_hash: hash::sum(value),
                });
            }
            vlog.flush()?;
        }

        let mut commit = self.shared.commit.lock().unwrap();
        commit.tx_log.set_offset(commit.committed_tx_log_size)?;

        let id = commit.committed_tx_id + 1;
        let ts = crate::util::now_secs();
        let bl_tx_id = self.shared.aht.size();
        let bl_root = if bl_tx_id == 0 { hash::ZERO_DIGEST } else { self.shared.aht.root_at(bl_tx_id)? };
        let prev_alh = commit.committed_alh;

        let e_h = hash::merkle_root(entries.iter().map(|(k, v)| hash::entry_digest(k, v)).collect());
        let header = TxHeader::compute(id, ts, bl_tx_id, bl_root, prev_alh, e_h);
        let tx = Tx { header, entries: tx_entries };
        let encoded = tx.encode();

        let tx_offset = commit.tx_log.size();
        commit.tx_log.append(&encoded)?;
        commit.tx_log.flush()?;
        let tx_size = encoded.len() as u32;

        let mut clog_entry = [0u8; CLOG_ENTRY_SIZE as usize];
        clog_entry[0..8].copy_from_slice(&tx_offset.to_be_bytes());
        clog_entry[8..12].copy_from_slice(&tx_size.to_be_bytes());
        commit.commit_log.append(&clog_entry)?;
        commit.commit_log.flush()?;

        self.shared.aht.append(&header.alh)?;

        commit.committed_tx_id = id;
        commit.committed_alh = header.alh;
        commit.committed_tx_log_size = tx_offset + tx_size as u64;
        drop(commit);

        debug!("committed tx {}", id);
        if let Some(th) = &self.indexer {
            th.to_tx().post(()).ok();
        }
        Ok(header)
    }

    /// Read and hash-verify a value previously stored at `(v_off, v_len)`.
    pub fn read_value_at(&self, v_off: u64, v_len: u32, expected_hash: Digest32) -> Result<Vec<u8>> {
        let (vlog_id, offset) = tx::unpack_voff(v_off);
        let vlog = self
            .shared
            .vlogs
            .get(vlog_id as usize)
            .ok_or_else(|| crate::Error::CorruptedData(format!("no such vlog {}", vlog_id)))?;
        let mut buf = vec![0u8; v_len as usize];
        vlog.lock().unwrap().read_at(&mut buf, offset)?;
        if hash::sum(&buf) != expected_hash {
            return err_at!(CorruptedData, msg: "value hash mismatch at vlog {} offset {}", vlog_id, offset);
        }
        Ok(buf)
    }

    pub fn tx_header(&self, id: u64) -> Result<TxHeader> {
        Ok(self.shared.read_tx(id)?.header)
    }

    pub fn tx(&self, id: u64) -> Result<Tx> {
        self.shared.read_tx(id)
    }

    pub fn committed_tx_id(&self) -> u64 {
        self.shared.commit.lock().unwrap().committed_tx_id
    }

    pub fn index(&self) -> &Index {
        &self.shared.index
    }

    pub fn dual_proof(&self, src: &TxHeader, dst: &TxHeader) -> Result<DualProof> {
        proof::build(&self.shared.aht, src, dst, self.shared.opts.max_linear_proof_len, |id| {
            self.shared.read_inner_hash(id)
        })
    }

    /// Block until the indexer has caught up to `id`, then return its path.
    pub fn wait_indexed(&self, id: u64) -> Result<()> {
        self.shared.index.snapshot_since(id).map(|s| {
            self.shared.index.release_snapshot();
            let _ = s;
        })
    }
}

fn drain_indexer(shared: &Shared) {
    loop {
        let committed = shared.commit.lock().unwrap().committed_tx_id;
        let ts = shared.index.timestamp();
        if ts >= committed {
            return;
        }
        let next = ts + 1;
        let tx = match shared.read_tx(next) {
            Ok(tx) => tx,
            Err(e) => {
                warn!("indexer failed to read tx {}: {}", next, e);
                return;
            }
        };
        let kvs: Vec<(Vec<u8>, IndexValue)> = tx
            .entries
            .iter()
            .map(|e| (e.key.clone(), IndexValue { v_len: e.v_len, v_off: e.v_off, v_hash: e.v_hash }))
            .collect();
        if let Err(e) = shared.index.bulk_insert(tx.header.id, &kvs) {
            warn!("indexer bulk_insert failed for tx {}: {}", tx.header.id, e);
            return;
        }
        info!("indexed tx {}", tx.header.id);
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Some(th) = self.indexer.take() {
            th.join().ok();
        }
    }
}

#[cfg(test)]
mod store_test {
    use super::*;

    #[test]
    fn test_commit_and_read_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), StoreOptions::new()).unwrap();
        let header = store.commit(vec![(b"k1".to_vec(), b"v1".to_vec())]).unwrap();
        assert_eq!(header.id, 1);

        let tx = store.tx(1).unwrap();
        let entry = &tx.entries[0];
        let got = store.read_value_at(entry.v_off, entry.v_len, entry.v_hash).unwrap();
        assert_eq!(got, b"v1");
    }

    #[test]
    fn test_alh_chain_links() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), StoreOptions::new()).unwrap();
        let h1 = store.commit(vec![(b"a".to_vec(), b"1".to_vec())]).unwrap();
        let h2 = store.commit(vec![(b"b".to_vec(), b"2".to_vec())]).unwrap();
        assert_eq!(h2.prev_alh, h1.alh);
        assert_eq!(h2.bl_tx_id, 1);
    }

    #[test]
    fn test_indexer_catches_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), StoreOptions::new()).unwrap();
        store.commit(vec![(b"k".to_vec(), b"v".to_vec())]).unwrap();
        store.wait_indexed(1).unwrap();
        assert!(store.index().get(b"k").unwrap().is_some());
    }

    #[test]
    fn test_rejects_duplicate_key_in_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), StoreOptions::new()).unwrap();
        let err = store.commit(vec![(b"k".to_vec(), b"1".to_vec()), (b"k".to_vec(), b"2".to_vec())]);
        assert!(err.is_err());
    }

    #[test]
    fn test_reopen_recovers_committed_state() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(dir.path(), StoreOptions::new()).unwrap();
            store.commit(vec![(b"k".to_vec(), b"v".to_vec())]).unwrap();
        }
        let store = Store::open(dir.path(), StoreOptions::new()).unwrap();
        assert_eq!(store.committed_tx_id(), 1);
        let tx = store.tx(1).unwrap();
        assert_eq!(tx.entries[0].key, b"k");
    }
}
