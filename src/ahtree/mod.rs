//! Appendable Hash Tree (§4.B / §3): an incremental, append-only Merkle tree
//! growing one leaf per committed transaction, producing logarithmic
//! inclusion and consistency proofs. Ported from the accumulator algorithm
//! of the original append-only hash tree, where leaf `i` (1-based) stores
//! `H(0x00 ‖ alh_i)` and an internal node over children `L,R` stores
//! `H(0x01 ‖ L ‖ R)`.

mod proof;

pub use proof::{verify_consistency, verify_inclusion};

use std::path::Path;

use crate::appendable::Appendable;
use crate::hash::{self, Digest32};
use crate::util::Spinlock;
use crate::{err_at, Error, Result};

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// How many leaf appends accumulate before the commit log is flushed; `Sync`
/// forces a flush regardless (§4.B).
pub const DEFAULT_SYNC_THLD: usize = 1024;

struct Inner {
    /// Raw digest log: nodes in the order `Append` produced them (§3 storage
    /// layout — newly inserted leaf, then each internal node completed on
    /// the right frontier, bottom-up).
    dlog: Appendable,
    /// `leaf index -> (offset, size)` — here size is always 1 (a digest slot)
    /// but kept as a record for parity with the on-disk `.di` layout of §6.
    clog: Appendable,
    clog_buf: Vec<u8>,
    clog_buf_count: usize,
    sync_thld: usize,
    size: u64,
    /// Small LRU-ish cache of recently read node digests, keyed by their
    /// position in `dlog`.
    cache: lru::Cache,
}

mod lru {
    use super::Digest32;
    use std::collections::HashMap;

    /// Minimal fixed-capacity LRU used to avoid re-reading hot AHT nodes.
    pub struct Cache {
        capacity: usize,
        map: HashMap<u64, Digest32>,
        order: Vec<u64>,
    }

    impl Cache {
        pub fn new(capacity: usize) -> Cache {
            Cache { capacity, map: HashMap::new(), order: Vec::new() }
        }

        pub fn get(&mut self, key: u64) -> Option<Digest32> {
            if let Some(v) = self.map.get(&key).copied() {
                self.touch(key);
                Some(v)
            } else {
                None
            }
        }

        pub fn put(&mut self, key: u64, value: Digest32) {
            if self.map.insert(key, value).is_none() {
                self.order.push(key);
                if self.order.len() > self.capacity {
                    let evict = self.order.remove(0);
                    self.map.remove(&evict);
                }
            } else {
                self.touch(key);
            }
        }

        pub fn pop(&mut self, key: u64) {
            self.map.remove(&key);
            self.order.retain(|k| *k != key);
        }

        fn touch(&mut self, key: u64) {
            if let Some(pos) = self.order.iter().position(|k| *k == key) {
                self.order.remove(pos);
                self.order.push(key);
            }
        }
    }
}

/// The Appendable Hash Tree itself. All mutation (`append`/`sync`/`reset_size`
/// /`close`) is serialized behind a single mutex (§5); proof queries only
/// hold it long enough to capture the tree size and read digests.
pub struct AHTree {
    inner: Spinlock<Inner>,
    read_only: bool,
}

impl AHTree {
    pub fn create(dir: &Path, cache_slots: usize, sync_thld: usize) -> Result<AHTree> {
        let dlog = Appendable::create(&dir.join("tree"), "nodes", "sha", 64 * 1024 * 1024, false)?;
        let clog = Appendable::create(&dir.join("commit"), "leaves", "di", 64 * 1024 * 1024, false)?;
        Ok(AHTree {
            inner: Spinlock::new(Inner {
                dlog,
                clog,
                clog_buf: Vec::new(),
                clog_buf_count: 0,
                sync_thld: sync_thld.max(1),
                size: 0,
                cache: lru::Cache::new(cache_slots.max(16)),
            }),
            read_only: false,
        })
    }

    pub fn open(dir: &Path, cache_slots: usize, sync_thld: usize) -> Result<AHTree> {
        let dlog = Appendable::open(&dir.join("tree"), "nodes", "sha", 64 * 1024 * 1024, false)?;
        let clog = Appendable::open(&dir.join("commit"), "leaves", "di", 64 * 1024 * 1024, false)?;
        let size = clog.size() / CLOG_ENTRY_SIZE as u64;
        let expected_dlog = nodes_upto(size) * hash::DIGEST_LEN as u64;
        if dlog.size() < expected_dlog {
            return err_at!(CorruptedAHT, msg: "dlog shorter than required by clog");
        }
        Ok(AHTree {
            inner: Spinlock::new(Inner {
                dlog,
                clog,
                clog_buf: Vec::new(),
                clog_buf_count: 0,
                sync_thld: sync_thld.max(1),
                size,
                cache: lru::Cache::new(cache_slots.max(16)),
            }),
            read_only: false,
        })
    }

    pub fn size(&self) -> u64 {
        self.inner.read().size
    }

    fn node_at(inner: &mut Inner, i: u64) -> Result<Digest32> {
        if let Some(h) = inner.cache.get(i) {
            return Ok(h);
        }
        let mut buf = [0u8; hash::DIGEST_LEN];
        inner.dlog.read_at(&mut buf, i * hash::DIGEST_LEN as u64)?;
        inner.cache.put(i, buf);
        Ok(buf)
    }

    fn node(inner: &mut Inner, n: u64, l: u64) -> Result<Digest32> {
        Self::node_at(inner, nodes_until(n) + l)
    }

    /// Append `alh` as the next leaf. Returns `(leaf_index, leaf_hash)`.
    pub fn append(&self, alh: &[u8]) -> Result<(u64, Digest32)> {
        if self.read_only {
            return err_at!(ReadOnly, msg: "AHT is read-only");
        }
        let mut inner = self.inner.write();

        let n = inner.size + 1;
        let mut leaf = [0u8; 1 + 64];
        leaf[0] = LEAF_PREFIX;
        leaf[1..1 + alh.len()].copy_from_slice(alh);
        let h = hash::sum(&leaf[..1 + alh.len()]);

        let mut digests = vec![h];
        let mut w = n - 1;
        let mut l = 0u64;
        let mut k = n - 1;
        let mut last = h;
        while w > 0 {
            if w % 2 == 1 {
                let hkl = Self::node(&mut inner, k, l)?;
                let mut buf = [0u8; 1 + 64];
                buf[0] = NODE_PREFIX;
                buf[1..33].copy_from_slice(&hkl);
                buf[33..65].copy_from_slice(&last);
                last = hash::sum(&buf);
                digests.push(last);
            }
            k &= !(1u64 << l);
            w >>= 1;
            l += 1;
        }

        let flat: Vec<u8> = digests.iter().flat_map(|d| d.iter().copied()).collect();
        let base = inner.dlog.size();
        inner.dlog.append(&flat)?;
        inner.dlog.flush()?;

        for (idx, d) in digests.iter().enumerate() {
            let pos = base / hash::DIGEST_LEN as u64 + idx as u64;
            inner.cache.put(pos, *d);
        }

        let mut entry = [0u8; CLOG_ENTRY_SIZE];
        entry[8..12].copy_from_slice(&(alh.len() as u32).to_be_bytes());
        inner.clog_buf.extend_from_slice(&entry);
        inner.clog_buf_count += 1;
        inner.size = n;

        if inner.clog_buf_count >= inner.sync_thld {
            Self::flush_clog(&mut inner)?;
        }

        Ok((n, last))
    }

    fn flush_clog(inner: &mut Inner) -> Result<()> {
        if inner.clog_buf.is_empty() {
            return Ok(());
        }
        inner.clog.append(&inner.clog_buf)?;
        inner.clog.flush()?;
        inner.clog_buf.clear();
        inner.clog_buf_count = 0;
        Ok(())
    }

    /// Flush buffered leaf-commit records and fsync both logs.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.write();
        Self::flush_clog(&mut inner)?;
        inner.dlog.sync()?;
        inner.clog.sync()
    }

    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        Self::flush_clog(&mut inner)?;
        inner.dlog.close()?;
        inner.clog.close()
    }

    /// `(n, root)` for the current tree size.
    pub fn root(&self) -> Result<(u64, Digest32)> {
        let mut inner = self.inner.write();
        let n = inner.size;
        if n == 0 {
            return err_at!(IllegalArguments, msg: "empty tree has no root");
        }
        let root = Self::node(&mut inner, n, levels_at(n))?;
        Ok((n, root))
    }

    /// Root of the tree truncated to `n` leaves, without mutating state.
    pub fn root_at(&self, n: u64) -> Result<Digest32> {
        let mut inner = self.inner.write();
        if n == 0 || n > inner.size {
            return err_at!(IllegalArguments, msg: "root_at({}) out of range (size={})", n, inner.size);
        }
        Self::node(&mut inner, n, levels_at(n))
    }

    pub fn inclusion_proof(&self, i: u64, j: u64) -> Result<Vec<Digest32>> {
        let mut inner = self.inner.write();
        if i == 0 || i > j {
            return err_at!(IllegalArguments, msg: "inclusion_proof: i={} j={}", i, j);
        }
        if j > inner.size {
            return err_at!(CorruptedAHT, msg: "inclusion_proof: j={} > size={}", j, inner.size);
        }
        let height = bits_len64(j - 1);
        proof::inclusion_proof(&mut inner, i, j, height, Self::node, Self::highest_node)
    }

    pub fn consistency_proof(&self, i: u64, j: u64) -> Result<Vec<Digest32>> {
        let mut inner = self.inner.write();
        if i == 0 || i > j {
            return err_at!(IllegalArguments, msg: "consistency_proof: i={} j={}", i, j);
        }
        if j > inner.size {
            return err_at!(CorruptedAHT, msg: "consistency_proof: j={} > size={}", j, inner.size);
        }
        let height = bits_len64(j - 1);
        proof::consistency_proof(&mut inner, i, j, height, Self::node, Self::highest_node)
    }

    fn highest_node(inner: &mut Inner, i: u64, d: u64) -> Result<Digest32> {
        let mut l = 0u64;
        let mut r = d;
        while r > 0 {
            r -= 1;
            if (i - 1) & (1 << r) > 0 {
                l += 1;
            }
        }
        Self::node(inner, i, l)
    }

    /// Truncate the tree to `n` leaves (only to a smaller or equal size).
    pub fn reset_size(&self, n: u64) -> Result<()> {
        let mut inner = self.inner.write();
        if n > inner.size {
            return err_at!(IllegalArguments, msg: "cannot reset AHT to larger size");
        }
        if n == inner.size {
            return Ok(());
        }
        Self::flush_clog(&mut inner)?;

        let new_clog_size = n * CLOG_ENTRY_SIZE as u64;
        let new_dlog_size = nodes_upto(n) * hash::DIGEST_LEN as u64;
        if inner.dlog.size() < new_dlog_size {
            return err_at!(CorruptedAHT, msg: "reset_size: dlog shorter than required");
        }

        for pos in (new_dlog_size / hash::DIGEST_LEN as u64)..(inner.dlog.size() / hash::DIGEST_LEN as u64) {
            inner.cache.pop(pos);
        }

        inner.dlog.set_offset(new_dlog_size)?;
        inner.clog.set_offset(new_clog_size)?;
        inner.size = n;
        Ok(())
    }

    /// Verify that leaf `n` corresponds to payload `d`.
    pub fn data_at_equals(&self, n: u64, d: &[u8]) -> Result<bool> {
        let mut inner = self.inner.write();
        if n == 0 || n > inner.size {
            return err_at!(IllegalArguments, msg: "data_at_equals: n={} out of range", n);
        }
        let mut leaf = vec![LEAF_PREFIX];
        leaf.extend_from_slice(d);
        let want = hash::sum(&leaf);
        let got = Self::node(&mut inner, n, 0)?;
        Ok(got == want)
    }
}

const CLOG_ENTRY_SIZE: usize = 12;

pub(crate) fn nodes_until(n: u64) -> u64 {
    if n == 1 {
        0
    } else {
        nodes_upto(n - 1)
    }
}

pub(crate) fn nodes_upto(n: u64) -> u64 {
    if n == 0 {
        return 0;
    }
    let mut o = n;
    let mut l = 0u64;
    loop {
        if n < (1 << l) {
            break;
        }
        o += (n >> (l + 1)) << l;
        if (n / (1 << l)) % 2 == 1 {
            o += n % (1 << l);
        }
        l += 1;
    }
    o
}

pub(crate) fn levels_at(n: u64) -> u64 {
    let mut w = n - 1;
    let mut l = 0u64;
    while w > 0 {
        if w % 2 == 1 {
            l += 1;
        }
        w >>= 1;
    }
    l
}

fn bits_len64(mut v: u64) -> u64 {
    let mut n = 0;
    while v > 0 {
        n += 1;
        v >>= 1;
    }
    n
}

#[cfg(test)]
mod ahtree_test {
    use super::*;

    fn leaf_alh(i: u64) -> Digest32 {
        hash::sum(format!("alh-{}", i).as_bytes())
    }

    #[test]
    fn test_append_and_root_two_leaves() {
        let dir = tempfile::tempdir().unwrap();
        let t = AHTree::create(dir.path(), 64, 1).unwrap();
        let (n1, h1) = t.append(&leaf_alh(1)).unwrap();
        let (n2, h2) = t.append(&leaf_alh(2)).unwrap();
        assert_eq!((n1, n2), (1, 2));

        let mut leaf1 = vec![LEAF_PREFIX];
        leaf1.extend_from_slice(&leaf_alh(1));
        assert_eq!(h1, hash::sum(&leaf1));

        let (size, root) = t.root().unwrap();
        assert_eq!(size, 2);
        let mut buf = vec![NODE_PREFIX];
        buf.extend_from_slice(&h1);
        buf.extend_from_slice(&h2);
        assert_eq!(root, hash::sum(&buf));
    }

    #[test]
    fn test_inclusion_and_consistency_proofs_100_leaves() {
        let dir = tempfile::tempdir().unwrap();
        let t = AHTree::create(dir.path(), 256, 8).unwrap();
        for i in 1..=100u64 {
            t.append(&leaf_alh(i)).unwrap();
        }
        t.sync().unwrap();

        let (i, j) = (40u64, 80u64);
        let root_j = t.root_at(j).unwrap();
        let root_i = t.root_at(i).unwrap();

        let incl = t.inclusion_proof(i, j).unwrap();
        let mut leaf = vec![LEAF_PREFIX];
        leaf.extend_from_slice(&leaf_alh(i));
        let leaf_hash = hash::sum(&leaf);
        assert!(verify_inclusion(&incl, i, j, leaf_hash, root_j));

        let cons = t.consistency_proof(i, j).unwrap();
        assert!(verify_consistency(&cons, i, j, root_i, root_j));
    }

    #[test]
    fn test_reset_size_then_append_matches_original() {
        let dir_a = tempfile::tempdir().unwrap();
        let a = AHTree::create(dir_a.path(), 64, 1).unwrap();
        for i in 1..=10u64 {
            a.append(&leaf_alh(i)).unwrap();
        }
        let (_, root_at_10) = a.root().unwrap();

        for i in 11..=15u64 {
            a.append(&leaf_alh(i)).unwrap();
        }
        a.reset_size(10).unwrap();
        assert_eq!(a.size(), 10);
        let (_, root_after_reset) = a.root().unwrap();
        assert_eq!(root_after_reset, root_at_10);

        for i in 11..=15u64 {
            a.append(&leaf_alh(i)).unwrap();
        }
        let (_, root_redo) = a.root().unwrap();

        let dir_b = tempfile::tempdir().unwrap();
        let b = AHTree::create(dir_b.path(), 64, 1).unwrap();
        for i in 1..=15u64 {
            b.append(&leaf_alh(i)).unwrap();
        }
        let (_, root_b) = b.root().unwrap();
        assert_eq!(root_redo, root_b);
    }

    #[test]
    fn test_data_at_equals() {
        let dir = tempfile::tempdir().unwrap();
        let t = AHTree::create(dir.path(), 64, 1).unwrap();
        t.append(&leaf_alh(1)).unwrap();
        assert!(t.data_at_equals(1, &leaf_alh(1)).unwrap());
        assert!(!t.data_at_equals(1, &leaf_alh(2)).unwrap());
    }
}
