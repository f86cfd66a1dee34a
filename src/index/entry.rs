//! Leaf payload shapes (§4.C): what the B-tree stores per key, not the value
//! itself (that lives in the store's value log).

use crate::hash::Digest32;

/// Where and how big the value is in the value log, plus its digest (used to
/// build `entry_digest` without re-reading the value).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexValue {
    pub v_len: u32,
    pub v_off: u64,
    pub v_hash: Digest32,
}

/// A key's current index entry: the tx that last touched it, the value
/// pointer, and the tx-ids of every prior version (newest first), so
/// `GetTs` can paginate history without consulting the tx log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    pub insert_tx_id: u64,
    pub value: IndexValue,
    pub history: Vec<u64>,
}

impl LeafEntry {
    pub fn fresh(tx_id: u64, value: IndexValue) -> LeafEntry {
        LeafEntry { insert_tx_id: tx_id, value, history: vec![] }
    }

    /// Record a newer version, pushing the previous `insert_tx_id` onto history.
    pub fn update(&mut self, tx_id: u64, value: IndexValue) {
        self.history.insert(0, self.insert_tx_id);
        self.insert_tx_id = tx_id;
        self.value = value;
    }

    /// Count of versions prior to the current one.
    pub fn history_count(&self) -> usize {
        self.history.len()
    }
}
