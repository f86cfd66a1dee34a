//! `StoreOptions`: builder-style configuration for [super::Store], following
//! the same `set_*(&mut self) -> &mut Self` convention as `index::Config`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    pub(super) max_tx_entries: u32,
    pub(super) max_key_len: u32,
    pub(super) max_value_len: u32,
    pub(super) n_vlogs: usize,
    pub(super) max_linear_proof_len: u64,
    pub(super) aht_sync_thld: usize,
    pub(super) aht_cache_slots: usize,
    pub(super) max_active_snapshots: usize,
}

impl Default for StoreOptions {
    fn default() -> StoreOptions {
        StoreOptions {
            max_tx_entries: 1024,
            max_key_len: 256,
            max_value_len: 4 * 1024 * 1024,
            n_vlogs: 1,
            max_linear_proof_len: 10_000,
            aht_sync_thld: crate::ahtree::DEFAULT_SYNC_THLD,
            aht_cache_slots: 4096,
            max_active_snapshots: 16,
        }
    }
}

impl StoreOptions {
    pub fn new() -> StoreOptions {
        StoreOptions::default()
    }

    /// Load options from a TOML file, falling back to [StoreOptions::default]
    /// for any field it omits.
    pub fn from_toml_file(path: &std::path::Path) -> crate::Result<StoreOptions> {
        crate::util::files::load_toml(path)
    }

    pub fn set_max_tx_entries(&mut self, n: u32) -> &mut Self {
        self.max_tx_entries = n.max(1);
        self
    }

    pub fn set_max_key_len(&mut self, n: u32) -> &mut Self {
        self.max_key_len = n.max(1);
        self
    }

    pub fn set_max_value_len(&mut self, n: u32) -> &mut Self {
        self.max_value_len = n.max(1);
        self
    }

    pub fn set_n_vlogs(&mut self, n: usize) -> &mut Self {
        self.n_vlogs = n.max(1).min(128);
        self
    }

    pub fn set_max_linear_proof_len(&mut self, n: u64) -> &mut Self {
        self.max_linear_proof_len = n.max(1);
        self
    }

    pub fn set_max_active_snapshots(&mut self, n: usize) -> &mut Self {
        self.max_active_snapshots = n.max(1);
        self
    }
}
