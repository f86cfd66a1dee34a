//! `vericask` is an embedded, append-only, cryptographically verifiable
//! key-value and relational store.
//!
//! Every committed transaction is hashed into an incremental Merkle-style
//! structure (the [ahtree]) so that any client can obtain tamper-evident
//! proofs of inclusion (a specific key/value at a given transaction) and
//! consistency (that a later state is an extension of an earlier one). On
//! top of this log, a SQL engine ([sql]) provides relational tables,
//! secondary indexes, MVCC snapshots, and temporal queries that address
//! historical states by transaction id or timestamp.
//!
//! Top to bottom, from what a caller touches first to what backs it:
//!
//! * [sql] — parser, planner and row-reader pipeline.
//! * [mvcc] — SQL-level transaction manager (snapshot selection, conflict
//!   detection) layered over the store.
//! * [catalog] — databases, tables, columns, indexes and the row/key codec.
//! * [store] — the transactional log: commit algorithm, indexer, dual proofs.
//! * [index] — the persistent, snapshot-capable B-tree behind the store.
//! * [ahtree] — the Appendable Hash Tree giving inclusion/consistency proofs.
//! * [appendable] — the segmented append-only file every log is built on.

#[macro_use]
mod error;

pub mod appendable;
pub mod ahtree;
pub mod catalog;
pub mod hash;
pub mod index;
pub mod mvcc;
pub mod replication;
pub mod sql;
pub mod store;
mod util;

pub use crate::error::{Error, Result};
pub use crate::sql::Engine;
pub use crate::store::{Store, StoreOptions};
