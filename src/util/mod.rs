//! Common utility functions and concurrency primitives shared by every module.

pub mod files;
pub mod spinlock;
pub mod thread;

pub use spinlock::Spinlock;
pub use thread::Thread;

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since epoch, server-assigned at commit time (`Tx.ts`).
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
