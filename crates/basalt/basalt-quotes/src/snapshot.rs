//! Batch-level epoch.
//!
//! The writer calls [`SnapshotState::bump_batch`] once before and once after
//! a pass over all tickers, so the epoch is odd while a batch is running.
//! This is a liveness signal only: individual tickers are published as they
//! finish, and readers get no cross-ticker atomicity from it.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEpoch {
    pub epoch: u64,
    pub last_update_ms: u64,
}

impl SnapshotEpoch {
    pub fn batch_in_progress(&self) -> bool {
        self.epoch & 1 == 1
    }
}

#[derive(Debug, Default)]
pub struct SnapshotState {
    epoch: AtomicU64,
    last_update_ms: AtomicU64,
}

impl SnapshotState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the batch epoch by one. Even -> odd opens a batch; odd ->
    /// even closes it and records `now_ms` as the batch completion time.
    /// Returns the new epoch.
    ///
    /// Single writer: only the writer path calls this.
    pub fn bump_batch(&self, now_ms: u64) -> u64 {
        let next = self.epoch.load(Ordering::Relaxed).wrapping_add(1);
        if next & 1 == 0 {
            // completion time must be visible to anyone who sees the even epoch
            self.last_update_ms.store(now_ms, Ordering::Relaxed);
        }
        self.epoch.store(next, Ordering::Release);
        next
    }

    /// Current `(epoch, last_update_ms)` without any retry. Callers needing a
    /// batch-consistent view check `batch_in_progress` and re-read.
    pub fn get_snapshot_epoch(&self) -> SnapshotEpoch {
        let epoch = self.epoch.load(Ordering::Acquire);
        SnapshotEpoch {
            epoch,
            last_update_ms: self.last_update_ms.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_even_and_empty() {
        let s = SnapshotState::new();
        assert_eq!(
            s.get_snapshot_epoch(),
            SnapshotEpoch {
                epoch: 0,
                last_update_ms: 0
            }
        );
    }

    #[test]
    fn bracket_toggles_parity_and_stamps_completion() {
        let s = SnapshotState::new();
        assert_eq!(s.bump_batch(100), 1);
        let mid = s.get_snapshot_epoch();
        assert!(mid.batch_in_progress());
        // opening a batch does not touch the completion time
        assert_eq!(mid.last_update_ms, 0);

        assert_eq!(s.bump_batch(250), 2);
        let done = s.get_snapshot_epoch();
        assert!(!done.batch_in_progress());
        assert_eq!(done.last_update_ms, 250);
    }
}
