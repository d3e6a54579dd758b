//! Ring buffer configuration and index arithmetic.
//!
//! Every ticker entry keeps a logical `write_cursor` that only grows. The
//! physical slot of logical row `seq` is `seq % capacity`, and the rows still
//! held by the ring are the last `min(cursor, capacity)` logical indices.

use std::ops::Range;

/// Default number of seqlock attempts a reader makes before giving up.
pub const DEFAULT_RETRY_BUDGET: u32 = 1024;

/// Configuration for the per-ticker rings.
#[derive(Debug, Copy, Clone)]
pub struct RingConfig {
    /// Rows held per ticker. Fixed once the region is created.
    pub capacity: usize,
    /// Seqlock attempts a reader makes before failing with `RetryExhausted`.
    pub read_retry_budget: u32,
}

impl RingConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            read_retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }

    /// A budget of zero is raised to one attempt.
    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.read_retry_budget = budget.max(1);
        self
    }
}

/// Converts a logical row index to its physical slot.
///
/// ```text
/// capacity = 5
/// seq = 0 -> 0
/// seq = 4 -> 4
/// seq = 5 -> 0   (wraps, overwrites the oldest row)
/// seq = 7 -> 2
/// ```
#[inline(always)]
pub fn seq_to_index(seq: u64, capacity: u64) -> u64 {
    seq % capacity
}

/// Number of rows currently held by a ring whose cursor is `cursor`.
#[inline(always)]
pub fn visible_rows(cursor: u64, capacity: u64) -> u64 {
    cursor.min(capacity)
}

/// Logical indices of the `n` most recent rows, oldest first.
///
/// `n` is clamped to what the ring still holds, so asking for more rows than
/// were ever written, or more than the capacity, is not an error.
#[inline]
pub fn last_n_range(cursor: u64, capacity: u64, n: u64) -> Range<u64> {
    let take = n.min(visible_rows(cursor, capacity));
    (cursor - take)..cursor
}
