//! Seqlock (sequence lock) protocol over a per-entry epoch counter.
//!
//! Unlike a slot-sized seqlock, the epoch here guards a whole ticker entry:
//! its cursor, timestamps and every row. The writer may commit several rows
//! inside one bracket.
//!
//! **Writer:**
//! 1. epoch -> odd (write in progress)
//! 2. write rows / cursor
//! 3. epoch -> even (published)
//!
//! **Reader:**
//! 1. e1 = epoch; if odd, retry
//! 2. copy what it needs
//! 3. e2 = epoch; if e1 != e2, retry
//!
//! Readers are bounded: after `budget` failed attempts they give up instead
//! of spinning forever behind a slow or dead writer.

use std::sync::atomic::{AtomicU64, Ordering, fence};

#[inline(always)]
pub fn is_odd(epoch: u64) -> bool {
    epoch & 1 == 1
}

/// Marks the entry as being written. Returns the new (odd) epoch.
///
/// The `Release` fence orders the odd store before any following data
/// store, so a reader that sees new data also sees the odd epoch on its
/// second load.
#[inline(always)]
pub fn write_begin(epoch: &AtomicU64) -> u64 {
    let odd = epoch.load(Ordering::Relaxed).wrapping_add(1);
    epoch.store(odd, Ordering::Relaxed);
    fence(Ordering::Release);
    odd
}

/// Publishes the entry. Returns the new (even) epoch.
#[inline(always)]
pub fn write_end(epoch: &AtomicU64) -> u64 {
    let even = epoch.load(Ordering::Relaxed).wrapping_add(1);
    epoch.store(even, Ordering::Release);
    even
}

/// Number of attempts a failed read consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contended {
    pub attempts: u32,
}

/// Runs `copy` until it observes a stable, even epoch on both sides.
///
/// `copy` may see torn data; its result is only returned once the epoch
/// check proves nothing changed underneath it. It is handed the epoch it
/// runs under.
#[inline]
pub fn read_consistent<T>(
    epoch: &AtomicU64,
    budget: u32,
    mut copy: impl FnMut(u64) -> T,
) -> Result<T, Contended> {
    let mut attempts = 0u32;
    while attempts < budget {
        attempts += 1;

        let e1 = epoch.load(Ordering::Acquire);
        if is_odd(e1) {
            std::hint::spin_loop();
            continue;
        }

        let value = copy(e1);

        // pairs with the writer's Release fence in write_begin
        fence(Ordering::Acquire);
        let e2 = epoch.load(Ordering::Relaxed);
        if e1 == e2 {
            return Ok(value);
        }

        std::hint::spin_loop();
    }
    Err(Contended { attempts })
}
