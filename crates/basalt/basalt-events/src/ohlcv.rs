#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

// One bar of market data as it sits in a shared-memory ring slot.
// POD -> plain old data, fixed-size, no pointers, safe to copy bitwise
// across process boundaries.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OhlcvRow {
    /// Bar timestamp, milliseconds since the unix epoch
    pub timestamp: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl OhlcvRow {
    pub fn new(timestamp: u64, open: f64, high: f64, low: f64, close: f64, volume: u64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// A bar where every price equals `price` (a single print).
    pub fn flat(timestamp: u64, price: f64, volume: u64) -> Self {
        Self::new(timestamp, price, price, price, price, volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};

    /// The row is stamped into shared memory and its size is recorded in the
    /// region header, so any change here is a layout version bump.
    #[test]
    fn row_layout_is_stable() {
        assert_eq!(size_of::<OhlcvRow>(), 48, "OhlcvRow layout changed");
        assert_eq!(align_of::<OhlcvRow>(), 8);
    }

    #[test]
    fn flat_bar_repeats_price() {
        let row = OhlcvRow::flat(7, 101.5, 300);
        assert_eq!(row.open, 101.5);
        assert_eq!(row.low, row.high);
        assert_eq!(row.close, 101.5);
        assert_eq!(row.volume, 300);
    }
}
