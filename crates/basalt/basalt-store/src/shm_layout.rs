//! Binary layout of the shared OHLCV region.
//!
//! The layout is a pure function of `(tickers, capacity)`. The writer stamps
//! the inputs into the region header and directory; a reader reads them back,
//! recomputes the layout and refuses to attach if anything disagrees.
//!
//! # Memory Layout
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │ RegionHeader                                                   │
//! │  magic │ layout_version │ ticker_count │ capacity │ row_size   │
//! │  entry_stride │ entries_offset │ directory_offset              │
//! ├────────────────────────────────────────────────────────────────┤
//! │ DirectoryEntry[0..ticker_count]   { symbol[16], offset }       │
//! ├──────────────────────── (64B aligned) ─────────────────────────┤
//! │ TickerEntry[0]                                                 │
//! │  ┌─────────────────────────────────────────────┐               │
//! │  │ TickerHeader (64B)                          │               │
//! │  │  epoch │ write_cursor │ last_update_ms │    │               │
//! │  │  capacity │ schema_version │ writer_pid     │               │
//! │  ├─────────────────────────────────────────────┤               │
//! │  │ OhlcvRow[capacity]                          │               │
//! │  └─────────────────────────────────────────────┘               │
//! ├──────────────────────── (64B aligned) ─────────────────────────┤
//! │ TickerEntry[1] ...                                             │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::StoreError;
use basalt_events::{OhlcvRow, TICKER_LEN, TickerSymbol};
use std::collections::HashMap;
use std::mem::size_of;
use std::sync::atomic::AtomicU64;

/// ASCII "BASALTRB" (basalt ring buffer).
pub const REGION_MAGIC: u64 = 0x4241_5341_4C54_5242;

/// Bump on any incompatible change to the structures below.
pub const LAYOUT_VERSION: u32 = 1;

/// Version of the row encoding stamped into every ticker header.
pub const ROW_SCHEMA_VERSION: u32 = 1;

const ENTRY_ALIGN: usize = 64;

/// Region header at offset 0. Written once at creation, before the magic is
/// published, and never modified afterwards.
#[repr(C)]
pub struct RegionHeader {
    pub magic: u64,
    pub layout_version: u32,
    pub ticker_count: u32,
    pub capacity: u64,
    pub row_size: u64,
    pub entry_stride: u64,
    pub entries_offset: u64,
    pub directory_offset: u64,
}

/// One directory slot per ticker, in creation order.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DirectoryEntry {
    pub symbol: [u8; TICKER_LEN],
    pub offset: u64,
}

/// Seqlock header in front of each ticker's rows.
///
/// `epoch`, `write_cursor` and `last_update_ms` are mutated by the writer;
/// the rest is fixed at creation.
#[repr(C, align(64))]
pub struct TickerHeader {
    /// Seqlock counter: odd = write in progress, even = stable.
    pub epoch: AtomicU64,
    /// Logical index of the next row. Never wraps; the slot is `cursor % capacity`.
    pub write_cursor: AtomicU64,
    /// Wall-clock ms of the last committed row.
    pub last_update_ms: AtomicU64,
    pub capacity: u64,
    pub schema_version: u32,
    pub writer_pid: u32,
}

impl RegionHeader {
    /// Checks the fields a reader can validate before it knows the tickers.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.magic != REGION_MAGIC {
            return Err("bad magic");
        }
        if self.layout_version != LAYOUT_VERSION {
            return Err("wrong layout version");
        }
        if self.row_size as usize != size_of::<OhlcvRow>() {
            return Err("row size mismatch");
        }
        if self.capacity == 0 {
            return Err("zero capacity");
        }
        if self.directory_offset as usize != size_of::<RegionHeader>() {
            return Err("unexpected directory offset");
        }
        Ok(())
    }
}

/// Offsets and sizes of everything in the region.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    tickers: Vec<TickerSymbol>,
    index: HashMap<String, usize>,
    capacity: u64,
    entry_stride: usize,
    entries_offset: usize,
    total_bytes: usize,
}

#[inline]
fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

impl StoreLayout {
    pub fn compute(tickers: &[TickerSymbol], capacity: usize) -> Result<Self, StoreError> {
        if tickers.is_empty() {
            return Err(StoreError::Layout("no tickers".into()));
        }
        if capacity == 0 {
            return Err(StoreError::Layout("capacity must be positive".into()));
        }
        if tickers.len() > u32::MAX as usize {
            return Err(StoreError::Layout("too many tickers".into()));
        }

        let mut index = HashMap::with_capacity(tickers.len());
        for (i, t) in tickers.iter().enumerate() {
            if index.insert(t.as_str().to_string(), i).is_some() {
                return Err(StoreError::Layout(format!("duplicate ticker '{t}'")));
            }
        }

        let directory_bytes = tickers.len() * size_of::<DirectoryEntry>();
        let entries_offset = align_up(size_of::<RegionHeader>() + directory_bytes, ENTRY_ALIGN);
        let rows_bytes = capacity
            .checked_mul(size_of::<OhlcvRow>())
            .ok_or_else(|| StoreError::Layout("capacity overflows region size".into()))?;
        let entry_stride = align_up(size_of::<TickerHeader>() + rows_bytes, ENTRY_ALIGN);
        let total_bytes = entry_stride
            .checked_mul(tickers.len())
            .and_then(|b| b.checked_add(entries_offset))
            .ok_or_else(|| StoreError::Layout("region size overflows".into()))?;

        Ok(Self {
            tickers: tickers.to_vec(),
            index,
            capacity: capacity as u64,
            entry_stride,
            entries_offset,
            total_bytes,
        })
    }

    /// Convenience wrapper taking plain strings.
    pub fn for_symbols<S: AsRef<str>>(symbols: &[S], capacity: usize) -> Result<Self, StoreError> {
        let tickers = symbols
            .iter()
            .map(|s| TickerSymbol::new(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::compute(&tickers, capacity)
    }

    #[inline]
    pub fn tickers(&self) -> &[TickerSymbol] {
        &self.tickers
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    #[inline]
    pub fn entry_stride(&self) -> usize {
        self.entry_stride
    }

    #[inline]
    pub fn entries_offset(&self) -> usize {
        self.entries_offset
    }

    #[inline]
    pub fn directory_offset(&self) -> usize {
        size_of::<RegionHeader>()
    }

    /// Position of `ticker` in the directory.
    #[inline]
    pub fn index_of(&self, ticker: &str) -> Option<usize> {
        self.index.get(ticker).copied()
    }

    /// Byte offset of the entry header for directory slot `idx`.
    #[inline]
    pub fn entry_offset(&self, idx: usize) -> usize {
        self.entries_offset + idx * self.entry_stride
    }

    /// Byte offset of the first row of directory slot `idx`.
    #[inline]
    pub fn rows_offset(&self, idx: usize) -> usize {
        self.entry_offset(idx) + size_of::<TickerHeader>()
    }

    pub(crate) fn header(&self) -> RegionHeader {
        RegionHeader {
            magic: REGION_MAGIC,
            layout_version: LAYOUT_VERSION,
            ticker_count: self.tickers.len() as u32,
            capacity: self.capacity,
            row_size: size_of::<OhlcvRow>() as u64,
            entry_stride: self.entry_stride as u64,
            entries_offset: self.entries_offset as u64,
            directory_offset: size_of::<RegionHeader>() as u64,
        }
    }

    pub(crate) fn directory(&self) -> Vec<DirectoryEntry> {
        self.tickers
            .iter()
            .enumerate()
            .map(|(i, t)| DirectoryEntry {
                symbol: t.to_raw(),
                offset: self.entry_offset(i) as u64,
            })
            .collect()
    }

    /// Cross-checks a header and directory read from a region against this
    /// layout, which the reader recomputed from the same inputs.
    pub(crate) fn matches(&self, header: &RegionHeader, directory: &[DirectoryEntry]) -> bool {
        header.entry_stride as usize == self.entry_stride
            && header.entries_offset as usize == self.entries_offset
            && directory.len() == self.tickers.len()
            && directory
                .iter()
                .enumerate()
                .all(|(i, d)| d.offset as usize == self.entry_offset(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_structures_have_expected_sizes() {
        assert_eq!(size_of::<RegionHeader>(), 56);
        assert_eq!(size_of::<DirectoryEntry>(), 24);
        assert_eq!(size_of::<TickerHeader>(), 64);
    }

    #[test]
    fn entries_are_cache_line_aligned() {
        let layout = StoreLayout::for_symbols(&["AAPL", "MSFT", "NVDA"], 5).unwrap();
        assert_eq!(layout.entries_offset() % 64, 0);
        assert_eq!(layout.entry_stride() % 64, 0);
        // 64B header + 5 * 48B rows = 304 -> 320
        assert_eq!(layout.entry_stride(), 320);
        assert_eq!(layout.entry_offset(2), layout.entries_offset() + 640);
        assert_eq!(layout.total_bytes(), layout.entries_offset() + 3 * 320);
    }

    #[test]
    fn looks_up_tickers_by_name() {
        let layout = StoreLayout::for_symbols(&["AAPL", "MSFT"], 8).unwrap();
        assert_eq!(layout.index_of("MSFT"), Some(1));
        assert_eq!(layout.index_of("GOOG"), None);
    }

    #[test]
    fn rejects_degenerate_inputs() {
        assert!(StoreLayout::for_symbols::<&str>(&[], 8).is_err());
        assert!(StoreLayout::for_symbols(&["AAPL"], 0).is_err());
        assert!(StoreLayout::for_symbols(&["AAPL", "AAPL"], 8).is_err());
        assert!(StoreLayout::for_symbols(&["NOT A TICKER"], 8).is_err());
    }

    #[test]
    fn header_round_trips_through_validation() {
        let layout = StoreLayout::for_symbols(&["AAPL"], 8).unwrap();
        let header = layout.header();
        assert_eq!(header.validate(), Ok(()));
        assert!(layout.matches(&header, &layout.directory()));

        let mut bad = layout.header();
        bad.layout_version += 1;
        assert_eq!(bad.validate(), Err("wrong layout version"));
    }

    #[test]
    fn different_capacity_does_not_match() {
        let a = StoreLayout::for_symbols(&["AAPL"], 8).unwrap();
        let b = StoreLayout::for_symbols(&["AAPL"], 16).unwrap();
        assert!(!b.matches(&a.header(), &a.directory()));
    }
}
