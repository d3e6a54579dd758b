//! Lock-free readers of the OHLCV region.
//!
//! A reader never blocks the writer. Every view is copied out under the
//! entry's seqlock and only returned once the epoch is the same, and even,
//! before and after the copy. A reader that keeps losing the race gives up
//! with [`StoreError::RetryExhausted`] after its retry budget.

use crate::error::StoreError;
use crate::region::SharedRegion;
use crate::ring::{DEFAULT_RETRY_BUDGET, last_n_range, seq_to_index, visible_rows};
use crate::seqlock::{self, Contended};
use crate::shm_layout::{StoreLayout, TickerHeader};
use basalt_events::{OhlcvRow, TickerSymbol};
use basalt_mmap::MmapFile;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, info};

/// Consistent snapshot of an entry's header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub epoch: u64,
    /// Rows ever written; `min(write_cursor, capacity)` are still held.
    pub write_cursor: u64,
    pub last_update_ms: u64,
    pub capacity: u64,
    pub schema_version: u32,
    pub writer_pid: u32,
}

#[derive(Clone)]
pub struct RingStoreReader {
    region: Arc<SharedRegion>,
    layout: Arc<StoreLayout>,
    retry_budget: u32,
}

impl std::fmt::Debug for RingStoreReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingStoreReader")
            .field("layout", &self.layout)
            .field("retry_budget", &self.retry_budget)
            .finish_non_exhaustive()
    }
}

impl RingStoreReader {
    pub(crate) fn from_parts(region: Arc<SharedRegion>, layout: Arc<StoreLayout>, retry_budget: u32) -> Self {
        Self {
            region,
            layout,
            retry_budget: retry_budget.max(1),
        }
    }

    /// Attaches read-only to a region created by another process.
    ///
    /// # Errors
    /// - the file cannot be opened or mapped
    /// - bad magic, layout version or row size
    /// - the directory does not match the layout recomputed from it
    pub fn attach<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mm = MmapFile::open_ro(path.as_ref())?;
        let region = SharedRegion::attached(mm);

        let header = region
            .region_header()
            .ok_or_else(|| StoreError::Layout("region smaller than its header".into()))?;
        header
            .validate()
            .map_err(|e| StoreError::Layout(e.to_string()))?;

        let directory = region
            .directory(header.directory_offset as usize, header.ticker_count as usize)
            .ok_or_else(|| StoreError::Layout("directory out of bounds".into()))?;
        let tickers: Vec<TickerSymbol> = directory
            .iter()
            .map(|d| TickerSymbol::from_raw(d.symbol))
            .collect();

        let layout = StoreLayout::compute(&tickers, header.capacity as usize)?;
        if !layout.matches(header, &directory) {
            return Err(StoreError::Layout("directory disagrees with computed layout".into()));
        }
        if region.len() < layout.total_bytes() {
            return Err(StoreError::Layout(format!(
                "region is {} bytes, layout needs {}",
                region.len(),
                layout.total_bytes()
            )));
        }

        info!(
            path = %path.as_ref().display(),
            tickers = tickers.len(),
            capacity = header.capacity,
            "attached to ohlcv region"
        );
        Ok(Self::from_parts(Arc::new(region), Arc::new(layout), DEFAULT_RETRY_BUDGET))
    }

    /// Sets the number of seqlock attempts made before a read fails.
    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget.max(1);
        self
    }

    pub fn tickers(&self) -> &[TickerSymbol] {
        self.layout.tickers()
    }

    pub fn capacity(&self) -> u64 {
        self.layout.capacity()
    }

    fn entry(&self, ticker: &str) -> Result<(usize, &TickerHeader), StoreError> {
        let idx = self
            .layout
            .index_of(ticker)
            .ok_or_else(|| StoreError::UnknownTicker(ticker.to_string()))?;
        Ok((idx, self.region.ticker_header(self.layout.entry_offset(idx))))
    }

    fn exhausted(&self, ticker: &str, c: Contended) -> StoreError {
        debug!(ticker, attempts = c.attempts, "seqlock read exhausted its budget");
        StoreError::RetryExhausted {
            ticker: ticker.to_string(),
            attempts: c.attempts,
        }
    }

    /// Up to `n` most recent rows, oldest first.
    pub fn view_last_n(&self, ticker: &str, n: usize) -> Result<Vec<OhlcvRow>, StoreError> {
        let (idx, header) = self.entry(ticker)?;
        let rows = self.region.rows(self.layout.rows_offset(idx));
        let capacity = self.layout.capacity();
        let mut out = Vec::with_capacity(n.min(capacity as usize));

        seqlock::read_consistent(&header.epoch, self.retry_budget, |_| {
            out.clear();
            let cursor = header.write_cursor.load(Ordering::Relaxed);
            for seq in last_n_range(cursor, capacity, n as u64) {
                let slot = seq_to_index(seq, capacity) as usize;
                // SAFETY: slot < capacity; a torn copy is discarded by the epoch check
                out.push(unsafe { std::ptr::read_volatile(rows.add(slot)) });
            }
        })
        .map_err(|c| self.exhausted(ticker, c))?;

        Ok(out)
    }

    /// Rows with `timestamp > ts`, oldest first.
    ///
    /// Scans backward from the newest row and stops at the first row at or
    /// before `ts`, so rows are expected in non-decreasing timestamp order.
    pub fn view_since(&self, ticker: &str, ts: u64) -> Result<Vec<OhlcvRow>, StoreError> {
        let (idx, header) = self.entry(ticker)?;
        let rows = self.region.rows(self.layout.rows_offset(idx));
        let capacity = self.layout.capacity();
        let mut out = Vec::new();

        seqlock::read_consistent(&header.epoch, self.retry_budget, |_| {
            out.clear();
            let cursor = header.write_cursor.load(Ordering::Relaxed);
            let oldest = cursor - visible_rows(cursor, capacity);
            for seq in (oldest..cursor).rev() {
                let slot = seq_to_index(seq, capacity) as usize;
                // SAFETY: as in view_last_n
                let row = unsafe { std::ptr::read_volatile(rows.add(slot)) };
                if row.timestamp <= ts {
                    break;
                }
                out.push(row);
            }
        })
        .map_err(|c| self.exhausted(ticker, c))?;

        out.reverse();
        Ok(out)
    }

    /// The most recent row, if any was written.
    pub fn latest(&self, ticker: &str) -> Result<Option<OhlcvRow>, StoreError> {
        Ok(self.view_last_n(ticker, 1)?.pop())
    }

    pub fn entry_meta(&self, ticker: &str) -> Result<EntryMeta, StoreError> {
        let (_, header) = self.entry(ticker)?;
        seqlock::read_consistent(&header.epoch, self.retry_budget, |epoch| EntryMeta {
            epoch,
            write_cursor: header.write_cursor.load(Ordering::Relaxed),
            last_update_ms: header.last_update_ms.load(Ordering::Relaxed),
            capacity: header.capacity,
            schema_version: header.schema_version,
            writer_pid: header.writer_pid,
        })
        .map_err(|c| self.exhausted(ticker, c))
    }
}
