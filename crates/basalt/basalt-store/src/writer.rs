//! The single writer of the OHLCV region.
//!
//! Exactly one `RingStoreWriter` exists per region and all of its mutating
//! methods take `&mut self`, so the "one writer at a time" role is carried by
//! ownership. `RingStoreWriter` is `Send` but not `Clone`.

use crate::error::StoreError;
use crate::reader::RingStoreReader;
use crate::region::SharedRegion;
use crate::ring::{RingConfig, seq_to_index};
use crate::seqlock;
use crate::shm_layout::StoreLayout;
use basalt_events::{OhlcvRow, now_ms};
use basalt_mmap::{MmapAnon, MmapFileMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

pub struct RingStoreWriter {
    region: Arc<SharedRegion>,
    layout: Arc<StoreLayout>,
    cfg: RingConfig,
    /// Directory slot bracketed by `begin_write`, if any.
    open_entry: Option<usize>,
    /// File backing the region when it is shared with other processes.
    path: Option<PathBuf>,
}

impl RingStoreWriter {
    /// Creates a file-backed region that other processes can attach to.
    ///
    /// An existing file at `path` is truncated: the writer always starts from
    /// empty rings.
    pub fn create<P: AsRef<Path>>(
        path: P,
        tickers: &[impl AsRef<str>],
        cfg: RingConfig,
    ) -> Result<Self, StoreError> {
        let layout = StoreLayout::for_symbols(tickers, cfg.capacity)?;
        let mm = MmapFileMut::create_rw(path.as_ref(), layout.total_bytes())?;
        let writer = Self::init(SharedRegion::shared(mm), layout, cfg, Some(path.as_ref().into()));
        info!(
            path = %path.as_ref().display(),
            tickers = writer.layout.tickers().len(),
            capacity = cfg.capacity,
            bytes = writer.layout.total_bytes(),
            "created shared ohlcv region"
        );
        Ok(writer)
    }

    /// Creates a process-private region. Only in-process readers obtained
    /// through [`RingStoreWriter::reader`] can see it.
    pub fn create_private(tickers: &[impl AsRef<str>], cfg: RingConfig) -> Result<Self, StoreError> {
        let layout = StoreLayout::for_symbols(tickers, cfg.capacity)?;
        let mm = MmapAnon::new(layout.total_bytes())?;
        let writer = Self::init(SharedRegion::private(mm), layout, cfg, None);
        info!(
            tickers = writer.layout.tickers().len(),
            capacity = cfg.capacity,
            "created private ohlcv region"
        );
        Ok(writer)
    }

    fn init(region: SharedRegion, layout: StoreLayout, cfg: RingConfig, path: Option<PathBuf>) -> Self {
        region.initialize(&layout, layout.capacity(), std::process::id());
        Self {
            region: Arc::new(region),
            layout: Arc::new(layout),
            cfg,
            open_entry: None,
            path,
        }
    }

    /// A reader sharing this writer's mapping.
    pub fn reader(&self) -> RingStoreReader {
        RingStoreReader::from_parts(
            Arc::clone(&self.region),
            Arc::clone(&self.layout),
            self.cfg.read_retry_budget,
        )
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// File backing the region, if it is shared.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn slot(&self, ticker: &str) -> Result<usize, StoreError> {
        self.layout
            .index_of(ticker)
            .ok_or_else(|| StoreError::UnknownTicker(ticker.to_string()))
    }

    fn require_open(&self, ticker: &str) -> Result<usize, StoreError> {
        let idx = self.slot(ticker)?;
        if self.open_entry != Some(idx) {
            return Err(StoreError::NoWriteInProgress(ticker.to_string()));
        }
        Ok(idx)
    }

    /// Marks the entry as being written (epoch becomes odd).
    pub fn begin_write(&mut self, ticker: &str) -> Result<(), StoreError> {
        let idx = self.slot(ticker)?;
        if let Some(open) = self.open_entry {
            let open = self.layout.tickers()[open].to_string();
            warn!(%open, requested = ticker, "begin_write while another write is open");
            return Err(StoreError::WriteInProgress {
                open,
                requested: ticker.to_string(),
            });
        }
        let header = self.region.ticker_header(self.layout.entry_offset(idx));
        seqlock::write_begin(&header.epoch);
        self.open_entry = Some(idx);
        Ok(())
    }

    /// Writes `row` at `write_cursor % capacity` and advances the cursor.
    /// Once the ring is full this overwrites the oldest row.
    pub fn commit_row(&mut self, ticker: &str, row: OhlcvRow) -> Result<(), StoreError> {
        let idx = self.require_open(ticker)?;
        let header = self.region.ticker_header(self.layout.entry_offset(idx));
        let cursor = header.write_cursor.load(Ordering::Relaxed);
        let slot = seq_to_index(cursor, self.layout.capacity());

        let rows = self.region.rows_mut(self.layout.rows_offset(idx));
        // SAFETY: slot < capacity; epoch is odd so readers discard what they copy
        unsafe { std::ptr::write_volatile(rows.add(slot as usize), row) };

        header.write_cursor.store(cursor + 1, Ordering::Relaxed);
        header.last_update_ms.store(now_ms(), Ordering::Relaxed);
        Ok(())
    }

    /// Publishes the entry (epoch becomes even).
    pub fn end_write(&mut self, ticker: &str) -> Result<(), StoreError> {
        let idx = self.require_open(ticker)?;
        let header = self.region.ticker_header(self.layout.entry_offset(idx));
        let epoch = seqlock::write_end(&header.epoch);
        self.open_entry = None;
        debug!(ticker, epoch, "entry published");
        Ok(())
    }

    /// `begin_write` + `commit_row` + `end_write` for a single row.
    pub fn append(&mut self, ticker: &str, row: OhlcvRow) -> Result<(), StoreError> {
        self.begin_write(ticker)?;
        self.commit_row(ticker, row)?;
        self.end_write(ticker)
    }

    /// Commits every row of `rows` under one seqlock bracket.
    pub fn append_all(&mut self, ticker: &str, rows: &[OhlcvRow]) -> Result<(), StoreError> {
        self.begin_write(ticker)?;
        for row in rows {
            self.commit_row(ticker, *row)?;
        }
        self.end_write(ticker)
    }

    /// Current epoch of the entry; odd while a write is open.
    pub fn epoch(&self, ticker: &str) -> Result<u64, StoreError> {
        let idx = self.slot(ticker)?;
        Ok(self
            .region
            .ticker_header(self.layout.entry_offset(idx))
            .epoch
            .load(Ordering::Acquire))
    }

    /// Commit time of the entry's newest row, 0 if nothing was written.
    pub fn last_update_ms(&self, ticker: &str) -> Result<u64, StoreError> {
        let idx = self.slot(ticker)?;
        Ok(self
            .region
            .ticker_header(self.layout.entry_offset(idx))
            .last_update_ms
            .load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer(capacity: usize) -> RingStoreWriter {
        RingStoreWriter::create_private(&["AAPL", "MSFT"], RingConfig::new(capacity)).unwrap()
    }

    #[test]
    fn epoch_is_odd_only_inside_the_bracket() {
        let mut w = writer(4);
        assert_eq!(w.epoch("AAPL").unwrap(), 0);

        w.begin_write("AAPL").unwrap();
        assert_eq!(w.epoch("AAPL").unwrap() % 2, 1);
        w.commit_row("AAPL", OhlcvRow::flat(1, 10.0, 5)).unwrap();
        assert_eq!(w.epoch("AAPL").unwrap() % 2, 1);
        w.end_write("AAPL").unwrap();

        assert_eq!(w.epoch("AAPL").unwrap(), 2);
        // untouched entry keeps its own counter
        assert_eq!(w.epoch("MSFT").unwrap(), 0);
    }

    #[test]
    fn second_begin_is_a_contract_violation() {
        let mut w = writer(4);
        w.begin_write("AAPL").unwrap();
        let err = w.begin_write("MSFT").unwrap_err();
        assert!(matches!(err, StoreError::WriteInProgress { .. }));
        // the open bracket is unaffected
        w.end_write("AAPL").unwrap();
        w.begin_write("MSFT").unwrap();
    }

    #[test]
    fn commit_outside_a_bracket_is_rejected() {
        let mut w = writer(4);
        let err = w.commit_row("AAPL", OhlcvRow::default()).unwrap_err();
        assert!(matches!(err, StoreError::NoWriteInProgress(_)));

        w.begin_write("AAPL").unwrap();
        let err = w.commit_row("MSFT", OhlcvRow::default()).unwrap_err();
        assert!(matches!(err, StoreError::NoWriteInProgress(_)));
    }

    #[test]
    fn unknown_ticker_is_not_found() {
        let mut w = writer(4);
        let err = w.append("GOOG", OhlcvRow::default()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn each_append_moves_epoch_by_two() {
        let mut w = writer(2);
        for i in 0..5 {
            w.append("MSFT", OhlcvRow::flat(i, i as f64, i)).unwrap();
        }
        assert_eq!(w.epoch("MSFT").unwrap(), 10);
    }

    #[test]
    fn reader_from_zero_budget_config_can_read() {
        let cfg = RingConfig::new(4).with_retry_budget(0);
        let mut w = RingStoreWriter::create_private(&["AAPL"], cfg).unwrap();
        w.append("AAPL", OhlcvRow::flat(1, 10.0, 5)).unwrap();
        assert_eq!(w.reader().view_last_n("AAPL", 4).unwrap().len(), 1);
    }
}
