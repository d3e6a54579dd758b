use basalt_events::{OhlcvRow, now_ms};
use basalt_quotes::{QuoteCache, SnapshotState};
use basalt_store::{RingStoreReader, RingStoreWriter, StoreError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one multi-ticker pass.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub tickers: usize,
    pub rows: usize,
    /// Tickers whose rows were not written, with the reason.
    pub failed: Vec<(String, StoreError)>,
    /// Batch epoch after the pass closed.
    pub epoch: u64,
}

pub struct MarketDataEngine {
    writer: RingStoreWriter,
    quotes: Arc<QuoteCache>,
    snapshot: Arc<SnapshotState>,
}

impl MarketDataEngine {
    pub fn new(writer: RingStoreWriter, quotes: Arc<QuoteCache>, snapshot: Arc<SnapshotState>) -> Self {
        Self {
            writer,
            quotes,
            snapshot,
        }
    }

    pub fn quotes(&self) -> &Arc<QuoteCache> {
        &self.quotes
    }

    pub fn snapshot(&self) -> &Arc<SnapshotState> {
        &self.snapshot
    }

    pub fn writer(&self) -> &RingStoreWriter {
        &self.writer
    }

    pub fn reader(&self) -> RingStoreReader {
        self.writer.reader()
    }

    /// Tickers the store was laid out for.
    pub fn tickers(&self) -> Vec<String> {
        self.writer
            .layout()
            .tickers()
            .iter()
            .map(|t| t.to_string())
            .collect()
    }

    /// Commits one row and mirrors it into the quote cache once published.
    pub fn publish_row(&mut self, ticker: &str, row: OhlcvRow) -> Result<(), StoreError> {
        self.writer.append(ticker, row)?;
        self.mirror(ticker, &row)
    }

    /// Commits `rows` for one ticker under a single seqlock bracket; the
    /// quote reflects the last of them.
    pub fn publish_rows(&mut self, ticker: &str, rows: &[OhlcvRow]) -> Result<(), StoreError> {
        let Some(last) = rows.last() else {
            return Ok(());
        };
        self.writer.append_all(ticker, rows)?;
        self.mirror(ticker, last)
    }

    fn mirror(&self, ticker: &str, row: &OhlcvRow) -> Result<(), StoreError> {
        let committed_ms = match self.writer.last_update_ms(ticker)? {
            0 => now_ms(),
            ms => ms,
        };
        self.quotes.refresh(ticker, row, committed_ms);
        Ok(())
    }

    /// Writes a multi-ticker pass between two batch-epoch bumps.
    ///
    /// A ticker that fails is skipped and reported; the batch is always
    /// closed so the batch epoch ends up even.
    pub fn publish_batch<S: AsRef<str>>(&mut self, batch: &[(S, Vec<OhlcvRow>)]) -> BatchSummary {
        let opened = self.snapshot.bump_batch(now_ms());
        debug!(epoch = opened, tickers = batch.len(), "batch opened");

        let mut summary = BatchSummary::default();
        for (ticker, rows) in batch {
            let ticker = ticker.as_ref();
            match self.publish_rows(ticker, rows) {
                Ok(()) => {
                    summary.tickers += 1;
                    summary.rows += rows.len();
                }
                Err(e) => {
                    warn!(ticker, error = %e, "batch write skipped ticker");
                    summary.failed.push((ticker.to_string(), e));
                }
            }
        }

        summary.epoch = self.snapshot.bump_batch(now_ms());
        info!(
            epoch = summary.epoch,
            tickers = summary.tickers,
            rows = summary.rows,
            failed = summary.failed.len(),
            "batch published"
        );
        summary
    }
}
