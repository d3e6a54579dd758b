//! Periodic refresh while the gateway serves.
//!
//! Each cycle first makes sure the service owns the broker session. If a
//! client holds it, the holder is asked to release and the cycle is skipped.
//! Otherwise bars are pulled from a [`BarSource`] inside a download bracket
//! and the rows the rings have not seen yet are published as one batch.

use crate::engine::{BatchSummary, MarketDataEngine};
use crate::hydrate::{HydrateError, load_csv_dir};
use basalt_arbiter::{ClientId, ReservationArbiter};
use basalt_events::OhlcvRow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Bars per ticker, each list sorted by timestamp.
pub type FetchedBars = Vec<(String, Vec<OhlcvRow>)>;

/// Where refresh cycles get their bars. Called on a blocking thread.
pub trait BarSource: Send + 'static {
    fn fetch(&mut self, tickers: &[String]) -> Result<FetchedBars, HydrateError>;
}

/// Re-reads a directory of `<TICKER>.csv` files every cycle.
#[derive(Debug, Clone)]
pub struct CsvSource {
    dir: PathBuf,
}

impl CsvSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl BarSource for CsvSource {
    fn fetch(&mut self, tickers: &[String]) -> Result<FetchedBars, HydrateError> {
        load_csv_dir(&self.dir, tickers)
    }
}

#[derive(Debug)]
pub enum RefreshOutcome {
    Published(BatchSummary),
    /// The broker refused the service; `holder` was asked to release.
    SessionUnavailable { holder: Option<ClientId> },
}

/// Marks a download as in progress for the lifetime of the guard.
struct DownloadGuard<'a>(&'a ReservationArbiter);

impl<'a> DownloadGuard<'a> {
    fn start(arbiter: &'a ReservationArbiter) -> Self {
        arbiter.download_start();
        Self(arbiter)
    }
}

impl Drop for DownloadGuard<'_> {
    fn drop(&mut self) {
        self.0.download_end();
    }
}

impl MarketDataEngine {
    /// Fetches from `source` and publishes, as one batch, the rows newer than
    /// the last row each ring holds. Clients cannot reserve the broker
    /// session while this runs.
    pub fn download<S: BarSource + ?Sized>(
        &mut self,
        source: &mut S,
        arbiter: &ReservationArbiter,
    ) -> Result<BatchSummary, HydrateError> {
        let _download = DownloadGuard::start(arbiter);
        let fetched = source.fetch(&self.tickers())?;
        let batch = self.unseen_rows(fetched);
        Ok(self.publish_batch(&batch))
    }

    /// One refresh cycle.
    pub fn refresh<S: BarSource + ?Sized>(
        &mut self,
        source: &mut S,
        arbiter: &ReservationArbiter,
    ) -> Result<RefreshOutcome, HydrateError> {
        if !arbiter.ensure_service_session() {
            let holder = arbiter.snapshot().state.holder();
            return Ok(RefreshOutcome::SessionUnavailable { holder });
        }
        self.download(source, arbiter).map(RefreshOutcome::Published)
    }

    fn unseen_rows(&self, fetched: FetchedBars) -> FetchedBars {
        let reader = self.reader();
        fetched
            .into_iter()
            .filter_map(|(ticker, rows)| {
                // unknown tickers pass through so the batch reports them
                let newest = match reader.latest(&ticker) {
                    Ok(Some(row)) => row.timestamp,
                    _ => return Some((ticker, rows)),
                };
                let rows: Vec<_> = rows.into_iter().filter(|r| r.timestamp > newest).collect();
                (!rows.is_empty()).then_some((ticker, rows))
            })
            .collect()
    }
}

/// Drives refresh cycles on a fixed period.
pub struct RefreshAgent<S> {
    engine: MarketDataEngine,
    source: S,
    arbiter: Arc<ReservationArbiter>,
    period: Duration,
}

impl<S: BarSource> RefreshAgent<S> {
    pub fn new(
        engine: MarketDataEngine,
        source: S,
        arbiter: Arc<ReservationArbiter>,
        period: Duration,
    ) -> Self {
        Self {
            engine,
            source,
            arbiter,
            period: period.max(Duration::from_millis(1)),
        }
    }

    /// Runs until cancelled. The first cycle starts one period from now and
    /// every cycle runs on a blocking thread. Only returns if a cycle
    /// panicked.
    pub async fn run(self) -> Result<(), JoinError> {
        let Self {
            mut engine,
            mut source,
            arbiter,
            period,
        } = self;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_ms = period.as_millis() as u64, "refresh agent started");

        loop {
            interval.tick().await;
            let arbiter = Arc::clone(&arbiter);
            let (e, s, outcome) = tokio::task::spawn_blocking(move || {
                let outcome = engine.refresh(&mut source, &arbiter);
                (engine, source, outcome)
            })
            .await?;
            engine = e;
            source = s;

            match outcome {
                Ok(RefreshOutcome::Published(summary)) => {
                    debug!(epoch = summary.epoch, rows = summary.rows, "refresh cycle published");
                }
                Ok(RefreshOutcome::SessionUnavailable { holder }) => {
                    info!(holder = ?holder, "broker session held by a client, refresh skipped");
                }
                Err(e) => warn!(error = %e, "refresh cycle failed"),
            }
        }
    }
}
