//! Offline-first startup: seed the store from a directory of cached daily
//! bars, one `<TICKER>.csv` per ticker with a `Date,Open,High,Low,Close,Volume`
//! header.

use crate::engine::{BatchSummary, MarketDataEngine};
use crate::refresh::CsvSource;
use basalt_arbiter::ReservationArbiter;
use basalt_events::OhlcvRow;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum HydrateError {
    #[error("failed to read csv directory '{path}'")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse '{path}'")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("'{path}' line {line}: unrecognised date '{value}'")]
    Date { path: PathBuf, line: u64, value: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CsvBar {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    // pandas writes integer columns with NaN holes as floats
    volume: f64,
}

/// Bar date as milliseconds since the unix epoch, UTC.
fn parse_date_ms(s: &str) -> Option<u64> {
    let s = s.trim();
    let dt = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y%m%d %H:%M:%S").ok())?;
    u64::try_from(dt.and_utc().timestamp_millis()).ok()
}

/// Reads one file into rows sorted by timestamp.
pub fn load_csv_file(path: &Path) -> Result<Vec<OhlcvRow>, HydrateError> {
    let csv_err = |source: csv::Error| HydrateError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut rdr = csv::Reader::from_path(path).map_err(csv_err)?;

    let mut rows = Vec::new();
    for (i, record) in rdr.deserialize::<CsvBar>().enumerate() {
        let bar = record.map_err(csv_err)?;
        let timestamp = parse_date_ms(&bar.date).ok_or_else(|| HydrateError::Date {
            path: path.to_path_buf(),
            // header is line 1
            line: i as u64 + 2,
            value: bar.date.clone(),
        })?;
        rows.push(OhlcvRow::new(
            timestamp,
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume.max(0.0).round() as u64,
        ));
    }
    rows.sort_by_key(|r| r.timestamp);
    Ok(rows)
}

/// Loads `<TICKER>.csv` for every ticker in `tickers` that has a file in
/// `dir`. Files that fail to parse are skipped with a warning; missing files
/// are not an error.
pub fn load_csv_dir(
    dir: &Path,
    tickers: &[String],
) -> Result<Vec<(String, Vec<OhlcvRow>)>, HydrateError> {
    std::fs::read_dir(dir).map_err(|source| HydrateError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut batch = Vec::new();
    for ticker in tickers {
        let path = dir.join(format!("{ticker}.csv"));
        if !path.is_file() {
            debug!(ticker, path = %path.display(), "no cached csv");
            continue;
        }
        match load_csv_file(&path) {
            Ok(rows) => batch.push((ticker.clone(), rows)),
            Err(e) => warn!(ticker, error = %e, "skipping malformed csv"),
        }
    }
    Ok(batch)
}

impl MarketDataEngine {
    /// Loads the cached csv directory as one batch. Clients cannot reserve
    /// the broker session while this runs.
    pub fn hydrate_from_csv(
        &mut self,
        dir: &Path,
        arbiter: &ReservationArbiter,
    ) -> Result<BatchSummary, HydrateError> {
        let summary = self.download(&mut CsvSource::new(dir), arbiter)?;
        info!(
            dir = %dir.display(),
            tickers = summary.tickers,
            rows = summary.rows,
            "hydrated store from csv cache"
        );
        Ok(summary)
    }
}
