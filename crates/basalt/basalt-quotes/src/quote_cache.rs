use basalt_events::OhlcvRow;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QuoteError {
    #[error("unknown ticker '{0}'")]
    UnknownTicker(String),
}

/// Latest quote for one ticker. Derived, never authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub ticker: String,
    /// Close of the last committed row.
    pub price: f64,
    pub volume: u64,
    /// When the row was committed (wall clock, ms).
    pub timestamp_ms: u64,
    /// The bar's own timestamp.
    pub bar_timestamp: u64,
}

/// A quote as served to a client, with its staleness evaluated at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteView {
    #[serde(flatten)]
    pub quote: Quote,
    pub stale: bool,
}

pub struct QuoteCache {
    quotes: RwLock<HashMap<String, Quote>>,
    freshness_window_ms: u64,
}

impl QuoteCache {
    pub fn new(freshness_window_ms: u64) -> Self {
        Self {
            quotes: RwLock::new(HashMap::new()),
            freshness_window_ms,
        }
    }

    pub fn freshness_window_ms(&self) -> u64 {
        self.freshness_window_ms
    }

    /// Replaces the quote for `ticker` with one derived from `row`.
    ///
    /// Called by the writer path right after the row's entry was published,
    /// with `committed_ms` being the entry's `last_update_ms`.
    pub fn refresh(&self, ticker: &str, row: &OhlcvRow, committed_ms: u64) {
        let quote = Quote {
            ticker: ticker.to_string(),
            price: row.close,
            volume: row.volume,
            timestamp_ms: committed_ms,
            bar_timestamp: row.timestamp,
        };
        trace!(ticker, price = quote.price, "quote refreshed");
        self.quotes.write().insert(ticker.to_string(), quote);
    }

    /// Cached quote for `ticker`, stale when older than the freshness window
    /// as of `now_ms`.
    pub fn get_quote(&self, ticker: &str, now_ms: u64) -> Result<QuoteView, QuoteError> {
        let quote = self
            .quotes
            .read()
            .get(ticker)
            .cloned()
            .ok_or_else(|| QuoteError::UnknownTicker(ticker.to_string()))?;
        let stale = now_ms.saturating_sub(quote.timestamp_ms) > self.freshness_window_ms;
        Ok(QuoteView { quote, stale })
    }

    /// Tickers with at least one committed row, sorted.
    pub fn tickers(&self) -> Vec<String> {
        let mut tickers: Vec<String> = self.quotes.read().keys().cloned().collect();
        tickers.sort_unstable();
        tickers
    }

    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: u64 = 90_000;

    #[test]
    fn refresh_then_get() {
        let cache = QuoteCache::new(WINDOW);
        cache.refresh("AAPL", &OhlcvRow::new(7, 99.0, 101.0, 98.0, 100.0, 10), 1_000);

        let view = cache.get_quote("AAPL", 1_500).unwrap();
        assert_eq!(view.quote.price, 100.0);
        assert_eq!(view.quote.volume, 10);
        assert_eq!(view.quote.bar_timestamp, 7);
        assert!(!view.stale);
    }

    #[test]
    fn later_refresh_overwrites() {
        let cache = QuoteCache::new(WINDOW);
        cache.refresh("AAPL", &OhlcvRow::flat(1, 100.0, 1), 1_000);
        cache.refresh("AAPL", &OhlcvRow::flat(2, 105.0, 2), 2_000);
        let view = cache.get_quote("AAPL", 2_000).unwrap();
        assert_eq!(view.quote.price, 105.0);
        assert_eq!(view.quote.timestamp_ms, 2_000);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn unknown_ticker_is_not_found() {
        let cache = QuoteCache::new(WINDOW);
        assert_eq!(
            cache.get_quote("GOOG", 0),
            Err(QuoteError::UnknownTicker("GOOG".into()))
        );
    }

    #[test]
    fn staleness_is_evaluated_per_read() {
        let cache = QuoteCache::new(WINDOW);
        cache.refresh("MSFT", &OhlcvRow::flat(1, 200.0, 20), 10_000);
        assert!(!cache.get_quote("MSFT", 10_000 + WINDOW).unwrap().stale);
        assert!(cache.get_quote("MSFT", 10_000 + WINDOW + 1).unwrap().stale);
        // a clock behind the commit time never reads as stale
        assert!(!cache.get_quote("MSFT", 0).unwrap().stale);
    }

    #[test]
    fn tickers_are_sorted() {
        let cache = QuoteCache::new(WINDOW);
        for t in ["MSFT", "AAPL", "NVDA"] {
            cache.refresh(t, &OhlcvRow::flat(1, 1.0, 1), 1);
        }
        assert_eq!(cache.tickers(), vec!["AAPL", "MSFT", "NVDA"]);
    }

    #[test]
    fn view_serializes_flat() {
        let cache = QuoteCache::new(WINDOW);
        cache.refresh("AAPL", &OhlcvRow::flat(3, 100.0, 10), 1_000);
        let json = serde_json::to_value(cache.get_quote("AAPL", 1_000).unwrap()).unwrap();
        assert_eq!(json["ticker"], "AAPL");
        assert_eq!(json["price"], 100.0);
        assert_eq!(json["stale"], false);
    }
}
