use crate::error::ApiError;
use crate::handlers::PriceResponse;
use basalt_events::now_ms;
use basalt_quotes::QuoteCache;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Quotes committed longer ago than this are answered with `STALE_DATA`.
    pub stale_threshold: Duration,
    /// When set, every `/v1` route requires `Authorization: Bearer <token>`.
    pub auth_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_secs(120),
            auth_token: None,
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    quotes: Arc<QuoteCache>,
    stale_after_ms: u64,
    auth_token: Option<Arc<str>>,
    started: Instant,
}

impl ApiState {
    pub fn new(quotes: Arc<QuoteCache>, cfg: ApiConfig) -> Self {
        Self {
            quotes,
            stale_after_ms: cfg.stale_threshold.as_millis() as u64,
            auth_token: cfg.auth_token.filter(|t| !t.is_empty()).map(Arc::from),
            started: Instant::now(),
        }
    }

    pub(crate) fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub(crate) fn uptime_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Fresh price for `symbol`, trimmed and upper-cased first.
    pub fn lookup(&self, symbol: &str) -> Result<PriceResponse, ApiError> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(ApiError::InvalidRequest("symbol is required".into()));
        }
        let now = now_ms();
        let view = self
            .quotes
            .get_quote(&symbol, now)
            .map_err(|_| ApiError::SymbolNotFound(symbol.clone()))?;
        let age_ms = now.saturating_sub(view.quote.timestamp_ms);
        if age_ms > self.stale_after_ms {
            return Err(ApiError::StaleData {
                symbol,
                age_s: age_ms / 1000,
            });
        }
        Ok(PriceResponse::priced(symbol, &view.quote))
    }
}
