use crate::auth::Authorized;
use crate::error::ApiError;
use crate::state::ApiState;
use axum::{
    Json,
    extract::{Query, State},
};
use basalt_quotes::Quote;
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const MAX_BATCH_SYMBOLS: usize = 1000;

/// One symbol's answer. Error fields are null on success and the price
/// fields are null on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceResponse {
    pub symbol: String,
    pub price: Option<f64>,
    pub currency: Option<String>,
    /// Commit time of the quote, RFC 3339 UTC.
    pub as_of: Option<String>,
    pub source: Option<String>,
    pub status: String,
    pub error_code: Option<String>,
    pub message: Option<String>,
}

impl PriceResponse {
    pub(crate) fn priced(symbol: String, quote: &Quote) -> Self {
        let as_of = DateTime::from_timestamp_millis(quote.timestamp_ms as i64)
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true));
        Self {
            symbol,
            price: Some(quote.price),
            currency: Some("USD".into()),
            as_of,
            source: Some("memory".into()),
            status: "ok".into(),
            error_code: None,
            message: None,
        }
    }

    fn failed(symbol: &str, err: &ApiError) -> Self {
        Self {
            symbol: symbol.trim().to_uppercase(),
            price: None,
            currency: None,
            as_of: None,
            source: None,
            status: "error".into(),
            error_code: Some(err.code().into()),
            message: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PriceQuery {
    symbol: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchRequest {
    pub symbols: Vec<String>,
}

pub async fn health(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.uptime_seconds(),
    }))
}

pub async fn get_price(
    State(state): State<ApiState>,
    _auth: Authorized,
    Query(query): Query<PriceQuery>,
) -> Result<Json<PriceResponse>, ApiError> {
    state.lookup(query.symbol.as_deref().unwrap_or_default()).map(Json)
}

/// Per-symbol failures are reported inline; only a bad request as a whole
/// fails the call.
pub async fn get_prices(
    State(state): State<ApiState>,
    _auth: Authorized,
    Json(body): Json<BatchRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.symbols.is_empty() || body.symbols.len() > MAX_BATCH_SYMBOLS {
        return Err(ApiError::InvalidRequest(format!(
            "expected 1 to {MAX_BATCH_SYMBOLS} symbols, got {}",
            body.symbols.len()
        )));
    }
    let results: Vec<PriceResponse> = body
        .symbols
        .iter()
        .map(|s| state.lookup(s).unwrap_or_else(|e| PriceResponse::failed(s, &e)))
        .collect();
    Ok(Json(json!({ "results": results })))
}
