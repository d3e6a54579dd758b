use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("symbol '{0}' not found")]
    SymbolNotFound(String),

    #[error("price for '{symbol}' is {age_s}s old")]
    StaleData { symbol: String, age_s: u64 },
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::SymbolNotFound(_) => "SYMBOL_NOT_FOUND",
            ApiError::StaleData { .. } => "STALE_DATA",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::SymbolNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::StaleData { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error_code": self.code(),
            "message": self.to_string(),
        }));
        (self.status(), body).into_response()
    }
}
