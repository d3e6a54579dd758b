//! Read-only HTTP view of the quote cache.
//!
//! `GET /health`, `GET /v1/price?symbol=` and `POST /v1/prices`. Quotes older
//! than the stale threshold are refused with 503 rather than served.

mod auth;
mod error;
mod handlers;
mod router;
mod state;

pub use error::ApiError;
pub use handlers::{BatchRequest, MAX_BATCH_SYMBOLS, PriceResponse};
pub use router::{create_router, serve};
pub use state::{ApiConfig, ApiState};
