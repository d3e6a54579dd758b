//! In-process state derived from the ring store.
//!
//! - [`QuoteCache`]: latest quote per ticker, mirrored from every committed row.
//! - [`SnapshotState`]: batch-level epoch, a liveness signal for readers that
//!   want to know a pass over all tickers finished.
//!
//! Both are single-writer, multi-reader and synchronised independently of the
//! store's seqlocks and of each other.

mod quote_cache;
mod snapshot;

pub use quote_cache::{Quote, QuoteCache, QuoteError, QuoteView};
pub use snapshot::{SnapshotEpoch, SnapshotState};
