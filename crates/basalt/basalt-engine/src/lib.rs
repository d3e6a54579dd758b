//! The writer path: every row committed to the store is mirrored into the
//! quote cache, and multi-ticker passes are bracketed by the batch epoch.

mod engine;
mod hydrate;
mod refresh;

pub use engine::{BatchSummary, MarketDataEngine};
pub use hydrate::{HydrateError, load_csv_dir, load_csv_file};
pub use refresh::{BarSource, CsvSource, FetchedBars, RefreshAgent, RefreshOutcome};
