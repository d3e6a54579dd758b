//! Per-ticker OHLCV ring buffers in a shared memory region.
//!
//! One process owns the [`RingStoreWriter`]; any number of readers, in the
//! same process ([`RingStoreWriter::reader`]) or in other processes
//! ([`RingStoreReader::attach`]), copy rows out under a per-ticker seqlock.
//! Readers never block the writer and never take a lock; a reader racing a
//! write retries, and gives up with [`StoreError::RetryExhausted`] once its
//! retry budget is spent.

mod error;
mod reader;
mod region;
mod ring;
mod seqlock;
mod shm_layout;
mod writer;

pub use error::StoreError;
pub use reader::{EntryMeta, RingStoreReader};
pub use ring::RingConfig;
pub use shm_layout::{LAYOUT_VERSION, REGION_MAGIC, ROW_SCHEMA_VERSION, StoreLayout};
pub use writer::RingStoreWriter;
