use basalt_events::TickerError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown ticker '{0}'")]
    UnknownTicker(String),

    #[error("seqlock read of '{ticker}' gave up after {attempts} attempts")]
    RetryExhausted { ticker: String, attempts: u32 },

    #[error("write to '{open}' still in progress, cannot begin '{requested}'")]
    WriteInProgress { open: String, requested: String },

    #[error("no write in progress for '{0}'")]
    NoWriteInProgress(String),

    #[error("invalid store layout: {0}")]
    Layout(String),

    #[error("invalid ticker symbol")]
    Ticker(#[from] TickerError),

    #[error("shared region i/o failed")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Contention and contract violations are server faults; lookups are not.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::UnknownTicker(_))
    }
}
