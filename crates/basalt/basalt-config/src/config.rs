use basalt_events::TickerSymbol;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default = "defaults::listen_addr")]
    pub listen_addr: String,
    /// Name of the shared region under `shm_dir`. An empty name keeps the
    /// store in an anonymous mapping that only this process can see.
    #[serde(default = "defaults::shm_name")]
    pub shm_name: Option<String>,
    #[serde(default = "defaults::shm_dir")]
    pub shm_dir: PathBuf,
    /// Rows kept per ticker.
    #[serde(default = "defaults::capacity")]
    pub capacity: usize,
    #[serde(default = "defaults::tickers")]
    pub tickers: Vec<String>,
    #[serde(default = "defaults::freshness_window_ms")]
    pub freshness_window_ms: u64,
    #[serde(default = "defaults::max_line_bytes")]
    pub max_line_bytes: usize,
    /// Connections silent for this long are closed, except the one holding
    /// the broker reservation.
    #[serde(default = "defaults::idle_timeout_s")]
    pub idle_timeout_s: u64,
    /// Replies queued per connection before the gateway stops reading it.
    #[serde(default = "defaults::outbox_capacity")]
    pub outbox_capacity: usize,
    #[serde(default = "defaults::read_retry_budget")]
    pub read_retry_budget: u32,
    #[serde(default = "defaults::reclaim_on_disconnect")]
    pub reclaim_on_disconnect: bool,
    /// Directory of `<TICKER>.csv` files loaded at startup.
    #[serde(default)]
    pub csv_dir: Option<PathBuf>,
    /// Seconds between refresh cycles over `csv_dir`; 0 disables them.
    #[serde(default = "defaults::refresh_interval_s")]
    pub refresh_interval_s: u64,
    /// Address of the HTTP price API; unset leaves it off.
    #[serde(default)]
    pub http_listen_addr: Option<String>,
    /// Prices committed longer ago than this are refused by the HTTP API.
    #[serde(default = "defaults::http_stale_threshold_s")]
    pub http_stale_threshold_s: u64,
    /// Bearer token required by the HTTP API's `/v1` routes. The
    /// `BASALT_HTTP_TOKEN` environment variable takes precedence.
    #[serde(default)]
    pub http_auth_token: Option<String>,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

mod defaults {
    use std::path::PathBuf;

    pub fn listen_addr() -> String {
        "127.0.0.1:12345".into()
    }

    pub fn shm_name() -> Option<String> {
        Some("basalt_ohlcv".into())
    }

    pub fn shm_dir() -> PathBuf {
        "/dev/shm".into()
    }

    pub fn capacity() -> usize {
        512
    }

    pub fn tickers() -> Vec<String> {
        [
            "AAPL", "MSFT", "NVDA", "AMZN", "GOOGL", "META", "BRK.B", "TSLA", "AVGO", "JPM",
            "LLY", "V", "UNH", "XOM", "MA", "JNJ", "PG", "HD", "COST", "NFLX",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    pub fn freshness_window_ms() -> u64 {
        90_000
    }

    pub fn max_line_bytes() -> usize {
        64 * 1024
    }

    pub fn idle_timeout_s() -> u64 {
        60
    }

    pub fn outbox_capacity() -> usize {
        256
    }

    pub fn refresh_interval_s() -> u64 {
        60 * 60
    }

    pub fn http_stale_threshold_s() -> u64 {
        120
    }

    pub fn read_retry_budget() -> u32 {
        1024
    }

    pub fn reclaim_on_disconnect() -> bool {
        true
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: defaults::listen_addr(),
            shm_name: defaults::shm_name(),
            shm_dir: defaults::shm_dir(),
            capacity: defaults::capacity(),
            tickers: defaults::tickers(),
            freshness_window_ms: defaults::freshness_window_ms(),
            max_line_bytes: defaults::max_line_bytes(),
            idle_timeout_s: defaults::idle_timeout_s(),
            outbox_capacity: defaults::outbox_capacity(),
            read_retry_budget: defaults::read_retry_budget(),
            reclaim_on_disconnect: defaults::reclaim_on_disconnect(),
            csv_dir: None,
            refresh_interval_s: defaults::refresh_interval_s(),
            http_listen_addr: None,
            http_stale_threshold_s: defaults::http_stale_threshold_s(),
            http_auth_token: None,
            log_level: defaults::log_level(),
        }
    }
}

impl ServiceConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: ServiceConfig = toml::from_str(&toml_to_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.capacity == 0 {
            return invalid("capacity must be positive".into());
        }
        if self.tickers.is_empty() {
            return invalid("at least one ticker is required".into());
        }
        let mut seen = HashSet::new();
        for t in &self.tickers {
            if let Err(e) = TickerSymbol::new(t) {
                return invalid(format!("ticker '{t}': {e}"));
            }
            if !seen.insert(t.as_str()) {
                return invalid(format!("duplicate ticker '{t}'"));
            }
        }
        if self.max_line_bytes == 0 {
            return invalid("max_line_bytes must be positive".into());
        }
        if self.read_retry_budget == 0 {
            return invalid("read_retry_budget must be positive".into());
        }
        if self.idle_timeout_s == 0 {
            return invalid("idle_timeout_s must be positive".into());
        }
        if self.outbox_capacity == 0 {
            return invalid("outbox_capacity must be positive".into());
        }
        if self.http_stale_threshold_s == 0 {
            return invalid("http_stale_threshold_s must be positive".into());
        }
        if let Some(name) = self.shared_region_name() {
            if name.contains('/') || name == "." || name == ".." {
                return invalid(format!("shm_name '{name}' must be a plain file name"));
            }
        }
        Ok(())
    }

    /// Name of the shared region, `None` when sharing is disabled.
    pub fn shared_region_name(&self) -> Option<&str> {
        self.shm_name.as_deref().filter(|n| !n.is_empty())
    }

    /// Path of the shared region file, if sharing is enabled.
    pub fn shm_path(&self) -> Option<PathBuf> {
        self.shared_region_name().map(|n| self.shm_dir.join(n))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_s)
    }

    pub fn http_stale_threshold(&self) -> Duration {
        Duration::from_secs(self.http_stale_threshold_s)
    }

    /// Period of the refresh cycle, `None` when there is nothing to refresh.
    pub fn refresh_interval(&self) -> Option<Duration> {
        match (&self.csv_dir, self.refresh_interval_s) {
            (Some(_), secs) if secs > 0 => Some(Duration::from_secs(secs)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(s: &str) -> ServiceConfig {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn empty_file_gives_defaults() {
        let c = parse("");
        assert_eq!(c.listen_addr, "127.0.0.1:12345");
        assert_eq!(c.shm_name.as_deref(), Some("basalt_ohlcv"));
        assert_eq!(c.capacity, 512);
        assert_eq!(c.tickers.len(), 20);
        assert_eq!(c.freshness_window_ms, 90_000);
        assert_eq!(c.max_line_bytes, 65_536);
        assert_eq!(c.idle_timeout(), Duration::from_secs(60));
        assert!(c.reclaim_on_disconnect);
        assert!(c.csv_dir.is_none());
        assert_eq!(c.outbox_capacity, 256);
        assert_eq!(c.refresh_interval_s, 3600);
        assert_eq!(c.refresh_interval(), None);
        assert_eq!(c.http_listen_addr, None);
        assert_eq!(c.http_stale_threshold(), Duration::from_secs(120));
        assert_eq!(c.http_auth_token, None);
        c.validate().unwrap();
    }

    #[test]
    fn http_api_settings() {
        let c = parse(
            r#"
            http_listen_addr = "127.0.0.1:8000"
            http_stale_threshold_s = 30
            http_auth_token = "t"
            "#,
        );
        assert_eq!(c.http_listen_addr.as_deref(), Some("127.0.0.1:8000"));
        assert_eq!(c.http_stale_threshold(), Duration::from_secs(30));
        assert_eq!(c.http_auth_token.as_deref(), Some("t"));
        c.validate().unwrap();
    }

    #[test]
    fn overrides_and_shm_path() {
        let c = parse(
            r#"
            listen_addr = "0.0.0.0:9000"
            shm_name = "md"
            shm_dir = "/tmp"
            capacity = 8
            tickers = ["AAPL", "MSFT"]
            reclaim_on_disconnect = false
            csv_dir = "shared_data_csv"
            "#,
        );
        assert_eq!(c.shm_path(), Some(PathBuf::from("/tmp/md")));
        assert_eq!(c.tickers, vec!["AAPL", "MSFT"]);
        assert_eq!(c.shared_region_name(), Some("md"));
        assert!(!c.reclaim_on_disconnect);
        assert_eq!(c.csv_dir, Some(PathBuf::from("shared_data_csv")));
        assert_eq!(c.refresh_interval(), Some(Duration::from_secs(3600)));
        c.validate().unwrap();
    }

    #[test]
    fn zero_refresh_interval_disables_refresh() {
        let c = parse(
            r#"
            csv_dir = "cache"
            refresh_interval_s = 0
            "#,
        );
        assert_eq!(c.refresh_interval(), None);
        c.validate().unwrap();
    }

    #[test]
    fn empty_shm_name_disables_sharing() {
        let c = parse("shm_name = ''");
        assert_eq!(c.shared_region_name(), None);
        assert_eq!(c.shm_path(), None);
        c.validate().unwrap();
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<ServiceConfig>("capacityy = 3").is_err());
    }

    #[test]
    fn validation_failures() {
        let cases = [
            "capacity = 0",
            "tickers = []",
            r#"tickers = ["AAPL", "AAPL"]"#,
            r#"tickers = ["THIS_IS_WAY_TOO_LONG"]"#,
            "max_line_bytes = 0",
            "read_retry_budget = 0",
            "outbox_capacity = 0",
            "http_stale_threshold_s = 0",
            r#"shm_name = "a/b""#,
        ];
        for case in cases {
            let err = parse(case).validate().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{case}");
        }
    }

    #[test]
    fn load_reports_missing_file_and_bad_toml() {
        let err = ServiceConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));

        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "capacity = \"lots\"").unwrap();
        let path = f.path().to_string_lossy().into_owned();
        assert!(matches!(ServiceConfig::load(path).unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn load_validates() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "capacity = 0").unwrap();
        let path = f.path().to_string_lossy().into_owned();
        assert!(matches!(ServiceConfig::load(path).unwrap_err(), ConfigError::Invalid(_)));
    }
}
