mod config;

pub use config::{ConfigError, ServiceConfig};
