use anyhow::Context;
use basalt_arbiter::{ArbiterPolicy, DetachedSession, ReservationArbiter};
use basalt_config::ServiceConfig;
use basalt_engine::{CsvSource, MarketDataEngine, RefreshAgent};
use basalt_gateway::{ConnectionRegistry, Dispatcher, GatewayServer, ServerConfig};
use basalt_http::{ApiConfig, ApiState};
use basalt_quotes::{QuoteCache, SnapshotState};
use basalt_store::{RingConfig, RingStoreWriter};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn load_config() -> anyhow::Result<ServiceConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            ServiceConfig::load(&path).with_context(|| format!("failed to load config from {path}"))
        }
        None => {
            let config = ServiceConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn create_store(config: &ServiceConfig) -> anyhow::Result<RingStoreWriter> {
    let ring = RingConfig::new(config.capacity).with_retry_budget(config.read_retry_budget);
    let tickers = config.tickers.as_slice();
    match config.shm_path() {
        Some(path) => RingStoreWriter::create(&path, tickers, ring)
            .with_context(|| format!("failed to create shared region at {}", path.display())),
        None => RingStoreWriter::create_private(tickers, ring).context("failed to create private region"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        listen = %config.listen_addr,
        http = ?config.http_listen_addr,
        shm = ?config.shm_path(),
        tickers = config.tickers.len(),
        capacity = config.capacity,
        "starting basalt"
    );

    let quotes = Arc::new(QuoteCache::new(config.freshness_window_ms));
    let snapshot = Arc::new(SnapshotState::new());
    let registry = Arc::new(ConnectionRegistry::new());
    let arbiter = Arc::new(ReservationArbiter::new(
        Arc::new(DetachedSession::new()),
        registry.clone(),
        ArbiterPolicy {
            reclaim_on_disconnect: config.reclaim_on_disconnect,
        },
    ));

    let mut engine = MarketDataEngine::new(create_store(&config)?, quotes.clone(), snapshot.clone());
    if let Some(dir) = &config.csv_dir {
        if let Err(e) = engine.hydrate_from_csv(dir, &arbiter) {
            warn!(error = %e, "csv hydration failed, starting with empty rings");
        }
    }

    let region = engine.writer().path().map(Path::to_path_buf);
    let api = ApiState::new(
        quotes.clone(),
        ApiConfig {
            stale_threshold: config.http_stale_threshold(),
            auth_token: std::env::var("BASALT_HTTP_TOKEN").ok().or_else(|| config.http_auth_token.clone()),
        },
    );
    let dispatcher = Arc::new(Dispatcher::new(
        quotes,
        snapshot,
        arbiter.clone(),
        config.shared_region_name().map(String::from),
    ));
    let server = Arc::new(GatewayServer::new(
        dispatcher,
        registry,
        ServerConfig {
            max_line_bytes: config.max_line_bytes,
            idle_timeout: config.idle_timeout(),
            outbox_capacity: config.outbox_capacity,
        },
    ));

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    let http_listener = match &config.http_listen_addr {
        Some(addr) => Some(
            TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?,
        ),
        None => None,
    };
    let http = async move {
        match http_listener {
            Some(listener) => basalt_http::serve(listener, api).await,
            None => std::future::pending().await,
        }
    };

    // without a refresh agent the engine is parked here to keep the region mapped
    let mut parked = None;
    let agent = match (&config.csv_dir, config.refresh_interval()) {
        (Some(dir), Some(period)) => Some(RefreshAgent::new(engine, CsvSource::new(dir), arbiter, period)),
        _ => {
            parked = Some(engine);
            None
        }
    };
    let refresh = async move {
        match agent {
            Some(agent) => agent.run().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        res = server.run(listener) => res.context("gateway stopped")?,
        res = refresh => res.context("refresh agent stopped")?,
        res = http => res.context("price api stopped")?,
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            info!("shutdown requested");
        }
    }

    drop(parked);
    if let Some(path) = region {
        match std::fs::remove_file(&path) {
            Ok(()) => info!(path = %path.display(), "removed shared region"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove shared region"),
        }
    }
    Ok(())
}
