//! Attribution Engine
//!
//! Install attribution and rollup pipeline:
//! - Raw impression/click/app-event ingestion with whole-batch validation
//! - Windowed last-touch attribution (click over impression over organic)
//! - Dependency-ordered rollups published per date range
//! - Scheduled and on-demand refreshes, downstream cache notification

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing::{error, info};

use api::{router, AppState};
use clickhouse_client::{ClickHouseClient, ClickHouseConfig, ClickHouseStore};
use event_store::{DerivedStore, FunnelConfig, IngestFunnel, MemoryStore, RawEventStore};
use redpanda::{Consumer, RedpandaConfig};
use telemetry::{health, init_tracing_from_env};
use worker::{CacheNotifier, CacheRefreshConfig, RefreshConfig, RefreshOrchestrator, WorkerConfig, WorkerScheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StoreBackend {
    Memory,
    Clickhouse,
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Config {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,

    #[serde(default = "default_backend")]
    store: StoreBackend,

    #[serde(default)]
    clickhouse: ClickHouseConfig,

    #[serde(default)]
    redpanda: RedpandaConfig,

    #[serde(default)]
    ingest: FunnelConfig,

    #[serde(default)]
    refresh: RefreshConfig,

    #[serde(default)]
    worker: WorkerConfig,

    #[serde(default)]
    cache_refresh: CacheRefreshConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_backend() -> StoreBackend {
    StoreBackend::Memory
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            store: default_backend(),
            clickhouse: ClickHouseConfig::default(),
            redpanda: RedpandaConfig::default(),
            ingest: FunnelConfig::default(),
            refresh: RefreshConfig::default(),
            worker: WorkerConfig::default(),
            cache_refresh: CacheRefreshConfig::default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // rustls 0.23+ requires explicit crypto provider selection; Err means one is already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();
    if !init_tracing_from_env() {
        eprintln!("tracing subscriber already installed");
    }

    info!("Starting Attribution Engine v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    config
        .refresh
        .attribution
        .validate()
        .context("Invalid attribution windows")?;

    let (raw, derived) = open_stores(&config).await?;
    check_health(raw.as_ref(), derived.as_ref()).await;

    let funnel = IngestFunnel::new(raw.clone(), config.ingest);
    let orchestrator = RefreshOrchestrator::new(raw.clone(), derived.clone(), config.refresh)
        .context("Failed to create refresh orchestrator")?;

    let notifier = CacheNotifier::new(config.cache_refresh.clone())
        .context("Failed to create cache refresh notifier")?;
    let mut scheduler = WorkerScheduler::new(config.worker.clone(), orchestrator.clone())
        .with_cache_notifier(notifier);

    if config.redpanda.enabled {
        let healthy = redpanda::health::check_connection(&config.redpanda).await;
        info!(brokers = ?config.redpanda.brokers, healthy = healthy, "Redpanda consumer enabled");
        let consumer = Arc::new(Consumer::new(config.redpanda.clone()));
        scheduler = scheduler.with_consumer(consumer, funnel.clone());
    }

    let worker_handles = Arc::new(scheduler).start();

    let state = AppState::new(funnel, orchestrator, raw, derived);
    let cache_handle = state.start_cache_invalidation();
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid server address")?;

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down...");
    for handle in worker_handles {
        handle.abort();
    }
    cache_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Load configuration: defaults → config/default.toml → `ATTRIBUTION__*` env.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        .add_source(config::Config::try_from(&Config::default())?)
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("ATTRIBUTION")
                .prefix_separator("__")
                .list_separator(",")
                .with_list_parse_key("redpanda.brokers")
                .with_list_parse_key("cache_refresh.endpoints")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

async fn open_stores(config: &Config) -> Result<(Arc<dyn RawEventStore>, Arc<dyn DerivedStore>)> {
    match config.store {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            let store = Arc::new(MemoryStore::new());
            let raw: Arc<dyn RawEventStore> = store.clone();
            let derived: Arc<dyn DerivedStore> = store;
            Ok((raw, derived))
        }
        StoreBackend::Clickhouse => {
            let client = ClickHouseClient::new(config.clickhouse.clone())
                .context("Failed to create ClickHouse client")?;
            if let Err(e) = clickhouse_client::init_schema(&client).await {
                error!("Failed to initialize ClickHouse schema: {}", e);
            }
            let store = Arc::new(ClickHouseStore::new(client));
            let raw: Arc<dyn RawEventStore> = store.clone();
            let derived: Arc<dyn DerivedStore> = store;
            Ok((raw, derived))
        }
    }
}

/// Probes both stores once so the first health report is populated.
async fn check_health(raw: &dyn RawEventStore, derived: &dyn DerivedStore) {
    let h = health();
    for (component, outcome) in [
        (&h.raw_store, raw.ping().await),
        (&h.derived_store, derived.ping().await),
    ] {
        if component.record(outcome) {
            info!(component = component.name(), "Store healthy");
        } else {
            error!(
                component = component.name(),
                detail = ?component.message(),
                "Store unhealthy"
            );
        }
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
