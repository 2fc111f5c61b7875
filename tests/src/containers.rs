//! ClickHouse for the store tests.
//!
//! Set `ATTRIBUTION_TEST_CLICKHOUSE_URL` (and optionally `_DB`, `_USER`,
//! `_PASSWORD`) to reuse a running server instead of starting a container.

use std::time::{Duration, Instant};

use clickhouse_client::ClickHouseConfig;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};

const IMAGE: &str = "clickhouse/clickhouse-server";
const TAG: &str = "24.3";
const HTTP_PORT: u16 = 8123;

/// A reachable ClickHouse; the container, if any, stops on drop.
pub struct TestContainers {
    _clickhouse: Option<ContainerAsync<GenericImage>>,
    pub clickhouse: ClickHouseConfig,
}

impl TestContainers {
    pub async fn start() -> Self {
        if let Some(config) = config_from_env() {
            return Self {
                _clickhouse: None,
                clickhouse: config,
            };
        }

        let defaults = ClickHouseConfig::default();
        let container = GenericImage::new(IMAGE, TAG)
            .with_wait_for(WaitFor::seconds(5))
            .with_exposed_port(HTTP_PORT.tcp())
            .with_env_var("CLICKHOUSE_DB", defaults.database.clone())
            .with_env_var("CLICKHOUSE_DEFAULT_ACCESS_MANAGEMENT", "1")
            .with_env_var("CLICKHOUSE_USER", "default")
            .with_env_var("CLICKHOUSE_PASSWORD", "")
            .start()
            .await
            .expect("Failed to start ClickHouse");

        let port = container
            .get_host_port_ipv4(HTTP_PORT)
            .await
            .expect("ClickHouse HTTP port is mapped");
        let url = format!("http://127.0.0.1:{}", port);
        wait_for_http(&url, Duration::from_secs(30)).await;

        Self {
            _clickhouse: Some(container),
            clickhouse: ClickHouseConfig {
                url,
                username: Some("default".to_string()),
                ..defaults
            },
        }
    }

    pub fn clickhouse_config(&self) -> ClickHouseConfig {
        self.clickhouse.clone()
    }
}

fn config_from_env() -> Option<ClickHouseConfig> {
    let var = |suffix: &str| {
        std::env::var(format!("ATTRIBUTION_TEST_CLICKHOUSE_{}", suffix))
            .ok()
            .filter(|v| !v.trim().is_empty())
    };
    let url = var("URL")?;
    let defaults = ClickHouseConfig::default();
    Some(ClickHouseConfig {
        url,
        database: var("DB").unwrap_or(defaults.database.clone()),
        username: var("USER"),
        password: var("PASSWORD"),
        ..defaults
    })
}

/// Polls the HTTP interface until it answers `Ok.`.
async fn wait_for_http(url: &str, timeout: Duration) {
    let client = reqwest::Client::new();
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        let ready = client
            .get(format!("{}/ping", url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false);
        if ready {
            return;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    panic!("ClickHouse at {} not ready after {:?}", url, timeout);
}
