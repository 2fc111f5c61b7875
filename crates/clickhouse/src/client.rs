//! ClickHouse client wrapper.

use crate::config::ClickHouseConfig;
use clickhouse::Client;
use engine_core::{Error, Result};
use tracing::info;

/// Maps a driver error: transport failures are retryable, the rest are not.
pub fn map_error(context: &str, e: clickhouse::error::Error) -> Error {
    match e {
        clickhouse::error::Error::Network(_) => Error::unavailable(format!("{}: {}", context, e)),
        other => Error::internal(format!("{}: {}", context, other)),
    }
}

/// Shared handle to one ClickHouse database.
///
/// Cloning is cheap; clones share the driver's HTTP connection pool.
#[derive(Clone)]
pub struct ClickHouseClient {
    inner: Client,
}

impl ClickHouseClient {
    pub fn new(config: ClickHouseConfig) -> Result<Self> {
        config.validate()?;

        let mut client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database)
            .with_option("max_execution_time", config.query_timeout_secs.to_string());

        if let Some(ref user) = config.username {
            client = client.with_user(user);
        }

        if let Some(ref pass) = config.password {
            client = client.with_password(pass);
        }

        info!(
            url = %config.url,
            database = %config.database,
            query_timeout_secs = config.query_timeout_secs,
            "ClickHouse client ready"
        );

        Ok(Self { inner: client })
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }

    /// `SELECT 1`; touches no table.
    pub async fn ping(&self) -> Result<()> {
        self.inner
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .map_err(|e| map_error("ping", e))?;
        Ok(())
    }

    /// Runs a statement that returns no rows.
    pub async fn execute(&self, sql: &str) -> Result<()> {
        self.inner
            .query(sql)
            .execute()
            .await
            .map_err(|e| map_error("execute", e))
    }
}
