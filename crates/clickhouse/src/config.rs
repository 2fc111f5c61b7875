//! ClickHouse connection settings.

use serde::{Deserialize, Serialize};

use engine_core::{Error, Result};

fn default_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_database() -> String {
    "attribution".to_string()
}

fn default_query_timeout_secs() -> u64 {
    30
}

/// Where the raw and derived tables live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickHouseConfig {
    /// HTTP interface, e.g. `http://localhost:8123`
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Server-side `max_execution_time` for every query
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            database: default_database(),
            username: None,
            password: None,
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

impl ClickHouseConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(Error::internal(format!(
                "clickhouse url must be http(s), got {:?}",
                self.url
            )));
        }
        if self.database.trim().is_empty() {
            return Err(Error::internal("clickhouse database must not be empty"));
        }
        Ok(())
    }
}
