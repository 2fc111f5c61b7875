//! Redpanda configuration.

use std::sync::Arc;

use rskafka::client::{ClientBuilder, Credentials, SaslConfig};
use serde::{Deserialize, Serialize};

/// Redpanda connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedpandaConfig {
    /// Consume raw records when set; the HTTP ingest path works either way
    #[serde(default)]
    pub enabled: bool,
    /// Broker addresses
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,
    /// SASL username (Redpanda Cloud)
    #[serde(default)]
    pub sasl_username: Option<String>,
    /// SASL password (Redpanda Cloud)
    #[serde(default)]
    pub sasl_password: Option<String>,
    #[serde(default)]
    pub consumer: ConsumerConfig,
}

fn default_brokers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

impl Default for RedpandaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            brokers: default_brokers(),
            sasl_username: None,
            sasl_password: None,
            consumer: ConsumerConfig::default(),
        }
    }
}

impl RedpandaConfig {
    /// Client builder for the brokers; SASL credentials switch on TLS.
    pub fn client_builder(&self) -> ClientBuilder {
        let builder = ClientBuilder::new(self.brokers.clone());
        match (&self.sasl_username, &self.sasl_password) {
            (Some(username), Some(password)) => builder
                .tls_config(tls_config())
                .sasl_config(SaslConfig::ScramSha256(Credentials::new(
                    username.clone(),
                    password.clone(),
                ))),
            _ => builder,
        }
    }
}

/// Public web roots, as used by Redpanda Cloud.
fn tls_config() -> Arc<rustls::ClientConfig> {
    let roots = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

/// Raw record consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// Topic carrying JSON raw records, one record or batch per message
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Messages per fetch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Fetch wait in milliseconds
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    /// Start from the earliest retained offset instead of the latest
    #[serde(default)]
    pub from_earliest: bool,
}

fn default_group_id() -> String {
    "attribution-engine".to_string()
}

fn default_topic() -> String {
    "attribution-raw".to_string()
}

fn default_batch_size() -> usize {
    500
}

fn default_batch_timeout_ms() -> u64 {
    1000
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: default_group_id(),
            topic: default_topic(),
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            from_earliest: false,
        }
    }
}
