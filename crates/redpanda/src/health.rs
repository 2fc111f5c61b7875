//! Redpanda health checks.

use crate::config::RedpandaConfig;
use tracing::{debug, error, warn};

/// Checks the broker connection and that the consumer topic exists.
///
/// Enables the `redpanda` component in the health registry and records the
/// outcome there.
pub async fn check_connection(config: &RedpandaConfig) -> bool {
    let component = &telemetry::health().redpanda;
    component.enable();

    let client = match config.client_builder().build().await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to connect to Redpanda: {}", e);
            component.set_unhealthy(format!("connect: {}", e));
            return false;
        }
    };

    match client.list_topics().await {
        Ok(topics) => {
            let topic = &config.consumer.topic;
            if !topics.iter().any(|t| &t.name == topic) {
                warn!(topic = %topic, "Redpanda topic missing");
                component.set_unhealthy(format!("topic {} missing", topic));
                return false;
            }
            debug!(topics = topics.len(), "Redpanda connection healthy");
            component.set_healthy();
            true
        }
        Err(e) => {
            error!("Failed to list Redpanda topics: {}", e);
            component.set_unhealthy(format!("list topics: {}", e));
            false
        }
    }
}
