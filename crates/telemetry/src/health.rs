//! Health check aggregation.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Health status for a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[serde(rename = "ok")]
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub fn is_serving(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

#[derive(Debug, Clone)]
struct Probe {
    healthy: bool,
    detail: Option<String>,
    checked_at: Option<DateTime<Utc>>,
}

/// Last probe outcome for one dependency.
#[derive(Debug)]
pub struct ComponentHealth {
    name: &'static str,
    enabled: AtomicBool,
    probe: RwLock<Probe>,
}

impl ComponentHealth {
    const fn with_enabled(name: &'static str, enabled: bool) -> Self {
        Self {
            name,
            enabled: AtomicBool::new(enabled),
            probe: RwLock::new(Probe {
                healthy: false,
                detail: None,
                checked_at: None,
            }),
        }
    }

    pub const fn new(name: &'static str) -> Self {
        Self::with_enabled(name, true)
    }

    /// A component left out of reports until [`enable`](Self::enable) is called.
    pub const fn optional(name: &'static str) -> Self {
        Self::with_enabled(name, false)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_healthy(&self) {
        self.set(true, None);
    }

    pub fn set_unhealthy(&self, msg: impl Into<String>) {
        self.set(false, Some(msg.into()));
    }

    /// Stores the outcome of a probe such as a store `ping`.
    pub fn record<E: Display>(&self, outcome: Result<(), E>) -> bool {
        match outcome {
            Ok(()) => self.set_healthy(),
            Err(e) => self.set_unhealthy(e.to_string()),
        }
        self.is_healthy()
    }

    fn set(&self, healthy: bool, detail: Option<String>) {
        *self.probe.write() = Probe {
            healthy,
            detail,
            checked_at: Some(Utc::now()),
        };
    }

    pub fn is_healthy(&self) -> bool {
        self.probe.read().healthy
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn message(&self) -> Option<String> {
        self.probe.read().detail.clone()
    }

    /// When the component was last probed; `None` if never.
    pub fn checked_at(&self) -> Option<DateTime<Utc>> {
        self.probe.read().checked_at
    }
}

/// Aggregated health status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealthReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealthReport {
    pub name: String,
    pub healthy: bool,
    pub message: Option<String>,
    pub checked_at: Option<DateTime<Utc>>,
}

impl ComponentHealthReport {
    fn from_component(c: &ComponentHealth) -> Self {
        let probe = c.probe.read().clone();
        Self {
            name: c.name().to_string(),
            healthy: probe.healthy,
            message: probe.detail,
            checked_at: probe.checked_at,
        }
    }
}

/// Global health registry.
pub struct HealthRegistry {
    pub raw_store: ComponentHealth,
    pub derived_store: ComponentHealth,
    pub redpanda: ComponentHealth,
}

impl HealthRegistry {
    pub const fn new() -> Self {
        Self {
            raw_store: ComponentHealth::new("raw_store"),
            derived_store: ComponentHealth::new("derived_store"),
            redpanda: ComponentHealth::optional("redpanda"),
        }
    }

    fn components(&self) -> [&ComponentHealth; 3] {
        [&self.raw_store, &self.derived_store, &self.redpanda]
    }

    /// Generate a health report over enabled components.
    pub fn report(&self) -> HealthReport {
        let components: Vec<ComponentHealthReport> = self
            .components()
            .into_iter()
            .filter(|c| c.is_enabled())
            .map(ComponentHealthReport::from_component)
            .collect();

        let all_healthy = components.iter().all(|c| c.healthy);
        let any_healthy = components.iter().any(|c| c.healthy);

        let status = if all_healthy {
            HealthStatus::Healthy
        } else if any_healthy {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        HealthReport { status, components }
    }

    /// Check if the service can accept traffic: both stores must answer.
    pub fn is_ready(&self) -> bool {
        self.raw_store.is_healthy() && self.derived_store.is_healthy()
    }

    /// Check if the service is alive.
    pub fn is_alive(&self) -> bool {
        true
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global health registry.
pub static HEALTH: std::sync::LazyLock<HealthRegistry> =
    std::sync::LazyLock::new(HealthRegistry::new);

/// Get the global health registry.
pub fn health() -> &'static HealthRegistry {
    &HEALTH
}
