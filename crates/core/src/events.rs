//! Raw record definitions: touchpoints (impressions, clicks) and app events.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::error::{Error, Result, ValidationErrorCode};

/// Event name that marks an app launch. The first one per user is an install.
pub const APP_OPEN: &str = "app_open";

/// Coarse location resolved upstream from the client IP.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Geo {
    /// ISO 3166 country code
    #[serde(default)]
    #[validate(length(max = 3))]
    pub country: String,
    /// ISO 3166-2 subdivision code
    #[serde(default)]
    #[validate(length(max = 16))]
    pub state: String,
    #[serde(default)]
    #[validate(length(max = 256))]
    pub city: String,
}

/// A paid impression or click.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Touchpoint {
    pub event_time: DateTime<Utc>,
    /// App store identifier of the advertised app
    #[serde(default)]
    #[validate(length(min = 1, max = 256))]
    pub store_id: String,
    /// Ad network name
    #[serde(default)]
    #[validate(length(min = 1, max = 256))]
    pub network: String,
    #[serde(default)]
    #[validate(length(max = 256))]
    pub campaign_name: String,
    #[serde(default)]
    #[validate(length(max = 256))]
    pub campaign_id: String,
    #[serde(default)]
    #[validate(length(max = 256))]
    pub ad_name: String,
    #[serde(default)]
    #[validate(length(max = 256))]
    pub ad_id: String,
    /// Advertising identifier of the device
    #[serde(default)]
    #[validate(length(min = 1, max = 256))]
    pub device_id: String,
    #[serde(default)]
    #[validate(length(max = 45))]
    pub client_ip: String,
    #[serde(default)]
    pub geo: Geo,
    /// Ties an impression to the click rendered from the same ad unit
    #[serde(default)]
    pub link_uid: Option<Uuid>,
    /// Server receive timestamp, assigned by the funnel when absent
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
}

impl Touchpoint {
    pub fn date(&self) -> NaiveDate {
        self.event_time.date_naive()
    }

    /// Whether a stored touchpoint still satisfies the ingest rules.
    pub fn is_well_formed(&self) -> bool {
        self.validate().is_ok() && self.geo.validate().is_ok()
    }
}

/// An in-app event reported by the SDK.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AppEvent {
    pub event_time: DateTime<Utc>,
    #[serde(default)]
    #[validate(length(min = 1, max = 256))]
    pub store_id: String,
    /// Event name, e.g. `app_open` or `purchase`
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub event_id: String,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub revenue: Option<f64>,
    #[serde(default)]
    #[validate(length(min = 1, max = 256))]
    pub device_id: String,
    /// Organization-scoped user identifier
    #[serde(default)]
    #[validate(length(min = 1, max = 256))]
    pub org_user_id: String,
    #[serde(default)]
    #[validate(length(max = 45))]
    pub client_ip: String,
    #[serde(default)]
    pub geo: Geo,
    #[serde(default = "Uuid::new_v4")]
    pub event_uid: Uuid,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
    /// Client-side errors reported alongside the event
    #[serde(default)]
    #[validate(length(max = 4096))]
    pub errors: String,
}

impl AppEvent {
    pub fn is_app_open(&self) -> bool {
        self.event_id == APP_OPEN
    }

    pub fn date(&self) -> NaiveDate {
        self.event_time.date_naive()
    }

    pub fn revenue_or_zero(&self) -> f64 {
        self.revenue.filter(|r| r.is_finite()).unwrap_or(0.0)
    }

    /// Whether a stored event still satisfies the ingest rules.
    pub fn is_well_formed(&self) -> bool {
        self.validate().is_ok()
            && self.geo.validate().is_ok()
            && self.revenue.map_or(true, f64::is_finite)
    }
}

/// A record on the ingest boundary, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawRecord {
    Impression(Touchpoint),
    Click(Touchpoint),
    AppEvent(AppEvent),
}

impl RawRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Impression(_) => "impression",
            Self::Click(_) => "click",
            Self::AppEvent(_) => "app_event",
        }
    }
}

/// A batch of raw records, accepted or rejected as a unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    pub records: Vec<RawRecord>,
}

impl RecordBatch {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Parses a JSON payload: either `[record, ...]` or `{"records": [...]}`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| {
            Error::validation(ValidationErrorCode::InvalidFormat, format!("invalid JSON: {}", e))
        })?;

        match value {
            Value::Array(_) => {
                let records: Vec<RawRecord> = serde_json::from_value(value).map_err(|e| {
                    Error::validation(
                        ValidationErrorCode::InvalidFormat,
                        format!("invalid record array: {}", e),
                    )
                })?;
                Ok(Self { records })
            }
            Value::Object(ref obj) if obj.contains_key("records") => {
                serde_json::from_value(value).map_err(|e| {
                    Error::validation(
                        ValidationErrorCode::InvalidFormat,
                        format!("invalid batch object: {}", e),
                    )
                })
            }
            _ => Err(Error::validation(
                ValidationErrorCode::InvalidFormat,
                "payload must be an array of records or an object with a 'records' array",
            )),
        }
    }
}
