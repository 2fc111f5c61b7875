//! Last-touch install attribution.
//!
//! For each install (a user's first `app_open`) the resolver looks back over
//! touchpoints from the same device. A click inside the click window always
//! wins over an impression inside the impression window; within a type the
//! most recent touchpoint wins. With no match the install is organic.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result, ValidationErrorCode};
use crate::events::{AppEvent, Touchpoint};
use crate::limits::{DEFAULT_CLICK_WINDOW_HOURS, DEFAULT_IMPRESSION_WINDOW_HOURS};
use crate::range::DateRange;
use crate::snapshot::RawSnapshot;

/// Network label carried by organic installs.
pub const ORGANIC_NETWORK: &str = "Organic";

/// Resolved cause of an install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttributionType {
    #[serde(rename = "click")]
    Click,
    #[serde(rename = "impression")]
    Impression,
    #[serde(rename = "Organic")]
    Organic,
}

impl AttributionType {
    pub const ALL: [AttributionType; 3] = [Self::Click, Self::Impression, Self::Organic];

    /// Label used in stored tables and query results.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Impression => "impression",
            Self::Organic => "Organic",
        }
    }
}

impl fmt::Display for AttributionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "click" => Ok(Self::Click),
            "impression" => Ok(Self::Impression),
            "Organic" => Ok(Self::Organic),
            other => Err(Error::validation(
                ValidationErrorCode::InvalidFormat,
                format!("unknown attribution type '{}'", other),
            )),
        }
    }
}

/// One resolved install. At most one exists per `org_user_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionRecord {
    pub org_user_id: String,
    pub device_id: String,
    pub store_id: String,
    pub attribution_type: AttributionType,
    pub network: String,
    pub campaign_id: String,
    pub ad_id: String,
    /// Time of the install event
    pub attributed_at: DateTime<Utc>,
}

impl AttributionRecord {
    pub fn install_date(&self) -> NaiveDate {
        self.attributed_at.date_naive()
    }

    fn organic(install: &AppEvent) -> Self {
        Self {
            org_user_id: install.org_user_id.clone(),
            device_id: install.device_id.clone(),
            store_id: install.store_id.clone(),
            attribution_type: AttributionType::Organic,
            network: ORGANIC_NETWORK.to_string(),
            campaign_id: String::new(),
            ad_id: String::new(),
            attributed_at: install.event_time,
        }
    }

    fn paid(install: &AppEvent, kind: AttributionType, tp: &Touchpoint) -> Self {
        Self {
            org_user_id: install.org_user_id.clone(),
            device_id: install.device_id.clone(),
            store_id: install.store_id.clone(),
            attribution_type: kind,
            network: tp.network.clone(),
            campaign_id: tp.campaign_id.clone(),
            ad_id: tp.ad_id.clone(),
            attributed_at: install.event_time,
        }
    }
}

fn default_click_window() -> u32 {
    DEFAULT_CLICK_WINDOW_HOURS
}

fn default_impression_window() -> u32 {
    DEFAULT_IMPRESSION_WINDOW_HOURS
}

/// Lookback windows, in hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionConfig {
    #[serde(default = "default_click_window")]
    pub click_window_hours: u32,
    #[serde(default = "default_impression_window")]
    pub impression_window_hours: u32,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            click_window_hours: DEFAULT_CLICK_WINDOW_HOURS,
            impression_window_hours: DEFAULT_IMPRESSION_WINDOW_HOURS,
        }
    }
}

impl AttributionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.click_window_hours < self.impression_window_hours {
            return Err(Error::validation(
                ValidationErrorCode::InvalidFormat,
                format!(
                    "click window ({}h) must be at least the impression window ({}h)",
                    self.click_window_hours, self.impression_window_hours
                ),
            ));
        }
        Ok(())
    }

    pub fn click_window(&self) -> Duration {
        Duration::hours(i64::from(self.click_window_hours))
    }

    pub fn impression_window(&self) -> Duration {
        Duration::hours(i64::from(self.impression_window_hours))
    }

    /// How far before a range start touchpoints must be read.
    pub fn lookback(&self) -> Duration {
        self.click_window().max(self.impression_window())
    }
}

/// Attribution records for a range, sorted by `(attributed_at, org_user_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionSet {
    pub range: DateRange,
    pub records: Vec<AttributionRecord>,
}

impl AttributionSet {
    pub fn new(range: DateRange, mut records: Vec<AttributionRecord>) -> Self {
        records.sort_by(|a, b| {
            (a.attributed_at, &a.org_user_id).cmp(&(b.attributed_at, &b.org_user_id))
        });
        Self { range, records }
    }

    pub fn get(&self, org_user_id: &str) -> Option<&AttributionRecord> {
        self.records.iter().find(|r| r.org_user_id == org_user_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Output of a full-snapshot resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub attribution: AttributionSet,
    /// Stored records ignored because they no longer pass validation
    pub skipped: usize,
}

/// Recency order with a total tie-break, greatest = preferred.
fn touch_order(a: &Touchpoint, b: &Touchpoint) -> Ordering {
    a.event_time
        .cmp(&b.event_time)
        .then_with(|| a.received_at.cmp(&b.received_at))
        .then_with(|| a.link_uid.cmp(&b.link_uid))
        .then_with(|| a.ad_id.cmp(&b.ad_id))
        .then_with(|| a.campaign_id.cmp(&b.campaign_id))
        .then_with(|| a.network.cmp(&b.network))
}

/// Deterministic last-touch resolver.
#[derive(Debug, Clone)]
pub struct AttributionResolver {
    config: AttributionConfig,
}

impl AttributionResolver {
    pub fn new(config: AttributionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AttributionConfig {
        &self.config
    }

    /// Most recent touchpoint in `[at - window, at]`.
    fn latest_within<'a, I>(candidates: I, at: DateTime<Utc>, window: Duration) -> Option<&'a Touchpoint>
    where
        I: IntoIterator<Item = &'a Touchpoint>,
    {
        let earliest = at - window;
        candidates
            .into_iter()
            .filter(|tp| tp.event_time >= earliest && tp.event_time <= at)
            .max_by(|a, b| touch_order(a, b))
    }

    /// Resolves a single install against candidate touchpoints.
    ///
    /// Candidates need not be pre-filtered; device and window are checked here.
    pub fn resolve<'a>(
        &self,
        install: &AppEvent,
        impressions: impl IntoIterator<Item = &'a Touchpoint>,
        clicks: impl IntoIterator<Item = &'a Touchpoint>,
    ) -> AttributionRecord {
        let device = install.device_id.as_str();

        let click = Self::latest_within(
            clicks.into_iter().filter(|tp| tp.device_id == device),
            install.event_time,
            self.config.click_window(),
        );
        if let Some(tp) = click {
            return AttributionRecord::paid(install, AttributionType::Click, tp);
        }

        let impression = Self::latest_within(
            impressions.into_iter().filter(|tp| tp.device_id == device),
            install.event_time,
            self.config.impression_window(),
        );
        match impression {
            Some(tp) => AttributionRecord::paid(install, AttributionType::Impression, tp),
            None => AttributionRecord::organic(install),
        }
    }

    fn resolve_each(&self, touches: &DeviceTouches<'_>, installs: Vec<&AppEvent>) -> Vec<AttributionRecord> {
        installs
            .into_iter()
            .map(|install| {
                let device = install.device_id.as_str();
                self.resolve(
                    install,
                    touches.impressions.get(device).into_iter().flatten().copied(),
                    touches.clicks.get(device).into_iter().flatten().copied(),
                )
            })
            .collect()
    }

    /// Resolves every install whose first `app_open` lies in the snapshot range.
    pub fn resolve_all(&self, snapshot: &RawSnapshot) -> Resolution {
        let skipped = snapshot.malformed_count();
        if skipped > 0 {
            warn!(range = %snapshot.range, skipped, "ignored malformed stored records");
        }

        let touches = DeviceTouches::new(snapshot);
        let records = self.resolve_each(&touches, snapshot.installs());

        Resolution {
            attribution: AttributionSet::new(snapshot.range, records),
            skipped,
        }
    }

    /// Resolves the installs from the `horizon_days` before the range of
    /// users active inside it.
    ///
    /// The snapshot must look back `horizon_days` plus the click window for
    /// these to match what a refresh of their own day produced.
    pub fn resolve_carried(&self, snapshot: &RawSnapshot, horizon_days: u32) -> Vec<AttributionRecord> {
        let touches = DeviceTouches::new(snapshot);
        self.resolve_each(&touches, snapshot.carried_installs(horizon_days))
    }
}

/// Well-formed snapshot touchpoints grouped by device.
struct DeviceTouches<'a> {
    impressions: HashMap<&'a str, Vec<&'a Touchpoint>>,
    clicks: HashMap<&'a str, Vec<&'a Touchpoint>>,
}

impl<'a> DeviceTouches<'a> {
    fn new(snapshot: &'a RawSnapshot) -> Self {
        let mut impressions: HashMap<&str, Vec<&Touchpoint>> = HashMap::new();
        let mut clicks: HashMap<&str, Vec<&Touchpoint>> = HashMap::new();

        for (index, table) in [(&mut impressions, &snapshot.impressions), (&mut clicks, &snapshot.clicks)] {
            for tp in table {
                if !tp.is_well_formed() {
                    debug!(device_id = %tp.device_id, event_time = %tp.event_time, "skipping malformed touchpoint");
                    continue;
                }
                index.entry(tp.device_id.as_str()).or_default().push(tp);
            }
        }
        Self { impressions, clicks }
    }
}
