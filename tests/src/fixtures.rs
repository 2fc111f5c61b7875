//! Payload builders and the reference attribution scenario.

use chrono::NaiveDate;
use engine_core::DateRange;
use serde_json::{json, Value};

pub const STORE_ID: &str = "store-1";
pub const NETWORK: &str = "meta";
pub const CAMPAIGN_ID: &str = "c-100";

/// Day every scenario record falls on.
pub fn scenario_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).expect("valid date")
}

pub fn scenario_range() -> DateRange {
    DateRange::day(scenario_day())
}

pub fn impression(device_id: &str, event_time: &str) -> Value {
    json!({
        "kind": "impression",
        "event_time": event_time,
        "store_id": STORE_ID,
        "network": NETWORK,
        "campaign_id": CAMPAIGN_ID,
        "ad_id": "ad-1",
        "device_id": device_id,
    })
}

pub fn click(device_id: &str, event_time: &str) -> Value {
    json!({
        "kind": "click",
        "event_time": event_time,
        "store_id": STORE_ID,
        "network": NETWORK,
        "campaign_id": CAMPAIGN_ID,
        "ad_id": "ad-1",
        "device_id": device_id,
    })
}

pub fn app_open(device_id: &str, org_user_id: &str, event_time: &str) -> Value {
    json!({
        "kind": "app_event",
        "event_time": event_time,
        "store_id": STORE_ID,
        "event_id": "app_open",
        "device_id": device_id,
        "org_user_id": org_user_id,
    })
}

/// Wraps records in the `{"records": [...]}` envelope.
pub fn batch(records: Vec<Value>) -> Vec<u8> {
    json!({ "records": records }).to_string().into_bytes()
}

/// One impression and one click on `ifa-1`, an install by `u-1` on that
/// device, and an unrelated organic install by `u-2`.
///
/// Expected after a refresh of [`scenario_range`]:
/// `(click, meta) = 1`, `(Organic, Organic) = 1`, totals 1/1/2.
pub fn scenario_records() -> Vec<Value> {
    vec![
        impression("ifa-1", "2025-01-15T08:30:00Z"),
        click("ifa-1", "2025-01-15T09:00:00Z"),
        app_open("ifa-1", "u-1", "2025-01-15T10:00:00Z"),
        app_open("ifa-2", "u-2", "2025-01-15T11:00:00Z"),
    ]
}

pub fn scenario_batch() -> Vec<u8> {
    batch(scenario_records())
}

/// Body for `POST /refresh`.
pub fn refresh_request(range: DateRange, timeout_ms: Option<u64>) -> Value {
    let mut body = json!({
        "start": range.start.to_string(),
        "end": range.end.to_string(),
    });
    if let Some(timeout_ms) = timeout_ms {
        body["timeout_ms"] = json!(timeout_ms);
    }
    body
}
