//! Schema validation for raw record batches.
//!
//! A batch is accepted only if every record passes; otherwise every
//! offending record is reported and nothing is persisted.

use chrono::{DateTime, Duration, Utc};
use validator::Validate;

use crate::error::{Error, Result, ValidationErrorCode};
use crate::events::{AppEvent, RawRecord, RecordBatch, Touchpoint};
use crate::limits::{MAX_BATCH_RECORDS, MAX_BATCH_SIZE_BYTES};

/// Records that passed validation, split by destination table.
///
/// Only constructible through [`validate_batch`], so holding one means the
/// contents are well-formed and carry a receive timestamp.
#[derive(Debug, Clone, Default)]
pub struct ValidatedBatch {
    impressions: Vec<Touchpoint>,
    clicks: Vec<Touchpoint>,
    app_events: Vec<AppEvent>,
}

impl ValidatedBatch {
    pub fn impressions(&self) -> &[Touchpoint] {
        &self.impressions
    }

    pub fn clicks(&self) -> &[Touchpoint] {
        &self.clicks
    }

    pub fn app_events(&self) -> &[AppEvent] {
        &self.app_events
    }

    pub fn len(&self) -> usize {
        self.impressions.len() + self.clicks.len() + self.app_events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Validates raw batch size BEFORE deserialization.
pub fn validate_batch_size(raw_bytes: &[u8]) -> Result<()> {
    if raw_bytes.len() > MAX_BATCH_SIZE_BYTES {
        return Err(Error::validation(
            ValidationErrorCode::BatchTooLarge,
            format!(
                "batch {}KB exceeds {}KB limit",
                raw_bytes.len() / 1024,
                MAX_BATCH_SIZE_BYTES / 1024
            ),
        ));
    }
    Ok(())
}

fn validate_touchpoint(tp: &Touchpoint, latest: DateTime<Utc>) -> std::result::Result<(), String> {
    tp.validate().map_err(|e| e.to_string())?;
    tp.geo.validate().map_err(|e| format!("geo: {}", e))?;
    if tp.event_time > latest {
        return Err(format!("event_time {} is in the future", tp.event_time));
    }
    Ok(())
}

fn validate_app_event(ev: &AppEvent, latest: DateTime<Utc>) -> std::result::Result<(), String> {
    ev.validate().map_err(|e| e.to_string())?;
    ev.geo.validate().map_err(|e| format!("geo: {}", e))?;
    if let Some(revenue) = ev.revenue {
        if !revenue.is_finite() {
            return Err("revenue must be a finite number".into());
        }
    }
    if ev.event_time > latest {
        return Err(format!("event_time {} is in the future", ev.event_time));
    }
    Ok(())
}

/// Validates every record in the batch and stamps missing receive times.
///
/// `skew` is the tolerated clock drift for timestamps ahead of `now`.
pub fn validate_batch(batch: RecordBatch, now: DateTime<Utc>, skew: Duration) -> Result<ValidatedBatch> {
    if batch.is_empty() {
        return Err(Error::validation(
            ValidationErrorCode::InvalidFormat,
            "batch contains no records",
        ));
    }
    if batch.len() > MAX_BATCH_RECORDS {
        return Err(Error::validation(
            ValidationErrorCode::BatchTooLarge,
            format!("batch of {} records exceeds {} limit", batch.len(), MAX_BATCH_RECORDS),
        ));
    }

    let latest = now + skew;
    let details: Vec<String> = batch
        .records
        .iter()
        .enumerate()
        .filter_map(|(i, record)| {
            let outcome = match record {
                RawRecord::Impression(tp) | RawRecord::Click(tp) => validate_touchpoint(tp, latest),
                RawRecord::AppEvent(ev) => validate_app_event(ev, latest),
            };
            outcome
                .err()
                .map(|e| format!("record[{}] ({}): {}", i, record.kind(), e))
        })
        .collect();

    if !details.is_empty() {
        return Err(Error::invalid_records(details));
    }

    let mut validated = ValidatedBatch::default();
    for record in batch.records {
        match record {
            RawRecord::Impression(mut tp) => {
                tp.received_at.get_or_insert(now);
                validated.impressions.push(tp);
            }
            RawRecord::Click(mut tp) => {
                tp.received_at.get_or_insert(now);
                validated.clicks.push(tp);
            }
            RawRecord::AppEvent(mut ev) => {
                ev.received_at.get_or_insert(now);
                validated.app_events.push(ev);
            }
        }
    }
    Ok(validated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Geo;
    use uuid::Uuid;

    fn click(device: &str) -> Touchpoint {
        Touchpoint {
            event_time: "2025-01-15T10:00:00Z".parse().unwrap(),
            store_id: "com.example.superapp".into(),
            network: "meta".into(),
            campaign_name: "launch".into(),
            campaign_id: "c-1".into(),
            ad_name: "banner".into(),
            ad_id: "a-1".into(),
            device_id: device.into(),
            client_ip: "10.0.0.1".into(),
            geo: Geo::default(),
            link_uid: Some(Uuid::new_v4()),
            received_at: None,
        }
    }

    fn open(user: &str) -> AppEvent {
        AppEvent {
            event_time: "2025-01-15T11:00:00Z".parse().unwrap(),
            store_id: "com.example.superapp".into(),
            event_id: "app_open".into(),
            revenue: None,
            device_id: "ifa-1".into(),
            org_user_id: user.into(),
            client_ip: String::new(),
            geo: Geo::default(),
            event_uid: Uuid::new_v4(),
            received_at: None,
            errors: String::new(),
        }
    }

    fn now() -> DateTime<Utc> {
        "2025-01-16T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_valid_batch_is_split_and_stamped() {
        let batch = RecordBatch::new(vec![
            RawRecord::Click(click("ifa-1")),
            RawRecord::AppEvent(open("u-1")),
        ]);
        let validated = validate_batch(batch, now(), Duration::seconds(300)).unwrap();
        assert_eq!(validated.clicks().len(), 1);
        assert_eq!(validated.app_events().len(), 1);
        assert!(validated.impressions().is_empty());
        assert_eq!(validated.clicks()[0].received_at, Some(now()));
    }

    #[test]
    fn test_every_bad_record_is_reported() {
        let mut future = open("u-2");
        future.event_time = now() + Duration::hours(1);
        let mut negative = open("u-3");
        negative.revenue = Some(-1.0);

        let batch = RecordBatch::new(vec![
            RawRecord::Click(click("")),
            RawRecord::AppEvent(open("u-1")),
            RawRecord::AppEvent(future),
            RawRecord::AppEvent(negative),
        ]);
        let err = validate_batch(batch, now(), Duration::seconds(300)).unwrap_err();
        assert_eq!(err.code(), "VALID_001");
        let details = err.details();
        assert_eq!(details.len(), 3);
        assert!(details[0].starts_with("record[0]"));
        assert!(details[1].starts_with("record[2]"));
        assert!(details[2].starts_with("record[3]"));
    }

    #[test]
    fn test_clock_skew_is_tolerated() {
        let mut ev = open("u-1");
        ev.event_time = now() + Duration::seconds(120);
        let batch = RecordBatch::new(vec![RawRecord::AppEvent(ev)]);
        assert!(validate_batch(batch, now(), Duration::seconds(300)).is_ok());
    }

    #[test]
    fn test_empty_and_oversized_batches() {
        let err = validate_batch(RecordBatch::default(), now(), Duration::zero()).unwrap_err();
        assert_eq!(err.code(), "VALID_003");

        let records = (0..=MAX_BATCH_RECORDS)
            .map(|_| RawRecord::Click(click("ifa-1")))
            .collect();
        let err = validate_batch(RecordBatch::new(records), now(), Duration::zero()).unwrap_err();
        assert_eq!(err.code(), "VALID_002");

        let big = vec![b' '; MAX_BATCH_SIZE_BYTES + 1];
        assert_eq!(validate_batch_size(&big).unwrap_err().http_status(), 413);
    }
}
