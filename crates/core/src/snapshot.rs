//! Consistent read of the raw tables for one refresh run.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Days, Duration, NaiveDate, Utc};

use crate::events::{AppEvent, Touchpoint};
use crate::range::DateRange;

/// Raw facts needed to recompute a date range.
///
/// Contents, relative to `range = [start, end)`:
/// - `impressions` / `clicks`: `event_time` in `[start - lookback, end)`
/// - `app_events`: `event_time` in `[start, end)`
/// - `prior_opens`: `app_open` events before `start`, at least the earliest
///   one per user; used only to decide which open is a user's first
#[derive(Debug, Clone)]
pub struct RawSnapshot {
    pub range: DateRange,
    pub lookback: Duration,
    pub impressions: Vec<Touchpoint>,
    pub clicks: Vec<Touchpoint>,
    pub app_events: Vec<AppEvent>,
    pub prior_opens: Vec<AppEvent>,
}

/// Total order used to pick a user's first `app_open`.
fn open_order(e: &AppEvent) -> (DateTime<Utc>, Option<DateTime<Utc>>, uuid::Uuid) {
    (e.event_time, e.received_at, e.event_uid)
}

impl RawSnapshot {
    pub fn empty(range: DateRange, lookback: Duration) -> Self {
        Self {
            range,
            lookback,
            impressions: Vec::new(),
            clicks: Vec::new(),
            app_events: Vec::new(),
            prior_opens: Vec::new(),
        }
    }

    /// Builds a snapshot by filtering full raw tables.
    pub fn from_tables(
        range: DateRange,
        lookback: Duration,
        impressions: &[Touchpoint],
        clicks: &[Touchpoint],
        app_events: &[AppEvent],
    ) -> Self {
        let touch_start = range.touch_start(lookback);
        let end = range.end_time();
        let start = range.start_time();

        let in_window = |tp: &&Touchpoint| tp.event_time >= touch_start && tp.event_time < end;

        Self {
            range,
            lookback,
            impressions: impressions.iter().filter(in_window).cloned().collect(),
            clicks: clicks.iter().filter(in_window).cloned().collect(),
            app_events: app_events
                .iter()
                .filter(|e| e.event_time >= start && e.event_time < end)
                .cloned()
                .collect(),
            prior_opens: app_events
                .iter()
                .filter(|e| e.is_app_open() && e.event_time < start)
                .cloned()
                .collect(),
        }
    }

    /// Each user's first well-formed `app_open` seen in the snapshot.
    fn first_opens(&self) -> HashMap<&str, &AppEvent> {
        let mut first: HashMap<&str, &AppEvent> = HashMap::new();
        for event in self.prior_opens.iter().chain(self.app_events.iter()) {
            if !event.is_app_open() || !event.is_well_formed() {
                continue;
            }
            first
                .entry(event.org_user_id.as_str())
                .and_modify(|cur| {
                    if open_order(event) < open_order(cur) {
                        *cur = event;
                    }
                })
                .or_insert(event);
        }
        first
    }

    fn sorted(mut installs: Vec<&AppEvent>) -> Vec<&AppEvent> {
        installs.sort_by(|a, b| {
            (a.event_time, &a.org_user_id).cmp(&(b.event_time, &b.org_user_id))
        });
        installs
    }

    /// Each user's first well-formed `app_open`, kept only if it falls in range.
    ///
    /// Sorted by `(event_time, org_user_id)`.
    pub fn installs(&self) -> Vec<&AppEvent> {
        Self::sorted(
            self.first_opens()
                .into_values()
                .filter(|e| self.range.contains_time(e.event_time))
                .collect(),
        )
    }

    /// Installs from the `horizon_days` days before the range of users who
    /// open the app inside it.
    ///
    /// Their day-N activity falls in range even though the install does not.
    /// Sorted by `(event_time, org_user_id)`.
    pub fn carried_installs(&self, horizon_days: u32) -> Vec<&AppEvent> {
        let earliest = self
            .range
            .start
            .checked_sub_days(Days::new(u64::from(horizon_days)))
            .unwrap_or(NaiveDate::MIN);
        let active: HashSet<&str> = self
            .app_events
            .iter()
            .filter(|e| e.is_app_open() && e.is_well_formed())
            .map(|e| e.org_user_id.as_str())
            .collect();

        Self::sorted(
            self.first_opens()
                .into_values()
                .filter(|e| {
                    let date = e.date();
                    date >= earliest && date < self.range.start && active.contains(e.org_user_id.as_str())
                })
                .collect(),
        )
    }

    /// Records in the snapshot that fail the ingest rules.
    pub fn malformed_count(&self) -> usize {
        let bad_touch = self
            .impressions
            .iter()
            .chain(self.clicks.iter())
            .filter(|t| !t.is_well_formed())
            .count();
        let bad_events = self
            .app_events
            .iter()
            .chain(self.prior_opens.iter())
            .filter(|e| !e.is_well_formed())
            .count();
        bad_touch + bad_events
    }

    pub fn len(&self) -> usize {
        self.impressions.len() + self.clicks.len() + self.app_events.len() + self.prior_opens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
