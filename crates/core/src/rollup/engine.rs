//! Computes every rollup table for a range in dependency order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use super::graph::StageGraph;
use super::{
    DailyOverviewRow, InstallsBaseRow, RollupConfig, RollupSet, RollupStage,
    UserDailyAppOpensRow, UserDailyEventsAttributedRow, UserDailyEventsRow, UserDxActivityRow,
    UserDxAttributedRow,
};
use crate::attribution::{AttributionRecord, AttributionSet, ORGANIC_NETWORK};
use crate::events::AppEvent;
use crate::error::{Error, Result};
use crate::range::DateRange;
use crate::snapshot::RawSnapshot;

/// Everything one aggregation run reads.
#[derive(Debug, Clone, Copy)]
pub struct AggregationInput<'a> {
    pub snapshot: &'a RawSnapshot,
    /// Installs resolved for `snapshot.range`
    pub attribution: &'a AttributionSet,
    /// Records of users who installed before the range: those resolved from
    /// the snapshot for installs within `max_dx` days, plus stored ones
    pub prior_attribution: &'a [AttributionRecord],
}

impl<'a> AggregationInput<'a> {
    pub fn range(&self) -> DateRange {
        self.snapshot.range
    }
}

/// Stage outputs produced so far in a run.
#[derive(Default)]
struct StageOutputs {
    installs_base: Option<Vec<InstallsBaseRow>>,
    user_daily_app_opens: Option<Vec<UserDailyAppOpensRow>>,
    user_dx_activity: Option<Vec<UserDxActivityRow>>,
    user_dx_attributed: Option<Vec<UserDxAttributedRow>>,
    user_daily_events: Option<Vec<UserDailyEventsRow>>,
    user_daily_events_attributed: Option<Vec<UserDailyEventsAttributedRow>>,
    daily_overview: Option<Vec<DailyOverviewRow>>,
}

fn missing(stage: RollupStage, needs: RollupStage, range: DateRange) -> Error {
    Error::inconsistent(format!(
        "{} requires {} for {}, which has not completed",
        stage, needs, range
    ))
}

macro_rules! require {
    ($outputs:expr, $field:ident, $stage:expr, $needs:expr, $range:expr) => {
        $outputs
            .$field
            .as_deref()
            .ok_or_else(|| missing($stage, $needs, $range))?
    };
}

/// Attribution lookup for one run: in-range installs first, then prior ones.
struct AttributionIndex<'a> {
    by_user: HashMap<&'a str, &'a AttributionRecord>,
}

impl<'a> AttributionIndex<'a> {
    fn new(input: &AggregationInput<'a>) -> Self {
        let attribution: &'a AttributionSet = input.attribution;
        let mut by_user = HashMap::new();
        for record in input.prior_attribution {
            by_user.insert(record.org_user_id.as_str(), record);
        }
        for record in &attribution.records {
            by_user.insert(record.org_user_id.as_str(), record);
        }
        Self { by_user }
    }

    fn get(&self, org_user_id: &str) -> Option<&'a AttributionRecord> {
        self.by_user.get(org_user_id).copied()
    }

    /// `(network, campaign_id)`, organic for users with no known install.
    fn channel(&self, org_user_id: &str) -> (&'a str, &'a str) {
        match self.get(org_user_id) {
            Some(r) => (r.network.as_str(), r.campaign_id.as_str()),
            None => (ORGANIC_NETWORK, ""),
        }
    }
}

/// Runs the rollup stage graph over one snapshot.
#[derive(Debug, Clone)]
pub struct AggregationEngine {
    graph: StageGraph,
    config: RollupConfig,
}

impl AggregationEngine {
    pub fn new(config: RollupConfig) -> Result<Self> {
        Ok(Self {
            graph: StageGraph::standard()?,
            config,
        })
    }

    /// Recomputes every rollup table for `input.range()`.
    pub fn aggregate(&self, input: AggregationInput<'_>) -> Result<RollupSet> {
        let range = input.range();
        if !input.attribution.range.covers(&range) {
            return Err(Error::inconsistent(format!(
                "attribution for {} does not cover {}",
                input.attribution.range, range
            )));
        }

        let index = AttributionIndex::new(&input);
        let mut out = StageOutputs::default();

        for stage in self.graph.order() {
            match stage {
                RollupStage::InstallsBase => {
                    out.installs_base = Some(installs_base(input.snapshot));
                }
                RollupStage::UserDailyAppOpens => {
                    out.user_daily_app_opens = Some(user_daily_app_opens(input.snapshot));
                }
                RollupStage::UserDxActivity => {
                    let installs = require!(out, installs_base, *stage, RollupStage::InstallsBase, range);
                    let opens = require!(out, user_daily_app_opens, *stage, RollupStage::UserDailyAppOpens, range);
                    let carried = input.snapshot.carried_installs(self.config.max_dx);
                    out.user_dx_activity = Some(user_dx_activity(installs, &carried, opens, self.config.max_dx));
                }
                RollupStage::UserDxAttributed => {
                    let activity = require!(out, user_dx_activity, *stage, RollupStage::UserDxActivity, range);
                    out.user_dx_attributed = Some(user_dx_attributed(activity, &index, range)?);
                }
                RollupStage::UserDailyEvents => {
                    out.user_daily_events = Some(user_daily_events(input.snapshot));
                }
                RollupStage::UserDailyEventsAttributed => {
                    let events = require!(out, user_daily_events, *stage, RollupStage::UserDailyEvents, range);
                    out.user_daily_events_attributed = Some(user_daily_events_attributed(events, &index));
                }
                RollupStage::DailyOverview => {
                    let installs = require!(out, installs_base, *stage, RollupStage::InstallsBase, range);
                    let revenue = require!(
                        out,
                        user_daily_events_attributed,
                        *stage,
                        RollupStage::UserDailyEventsAttributed,
                        range
                    );
                    out.daily_overview = Some(daily_overview(input.snapshot, installs, revenue, &index, range)?);
                }
            }
            debug!(stage = %stage, range = %range, "rollup stage complete");
        }

        Ok(RollupSet {
            range,
            installs_base: out
                .installs_base
                .ok_or_else(|| missing(RollupStage::InstallsBase, RollupStage::InstallsBase, range))?,
            user_daily_app_opens: out.user_daily_app_opens.unwrap_or_default(),
            user_dx_activity: out.user_dx_activity.unwrap_or_default(),
            user_dx_attributed: out.user_dx_attributed.unwrap_or_default(),
            user_daily_events: out.user_daily_events.unwrap_or_default(),
            user_daily_events_attributed: out.user_daily_events_attributed.unwrap_or_default(),
            daily_overview: out.daily_overview.ok_or_else(|| {
                missing(RollupStage::DailyOverview, RollupStage::DailyOverview, range)
            })?,
        })
    }
}

fn installs_base(snapshot: &RawSnapshot) -> Vec<InstallsBaseRow> {
    let mut rows: Vec<InstallsBaseRow> = snapshot
        .installs()
        .into_iter()
        .map(|e| InstallsBaseRow {
            date: e.date(),
            store_id: e.store_id.clone(),
            org_user_id: e.org_user_id.clone(),
            device_id: e.device_id.clone(),
            installed_at: e.event_time,
        })
        .collect();
    rows.sort_by(|a, b| {
        (a.date, &a.store_id, &a.org_user_id).cmp(&(b.date, &b.store_id, &b.org_user_id))
    });
    rows
}

fn user_daily_app_opens(snapshot: &RawSnapshot) -> Vec<UserDailyAppOpensRow> {
    let mut groups: BTreeMap<(chrono::NaiveDate, &str, &str), u64> = BTreeMap::new();
    for e in &snapshot.app_events {
        if e.is_app_open() && e.is_well_formed() {
            *groups
                .entry((e.date(), e.store_id.as_str(), e.org_user_id.as_str()))
                .or_default() += 1;
        }
    }
    groups
        .into_iter()
        .map(|((date, store_id, org_user_id), app_opens)| UserDailyAppOpensRow {
            date,
            store_id: store_id.to_string(),
            org_user_id: org_user_id.to_string(),
            app_opens,
        })
        .collect()
}

/// App opens inside the range, `dx` days after the user's install.
///
/// Installs are the in-range ones plus `carried` installs from at most
/// `max_dx` days before the range.
fn user_dx_activity(
    installs: &[InstallsBaseRow],
    carried: &[&AppEvent],
    opens: &[UserDailyAppOpensRow],
    max_dx: u32,
) -> Vec<UserDxActivityRow> {
    let installed: HashMap<(&str, &str), chrono::NaiveDate> = installs
        .iter()
        .map(|i| ((i.store_id.as_str(), i.org_user_id.as_str()), i.date))
        .chain(
            carried
                .iter()
                .map(|e| ((e.store_id.as_str(), e.org_user_id.as_str()), e.date())),
        )
        .collect();

    type Key<'k> = (chrono::NaiveDate, chrono::NaiveDate, &'k str, &'k str, u32);
    let mut groups: BTreeMap<Key<'_>, u64> = BTreeMap::new();
    for row in opens {
        let Some(install_date) = installed.get(&(row.store_id.as_str(), row.org_user_id.as_str())) else {
            continue;
        };
        let days = (row.date - *install_date).num_days();
        if days < 0 || days > i64::from(max_dx) {
            continue;
        }
        *groups
            .entry((row.date, *install_date, row.store_id.as_str(), row.org_user_id.as_str(), days as u32))
            .or_default() += row.app_opens;
    }

    groups
        .into_iter()
        .map(|((activity_date, install_date, store_id, org_user_id, dx), app_opens)| UserDxActivityRow {
            activity_date,
            install_date,
            store_id: store_id.to_string(),
            org_user_id: org_user_id.to_string(),
            dx,
            app_opens,
        })
        .collect()
}

fn user_dx_attributed(
    activity: &[UserDxActivityRow],
    index: &AttributionIndex<'_>,
    range: DateRange,
) -> Result<Vec<UserDxAttributedRow>> {
    type Key<'k> = (
        chrono::NaiveDate,
        chrono::NaiveDate,
        &'k str,
        crate::attribution::AttributionType,
        &'k str,
        &'k str,
        u32,
    );
    let mut groups: BTreeMap<Key<'_>, (BTreeSet<&str>, u64)> = BTreeMap::new();

    for row in activity {
        let record = index.get(&row.org_user_id).ok_or_else(|| {
            Error::inconsistent(format!(
                "no attribution record for install of {} in {}",
                row.org_user_id, range
            ))
        })?;
        let entry = groups
            .entry((
                row.activity_date,
                row.install_date,
                row.store_id.as_str(),
                record.attribution_type,
                record.network.as_str(),
                record.campaign_id.as_str(),
                row.dx,
            ))
            .or_default();
        entry.0.insert(row.org_user_id.as_str());
        entry.1 += row.app_opens;
    }

    Ok(groups
        .into_iter()
        .map(
            |((activity_date, install_date, store_id, attribution_type, network, campaign_id, dx), (users, app_opens))| {
                UserDxAttributedRow {
                    activity_date,
                    install_date,
                    store_id: store_id.to_string(),
                    attribution_type,
                    network: network.to_string(),
                    campaign_id: campaign_id.to_string(),
                    dx,
                    active_users: users.len() as u64,
                    app_opens,
                }
            },
        )
        .collect())
}

fn user_daily_events(snapshot: &RawSnapshot) -> Vec<UserDailyEventsRow> {
    let mut groups: BTreeMap<(chrono::NaiveDate, &str, &str, &str), (u64, f64)> = BTreeMap::new();
    for e in &snapshot.app_events {
        if !e.is_well_formed() {
            continue;
        }
        let entry = groups
            .entry((e.date(), e.store_id.as_str(), e.org_user_id.as_str(), e.event_id.as_str()))
            .or_default();
        entry.0 += 1;
        entry.1 += e.revenue_or_zero();
    }
    groups
        .into_iter()
        .map(|((date, store_id, org_user_id, event_id), (events, revenue))| UserDailyEventsRow {
            date,
            store_id: store_id.to_string(),
            org_user_id: org_user_id.to_string(),
            event_id: event_id.to_string(),
            events,
            revenue,
        })
        .collect()
}

fn user_daily_events_attributed(
    events: &[UserDailyEventsRow],
    index: &AttributionIndex<'_>,
) -> Vec<UserDailyEventsAttributedRow> {
    type Key<'k> = (chrono::NaiveDate, &'k str, &'k str, &'k str, &'k str);
    let mut groups: BTreeMap<Key<'_>, (u64, BTreeSet<&str>, f64)> = BTreeMap::new();

    for row in events {
        let (network, campaign_id) = index.channel(&row.org_user_id);
        let entry = groups
            .entry((row.date, row.store_id.as_str(), network, campaign_id, row.event_id.as_str()))
            .or_default();
        entry.0 += row.events;
        entry.1.insert(row.org_user_id.as_str());
        entry.2 += row.revenue;
    }

    groups
        .into_iter()
        .map(
            |((date, store_id, network, campaign_id, event_id), (events, users, revenue))| {
                UserDailyEventsAttributedRow {
                    date,
                    store_id: store_id.to_string(),
                    network: network.to_string(),
                    campaign_id: campaign_id.to_string(),
                    event_id: event_id.to_string(),
                    events,
                    users: users.len() as u64,
                    revenue,
                }
            },
        )
        .collect()
}

#[derive(Default)]
struct OverviewAcc {
    impressions: u64,
    clicks: u64,
    installs: u64,
    revenue: f64,
}

fn daily_overview(
    snapshot: &RawSnapshot,
    installs: &[InstallsBaseRow],
    revenue: &[UserDailyEventsAttributedRow],
    index: &AttributionIndex<'_>,
    range: DateRange,
) -> Result<Vec<DailyOverviewRow>> {
    let mut groups: BTreeMap<(chrono::NaiveDate, &str, &str, &str), OverviewAcc> = BTreeMap::new();

    for tp in &snapshot.impressions {
        if range.contains(tp.date()) && tp.is_well_formed() {
            groups
                .entry((tp.date(), tp.store_id.as_str(), tp.network.as_str(), tp.campaign_id.as_str()))
                .or_default()
                .impressions += 1;
        }
    }
    for tp in &snapshot.clicks {
        if range.contains(tp.date()) && tp.is_well_formed() {
            groups
                .entry((tp.date(), tp.store_id.as_str(), tp.network.as_str(), tp.campaign_id.as_str()))
                .or_default()
                .clicks += 1;
        }
    }
    for install in installs {
        let record = index.get(&install.org_user_id).ok_or_else(|| {
            Error::inconsistent(format!(
                "install of {} on {} has no attribution record",
                install.org_user_id, install.date
            ))
        })?;
        groups
            .entry((
                install.date,
                install.store_id.as_str(),
                record.network.as_str(),
                record.campaign_id.as_str(),
            ))
            .or_default()
            .installs += 1;
    }
    for row in revenue {
        if row.revenue != 0.0 {
            groups
                .entry((row.date, row.store_id.as_str(), row.network.as_str(), row.campaign_id.as_str()))
                .or_default()
                .revenue += row.revenue;
        }
    }

    Ok(groups
        .into_iter()
        .map(|((date, store_id, network, campaign_id), acc)| DailyOverviewRow {
            date,
            store_id: store_id.to_string(),
            network: network.to_string(),
            campaign_id: campaign_id.to_string(),
            impressions: acc.impressions,
            clicks: acc.clicks,
            installs: acc.installs,
            revenue: acc.revenue,
        })
        .collect())
}
