//! Read-side result shapes shared by every store backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::attribution::{AttributionRecord, AttributionType};
use crate::rollup::DailyOverviewRow;

/// `SELECT attribution_type, network, count() FROM attributed_installs GROUP BY ...`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionSummaryRow {
    pub attribution_type: AttributionType,
    pub network: String,
    pub installs: u64,
}

/// `SELECT sum(impressions), sum(clicks), sum(installs), sum(revenue) FROM daily_overview`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverviewTotals {
    pub impressions: u64,
    pub clicks: u64,
    pub installs: u64,
    pub revenue: f64,
}

/// Groups attribution records by `(attribution_type, network)`.
pub fn summarize_attribution<'a>(
    records: impl IntoIterator<Item = &'a AttributionRecord>,
) -> Vec<AttributionSummaryRow> {
    let mut groups: BTreeMap<(AttributionType, &str), u64> = BTreeMap::new();
    for record in records {
        *groups
            .entry((record.attribution_type, record.network.as_str()))
            .or_default() += 1;
    }
    groups
        .into_iter()
        .map(|((attribution_type, network), installs)| AttributionSummaryRow {
            attribution_type,
            network: network.to_string(),
            installs,
        })
        .collect()
}

/// Sums daily overview rows.
pub fn overview_totals<'a>(rows: impl IntoIterator<Item = &'a DailyOverviewRow>) -> OverviewTotals {
    rows.into_iter().fold(OverviewTotals::default(), |mut acc, row| {
        acc.impressions += row.impressions;
        acc.clicks += row.clicks;
        acc.installs += row.installs;
        acc.revenue += row.revenue;
        acc
    })
}
