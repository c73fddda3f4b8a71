//! Macro indicator payload
//!
//! Builds the `macro` data-set: one summary per headline indicator with its
//! full history since 2022, period-over-period changes and the latest print.

use chrono::{Duration, NaiveDate};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{round2, DateRange, MarketDataSource, Observation, ProviderError};

/// First year of history included in the payload
const HISTORY_START_YEAR: i32 = 2022;

/// Look past today so releases dated ahead of time are not cut off
const LOOKAHEAD_DAYS: i64 = 60;

/// A headline indicator and the series ids that can supply it, in order of
/// preference
#[derive(Debug, Clone, Copy)]
pub struct Indicator {
    pub name: &'static str,
    pub series_ids: &'static [&'static str],
}

/// Indicators included in the macro payload
pub const INDICATORS: &[Indicator] = &[
    Indicator {
        name: "CPI",
        series_ids: &["CPIAUCSL"],
    },
    Indicator {
        name: "PPI",
        series_ids: &["PPIACO"],
    },
    Indicator {
        name: "Payrolls",
        series_ids: &["PAYEMS"],
    },
    // ISM stopped publishing NAPM on FRED; the alternatives keep the panel alive
    Indicator {
        name: "PMI",
        series_ids: &["NAPM", "MANPMI", "UMCSENT"],
    },
    Indicator {
        name: "Unemployment Claims",
        series_ids: &["ICSA"],
    },
];

/// One row of an indicator's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub date: NaiveDate,
    pub value: f64,
    /// Change from the previous row in percent; 0 for the first row
    pub pct_change: f64,
}

/// Summary of one indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSummary {
    pub history: Vec<HistoryPoint>,
    /// Latest value
    pub current: f64,
    pub latest_date: NaiveDate,
    /// Latest value against the previous one, in percent
    pub change: f64,
}

/// The `macro` payload, keyed by indicator name
pub type MacroPayload = BTreeMap<String, IndicatorSummary>;

/// Summarizes an ordered series, `None` if it is empty
pub fn summarize(observations: &[Observation]) -> Option<IndicatorSummary> {
    let latest = observations.last()?;

    let history = observations
        .iter()
        .enumerate()
        .map(|(i, obs)| {
            let pct_change = match i {
                0 => 0.0,
                _ => percent_change(observations[i - 1].value, obs.value),
            };
            HistoryPoint {
                date: obs.date,
                value: obs.value,
                pct_change: round2(pct_change),
            }
        })
        .collect();

    let previous = observations
        .len()
        .checked_sub(2)
        .map(|i| observations[i].value)
        .unwrap_or(latest.value);

    Some(IndicatorSummary {
        history,
        current: latest.value,
        latest_date: latest.date,
        change: round2(percent_change(previous, latest.value)),
    })
}

fn percent_change(previous: f64, current: f64) -> f64 {
    if previous == 0.0 {
        0.0
    } else {
        (current - previous) / previous * 100.0
    }
}

/// Tries each series id of `indicator` until one yields data
async fn fetch_indicator<S>(
    source: &S,
    indicator: &Indicator,
    range: DateRange,
) -> Result<IndicatorSummary, ProviderError>
where
    S: MarketDataSource + ?Sized,
{
    let mut last_error = ProviderError::NoData(indicator.name.to_string());

    for series_id in indicator.series_ids {
        match source.fetch_series(series_id, range).await {
            Ok(observations) => match summarize(&observations) {
                Some(summary) => {
                    debug!(indicator = indicator.name, series_id, "Using series for indicator");
                    return Ok(summary);
                }
                None => last_error = ProviderError::NoData(series_id.to_string()),
            },
            Err(e) => {
                debug!(indicator = indicator.name, series_id, error = %e, "Series unavailable");
                last_error = e;
            }
        }
    }

    Err(last_error)
}

/// Fetches every indicator concurrently and assembles the payload
///
/// Indicators that fail are left out. If all of them fail the last error is
/// returned, so an empty payload is never produced.
pub async fn build<S>(source: &S, today: NaiveDate) -> Result<MacroPayload, ProviderError>
where
    S: MarketDataSource + ?Sized,
{
    let start = NaiveDate::from_ymd_opt(HISTORY_START_YEAR, 1, 1)
        .unwrap_or(today - Duration::days(4 * 365));
    let range = DateRange::new(start, today + Duration::days(LOOKAHEAD_DAYS));

    let results = join_all(INDICATORS.iter().map(|indicator| async move {
        (indicator.name, fetch_indicator(source, indicator, range).await)
    }))
    .await;

    let mut payload = MacroPayload::new();
    let mut last_error = None;
    for (name, result) in results {
        match result {
            Ok(summary) => {
                payload.insert(name.to_string(), summary);
            }
            Err(e) => {
                warn!(indicator = name, error = %e, "Skipping macro indicator");
                last_error = Some(e);
            }
        }
    }

    if payload.is_empty() {
        return Err(last_error.unwrap_or_else(|| ProviderError::NoData("macro indicators".into())));
    }
    Ok(payload)
}
