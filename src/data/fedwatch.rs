//! Fed rate-change odds for the next FOMC meeting
//!
//! The odds come from a local snapshot rather than a live feed: the built-in
//! default, or a JSON file that operators update by hand. Building the
//! payload is cheap and deterministic, so this data-set is recomputed on
//! every request.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::ProviderError;

/// Display format of the meeting date, e.g. "December 10, 2025"
const MEETING_DATE_FORMAT: &str = "%B %d, %Y";

/// Market-implied odds as published for one meeting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FedWatchSnapshot {
    pub next_meeting_date: NaiveDate,
    /// Probability in percent per target range in basis points, e.g. "350-375"
    pub target_rate_probabilities: BTreeMap<String, f64>,
    pub current_target_rate: String,
    pub current_fed_rate: f64,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "FedWatch Data".to_string()
}

impl Default for FedWatchSnapshot {
    fn default() -> Self {
        Self {
            next_meeting_date: NaiveDate::from_ymd_opt(2025, 12, 10).unwrap_or(NaiveDate::MIN),
            target_rate_probabilities: BTreeMap::from([
                ("350-375".to_string(), 87.2),
                ("375-400".to_string(), 12.8),
            ]),
            current_target_rate: "375-400".to_string(),
            current_fed_rate: 3.75,
            source: default_source(),
        }
    }
}

/// The `fedwatch` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FedWatchPayload {
    pub next_meeting_date: String,
    pub target_rate_probabilities: BTreeMap<String, f64>,
    pub most_likely_change: String,
    pub most_likely_probability: f64,
    pub current_target_rate: String,
    pub current_fed_rate: f64,
    pub source: String,
}

/// Reads a snapshot from a JSON file
pub async fn load_snapshot(path: &Path) -> Result<FedWatchSnapshot, ProviderError> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&text)?)
}

/// Picks the most likely outcome and shapes the payload
///
/// Ties go to the first range in key order.
pub fn build(snapshot: FedWatchSnapshot) -> Result<FedWatchPayload, ProviderError> {
    let (most_likely_change, most_likely_probability) = snapshot
        .target_rate_probabilities
        .iter()
        .fold(None::<(&String, f64)>, |best, (range, probability)| match best {
            Some((_, top)) if top >= *probability => best,
            _ => Some((range, *probability)),
        })
        .map(|(range, probability)| (range.clone(), (probability * 10.0).round() / 10.0))
        .ok_or_else(|| ProviderError::NoData("target rate probabilities".into()))?;

    Ok(FedWatchPayload {
        next_meeting_date: snapshot.next_meeting_date.format(MEETING_DATE_FORMAT).to_string(),
        target_rate_probabilities: snapshot.target_rate_probabilities,
        most_likely_change,
        most_likely_probability,
        current_target_rate: snapshot.current_target_rate,
        current_fed_rate: snapshot.current_fed_rate,
        source: snapshot.source,
    })
}
