//! Treasury yield curve payload
//!
//! Builds the `rates` data-set: the latest yield per maturity, the curve in
//! maturity order for charting, and a short curve analysis (2s10s and 5s30s
//! spreads, curve shape, DV01 of a reference position).

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{round2, DateRange, MarketDataSource, ProviderError};
use chrono::NaiveDate;

/// Yield indices quoted by Yahoo, in percent
pub const YAHOO_TENORS: &[(&str, &str)] = &[
    ("13W", "^IRX"),
    ("5Y", "^FVX"),
    ("10Y", "^TNX"),
    ("30Y", "^TYX"),
];

/// FRED constant-maturity Treasury series
pub const FRED_TENORS: &[(&str, &str)] = &[
    ("1M", "DGS1MO"),
    ("2M", "DGS2MO"),
    ("3M", "DGS3MO"),
    ("4M", "DGS4MO"),
    ("6M", "DGS6MO"),
    ("1Y", "DGS1"),
    ("2Y", "DGS2"),
    ("7Y", "DGS7"),
];

/// Days of FRED history searched for the latest daily print
const FRED_LOOKBACK_DAYS: i64 = 5;

/// Short-end maturities used for the 2s10s spread, best first
const SHORT_END_PREFERENCE: &[&str] = &["2Y", "1Y", "3M", "13W"];

/// Reference position for the DV01 figure: $10M of the 10Y note
const DV01_FACE_VALUE: f64 = 10_000_000.0;
const DV01_DURATION_YEARS: f64 = 8.0;

/// One point of the yield curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub maturity: String,
    pub years: f64,
    #[serde(rename = "yield")]
    pub yield_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurveShape {
    Normal,
    Inverted,
}

impl CurveShape {
    fn trade_pitch(&self) -> &'static str {
        match self {
            CurveShape::Normal => "Bear Flattener (Rates rising)",
            CurveShape::Inverted => "Bull Steepener (Expecting cuts)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveAnalysis {
    pub spread_2s10s: f64,
    pub spread_5s30s: f64,
    pub curve_shape: CurveShape,
    pub trade_pitch: String,
    pub dv01_10m_position: String,
}

/// The `rates` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatesPayload {
    pub yields: BTreeMap<String, f64>,
    pub yield_curve: Vec<CurvePoint>,
    pub analysis: CurveAnalysis,
}

/// Converts a maturity label ("13W", "6M", "10Y") to years
///
/// Unrecognized labels map to 0.
pub fn maturity_to_years(label: &str) -> f64 {
    let Some(unit) = label.chars().last() else {
        return 0.0;
    };
    let Ok(count) = label[..label.len() - unit.len_utf8()].parse::<u32>() else {
        return 0.0;
    };
    let count = f64::from(count);
    match unit {
        'W' => count / 52.0,
        'M' => count / 12.0,
        'Y' => count,
        _ => 0.0,
    }
}

/// Dollar value of a one basis point move
pub fn dv01(face_value: f64, duration_years: f64) -> f64 {
    duration_years * 0.0001 * face_value
}

/// Formats a dollar amount with thousands separators, e.g. `$8,000.00`
pub fn format_usd(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let dollars = (cents / 100).to_string();

    let mut grouped = String::with_capacity(dollars.len() + dollars.len() / 3);
    for (i, digit) in dollars.chars().enumerate() {
        if i > 0 && (dollars.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, cents % 100)
}

/// Builds the payload from whatever yields were collected
pub fn analyze(yields: BTreeMap<String, f64>) -> RatesPayload {
    let get = |label: &str| yields.get(label).copied().unwrap_or(0.0);

    let short_end = SHORT_END_PREFERENCE
        .iter()
        .find_map(|label| yields.get(*label).copied())
        .unwrap_or(0.0);
    let spread_2s10s = get("10Y") - short_end;
    let spread_5s30s = get("30Y") - get("5Y");

    let curve_shape = if spread_2s10s < 0.0 {
        CurveShape::Inverted
    } else {
        CurveShape::Normal
    };

    let mut yield_curve: Vec<CurvePoint> = yields
        .iter()
        .map(|(maturity, yield_pct)| CurvePoint {
            maturity: maturity.clone(),
            years: maturity_to_years(maturity),
            yield_pct: *yield_pct,
        })
        .collect();
    yield_curve.sort_by(|a, b| a.years.total_cmp(&b.years));

    RatesPayload {
        yields,
        yield_curve,
        analysis: CurveAnalysis {
            spread_2s10s: round2(spread_2s10s),
            spread_5s30s: round2(spread_5s30s),
            curve_shape,
            trade_pitch: curve_shape.trade_pitch().to_string(),
            dv01_10m_position: format_usd(dv01(DV01_FACE_VALUE, DV01_DURATION_YEARS)),
        },
    }
}

/// Collects yields from both providers and analyzes the curve
///
/// Individual tenors that fail are skipped; the payload fails with
/// [`ProviderError::NoData`] only if no tenor at all could be fetched.
pub async fn build<S>(source: &S, today: NaiveDate) -> Result<RatesPayload, ProviderError>
where
    S: MarketDataSource + ?Sized,
{
    let range = DateRange::last_days(today, FRED_LOOKBACK_DAYS);

    let quotes = join_all(YAHOO_TENORS.iter().map(|(label, ticker)| async move {
        (*label, source.fetch_quote(ticker).await)
    }));
    let series = join_all(FRED_TENORS.iter().map(|(label, series_id)| async move {
        let latest = source
            .fetch_series(series_id, range)
            .await
            .and_then(|observations| {
                observations
                    .last()
                    .map(|obs| obs.value)
                    .ok_or_else(|| ProviderError::NoData(series_id.to_string()))
            });
        (*label, latest)
    }));
    let (quotes, series) = futures::join!(quotes, series);

    let mut yields = BTreeMap::new();
    for (label, result) in quotes.into_iter().chain(series) {
        match result {
            Ok(value) => {
                yields.insert(label.to_string(), value);
            }
            Err(ProviderError::MissingApiKey(provider)) => {
                debug!(tenor = label, provider, "Skipping tenor without API key");
            }
            Err(e) => warn!(tenor = label, error = %e, "Failed to fetch yield"),
        }
    }

    if yields.is_empty() {
        return Err(ProviderError::NoData("Treasury yields".into()));
    }
    Ok(analyze(yields))
}
