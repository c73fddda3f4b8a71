//! Market data sources and the payloads built from them
//!
//! Provider adapters (`fred`, `yahoo`) fetch raw series and quotes from
//! upstream APIs. The payload builders (`macro_data`, `rates`, `fedwatch`)
//! shape them into the JSON documents the dashboard consumes. The refresh
//! layer only ever talks to a [`DataSetFetcher`].

pub mod fedwatch;
pub mod fetcher;
pub mod fred;
pub mod macro_data;
pub mod rates;
pub mod upstream;
pub mod yahoo;

pub use fetcher::MarketDataFetcher;
pub use fred::FredClient;
pub use upstream::UpstreamSource;
pub use yahoo::YahooClient;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier of one logical market-data feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSet {
    /// Macro indicators from FRED (CPI, PPI, payrolls, ...)
    Macro,
    /// Treasury yield curve and curve analysis
    Rates,
    /// Fed rate-change odds for the next meeting
    FedWatch,
}

impl DataSet {
    /// Every known data-set, in warm-up order
    pub const ALL: [DataSet; 3] = [DataSet::Macro, DataSet::Rates, DataSet::FedWatch];

    /// Cache key used on disk and in memory
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSet::Macro => "macro",
            DataSet::Rates => "rates",
            DataSet::FedWatch => "fedwatch",
        }
    }

    /// Whether requests recompute this data-set instead of serving the cache
    ///
    /// Only the Fed odds qualify: they are computed locally and cheaply.
    pub fn fetch_on_request(&self) -> bool {
        matches!(self, DataSet::FedWatch)
    }
}

impl fmt::Display for DataSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a data-set name that matches no known feed
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown data set '{0}'. Valid data sets: macro, rates, fedwatch")]
pub struct UnknownDataSet(pub String);

impl FromStr for DataSet {
    type Err = UnknownDataSet;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "macro" => Ok(DataSet::Macro),
            "rates" => Ok(DataSet::Rates),
            "fedwatch" => Ok(DataSet::FedWatch),
            _ => Err(UnknownDataSet(s.to_string())),
        }
    }
}

/// Errors that can occur when fetching from an upstream provider
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Request(reqwest::Error),

    /// The provider did not answer within the client timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The provider answered with a non-success status
    #[error("{target} returned HTTP {status}")]
    Status { target: String, status: u16 },

    /// Failed to parse the provider response
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// The provider needs an API key that was not configured
    #[error("missing API key for {0}")]
    MissingApiKey(&'static str),

    /// The provider answered but had nothing usable
    #[error("no data returned for {0}")]
    NoData(String),

    /// A local input could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        // Request URLs can carry API keys in the query string
        let e = e.without_url();
        if e.is_timeout() {
            ProviderError::Timeout(e.to_string())
        } else if e.is_decode() {
            ProviderError::Parse(e.to_string())
        } else {
            ProviderError::Request(e)
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::Parse(e.to_string())
    }
}

/// One dated value of an economic series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub value: f64,
}

/// Inclusive range of observation dates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The `days` days up to and including `today`
    pub fn last_days(today: NaiveDate, days: i64) -> Self {
        Self {
            start: today - Duration::days(days),
            end: today,
        }
    }
}

/// Narrow call contract of the upstream data providers
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Fetches a dated series ordered by date, without missing values or
    /// duplicate dates
    async fn fetch_series(
        &self,
        series_id: &str,
        range: DateRange,
    ) -> Result<Vec<Observation>, ProviderError>;

    /// Fetches the latest value quoted for `ticker`
    async fn fetch_quote(&self, ticker: &str) -> Result<f64, ProviderError>;
}

/// Produces a complete, freshly fetched payload for one data-set
#[async_trait]
pub trait DataSetFetcher: Send + Sync {
    async fn fetch(&self, data_set: DataSet) -> Result<Value, ProviderError>;
}

/// Rounds to two decimal places, as every payload figure is displayed
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
