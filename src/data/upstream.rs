//! Production [`MarketDataSource`]: series from FRED, quotes from Yahoo

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{DateRange, FredClient, MarketDataSource, Observation, ProviderError, YahooClient};

/// Browser-like user agent; Yahoo refuses default client agents
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

/// Recommended per-call timeout for every provider request
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Routes series requests to FRED and quote requests to Yahoo
///
/// Without a FRED API key every series request fails with
/// [`ProviderError::MissingApiKey`] while quotes keep working.
#[derive(Debug, Clone)]
pub struct UpstreamSource {
    fred: Option<FredClient>,
    yahoo: YahooClient,
}

impl UpstreamSource {
    /// Builds both clients over one HTTP client with the given timeout
    pub fn new(fred_api_key: Option<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        let fred = fred_api_key
            .filter(|key| !key.trim().is_empty())
            .map(|key| FredClient::with_client(client.clone(), key));

        Ok(Self {
            fred,
            yahoo: YahooClient::with_client(client),
        })
    }

    pub fn has_fred(&self) -> bool {
        self.fred.is_some()
    }
}

#[async_trait]
impl MarketDataSource for UpstreamSource {
    async fn fetch_series(
        &self,
        series_id: &str,
        range: DateRange,
    ) -> Result<Vec<Observation>, ProviderError> {
        match &self.fred {
            Some(fred) => fred.fetch_observations(series_id, range).await,
            None => Err(ProviderError::MissingApiKey("FRED")),
        }
    }

    async fn fetch_quote(&self, ticker: &str) -> Result<f64, ProviderError> {
        self.yahoo.fetch_quote(ticker).await
    }
}
