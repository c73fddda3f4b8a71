//! Yahoo Finance chart API client
//!
//! Fetches the latest quote for a ticker from Yahoo's unofficial chart
//! endpoint. Treasury yield indices (^IRX, ^FVX, ^TNX, ^TYX) are quoted in
//! percent, so the "price" is the yield itself.

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::ProviderError;

/// Base URL for the Yahoo Finance chart API
const YAHOO_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

/// Client for fetching quotes from Yahoo Finance
#[derive(Debug, Clone)]
pub struct YahooClient {
    client: Client,
    base_url: String,
}

impl YahooClient {
    /// Create a new YahooClient around an existing HTTP client
    ///
    /// Yahoo rejects requests without a browser-like user agent, so the
    /// client should be built with one.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            base_url: YAHOO_CHART_URL.to_string(),
        }
    }

    /// Point the client at another chart endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fetch the latest close for `ticker`
    pub async fn fetch_quote(&self, ticker: &str) -> Result<f64, ProviderError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), urlencoded(ticker));

        let response = self
            .client
            .get(&url)
            .query(&[("range", "5d"), ("interval", "1d")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                target: format!("Yahoo quote {}", ticker),
                status: status.as_u16(),
            });
        }

        let text = response.text().await?;
        let quote = parse_chart(&text, ticker)?;
        debug!(ticker, quote, "Fetched Yahoo quote");
        Ok(quote)
    }
}

/// Extract the latest close from a chart response
///
/// Uses the last non-null daily close, falling back to the regular market
/// price when the close series is empty.
pub(crate) fn parse_chart(text: &str, ticker: &str) -> Result<f64, ProviderError> {
    let response: ChartResponse = serde_json::from_str(text)?;

    if let Some(error) = response.chart.error {
        return Err(ProviderError::Parse(format!(
            "Yahoo error for {}: {} - {}",
            ticker, error.code, error.description
        )));
    }

    let result = response
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| ProviderError::NoData(ticker.to_string()))?;

    let last_close = result
        .indicators
        .quote
        .iter()
        .flat_map(|series| series.close.iter().copied())
        .rev()
        .find_map(|close| close.filter(|v| v.is_finite()));

    last_close
        .or(result.meta.regular_market_price)
        .ok_or_else(|| ProviderError::NoData(ticker.to_string()))
}

/// Percent-encode the characters index tickers use in a URL path
fn urlencoded(s: &str) -> String {
    s.replace('^', "%5E").replace('=', "%3D")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chart_uses_last_non_null_close() {
        let body = r#"{"chart": {"result": [{
            "meta": {"regularMarketPrice": 4.9},
            "indicators": {"quote": [{"close": [4.1, 4.25, null]}]}
        }], "error": null}}"#;

        assert_eq!(parse_chart(body, "^TNX").unwrap(), 4.25);
    }

    #[test]
    fn test_parse_chart_falls_back_to_market_price() {
        let body = r#"{"chart": {"result": [{
            "meta": {"regularMarketPrice": 4.9},
            "indicators": {"quote": [{"close": [null]}]}
        }], "error": null}}"#;

        assert_eq!(parse_chart(body, "^TNX").unwrap(), 4.9);
    }

    #[test]
    fn test_parse_chart_reports_api_error() {
        let body = r#"{"chart": {"result": null, "error": {
            "code": "Not Found", "description": "No data found, symbol may be delisted"
        }}}"#;

        let err = parse_chart(body, "^XYZ").unwrap_err();
        assert!(err.to_string().contains("delisted"));
    }

    #[test]
    fn test_parse_chart_without_any_value_is_no_data() {
        let body = r#"{"chart": {"result": [{
            "meta": {},
            "indicators": {"quote": []}
        }], "error": null}}"#;

        assert!(matches!(
            parse_chart(body, "^FVX"),
            Err(ProviderError::NoData(_))
        ));
    }

    #[test]
    fn test_urlencoded_index_ticker() {
        assert_eq!(urlencoded("^TNX"), "%5ETNX");
        assert_eq!(urlencoded("KRW=X"), "KRW%3DX");
        assert_eq!(urlencoded("SPY"), "SPY");
    }

    #[tokio::test]
    async fn test_fetch_quote_from_endpoint() {
        use axum::{extract::Path, routing::get, Router};

        let app = Router::new().route(
            "/chart/{ticker}",
            get(|Path(ticker): Path<String>| async move {
                assert_eq!(ticker, "^TNX");
                r#"{"chart": {"result": [{
                    "meta": {"regularMarketPrice": 4.2},
                    "indicators": {"quote": [{"close": [4.1, 4.15]}]}
                }], "error": null}}"#
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = YahooClient::with_client(Client::builder().no_proxy().build().unwrap())
            .with_base_url(format!("http://{}/chart/", addr));

        assert_eq!(client.fetch_quote("^TNX").await.unwrap(), 4.15);
    }

    #[tokio::test]
    async fn test_fetch_quote_times_out() {
        use axum::{routing::get, Router};
        use std::time::Duration;

        let app = Router::new().route(
            "/chart/{ticker}",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "{}"
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let http = Client::builder()
            .no_proxy()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let client = YahooClient::with_client(http).with_base_url(format!("http://{}/chart", addr));

        let started = std::time::Instant::now();
        let err = client.fetch_quote("^TNX").await.unwrap_err();

        assert!(matches!(err, ProviderError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
