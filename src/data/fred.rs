//! FRED (Federal Reserve Economic Data) API client
//!
//! Fetches economic series observations from the St. Louis Fed's
//! `series/observations` endpoint and normalizes them into ordered
//! [`Observation`] sequences.

use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

use super::{DateRange, Observation, ProviderError};

/// Base URL for the FRED observations API
const FRED_OBSERVATIONS_URL: &str = "https://api.stlouisfed.org/fred/series/observations";

/// FRED marks a missing observation with a lone dot
const MISSING_VALUE: &str = ".";

/// Response from the observations endpoint
#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    observations: Vec<RawObservation>,
}

/// A single observation as FRED sends it: both fields are strings
#[derive(Debug, Deserialize)]
struct RawObservation {
    date: String,
    value: String,
}

/// Client for fetching series from the FRED API
#[derive(Debug, Clone)]
pub struct FredClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl FredClient {
    /// Create a new FredClient around an existing HTTP client
    ///
    /// The HTTP client is expected to carry its own request timeout.
    pub fn with_client(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: FRED_OBSERVATIONS_URL.to_string(),
        }
    }

    /// Point the client at another observations endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fetch observations of `series_id` within `range`
    ///
    /// # Returns
    /// * `Ok(Vec<Observation>)` - Observations sorted by date, missing values
    ///   dropped and duplicate dates collapsed to the last one
    /// * `Err(ProviderError)` - If the request, the status or parsing fails
    pub async fn fetch_observations(
        &self,
        series_id: &str,
        range: DateRange,
    ) -> Result<Vec<Observation>, ProviderError> {
        let start = range.start.format("%Y-%m-%d").to_string();
        let end = range.end.format("%Y-%m-%d").to_string();

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("series_id", series_id),
                ("api_key", self.api_key.as_str()),
                ("file_type", "json"),
                ("observation_start", start.as_str()),
                ("observation_end", end.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // The URL carries the API key, so only the series id is reported
            return Err(ProviderError::Status {
                target: format!("FRED series {}", series_id),
                status: status.as_u16(),
            });
        }

        let text = response.text().await?;
        let observations = parse_observations(&text)?;
        debug!(series_id, count = observations.len(), "Fetched FRED series");
        Ok(observations)
    }
}

/// Parse an observations response body into a normalized series
pub(crate) fn parse_observations(text: &str) -> Result<Vec<Observation>, ProviderError> {
    let response: ObservationsResponse = serde_json::from_str(text)?;

    let mut by_date = BTreeMap::new();
    for raw in response.observations {
        let value = raw.value.trim();
        if value == MISSING_VALUE {
            continue;
        }
        let Ok(value) = value.parse::<f64>() else {
            continue;
        };
        if !value.is_finite() {
            continue;
        }
        let date = NaiveDate::parse_from_str(&raw.date, "%Y-%m-%d")
            .map_err(|_| ProviderError::Parse(format!("invalid observation date: {}", raw.date)))?;
        // Later rows win for a repeated date
        by_date.insert(date, value);
    }

    Ok(by_date
        .into_iter()
        .map(|(date, value)| Observation { date, value })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_observations_sorts_and_skips_missing() {
        let body = r#"{
            "realtime_start": "2026-01-01",
            "observations": [
                {"date": "2026-02-01", "value": "312.5"},
                {"date": "2026-01-01", "value": "311.0"},
                {"date": "2026-03-01", "value": "."}
            ]
        }"#;

        let observations = parse_observations(body).unwrap();

        assert_eq!(
            observations,
            vec![
                Observation {
                    date: date(2026, 1, 1),
                    value: 311.0
                },
                Observation {
                    date: date(2026, 2, 1),
                    value: 312.5
                },
            ]
        );
    }

    #[test]
    fn test_parse_observations_keeps_last_duplicate() {
        let body = r#"{"observations": [
            {"date": "2026-01-01", "value": "1.0"},
            {"date": "2026-01-01", "value": "2.0"}
        ]}"#;

        let observations = parse_observations(body).unwrap();

        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].value, 2.0);
    }

    #[test]
    fn test_parse_observations_rejects_bad_date() {
        let body = r#"{"observations": [{"date": "Jan 1", "value": "1.0"}]}"#;
        assert!(matches!(
            parse_observations(body),
            Err(ProviderError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_observations_rejects_error_body() {
        let body = r#"{"error_code": 400, "error_message": "Bad Request."}"#;
        assert!(matches!(
            parse_observations(body),
            Err(ProviderError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_observations_empty_list() {
        let observations = parse_observations(r#"{"observations": []}"#).unwrap();
        assert!(observations.is_empty());
    }

    /// Serves `body` with `status` on an ephemeral port, returns its URL
    async fn serve_fixture(status: u16, body: &'static str) -> String {
        use axum::{http::StatusCode, routing::get, Router};

        let app = Router::new().route(
            "/observations",
            get(move || async move { (StatusCode::from_u16(status).unwrap(), body) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}/observations", addr)
    }

    fn local_client() -> Client {
        Client::builder().no_proxy().build().unwrap()
    }

    fn range() -> DateRange {
        DateRange::new(date(2026, 1, 1), date(2026, 3, 1))
    }

    #[tokio::test]
    async fn test_fetch_observations_from_endpoint() {
        let url = serve_fixture(
            200,
            r#"{"observations": [{"date": "2026-01-01", "value": "3.9"}]}"#,
        )
        .await;
        let client = FredClient::with_client(local_client(), "key").with_base_url(url);

        let observations = client.fetch_observations("DGS10", range()).await.unwrap();

        assert_eq!(
            observations,
            vec![Observation {
                date: date(2026, 1, 1),
                value: 3.9
            }]
        );
    }

    #[tokio::test]
    async fn test_fetch_observations_error_status_hides_api_key() {
        let url = serve_fixture(400, "bad request").await;
        let client = FredClient::with_client(local_client(), "secret-key").with_base_url(url);

        let err = client.fetch_observations("DGS10", range()).await.unwrap_err();

        assert!(matches!(err, ProviderError::Status { status: 400, .. }));
        assert!(err.to_string().contains("DGS10"));
        assert!(!err.to_string().contains("secret-key"));
    }

    #[tokio::test]
    async fn test_fetch_observations_connection_error_hides_api_key() {
        // Nothing listens on port 1
        let client = FredClient::with_client(local_client(), "secret-key")
            .with_base_url("http://127.0.0.1:1/observations");

        let err = client.fetch_observations("DGS10", range()).await.unwrap_err();

        assert!(matches!(err, ProviderError::Request(_)));
        assert!(!err.to_string().contains("secret-key"));
        assert!(!format!("{:?}", err).contains("secret-key"));
    }

    #[tokio::test]
    async fn test_fetch_observations_times_out() {
        use axum::{routing::get, Router};

        let app = Router::new().route(
            "/observations",
            get(|| async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                r#"{"observations": []}"#
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let http = Client::builder()
            .no_proxy()
            .timeout(std::time::Duration::from_millis(100))
            .build()
            .unwrap();
        let client = FredClient::with_client(http, "secret-key")
            .with_base_url(format!("http://{}/observations", addr));

        let err = client.fetch_observations("DGS10", range()).await.unwrap_err();

        assert!(matches!(err, ProviderError::Timeout(_)));
        assert!(!err.to_string().contains("secret-key"));
    }
}
