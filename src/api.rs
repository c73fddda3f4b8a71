//! HTTP surface
//!
//! Data routes serve cached payloads; admin routes expose refresh, cache
//! health and cache clearing. Everything else falls through to the built
//! dashboard when a static directory is configured.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing::info;

use crate::data::{DataSet, UnknownDataSet};
use crate::refresh::{CacheService, ServeError};

/// Errors returned to HTTP clients as `{"error": "..."}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Unavailable(#[from] ServeError),

    /// Unknown data-set in the path
    #[error(transparent)]
    NotFound(UnknownDataSet),

    /// Unknown data-set in a query parameter
    #[error(transparent)]
    BadRequest(UnknownDataSet),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ClearParams {
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DataUpdatedParams {
    #[serde(default)]
    pub clear: bool,
}

/// API routes without static file serving
pub fn router(service: CacheService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/data/{key}", get(get_data))
        .route("/admin/refresh", post(refresh))
        .route("/admin/cache-status", get(cache_status))
        .route("/admin/clear-cache", post(clear_cache))
        .route("/admin/data-updated", get(data_updated))
        .with_state(service)
}

/// The full application: API routes, the dashboard, CORS and request tracing
///
/// Unknown paths under `static_dir` serve its `index.html` so client-side
/// routes survive a reload.
pub fn app(service: CacheService, static_dir: Option<PathBuf>) -> Router {
    let mut app = router(service);
    if let Some(dir) = static_dir {
        let index = dir.join("index.html");
        app = app.fallback_service(ServeDir::new(dir).fallback(ServeFile::new(index)));
    }
    app.layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /data/{key}
async fn get_data(
    State(service): State<CacheService>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key: DataSet = key.parse().map_err(ApiError::NotFound)?;
    Ok(Json(service.get(key).await?))
}

/// POST /admin/refresh
async fn refresh(State(service): State<CacheService>) -> impl IntoResponse {
    info!("Manual refresh requested");
    Json(service.refresh_all().await)
}

/// GET /admin/cache-status
async fn cache_status(State(service): State<CacheService>) -> impl IntoResponse {
    Json(service.status())
}

/// POST /admin/clear-cache[?key=]
async fn clear_cache(
    State(service): State<CacheService>,
    Query(params): Query<ClearParams>,
) -> Result<impl IntoResponse, ApiError> {
    let key = params
        .key
        .map(|key| key.parse::<DataSet>())
        .transpose()
        .map_err(ApiError::BadRequest)?;

    service.clear(key);
    let message = match key {
        Some(key) => format!("Cleared cache for {}", key),
        None => "Cleared all caches".to_string(),
    };
    Ok(Json(json!({ "status": "success", "message": message })))
}

/// GET /admin/data-updated[?clear=true]
async fn data_updated(
    State(service): State<CacheService>,
    Query(params): Query<DataUpdatedParams>,
) -> impl IntoResponse {
    Json(service.data_updates(params.clear))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StalenessPolicy;
    use crate::data::{DataSetFetcher, ProviderError};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Serves a fixed payload for every data-set except `Rates`
    struct FixedFetcher;

    #[async_trait]
    impl DataSetFetcher for FixedFetcher {
        async fn fetch(&self, key: DataSet) -> Result<Value, ProviderError> {
            match key {
                DataSet::Rates => Err(ProviderError::Timeout("rates".into())),
                _ => Ok(json!({ "key": key.as_str() })),
            }
        }
    }

    fn create_app() -> (Router, CacheService, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let policy =
            StalenessPolicy::new(Duration::from_secs(300), Duration::from_secs(7 * 86400)).unwrap();
        let service = CacheService::new(
            temp_dir.path().to_path_buf(),
            policy,
            Arc::new(FixedFetcher),
        );
        (router(service.clone()), service, temp_dir)
    }

    async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _service, _dir) = create_app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_data_without_cache_is_503() {
        let (app, _service, _dir) = create_app();

        let (status, body) = send(app, "GET", "/data/macro").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("macro"));
    }

    #[tokio::test]
    async fn test_data_unknown_key_is_404() {
        let (app, _service, _dir) = create_app();

        let (status, body) = send(app, "GET", "/data/bonds").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("bonds"));
    }

    #[tokio::test]
    async fn test_data_serves_cached_payload() {
        let (app, service, _dir) = create_app();
        service.disk().save("macro", &json!({"CPI": 1}), false);

        let (status, body) = send(app, "GET", "/data/macro").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"CPI": 1}));
    }

    #[tokio::test]
    async fn test_fedwatch_is_computed_on_request() {
        let (app, _service, _dir) = create_app();

        let (status, body) = send(app, "GET", "/data/fedwatch").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["key"], "fedwatch");
    }

    #[tokio::test]
    async fn test_admin_refresh_reports_each_key() {
        let (app, _service, _dir) = create_app();

        let (status, body) = send(app, "POST", "/admin/refresh").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["macro"]["status"], "success");
        assert_eq!(body["rates"]["status"], "error");
        assert!(body["rates"]["message"].as_str().unwrap().contains("timed out"));
        assert_eq!(body["fedwatch"]["status"], "success");
    }

    #[tokio::test]
    async fn test_cache_status_shape() {
        let (app, service, _dir) = create_app();
        service.disk().save("macro", &json!(1), false);

        let (status, body) = send(app, "GET", "/admin/cache-status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["macro"]["valid"], true);
        assert_eq!(body["macro"]["age_days"], 0);
        assert_eq!(body["macro"]["state"], "disk_fresh_memory_stale");
        assert_eq!(body["rates"]["valid"], false);
        assert_eq!(body["rates"]["age_days"], Value::Null);
        assert_eq!(body["rates"]["needs_update"], true);
    }

    #[tokio::test]
    async fn test_clear_cache_single_key() {
        let (app, service, _dir) = create_app();
        service.disk().save("macro", &json!(1), false);
        service.disk().save("rates", &json!(2), false);

        let (status, body) = send(app, "POST", "/admin/clear-cache?key=macro").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Cleared cache for macro");
        assert!(service.disk().load("macro").is_none());
        assert!(service.disk().load("rates").is_some());
    }

    #[tokio::test]
    async fn test_clear_cache_all() {
        let (app, service, _dir) = create_app();
        service.disk().save("macro", &json!(1), false);

        let (status, _) = send(app, "POST", "/admin/clear-cache").await;

        assert_eq!(status, StatusCode::OK);
        assert!(service.disk().load("macro").is_none());
    }

    #[tokio::test]
    async fn test_clear_cache_unknown_key_is_400() {
        let (app, _service, _dir) = create_app();

        let (status, _) = send(app, "POST", "/admin/clear-cache?key=bonds").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_data_updated_reports_and_clears_flags() {
        let (app, service, _dir) = create_app();
        service.disk().save("macro", &json!(1), true);

        let (_, body) = send(app.clone(), "GET", "/admin/data-updated?clear=true").await;
        assert_eq!(body["updated"], true);
        assert!(body["updated_data"]["macro"].is_string());

        let (_, body) = send(app, "GET", "/admin/data-updated").await;
        assert_eq!(body["updated"], false);
    }

    #[tokio::test]
    async fn test_static_fallback_serves_index() {
        let (_, service, dir) = create_app();
        let static_dir = dir.path().join("dist");
        std::fs::create_dir_all(&static_dir).unwrap();
        std::fs::write(static_dir.join("index.html"), "<html>dashboard</html>").unwrap();

        let response = app(service, Some(static_dir))
            .oneshot(
                Request::builder()
                    .uri("/some/client/route")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"<html>dashboard</html>");
    }
}
