use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::middleware::request_logging;
use crate::stats::StatsCache;

/// Shared-cache lifetime advertised on successful responses; matches the in-process window.
pub const STATS_CACHE_CONTROL: &str = "public, s-maxage=300, stale-while-revalidate=60";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub cache: StatsCache,
    /// Whether `?refresh=true` may force an aggregation pass.
    pub allow_force_refresh: bool,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/get", get(get_statistics))
        .with_state(state)
        .layer(middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive())
}

// ===== Route Handlers =====

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache_fresh: state.cache.is_fresh(),
        passes: state.cache.passes(),
    })
}

/// Serves the statistics document, recomputing it when the cache is stale.
async fn get_statistics(
    State(state): State<AppState>,
    Query(params): Query<StatsQuery>,
) -> Result<Response, ApiError> {
    let force_refresh = state.allow_force_refresh && params.refresh.unwrap_or(false);
    let document = state.cache.get(force_refresh).await?;

    let mut response = Json(document.as_ref()).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(STATS_CACHE_CONTROL),
    );
    Ok(response)
}

// ===== Request/Response Types =====

#[derive(Debug, Default, Deserialize)]
struct StatsQuery {
    /// Force a new pass (honoured only when enabled in configuration)
    refresh: Option<bool>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    cache_fresh: bool,
    passes: u64,
}

// ===== Error Handling =====

#[derive(Debug)]
enum ApiError {
    Aggregation(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Aggregation(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Aggregation(err) => {
                tracing::error!(error = %format!("{err:#}"), "statistics request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch stats")
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
