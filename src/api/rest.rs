// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. The chart feed is read-mostly: the
// snapshot endpoints expose what the pipeline computed, the write endpoints
// change the market selection and indicator settings, which the pipeline and
// chart state pick up immediately.
//
// CORS is configured permissively so browser charts on any origin can connect.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::chart_state::ChartState;
use crate::error::ChartError;
use crate::types::Interval;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full API router with CORS middleware and shared state.
pub fn router(state: Arc<ChartState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/chart", get(chart))
        .route("/api/v1/indicators", get(indicators))
        .route("/api/v1/indicators/:id/enabled", post(set_indicator_enabled))
        .route("/api/v1/indicators/:id/config", put(set_indicator_config))
        .route("/api/v1/market", put(select_market))
        // ── WebSocket (handled separately in ws module but mounted here) ─
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

/// Chart state rejection mapped onto an HTTP status with a JSON body.
struct ApiError(ChartError);

impl From<ChartError> for ApiError {
    fn from(err: ChartError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ChartError::UnknownIndicator(_) => StatusCode::NOT_FOUND,
            ChartError::InvalidSymbol(_) | ChartError::Config(_) => StatusCode::BAD_REQUEST,
        };
        warn!(status = status.as_u16(), error = %self.0, "API request rejected");
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<ChartState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Chart snapshot
// =============================================================================

async fn chart(State(state): State<Arc<ChartState>>) -> impl IntoResponse {
    Json(state.snapshot())
}

// =============================================================================
// Indicators
// =============================================================================

async fn indicators(State(state): State<Arc<ChartState>>) -> impl IntoResponse {
    Json(state.indicator_summaries())
}

#[derive(Deserialize)]
struct EnabledUpdate {
    enabled: bool,
}

async fn set_indicator_enabled(
    State(state): State<Arc<ChartState>>,
    Path(id): Path<String>,
    Json(update): Json<EnabledUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    state.set_indicator_enabled(&id, update.enabled)?;
    Ok(Json(serde_json::json!({ "id": id, "enabled": update.enabled })))
}

async fn set_indicator_config(
    State(state): State<Arc<ChartState>>,
    Path(id): Path<String>,
    Json(raw): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state.set_indicator_config(&id, &raw)?;
    Ok(Json(serde_json::json!({ "id": id, "config": config })))
}

// =============================================================================
// Market selection
// =============================================================================

#[derive(Deserialize)]
struct MarketUpdate {
    symbol: String,
    interval: Interval,
}

async fn select_market(
    State(state): State<Arc<ChartState>>,
    Json(update): Json<MarketUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let changed = state.select_market(&update.symbol, update.interval)?;
    let selection = state.selection();
    if changed {
        info!(symbol = %selection.symbol, interval = %selection.interval, "market switched via API");
    }
    Ok(Json(serde_json::json!({
        "symbol": selection.symbol,
        "interval": selection.interval,
        "changed": changed,
    })))
}
