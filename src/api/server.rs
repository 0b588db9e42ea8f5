//! Axum router and handlers for the competition API.
//!
//! Every endpoint is a read-side view over the supervisor; nothing here can
//! trigger a cycle or an order.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::domain::{AccountInfo, CycleRecord, PositionInfo};
use crate::error::Result;
use crate::manager::{ComparisonView, TraderManager};
use crate::trader::PerformanceReport;

const DEFAULT_LATEST_N: usize = 20;
const MAX_LATEST_N: usize = 200;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<TraderManager>,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/competition", get(competition))
        .route("/traders/:id/account", get(trader_account))
        .route("/traders/:id/positions", get(trader_positions))
        .route("/traders/:id/performance", get(trader_performance))
        .route("/traders/:id/decisions/latest", get(trader_latest_decisions))
        .with_state(state)
        .layer(cors)
}

/// Bind and serve until the process exits.
pub async fn serve(manager: Arc<TraderManager>, port: u16) -> Result<()> {
    let app = create_router(AppState { manager });
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "API server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn competition(State(state): State<AppState>) -> Json<ComparisonView> {
    Json(state.manager.comparison_view().await)
}

type HandlerResult<T> = std::result::Result<Json<T>, (StatusCode, String)>;

async fn trader_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HandlerResult<AccountInfo> {
    let agent = state
        .manager
        .get_agent(&id)
        .await
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?;
    let account = agent
        .account()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(account))
}

async fn trader_positions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HandlerResult<Vec<PositionInfo>> {
    let agent = state
        .manager
        .get_agent(&id)
        .await
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?;
    let positions = agent
        .positions()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(positions))
}

async fn trader_performance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HandlerResult<PerformanceReport> {
    let agent = state
        .manager
        .get_agent(&id)
        .await
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?;
    Ok(Json(agent.performance().await))
}

async fn trader_latest_decisions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> HandlerResult<Vec<CycleRecord>> {
    let n = params
        .get("n")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_LATEST_N)
        .min(MAX_LATEST_N);

    let agent = state
        .manager
        .get_agent(&id)
        .await
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?;
    Ok(Json(agent.logger().latest_n(n).await))
}
