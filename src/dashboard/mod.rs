use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::gateway::{BrokerSnapshot, Event};
use crate::stats::InMemoryStats;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

#[derive(Clone)]
pub struct DashboardState {
    pub events: mpsc::Sender<Event>,
    pub stats: Arc<InMemoryStats>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    limit: Option<usize>,
}

impl LimitQuery {
    fn resolve(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }
}

/// Read-only HTTP views of the broker.
pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/api/status", get(status_handler))
        .route("/api/workers", get(workers_handler))
        .route("/api/jobs", get(jobs_handler))
        .route("/api/leaderboard", get(leaderboard_handler))
        .route("/api/history", get(history_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState, shutdown: CancellationToken) {
    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

/// Ask the reactor for a consistent view of scheduler state.
async fn snapshot(state: &DashboardState) -> Result<BrokerSnapshot, StatusCode> {
    let (response_tx, response_rx) = oneshot::channel();
    state
        .events
        .send(Event::Snapshot { response_tx })
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    response_rx
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

async fn status_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    snapshot(&state).await.map(|s| Json(s.status))
}

async fn workers_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    snapshot(&state).await.map(|s| Json(s.workers))
}

async fn jobs_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    snapshot(&state).await.map(|s| Json(s.jobs))
}

async fn leaderboard_handler(
    State(state): State<DashboardState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    Json(state.stats.top_workers(query.resolve()))
}

async fn history_handler(
    State(state): State<DashboardState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    Json(state.stats.recent_jobs(query.resolve()))
}
