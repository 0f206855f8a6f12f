// Health endpoint

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use taskq_queue::TaskQueue;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    pub version: String,
    /// Worker pool size
    pub workers: usize,
    /// Tasks occupying a worker right now
    pub running: usize,
    /// Task store backend ("sqlite" or "memory")
    pub store: String,
}

#[derive(Clone)]
pub struct HealthState {
    pub queue: Arc<TaskQueue>,
}

pub fn routes(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}

/// GET /health - Liveness and pool information
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        workers: state.queue.pool_size(),
        running: state.queue.active_tasks().len(),
        store: state.queue.store_backend().to_string(),
    })
}
