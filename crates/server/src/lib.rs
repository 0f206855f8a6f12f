// taskq HTTP server library
// Decision: Router construction lives here so integration tests drive the real app

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::{routing::get, Json, Router};
use taskq_queue::TaskQueue;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

pub mod api;
pub mod config;
pub mod openapi;

pub use config::{Config, StoreBackend};
pub use openapi::ApiDoc;

/// Build the full application router over a running queue.
///
/// CORS is only enabled when `cors_origins` is non-empty; unparsable origins
/// are skipped with a warning.
pub fn build_app(queue: Arc<TaskQueue>, cors_origins: &[String]) -> Router {
    let app = Router::new()
        .merge(api::tasks::routes(api::tasks::AppState::new(queue.clone())))
        .merge(api::health::routes(api::health::HealthState { queue }))
        .route("/api-doc/openapi.json", get(openapi_json));

    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let app = if origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
        app
    } else {
        tracing::info!(origins = ?origins, "CORS origins configured");
        app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN]),
        )
    };

    app.layer(TraceLayer::new_for_http())
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
