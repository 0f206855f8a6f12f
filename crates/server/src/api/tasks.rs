// Task HTTP routes
//
// Submission and status polling. The handlers only translate between HTTP and
// the queue; status derivation lives in `TaskQueue::query`.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use taskq_core::{ActiveTask, MockTask, Task, TaskId, TaskStatus, TaskView};
use taskq_queue::{QueueError, TaskQueue};
use utoipa::{IntoParams, ToSchema};

use super::common::{unix_seconds, ApiError, ErrorResponse, ListResponse};

/// Optional delay for a mock task, in whole seconds.
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MockTaskRequest {
    /// Seconds the task sleeps. A random 0-10 second delay is used when omitted.
    pub delay: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitTaskResponse {
    #[schema(value_type = i64, example = 1)]
    pub task_id: TaskId,
}

/// Status of a single task.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskStatusResponse {
    #[schema(value_type = i64, example = 1)]
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// UNIX seconds
    pub create_time: f64,
    /// UNIX seconds; null while queued
    pub start_time: Option<f64>,
    /// Seconds; null until the task finished
    pub time_to_execute: Option<f64>,
    /// Failure message, present only for failed tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<TaskView> for TaskStatusResponse {
    fn from(view: TaskView) -> Self {
        Self {
            task_id: view.task_id,
            status: view.status,
            create_time: unix_seconds(view.create_time),
            start_time: view.start_time.map(unix_seconds),
            time_to_execute: view.time_to_execute.map(|d| d.as_secs_f64()),
            error: view.error,
        }
    }
}

/// A task currently occupying a worker.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActiveTaskResponse {
    #[schema(value_type = i64, example = 1)]
    pub task_id: TaskId,
    /// UNIX seconds
    pub create_time: f64,
    /// UNIX seconds
    pub start_time: f64,
}

impl From<ActiveTask> for ActiveTaskResponse {
    fn from(active: ActiveTask) -> Self {
        Self {
            task_id: active.id,
            create_time: unix_seconds(active.create_time),
            start_time: unix_seconds(active.start_time),
        }
    }
}

/// App state for task routes
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<TaskQueue>,
}

impl AppState {
    pub fn new(queue: Arc<TaskQueue>) -> Self {
        Self { queue }
    }
}

/// Create task routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/tasks/mock", post(submit_mock_task))
        .route("/tasks/active", get(list_active_tasks))
        .route("/tasks/:task_id", get(get_task))
        .with_state(state)
}

fn queue_error(action: &str, e: QueueError) -> ApiError {
    match e {
        QueueError::NotFound(_) => {
            ErrorResponse::new(e.to_string()).into_response(StatusCode::NOT_FOUND)
        }
        QueueError::ShuttingDown => {
            ErrorResponse::new(e.to_string()).into_response(StatusCode::SERVICE_UNAVAILABLE)
        }
        other => {
            tracing::error!("Failed to {}: {}", action, other);
            ErrorResponse::new("Internal server error")
                .into_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Delay carried in the request body, if any.
///
/// An empty body means no delay was given. Anything else must be a JSON
/// object with a non-negative integer `delay`.
fn body_delay(headers: &HeaderMap, body: &Bytes) -> Result<Option<u64>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|mime| {
            let mime = mime.trim();
            mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
        })
        .unwrap_or(false);
    if !is_json {
        return Err(
            ErrorResponse::new("Expected request with `Content-Type: application/json`")
                .into_response(StatusCode::UNSUPPORTED_MEDIA_TYPE),
        );
    }

    Json::<MockTaskRequest>::from_bytes(body)
        .map(|Json(request)| request.delay)
        .map_err(|rejection| {
            ErrorResponse::new(rejection.body_text()).into_response(StatusCode::BAD_REQUEST)
        })
}

/// POST /tasks/mock - Submit a mock task
///
/// The delay may be given as a query parameter or as a JSON body; the query
/// parameter wins when both are present. A body that is present but not a
/// valid request is rejected even when the query parameter is set.
#[utoipa::path(
    post,
    path = "/tasks/mock",
    params(MockTaskRequest),
    request_body(content = MockTaskRequest, description = "Alternative to the query parameter"),
    responses(
        (status = 200, description = "Task accepted", body = SubmitTaskResponse),
        (status = 400, description = "Malformed delay", body = ErrorResponse),
        (status = 415, description = "Body is not JSON", body = ErrorResponse),
        (status = 500, description = "Task could not be persisted", body = ErrorResponse),
        (status = 503, description = "Server is shutting down", body = ErrorResponse)
    ),
    tag = "tasks"
)]
pub async fn submit_mock_task(
    State(state): State<AppState>,
    Query(query): Query<MockTaskRequest>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SubmitTaskResponse>, ApiError> {
    let from_body = body_delay(&headers, &body)?;
    let delay = query.delay.or(from_body);

    let task_id = state
        .queue
        .submit(Task::new(MockTask::new(delay)))
        .await
        .map_err(|e| queue_error("submit task", e))?;

    Ok(Json(SubmitTaskResponse { task_id }))
}

/// GET /tasks/{task_id} - Get task status
#[utoipa::path(
    get,
    path = "/tasks/{task_id}",
    params(
        ("task_id" = i64, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Task found", body = TaskStatusResponse),
        (status = 404, description = "Task not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "tasks"
)]
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let view = state
        .queue
        .query(TaskId::new(task_id))
        .await
        .map_err(|e| queue_error("get task", e))?;

    Ok(Json(view.into()))
}

/// GET /tasks/active - List running tasks
#[utoipa::path(
    get,
    path = "/tasks/active",
    responses(
        (status = 200, description = "Tasks currently running", body = ListResponse<ActiveTaskResponse>)
    ),
    tag = "tasks"
)]
pub async fn list_active_tasks(
    State(state): State<AppState>,
) -> Json<ListResponse<ActiveTaskResponse>> {
    let active = state
        .queue
        .active_tasks()
        .into_iter()
        .map(ActiveTaskResponse::from)
        .collect::<Vec<_>>();

    Json(active.into())
}
