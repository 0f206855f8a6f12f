// OpenAPI specification generation
//
// Served as JSON by the HTTP server at `/api-doc/openapi.json`.

use taskq_core::TaskStatus;
use utoipa::OpenApi;

use crate::api;
use crate::api::{ErrorResponse, ListResponse};

/// OpenAPI documentation for the taskq API
#[derive(OpenApi)]
#[openapi(
    paths(
        api::tasks::submit_mock_task,
        api::tasks::get_task,
        api::tasks::list_active_tasks,
        api::health::health,
    ),
    components(
        schemas(
            TaskStatus,
            api::tasks::MockTaskRequest,
            api::tasks::SubmitTaskResponse,
            api::tasks::TaskStatusResponse,
            api::tasks::ActiveTaskResponse,
            ListResponse<api::tasks::ActiveTaskResponse>,
            api::health::HealthResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "tasks", description = "Task submission and status endpoints"),
        (name = "health", description = "Service health")
    ),
    info(
        title = "taskq API",
        description = "Submit background tasks and poll their status",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;
