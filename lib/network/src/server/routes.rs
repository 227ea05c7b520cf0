use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics::snapshot::{SysmonStatus, SystemHistory, SystemSnapshot, TaskHistory, TaskSnapshot};
use metrics::SysmonReader;
use serde_json::json;
use tracing::trace;

/// Every route served by the HTTP transport, bound to `reader`.
pub fn router(reader: SysmonReader) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/status", get(status))
        .route("/api/tasks", get(tasks))
        .route("/api/tasks/:name/history", get(task_history))
        .route("/api/history/tasks", get(task_histories))
        .route("/api/history/system", get(system_history))
        .route("/api/system", get(system_current))
        .with_state(reader)
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "endpoints": [
            "/api/status",
            "/api/tasks",
            "/api/tasks/:name/history",
            "/api/history/tasks",
            "/api/history/system",
            "/api/system",
        ]
    }))
}

async fn status(State(reader): State<SysmonReader>) -> Json<SysmonStatus> {
    Json(reader.status())
}

async fn tasks(State(reader): State<SysmonReader>) -> Json<Vec<TaskSnapshot>> {
    Json(reader.tasks())
}

async fn task_history(State(reader): State<SysmonReader>, Path(name): Path<String>) -> Response {
    match reader.task_history(&name) {
        Some(history) => Json::<TaskHistory>(history).into_response(),
        None => {
            trace!(%name, "History requested for an unknown task");
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("task '{name}' is not tracked") })),
            )
                .into_response()
        }
    }
}

async fn task_histories(State(reader): State<SysmonReader>) -> Json<Vec<TaskHistory>> {
    Json(reader.task_histories())
}

async fn system_history(State(reader): State<SysmonReader>) -> Json<SystemHistory> {
    Json(reader.system_history())
}

async fn system_current(State(reader): State<SysmonReader>) -> Json<SystemSnapshot> {
    Json(reader.system_current())
}
