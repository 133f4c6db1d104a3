// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP surface for the fleet control plane. Translates requests into
//! application service calls and maps error kinds to statuses; no business
//! logic lives here.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::application::lifecycle::NodeLifecycleService;
use crate::application::pusher::Pusher;
use crate::domain::dispatch::ExtensionEvent;
use crate::domain::error::LifecycleError;
use crate::domain::node::{BrokerId, NodeCreate, NodeId, NodeSelector};
use crate::domain::repository::TaskRepository;
use crate::domain::task::{TaskId, TaskRecord};

pub struct AppState {
    pub lifecycle: Arc<dyn NodeLifecycleService>,
    pub pusher: Arc<dyn Pusher>,
    pub tasks: Arc<dyn TaskRepository>,
}

pub fn app(
    lifecycle: Arc<dyn NodeLifecycleService>,
    pusher: Arc<dyn Pusher>,
    tasks: Arc<dyn TaskRepository>,
) -> Router {
    let state = Arc::new(AppState {
        lifecycle,
        pusher,
        tasks,
    });

    Router::new()
        .route("/nodes", post(create_node).delete(bulk_delete_nodes))
        .route("/nodes/{id}", delete(drop_node))
        .route("/nodes/{id}/upgrade", post(upgrade_node))
        .route("/nodes/{id}/command", post(command_node))
        .route("/nodes/{id}/unload", post(unload_node))
        .route("/tasks/{id}", get(task_records))
        .route("/tasks/{id}/dispatch", post(dispatch_task))
        .route("/resets", post(reset))
        .route("/extensions/{name}", post(extension_diff))
        .with_state(state)
}

/// Maps domain error kinds onto HTTP statuses.
struct ApiError(LifecycleError);

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        Self(err)
    }
}

impl From<crate::domain::repository::RepositoryError> for ApiError {
    fn from(err: crate::domain::repository::RepositoryError) -> Self {
        Self(LifecycleError::Repository(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LifecycleError::InvalidAddress
            | LifecycleError::AddressExists(_)
            | LifecycleError::MissingSelector => StatusCode::BAD_REQUEST,
            LifecycleError::InvalidState => StatusCode::CONFLICT,
            LifecycleError::NotFound => StatusCode::NOT_FOUND,
            LifecycleError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn create_node(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NodeCreate>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state.lifecycle.create(req).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id.0 }))))
}

async fn bulk_delete_nodes(
    State(state): State<Arc<AppState>>,
    Json(selector): Json<NodeSelector>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.lifecycle.soft_delete(selector).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn drop_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.lifecycle.drop_node(NodeId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct UpgradeBody {
    semver: String,
}

async fn upgrade_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpgradeBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.lifecycle.upgrade(NodeId(id), &body.semver).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
struct CommandBody {
    cmd: String,
}

async fn command_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<CommandBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.lifecycle.command(NodeId(id), &body.cmd).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
struct UnloadBody {
    unload: bool,
}

async fn unload_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<UnloadBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.lifecycle.unload(NodeId(id), body.unload).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn task_records(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let records = state.tasks.find_by_task(TaskId(id)).await?;
    Ok(Json(records))
}

#[derive(Deserialize)]
struct DispatchBody {
    broker_ids: Vec<i64>,
}

async fn dispatch_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<DispatchBody>,
) -> Result<impl IntoResponse, ApiError> {
    let task_id = TaskId(id);
    let brokers: Vec<BrokerId> = body.broker_ids.iter().map(|b| BrokerId(*b)).collect();
    let records: Vec<TaskRecord> = brokers
        .iter()
        .map(|b| TaskRecord::pending(task_id, *b))
        .collect();
    state.tasks.insert_pending(&records).await?;

    // The fan-out completes on its own deadline; the caller polls the task
    // records for per-broker outcomes.
    let pusher = Arc::clone(&state.pusher);
    tokio::spawn(async move {
        pusher.task_table(task_id, brokers).await;
    });
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum ResetKind {
    Cache,
    Search,
    Store,
    Notifier,
}

#[derive(Deserialize)]
struct ResetBody {
    kind: ResetKind,
    #[serde(default)]
    id: Option<String>,
}

async fn reset(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ResetBody>,
) -> impl IntoResponse {
    match body.kind {
        ResetKind::Cache => state.pusher.cache_reset().await,
        ResetKind::Search => state.pusher.search_reset().await,
        ResetKind::Store => {
            state
                .pusher
                .store_reset(body.id.as_deref().unwrap_or_default())
                .await
        }
        ResetKind::Notifier => state.pusher.notifier_reset().await,
    }
    StatusCode::ACCEPTED
}

#[derive(Deserialize)]
struct ExtensionBody {
    event: ExtensionEvent,
}

async fn extension_diff(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<ExtensionBody>,
) -> impl IntoResponse {
    match body.event {
        ExtensionEvent::Update => state.pusher.extension_update(&name).await,
        ExtensionEvent::Delete => state.pusher.extension_delete(&name).await,
    }
    StatusCode::ACCEPTED
}
