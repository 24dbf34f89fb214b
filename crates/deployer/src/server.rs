//! HTTP surface for the chat integration.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::DeployError;
use crate::project::CatalogDocument;
use crate::workflow::{DeployRequest, Pending, RequestWorkflow};

#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<RequestWorkflow>,
    /// Re-read by `POST /catalog/reload`.
    pub projects_file: Arc<str>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/locks", get(list_locks))
        .route("/locks/lock", post(lock_phase))
        .route("/locks/unlock", post(unlock_phase))
        .route("/projects/{project}/branches", get(list_branches))
        .route("/deployments/request", post(request_deploy))
        .route("/deployments/approve", post(approve_deploy))
        .route("/deployments/reject", post(reject_deploy))
        .route("/catalog/reload", post(reload_catalog))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A [`DeployError`] rendered as a JSON error response.
pub struct ApiError(DeployError);

impl From<DeployError> for ApiError {
    fn from(e: DeployError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DeployError::Forbidden(_) | DeployError::UnknownUser(_) => StatusCode::FORBIDDEN,
            DeployError::ProjectNotFound(_)
            | DeployError::PhaseNotFound { .. }
            | DeployError::UnknownTicket(_) => StatusCode::NOT_FOUND,
            DeployError::Locked { .. }
            | DeployError::AlreadyLocked
            | DeployError::AlreadyUnlocked
            | DeployError::NotAllowedToUnlock(_)
            | DeployError::TicketClosed(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(json!({ "status": "error", "error": self.0.to_string() })),
        )
            .into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

#[derive(Debug, Deserialize)]
struct LockRequest {
    project: String,
    phase: String,
    user: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct ReloadRequest {
    user: String,
}

#[derive(Debug, Deserialize)]
struct TicketAction {
    /// Id of an issued [`crate::workflow::DeployTicket`]
    ticket: String,
    user: String,
}

/// The background task keeps running and reports through chat.
fn accepted(pending: Pending) -> Json<Value> {
    Json(json!({ "status": "accepted", "message": pending.ack }))
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn list_locks(State(state): State<AppState>) -> ApiResult {
    let text = state.workflow.describe_locks().await?;
    Ok(Json(json!({ "status": "ok", "locks": text })))
}

async fn lock_phase(State(state): State<AppState>, Json(req): Json<LockRequest>) -> ApiResult {
    state
        .workflow
        .lock(&req.project, &req.phase, &req.user, &req.reason)
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn unlock_phase(State(state): State<AppState>, Json(req): Json<LockRequest>) -> ApiResult {
    state
        .workflow
        .unlock(&req.project, &req.phase, &req.user)
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn list_branches(State(state): State<AppState>, Path(project): Path<String>) -> ApiResult {
    let branches = state.workflow.branches(&project).await?;
    Ok(Json(json!({ "status": "ok", "branches": branches })))
}

async fn request_deploy(
    State(state): State<AppState>,
    Json(request): Json<DeployRequest>,
) -> ApiResult {
    info!(project = %request.project, phase = %request.phase, "Deploy request received");
    Ok(accepted(state.workflow.request(request).await?))
}

async fn approve_deploy(State(state): State<AppState>, Json(action): Json<TicketAction>) -> ApiResult {
    Ok(accepted(
        state.workflow.approve(&action.ticket, &action.user).await?,
    ))
}

async fn reject_deploy(State(state): State<AppState>, Json(action): Json<TicketAction>) -> ApiResult {
    Ok(accepted(
        state.workflow.reject(&action.ticket, &action.user).await?,
    ))
}

async fn reload_catalog(
    State(state): State<AppState>,
    Json(req): Json<ReloadRequest>,
) -> ApiResult {
    let doc = CatalogDocument::load(&state.projects_file)?;
    let projects = state.workflow.reload(&req.user, doc)?;
    Ok(Json(json!({ "status": "ok", "projects": projects })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::clock::SystemClock;
    use crate::destination::DestinationReader;
    use crate::dispatch::DeployDispatcher;
    use crate::lock::{LockCoordinator, MemoryLockStore};
    use crate::model::{DeployKind, GitOpsPreparer, ModelTable};
    use crate::project::{CatalogDocument, ProjectCatalog};
    use crate::registry::ImageTagResolver;
    use crate::testing::{recording_notifier, FakeRegistry, FakeScm, FakeServices, ScriptedModel};
    use crate::user::UserDirectory;

    fn router() -> Router {
        router_with_file("/nonexistent/projects.yaml")
    }

    fn router_with_file(projects_file: &str) -> Router {
        let doc = CatalogDocument::parse(
            r"
projects:
  - id: worker
    kind: trigger
    phases:
      - name: staging
users:
  - chatId: U-ALICE
    displayName: alice
    role: developer
  - chatId: U-VIEW
    displayName: victor
  - chatId: U-ROOT
    displayName: root
    role: admin
",
        )
        .unwrap();
        let scm = Arc::new(FakeScm::new());
        let resolver = Arc::new(ImageTagResolver::new(Arc::new(FakeRegistry::default())));
        let destinations = Arc::new(DestinationReader::new(
            scm.clone(),
            Arc::new(FakeServices::default()),
            "master",
        ));
        let preparer = Arc::new(GitOpsPreparer::new(
            scm.clone(),
            resolver.clone(),
            destinations,
            Arc::new(SystemClock),
            "master",
        ));
        let dispatcher = Arc::new(DeployDispatcher::new(
            Arc::new(ProjectCatalog::new(doc.projects)),
            resolver,
            ModelTable::new().with(DeployKind::Trigger, Arc::new(ScriptedModel::ok())),
        ));
        let locks = Arc::new(LockCoordinator::new(
            Arc::new(MemoryLockStore::new()),
            Arc::new(SystemClock),
        ));
        let (notifier, _) = recording_notifier();
        let workflow = RequestWorkflow::new(
            dispatcher,
            preparer,
            scm,
            locks,
            Arc::new(UserDirectory::new(doc.users)),
            Arc::new(notifier),
            Arc::new(SystemClock),
        );
        build_router(AppState {
            workflow: Arc::new(workflow),
            projects_file: projects_file.into(),
        })
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health() {
        let app = router();
        let (status, body) = send(&app, "GET", "/health", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn lock_then_list() {
        let app = router();
        let (status, _) = send(
            &app,
            "POST",
            "/locks/lock",
            json!({ "project": "worker", "phase": "stg", "user": "U-ALICE", "reason": "qa" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, "GET", "/locks", Value::Null).await;
        assert_eq!(
            body["locks"],
            "worker\n  staging: Locked (by alice, for qa)\n"
        );

        let (status, body) = send(
            &app,
            "POST",
            "/locks/lock",
            json!({ "project": "worker", "phase": "staging", "user": "U-ALICE" }),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn viewer_request_is_forbidden() {
        let app = router();
        let (status, _) = send(
            &app,
            "POST",
            "/deployments/request",
            json!({ "project": "worker", "phase": "staging", "user": "U-VIEW", "channel": "C1" }),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let app = router();
        let (status, _) = send(
            &app,
            "POST",
            "/deployments/request",
            json!({ "project": "nope", "phase": "staging", "user": "U-ALICE", "channel": "C1" }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unissued_ticket_is_not_found() {
        let app = router();
        let (status, body) = send(
            &app,
            "POST",
            "/deployments/approve",
            json!({ "ticket": "made-up", "user": "U-ALICE" }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "ticket made-up was never issued");
    }

    #[tokio::test]
    async fn admin_reloads_catalog() {
        let path = std::env::temp_dir().join(format!("deployer-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r"
projects:
  - id: worker
    kind: trigger
    phases:
      - name: staging
  - id: billing
    kind: trigger
    phases:
      - name: production
users:
  - chatId: U-ROOT
    displayName: root
    role: admin
",
        )
        .unwrap();
        let app = router_with_file(path.to_str().unwrap());

        let (status, _) = send(&app, "POST", "/catalog/reload", json!({ "user": "U-ALICE" })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&app, "POST", "/catalog/reload", json!({ "user": "U-ROOT" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["projects"], 2);

        let (status, _) = send(
            &app,
            "POST",
            "/locks/lock",
            json!({ "project": "billing", "phase": "prd", "user": "U-ROOT", "reason": "freeze" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // alice was dropped from the reloaded user list
        let (status, _) = send(
            &app,
            "POST",
            "/locks/lock",
            json!({ "project": "worker", "phase": "staging", "user": "U-ALICE" }),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn reload_with_missing_file_fails() {
        let app = router();
        let (status, body) = send(&app, "POST", "/catalog/reload", json!({ "user": "U-ROOT" })).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
    }
}
