//! HTTP surface over one server-held session.
//!
//! Presentation glue only: every handler reads the live mirrors or issues a
//! store write and lets the next subscription push carry the authoritative
//! state. Permission and state-machine checks all live in the core.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use workboard_core::approval::{self, ApprovalError};
use workboard_core::assist::{self, AssistModel, BoardContext, DirectiveError};
use workboard_core::models::{
    CreateProposalInput, CreateWorkItemInput, UpdateAttendanceInput, UpdateWorkItemInput, User,
};
use workboard_core::seed::ensure_seed;
use workboard_core::session::{self, ActiveSession, AttendanceError};
use workboard_core::store::{Collection, DocumentStore, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub active: watch::Receiver<Option<Arc<ActiveSession>>>,
    pub assist: Option<Arc<dyn AssistModel>>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/work-items", get(list_work_items).post(create_work_item))
        .route("/work-items/{id}", patch(update_work_item))
        .route("/users", get(list_users))
        .route("/users/{id}/attendance", patch(update_attendance))
        .route("/proposals", get(list_proposals).post(create_proposal))
        .route("/proposals/{id}/approve", post(approve_proposal))
        .route("/proposals/{id}/reject", post(reject_proposal))
        .route("/directives", get(list_directives))
        .route("/directives/{id}", delete(delete_directive))
        .route("/assist/chat", post(assist_chat))
        .route("/assist/learn", post(assist_learn))
        .route("/seed", post(run_seed))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl From<ApprovalError> for ApiError {
    fn from(e: ApprovalError) -> Self {
        let status = match &e {
            ApprovalError::NotManager => StatusCode::FORBIDDEN,
            ApprovalError::NotFound(_) => StatusCode::NOT_FOUND,
            ApprovalError::NotPending(_) => StatusCode::CONFLICT,
            ApprovalError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<AttendanceError> for ApiError {
    fn from(e: AttendanceError) -> Self {
        let status = match &e {
            AttendanceError::NotPermitted => StatusCode::FORBIDDEN,
            AttendanceError::NotFound(_) => StatusCode::NOT_FOUND,
            AttendanceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<DirectiveError> for ApiError {
    fn from(e: DirectiveError) -> Self {
        let status = match &e {
            DirectiveError::NotManager => StatusCode::FORBIDDEN,
            DirectiveError::Assist(_) => StatusCode::BAD_GATEWAY,
            DirectiveError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

fn current_session(state: &AppState) -> Result<Arc<ActiveSession>, ApiError> {
    state
        .active
        .borrow()
        .clone()
        .ok_or_else(|| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "no active session"))
}

/// Resolve the acting user: the `x-user-id` header when present (it must
/// name a known user), otherwise the session's own identity.
fn acting_user(session: &ActiveSession, headers: &HeaderMap) -> Result<User, ApiError> {
    match headers.get("x-user-id").and_then(|v| v.to_str().ok()) {
        Some(id) => session
            .sync
            .mirrors()
            .user_by_id(id)
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, format!("unknown user: {id}"))),
        None => Ok(session.user.clone()),
    }
}

async fn list_work_items(State(state): State<AppState>) -> Result<Response, ApiError> {
    let session = current_session(&state)?;
    Ok(Json(session.sync.mirrors().ranked_work_items()).into_response())
}

async fn create_work_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<CreateWorkItemInput>,
) -> Result<Response, ApiError> {
    let session = current_session(&state)?;
    let acting = acting_user(&session, &headers)?;

    let fields_filled = [
        input.project_name.is_some(),
        input.title.is_some(),
        input.description.is_some(),
        input.work_type.is_some(),
        input.assignees.is_some(),
        input.due_date.is_some(),
        input.status.is_some(),
        input.impact.is_some(),
        input.urgency.is_some(),
    ]
    .iter()
    .filter(|filled| **filled)
    .count();

    let item = input.into_work_item(&acting.id, Utc::now());
    let id = state
        .store
        .insert(Collection::WorkItems, item.to_data())
        .await?;

    if let Ok(mut telemetry) = session.telemetry.lock() {
        telemetry.form_submit(fields_filled);
    }
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))).into_response())
}

async fn update_work_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateWorkItemInput>,
) -> Result<Response, ApiError> {
    current_session(&state)?;
    let updated = state
        .store
        .update(Collection::WorkItems, &id, input.to_patch(Utc::now()), None)
        .await?;
    if !updated {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("work item not found: {id}"),
        ));
    }
    Ok(Json(json!({ "id": id })).into_response())
}

async fn list_users(State(state): State<AppState>) -> Result<Response, ApiError> {
    let session = current_session(&state)?;
    Ok(Json(session.sync.mirrors().users().as_ref().clone()).into_response())
}

async fn update_attendance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<UpdateAttendanceInput>,
) -> Result<Response, ApiError> {
    let session = current_session(&state)?;
    let acting = acting_user(&session, &headers)?;
    session::update_attendance(state.store.as_ref(), &acting, &id, &input, Utc::now()).await?;
    Ok(Json(json!({ "id": id })).into_response())
}

async fn list_proposals(State(state): State<AppState>) -> Result<Response, ApiError> {
    let session = current_session(&state)?;
    Ok(Json(session.sync.mirrors().proposals().as_ref().clone()).into_response())
}

async fn create_proposal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<CreateProposalInput>,
) -> Result<Response, ApiError> {
    let session = current_session(&state)?;
    let acting = acting_user(&session, &headers)?;
    let id = approval::create_proposal(state.store.as_ref(), &acting, input).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))).into_response())
}

async fn approve_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session = current_session(&state)?;
    let acting = acting_user(&session, &headers)?;
    approval::approve(state.store.as_ref(), &acting, &id).await?;
    Ok(Json(json!({ "id": id, "approval_status": "approved" })).into_response())
}

async fn reject_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session = current_session(&state)?;
    let acting = acting_user(&session, &headers)?;
    approval::reject(state.store.as_ref(), &acting, &id).await?;
    Ok(Json(json!({ "id": id, "approval_status": "rejected" })).into_response())
}

async fn list_directives(State(state): State<AppState>) -> Result<Response, ApiError> {
    let session = current_session(&state)?;
    Ok(Json(session.sync.mirrors().directives().as_ref().clone()).into_response())
}

async fn delete_directive(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session = current_session(&state)?;
    let acting = acting_user(&session, &headers)?;
    assist::delete_directive(state.store.as_ref(), &acting, &id).await?;
    Ok(Json(json!({ "id": id })).into_response())
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
}

async fn assist_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let session = current_session(&state)?;
    let acting = acting_user(&session, &headers)?;
    let Some(model) = state.assist.as_ref() else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "assist model not configured",
        ));
    };

    let mirrors = session.sync.mirrors();
    let context = BoardContext::from_mirror(&acting, &mirrors.work_items(), Utc::now());
    let directives: Vec<String> = mirrors
        .directives()
        .iter()
        .map(|d| d.context_line().to_string())
        .collect();
    let reply = assist::strategy_reply(model.as_ref(), &request.message, &context, &directives).await;
    Ok(Json(json!({ "reply": reply })).into_response())
}

#[derive(Debug, Deserialize)]
struct LearnRequest {
    input: String,
}

async fn assist_learn(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LearnRequest>,
) -> Result<Response, ApiError> {
    let session = current_session(&state)?;
    let acting = acting_user(&session, &headers)?;
    let Some(model) = state.assist.as_ref() else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "assist model not configured",
        ));
    };

    let existing: Vec<String> = session
        .sync
        .mirrors()
        .directives()
        .iter()
        .map(|d| d.context_line().to_string())
        .collect();
    let id = assist::learn_directive(
        model.as_ref(),
        state.store.as_ref(),
        &acting,
        &request.input,
        &existing,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))).into_response())
}

async fn run_seed(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session = current_session(&state)?;
    let acting = acting_user(&session, &headers)?;
    if !acting.is_manager() {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "only managers can seed baseline data",
        ));
    }
    let outcome = ensure_seed(state.store.as_ref(), Utc::now()).await?;
    Ok(Json(json!({
        "work_items": outcome.work_items,
        "users": outcome.users,
    }))
    .into_response())
}
