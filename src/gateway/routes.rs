//! REST surface consumed by the core (§6): session CRUD goes through C1
//! (authentication) and C3 (admission); it must not bypass invariants
//! I1–I6. The full CRUD/file/database layer is otherwise out of scope —
//! these handlers exist only where the realtime core has a contract to
//! expose.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::admission::AdmissionController;
use crate::auth;
use crate::config::AppConfig;
use crate::connection::ConnectionManager;
use crate::error::HubError;
use crate::execution::ExecutionDispatcher;
use crate::registry::SessionRegistry;
use crate::router::EventRouter;

#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<SessionRegistry>,
    pub admission: Arc<AdmissionController>,
    pub connections: Arc<ConnectionManager>,
    pub router: Arc<EventRouter>,
    pub execution: Arc<ExecutionDispatcher>,
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "sessionhub" }))
}

pub async fn runtimes(State(state): State<GatewayState>) -> impl IntoResponse {
    match state.execution.list_runtimes().await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "sandbox /runtimes unreachable");
            (StatusCode::BAD_GATEWAY, Json(json!({ "runtimes": [] }))).into_response()
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn error_response(err: HubError) -> axum::response::Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": err.code(), "message": err.to_string() }))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub name: Option<String>,
    pub max_users: Option<usize>,
    pub allow_guests: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: String,
    pub name: String,
    pub invite_key: String,
}

pub async fn create_session(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(req): Json<CreateSessionRequest>,
) -> axum::response::Response {
    let Some(token) = bearer_token(&headers) else {
        return error_response(HubError::InvalidToken);
    };
    let principal = match auth::verify(token, &state.config, None).await {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };

    let created = state
        .admission
        .create_session(&principal, req.name, req.max_users, req.allow_guests);

    (
        StatusCode::CREATED,
        Json(SessionResponse {
            id: created.session.id.clone(),
            name: created.session.name.clone(),
            invite_key: created.invite_key,
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct JoinSessionRequest {
    pub invite_key: String,
}

pub async fn join_session(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(req): Json<JoinSessionRequest>,
) -> axum::response::Response {
    let Some(token) = bearer_token(&headers) else {
        return error_response(HubError::InvalidToken);
    };
    let principal = match auth::verify(token, &state.config, None).await {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };

    match state.admission.join_by_invite_key(&req.invite_key, &principal) {
        Ok(joined) => Json(json!({
            "id": joined.session.id,
            "userCount": joined.session.member_count(),
            "permissions": joined.permissions,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn list_sessions(State(state): State<GatewayState>) -> impl IntoResponse {
    let ids = state.registry.all_session_ids();
    Json(json!({ "sessions": ids }))
}

pub async fn get_session(
    State(state): State<GatewayState>,
    Path(session_id): Path<String>,
) -> axum::response::Response {
    match state.registry.get(&session_id) {
        Some(session) => Json(json!({
            "id": session.id,
            "name": session.name,
            "creatorId": session.creator_id,
            "createdAt": session.created_at,
            "userCount": session.member_count(),
        }))
        .into_response(),
        None => error_response(HubError::NotFound(session_id)),
    }
}

pub async fn regenerate_key(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> axum::response::Response {
    let Some(token) = bearer_token(&headers) else {
        return error_response(HubError::InvalidToken);
    };
    let principal = match auth::verify(token, &state.config, None).await {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    let Some(session) = state.registry.get(&session_id) else {
        return error_response(HubError::NotFound(session_id));
    };

    match state.admission.rotate_invite_key(&session, &principal.user_id) {
        Ok(new_key) => Json(json!({ "inviteKey": new_key })).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn delete_session(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> axum::response::Response {
    let Some(token) = bearer_token(&headers) else {
        return error_response(HubError::InvalidToken);
    };
    let principal = match auth::verify(token, &state.config, None).await {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    let Some(session) = state.registry.get(&session_id) else {
        return error_response(HubError::NotFound(session_id));
    };

    match state.admission.delete_session(&session, &principal.user_id) {
        Ok(()) => {
            session.broadcast(crate::model::ServerEvent {
                to: crate::model::EventTarget::Room,
                payload: crate::router::events::session_deleted_event(),
            });
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(e),
    }
}
