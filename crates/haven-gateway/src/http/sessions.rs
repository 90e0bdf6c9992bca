use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use haven_core::types::{RequestId, SessionId};
use haven_core::HavenError;

use crate::app::AppState;
use crate::http::ApiError;

#[derive(Deserialize)]
pub struct CreateSession {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

/// POST /sessions — create (201).
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSession>,
) -> Result<Response, ApiError> {
    let request_id = RequestId::new();
    let session_id = SessionId::new();
    let actor = state.sessions.actor(&session_id);

    let record = actor
        .init(body.user_id, body.metadata.unwrap_or_default())
        .await
        .map_err(|e| ApiError::new(e.into(), request_id.clone()))?;

    let ttl_ms = (state.config.memory.session_ttl_hours as i64) * 3_600_000;
    let body = json!({
        "session_id": record.id,
        "created_at": record.created_at,
        "expires_at": record.last_activity + ttl_ms,
        "status": record.status,
        "configuration": {
            "max_messages": state.config.memory.max_messages,
            "rate_limit_per_minute": state.config.limits.rate_limit_per_minute,
            "max_content_chars": state.config.limits.max_content_chars,
        },
        "request_id": request_id,
    });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

#[derive(Deserialize)]
pub struct FetchQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub include_summary: bool,
}

fn default_limit() -> usize {
    20
}

/// GET /sessions/{id} — session snapshot with recent messages.
pub async fn fetch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<FetchQuery>,
) -> Result<Response, ApiError> {
    let request_id = RequestId::new();
    if query.limit > 100 {
        return Err(ApiError::new(
            HavenError::InvalidField {
                field: "limit".into(),
                reason: "must be ≤ 100".into(),
            },
            request_id,
        ));
    }

    let session_id = SessionId::from(id.as_str());
    let actor = state.sessions.actor(&session_id);
    let record = actor
        .status()
        .await
        .map_err(|e| ApiError::new(e.into(), request_id.clone()))?;
    let messages = actor
        .messages(query.limit, query.offset)
        .await
        .map_err(|e| ApiError::new(e.into(), request_id.clone()))?;

    let mut body = json!({
        "session": record,
        "messages": messages,
        "request_id": request_id,
    });
    if query.include_summary {
        let ctx = actor
            .context()
            .await
            .map_err(|e| ApiError::new(e.into(), request_id.clone()))?;
        body["summary"] = json!(ctx.summary);
        body["active_topics"] = json!(ctx.topics);
        body["resolved_issues"] = json!(ctx.resolved_issues);
    }
    Ok(Json(body).into_response())
}

/// POST /sessions/{id}/end — idempotent; returns summary and duration.
pub async fn end(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let request_id = RequestId::new();
    let session_id = SessionId::from(id.as_str());
    let actor = state.sessions.actor(&session_id);
    let close = actor
        .end()
        .await
        .map_err(|e| ApiError::new(e.into(), request_id.clone()))?;

    Ok(Json(json!({
        "session_id": session_id,
        "summary": close.summary,
        "duration_ms": close.duration_ms,
        "request_id": request_id,
    }))
    .into_response())
}

/// POST /sessions/{id}/archive — move the conversation to cold storage.
pub async fn archive(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let request_id = RequestId::new();
    let session_id = SessionId::from(id.as_str());
    let actor = state.sessions.actor(&session_id);
    actor
        .archive()
        .await
        .map_err(|e| ApiError::new(e.into(), request_id.clone()))?;
    state.sessions.retire(&session_id);

    Ok(Json(json!({
        "session_id": session_id,
        "status": "archived",
        "request_id": request_id,
    }))
    .into_response())
}

/// POST /sessions/{id}/restore — reinstall hot state from the archive.
pub async fn restore(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let request_id = RequestId::new();
    let session_id = SessionId::from(id.as_str());
    let actor = state.sessions.actor(&session_id);
    let record = actor
        .restore()
        .await
        .map_err(|e| ApiError::new(e.into(), request_id.clone()))?;

    Ok(Json(json!({
        "session": record,
        "request_id": request_id,
    }))
    .into_response())
}
