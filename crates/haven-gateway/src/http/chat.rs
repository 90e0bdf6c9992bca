use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use haven_core::types::{RequestId, SessionId};
use haven_core::HavenError;
use haven_guard::LimitKind;

use crate::app::AppState;
use crate::http::{rate_headers, ApiError};
use crate::pipeline;

#[derive(Deserialize)]
pub struct ChatBody {
    pub session_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// POST /chat — one full pipeline turn; 200/400/404/429/503.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Result<Response, ApiError> {
    let request_id = RequestId::new();

    if body.content.trim().is_empty() {
        return Err(ApiError::new(
            HavenError::MissingField {
                field: "content".into(),
            },
            request_id,
        ));
    }

    let session_id = SessionId::from(body.session_id.as_str());
    let outcome = pipeline::handle_chat(
        &state,
        &session_id,
        &body.content,
        LimitKind::Requests,
        &request_id,
    )
    .await
    .map_err(|e| ApiError::new(e, request_id.clone()))?;

    let headers = rate_headers(&outcome.rate, "requests");
    let mut payload = json!({
        "session_id": session_id,
        "message_id": outcome.message_id,
        "content": outcome.content,
        "metadata": {
            "model": outcome.model,
            "fallback_used": outcome.fallback_used,
        },
        "request_id": request_id,
        "timestamp": haven_core::types::now_ms(),
    });
    if !outcome.tool_calls.is_empty() {
        payload["tool_calls"] = json!(outcome.tool_calls);
    }

    Ok((headers, Json(payload)).into_response())
}
