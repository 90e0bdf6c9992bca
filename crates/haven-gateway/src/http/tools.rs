use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use haven_core::types::RequestId;
use haven_core::HavenError;
use haven_tools::ToolContext;

use crate::app::AppState;
use crate::http::ApiError;

/// Map an unsuccessful tool result onto the error envelope. Validation-shaped
/// messages become 400s; the rest surface as tool failures.
fn tool_error(tool: &str, message: String) -> HavenError {
    if message.starts_with("missing required parameter")
        || message.starts_with("ticket_data.")
        || message.contains("must be")
        || message.starts_with("unknown parameter")
    {
        HavenError::InvalidRequest(message)
    } else if message == "Ticket not found" {
        HavenError::InvalidField {
            field: "ticket_id".into(),
            reason: message,
        }
    } else {
        HavenError::ToolFailed {
            tool: tool.to_string(),
            reason: message,
        }
    }
}

/// POST /kb/search — direct knowledge-base lookup.
pub async fn kb_search(
    State(state): State<Arc<AppState>>,
    Json(params): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let request_id = RequestId::new();
    let ctx = ToolContext {
        session_id: None,
        request_id: request_id.to_string(),
        permissions: vec!["user".to_string()],
    };
    let result = state.tools.execute("kb_search", params, &ctx).await;
    if !result.success {
        let message = result.error.unwrap_or_else(|| "search failed".to_string());
        return Err(ApiError::new(tool_error("kb_search", message), request_id));
    }

    Ok(Json(json!({
        "results": result.data["results"],
        "total": result.data["total"],
        "request_id": request_id,
    }))
    .into_response())
}

/// POST /tickets — create/status/update through the ticket tool.
pub async fn ticket(
    State(state): State<Arc<AppState>>,
    Json(params): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let request_id = RequestId::new();
    let ctx = ToolContext {
        session_id: None,
        request_id: request_id.to_string(),
        permissions: vec!["user".to_string()],
    };
    let result = state.tools.execute("ticket", params, &ctx).await;
    if !result.success {
        let message = result.error.unwrap_or_else(|| "ticket action failed".to_string());
        return Err(ApiError::new(tool_error("ticket", message), request_id));
    }

    let mut payload = result.data;
    payload["request_id"] = json!(request_id);
    Ok(Json(payload).into_response())
}
