use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use haven_core::types::RequestId;
use haven_core::HavenError;
use haven_workflow::WorkflowContext;

use crate::app::AppState;
use crate::http::ApiError;

#[derive(Deserialize)]
pub struct ExecuteBody {
    pub workflow: String,
    #[serde(default)]
    pub context: Option<WorkflowContext>,
}

/// POST /workflows — start a named workflow; returns immediately.
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ExecuteBody>,
) -> Result<Response, ApiError> {
    let request_id = RequestId::new();

    let Some(definition) = state.flows.get(&body.workflow) else {
        return Err(ApiError::new(
            HavenError::InvalidField {
                field: "workflow".into(),
                reason: format!("unknown workflow '{}'", body.workflow),
            },
            request_id,
        ));
    };

    let execution_id = state
        .workflows
        .execute(definition.clone(), body.context.unwrap_or_default())
        .await
        .map_err(|e| ApiError::new(e.into(), request_id.clone()))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "execution_id": execution_id,
            "workflow": body.workflow,
            "status": "running",
            "request_id": request_id,
        })),
    )
        .into_response())
}

/// GET /workflows/{id} — poll current execution state.
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let request_id = RequestId::new();
    let record = state
        .workflows
        .get_status(&id)
        .await
        .map_err(|e| ApiError::new(e.into(), request_id.clone()))?;
    Ok(Json(json!({ "execution": record, "request_id": request_id })).into_response())
}

/// GET /workflows/{id}/wait — block until the execution is terminal.
pub async fn wait(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let request_id = RequestId::new();
    let record = state
        .workflows
        .wait_for(&id)
        .await
        .map_err(|e| ApiError::new(e.into(), request_id.clone()))?;
    Ok(Json(json!({ "execution": record, "request_id": request_id })).into_response())
}
