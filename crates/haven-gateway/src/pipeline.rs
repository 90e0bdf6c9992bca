//! The request pipeline: security gate → memory append → context → LLM →
//! tool dispatch → response shaping, with structured events at every stage.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{debug, warn};

use haven_core::types::{RequestId, Role, SessionId};
use haven_core::HavenError;
use haven_guard::{LimitDecision, LimitKind};
use haven_llm::shape;
use haven_memory::types::StoredMessage;
use haven_monitor::{LogEntry, LogLevel};
use haven_tools::ToolContext;

use crate::app::AppState;

/// Rounds of tool execution before the loop is cut off.
const MAX_TOOL_ROUNDS: usize = 3;
/// Token headroom charged up front before the model is called.
const TOKEN_PRECHARGE_FLOOR: u32 = 256;

/// What the pipeline hands back to the HTTP/WS surface.
#[derive(Debug)]
pub struct ChatOutcome {
    pub message_id: String,
    pub content: String,
    /// Executed tool calls (name, success, duration) for the response body.
    pub tool_calls: Vec<serde_json::Value>,
    pub fallback_used: bool,
    pub model: String,
    pub rate: LimitDecision,
}

/// Process one inbound chat message end to end.
pub async fn handle_chat(
    state: &Arc<AppState>,
    session_id: &SessionId,
    raw_content: &str,
    kind: LimitKind,
    request_id: &RequestId,
) -> Result<ChatOutcome, HavenError> {
    let started = Instant::now();
    state
        .metrics
        .inc_counter("requests_total", &[("component", "pipeline")], 1);

    let result = run(state, session_id, raw_content, kind, request_id).await;
    let latency_ms = started.elapsed().as_millis() as u64;
    state
        .metrics
        .observe("request_latency_ms", &[], latency_ms as f64);
    refresh_derived_gauges(state);

    match &result {
        Ok(outcome) => {
            state
                .logs
                .record(
                    LogEntry::new(LogLevel::Info, "pipeline", request_id.as_str(), "chat handled")
                        .with_session(session_id.as_str())
                        .with_latency(latency_ms)
                        .with_meta("fallback_used", json!(outcome.fallback_used))
                        .with_meta("tool_calls", json!(outcome.tool_calls.len())),
                )
                .await;
        }
        Err(e) => {
            state
                .metrics
                .inc_counter("request_errors_total", &[("component", "pipeline")], 1);
            state
                .logs
                .record(
                    LogEntry::new(
                        error_level(e),
                        "pipeline",
                        request_id.as_str(),
                        "chat failed",
                    )
                    .with_session(session_id.as_str())
                    .with_latency(latency_ms)
                    .with_error(e.code(), e.to_string()),
                )
                .await;
        }
    }
    result
}

/// 4xx-class rejections are expected traffic, not errors worth persisting.
fn error_level(e: &HavenError) -> LogLevel {
    if e.http_status() < 500 {
        LogLevel::Warn
    } else {
        LogLevel::Error
    }
}

async fn run(
    state: &Arc<AppState>,
    session_id: &SessionId,
    raw_content: &str,
    kind: LimitKind,
    request_id: &RequestId,
) -> Result<ChatOutcome, HavenError> {
    // Stage A: the security gate (rate → PII → content → sanitize).
    let admitted = state
        .gate
        .admit(session_id.as_str(), kind, raw_content)
        .await
        .map_err(HavenError::from)?;

    // Token budget is charged up front from an input estimate; the output
    // side settles after the response.
    let precharge = (admitted.content.len() / 4) as u32 + TOKEN_PRECHARGE_FLOOR;
    if let Err(haven_guard::GuardError::RateLimited { retry_after_ms, .. }) = state
        .gate
        .limiter()
        .charge(session_id.as_str(), LimitKind::Tokens, precharge)
        .await
    {
        return Err(HavenError::TokenLimited { retry_after_ms });
    }

    // Stage C: append under the session actor's serialization.
    let actor = state.sessions.actor(session_id);
    let user_message =
        StoredMessage::new(session_id.clone(), Role::User, admitted.content.clone());
    let message_id = user_message.id.to_string();
    actor.append(user_message).await.map_err(HavenError::from)?;

    // Stages E+B, retried once on retryable failure. The user message is
    // already stored; re-entry is idempotent on the message id.
    let first = llm_round(state, &actor, session_id, request_id).await;
    let turn = match first {
        Ok(turn) => turn,
        Err(e) if e.is_retryable() => {
            warn!(request_id = %request_id, error = %e, "retrying pipeline after retryable failure");
            state
                .metrics
                .inc_counter("pipeline_retries_total", &[], 1);
            llm_round(state, &actor, session_id, request_id).await?
        }
        Err(e) => return Err(e),
    };

    // Settle the output side of the token budget; failures only log.
    let _ = state
        .gate
        .limiter()
        .charge(session_id.as_str(), LimitKind::Tokens, turn.tokens_out)
        .await;

    Ok(ChatOutcome {
        message_id,
        content: turn.content,
        tool_calls: turn.tool_calls,
        fallback_used: turn.fallback_used,
        model: turn.model,
        rate: admitted.rate,
    })
}

struct Turn {
    content: String,
    tool_calls: Vec<serde_json::Value>,
    fallback_used: bool,
    model: String,
    tokens_out: u32,
}

/// One assistant turn: prompt → model → (tools → model)* → shaped reply,
/// appended to the session.
async fn llm_round(
    state: &Arc<AppState>,
    actor: &haven_memory::ActorHandle,
    session_id: &SessionId,
    request_id: &RequestId,
) -> Result<Turn, HavenError> {
    let mut fallback_used = false;
    let mut executed: Vec<serde_json::Value> = Vec::new();
    let mut tokens_out = 0u32;
    let mut model = String::new();

    for round in 0..=MAX_TOOL_ROUNDS {
        let ctx = actor.context().await.map_err(HavenError::from)?;
        let history: Vec<(Role, String)> = ctx
            .recent_messages
            .iter()
            .map(|m| (m.role, m.content.clone()))
            .collect();
        let summary = (!ctx.summary.is_empty()).then_some(ctx.summary.as_str());

        let request = state.prompt.assemble(
            state.llm.primary_model(),
            summary,
            &history,
            state.tools.specs(),
        );

        let routed = state.llm.complete(&request).await.map_err(HavenError::from)?;
        fallback_used |= routed.fallback_used;
        tokens_out += routed.response.tokens_out;
        model = routed.response.model.clone();
        if routed.fallback_used {
            state.metrics.inc_counter("llm_fallback_total", &[], 1);
        }

        if routed.response.tool_calls.is_empty() || round == MAX_TOOL_ROUNDS {
            if round == MAX_TOOL_ROUNDS && !routed.response.tool_calls.is_empty() {
                warn!(request_id = %request_id, "tool round cap reached, forcing final answer");
            }
            // Stage E shaping, then the final assistant append.
            let content = shape::shape(&routed.response.content);
            let mut assistant =
                StoredMessage::new(session_id.clone(), Role::Assistant, content.clone());
            assistant.tool_calls = (!executed.is_empty()).then(|| executed.clone());
            assistant.metrics = Some(json!({
                "model": model,
                "fallback_used": fallback_used,
                "tokens_in": routed.response.tokens_in,
                "tokens_out": routed.response.tokens_out,
            }));
            actor.append(assistant).await.map_err(HavenError::from)?;

            return Ok(Turn {
                content,
                tool_calls: executed,
                fallback_used,
                model,
                tokens_out,
            });
        }

        // Stage B: dispatch the requested tools and store their results.
        for call in &routed.response.tool_calls {
            debug!(request_id = %request_id, tool = %call.name, "executing tool call");
            let tool_ctx = ToolContext {
                session_id: Some(session_id.to_string()),
                request_id: request_id.to_string(),
                permissions: vec!["user".to_string()],
            };
            let result = state
                .tools
                .execute(&call.name, call.input.clone(), &tool_ctx)
                .await;

            state.metrics.inc_counter(
                "tool_executions_total",
                &[("tool", call.name.as_str())],
                1,
            );
            if !result.success {
                state.metrics.inc_counter(
                    "tool_failures_total",
                    &[("tool", call.name.as_str())],
                    1,
                );
            }

            // A ticket reaching `resolved` closes out the session issue set.
            if call.name == "ticket" && result.data["status"] == "resolved" {
                if let Some(id) = result.data["ticket_id"].as_str() {
                    let _ = actor.resolve_issue(format!("ticket:{id}")).await;
                }
            }

            executed.push(json!({
                "id": call.id,
                "name": call.name,
                "success": result.success,
                "duration_ms": result.metadata.duration_ms,
            }));

            let body = if result.success {
                serde_json::to_string(&result.data).unwrap_or_default()
            } else {
                format!(
                    "tool error: {}",
                    result.error.as_deref().unwrap_or("unknown")
                )
            };
            let mut tool_message = StoredMessage::new(session_id.clone(), Role::Tool, body);
            tool_message.tool_calls = Some(vec![json!({
                "id": call.id,
                "name": call.name,
            })]);
            actor
                .append(tool_message)
                .await
                .map_err(HavenError::from)?;
        }
    }

    // The loop always returns from the no-tool-calls branch.
    Err(HavenError::Internal("tool loop fell through".to_string()))
}

/// Keep the gauges the alert rules watch up to date.
fn refresh_derived_gauges(state: &Arc<AppState>) {
    let window = 300;
    let requests: f64 = state
        .metrics
        .samples_in_window("requests_total", window)
        .iter()
        .sum();
    let errors: f64 = state
        .metrics
        .samples_in_window("request_errors_total", window)
        .iter()
        .sum();
    if requests > 0.0 {
        state
            .metrics
            .set_gauge("request_error_rate", &[], errors / requests);
    }
    if let Some(p95) = state
        .metrics
        .percentile_in_window("request_latency_ms", window, 95.0)
    {
        state.metrics.set_gauge("request_latency_p95_ms", &[], p95);
    }
}
