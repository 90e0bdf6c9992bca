//! Built-in workflow catalog.
//!
//! Workflows are data: step records plus id-keyed handlers that dispatch
//! through the tool registry, so the same kb/ticket tools serve both the LLM
//! response path and multi-step procedures.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use haven_tools::{ToolContext, ToolRegistry};
use haven_workflow::{
    CompensationHandler, RetryPolicy, RetryStrategy, StepDef, StepError, StepHandler, StepInput,
    WorkflowDefinition,
};

/// A workflow step that runs one registered tool. `build` derives the tool
/// parameters from the execution context and upstream outputs.
struct ToolStep {
    tools: Arc<ToolRegistry>,
    tool: &'static str,
    build: fn(&StepInput) -> Value,
}

#[async_trait]
impl StepHandler for ToolStep {
    async fn run(&self, input: &StepInput) -> Result<Value, StepError> {
        let params = (self.build)(input);
        let ctx = ToolContext {
            session_id: input.context.session_id.clone(),
            // The idempotency key doubles as the request id so downstream
            // logs line up across retries.
            request_id: input.idempotency_key.clone(),
            permissions: vec!["user".to_string()],
        };
        let result = self.tools.execute(self.tool, params, &ctx).await;
        if result.success {
            Ok(result.data)
        } else {
            let message = result.error.unwrap_or_else(|| "tool failed".to_string());
            let tag = if message.starts_with("ToolTimeout") {
                "timeout"
            } else {
                "tool"
            };
            Err(StepError::new(message, tag))
        }
    }
}

/// Rolls back a created ticket by closing it.
struct CloseTicket {
    tools: Arc<ToolRegistry>,
}

#[async_trait]
impl CompensationHandler for CloseTicket {
    async fn compensate(&self, input: &StepInput) -> Result<(), String> {
        let Some(ticket_id) = input
            .outputs
            .get("create_ticket")
            .and_then(|o| o["ticket_id"].as_str())
        else {
            return Ok(()); // nothing was created, nothing to undo
        };
        let ctx = ToolContext {
            session_id: input.context.session_id.clone(),
            request_id: input.idempotency_key.clone(),
            permissions: vec!["user".to_string()],
        };
        let result = self
            .tools
            .execute(
                "ticket",
                json!({
                    "action": "update",
                    "ticket_id": ticket_id,
                    "update_data": {
                        "status": "closed",
                        "resolution": "cancelled by workflow rollback",
                    }
                }),
                &ctx,
            )
            .await;
        if result.success {
            Ok(())
        } else {
            Err(result.error.unwrap_or_else(|| "close failed".to_string()))
        }
    }
}

fn str_from(ctx: &StepInput, key: &str, default: &str) -> String {
    ctx.context
        .data
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or(default)
        .to_string()
}

fn transient_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        strategy: RetryStrategy::Exponential,
        base_delay_ms: 200,
        max_delay_ms: 5_000,
        retryable_errors: vec!["timeout".to_string()],
    }
}

/// `support_ticket`: look up matching kb articles, then open a ticket whose
/// description references them. Rolling back closes the ticket.
fn support_ticket(tools: &Arc<ToolRegistry>) -> WorkflowDefinition {
    WorkflowDefinition::new("support_ticket", "KB lookup + ticket creation")
        .step(
            StepDef::new("kb_search", "Search knowledge base")
                .with_timeout_ms(10_000)
                .with_retry(transient_retry()),
            Arc::new(ToolStep {
                tools: tools.clone(),
                tool: "kb_search",
                build: |input| {
                    json!({
                        "query": str_from(input, "query", "support"),
                        "max_results": 3,
                    })
                },
            }),
        )
        .step(
            StepDef::new("create_ticket", "Create support ticket")
                .after("kb_search")
                .with_timeout_ms(10_000)
                .with_retry(transient_retry()),
            Arc::new(ToolStep {
                tools: tools.clone(),
                tool: "ticket",
                build: |input| {
                    let articles = input
                        .outputs
                        .get("kb_search")
                        .and_then(|o| o["results"].as_array().map(|a| a.len()))
                        .unwrap_or(0);
                    json!({
                        "action": "create",
                        "ticket_data": {
                            "title": str_from(input, "title", "Support request"),
                            "description": format!(
                                "{} ({} related kb articles attached)",
                                str_from(input, "description", "Opened by support workflow"),
                                articles
                            ),
                            "priority": str_from(input, "priority", "medium"),
                            "category": str_from(input, "category", "general"),
                        }
                    })
                },
            }),
        )
        .compensation("create_ticket", Arc::new(CloseTicket { tools: tools.clone() }))
}

/// `resolve_ticket`: mark a ticket resolved with a resolution note.
fn resolve_ticket(tools: &Arc<ToolRegistry>) -> WorkflowDefinition {
    WorkflowDefinition::new("resolve_ticket", "Resolve an existing ticket").step(
        StepDef::new("update_ticket", "Mark ticket resolved")
            .with_timeout_ms(10_000)
            .with_retry(transient_retry()),
        Arc::new(ToolStep {
            tools: tools.clone(),
            tool: "ticket",
            build: |input| {
                json!({
                    "action": "update",
                    "ticket_id": str_from(input, "ticket_id", ""),
                    "update_data": {
                        "status": "resolved",
                        "resolution": str_from(input, "resolution", "Resolved by support workflow"),
                    }
                })
            },
        }),
    )
}

/// All named workflows the gateway serves.
pub fn catalog(tools: &Arc<ToolRegistry>) -> HashMap<String, Arc<WorkflowDefinition>> {
    let mut flows: HashMap<String, Arc<WorkflowDefinition>> = HashMap::new();
    for def in [support_ticket(tools), resolve_ticket(tools)] {
        flows.insert(def.id.clone(), Arc::new(def));
    }
    flows
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_tools::kb::{KbSearchTool, StaticKnowledgeBase};
    use haven_tools::ticket::{InMemoryTickets, TicketTool};
    use haven_workflow::{ExecutionStatus, WorkflowContext, WorkflowEngine};
    use haven_monitor::MetricsRegistry;
    use haven_storage::MemoryKv;

    fn tools() -> Arc<ToolRegistry> {
        Arc::new(
            ToolRegistry::builder()
                .register(Arc::new(KbSearchTool::new(Arc::new(
                    StaticKnowledgeBase::new(),
                ))))
                .register(Arc::new(TicketTool::new(Arc::new(InMemoryTickets::new()))))
                .build(),
        )
    }

    #[tokio::test]
    async fn support_ticket_flow_completes_with_ticket_id() {
        let tools = tools();
        let flows = catalog(&tools);
        let engine = WorkflowEngine::new(
            Arc::new(MemoryKv::new()),
            Arc::new(MetricsRegistry::new()),
            4,
        );

        let mut context = WorkflowContext::default();
        context.data.insert("query".into(), json!("billing"));
        context.data.insert("title".into(), json!("Billing Issue"));
        context.data.insert("priority".into(), json!("high"));
        context.data.insert("category".into(), json!("billing"));

        let id = engine
            .execute(flows["support_ticket"].clone(), context)
            .await
            .unwrap();
        let record = engine.wait_for(&id).await.unwrap();

        assert_eq!(record.status, ExecutionStatus::Completed);
        let ticket = record.step("create_ticket").unwrap().output.as_ref().unwrap();
        assert!(ticket["ticket_id"].as_str().unwrap().starts_with("TKT-"));

        // high priority: 24h estimated resolution from creation.
        let created =
            chrono::DateTime::parse_from_rfc3339(ticket["created_at"].as_str().unwrap()).unwrap();
        let eta = chrono::DateTime::parse_from_rfc3339(
            ticket["estimated_resolution"].as_str().unwrap(),
        )
        .unwrap();
        assert_eq!(eta.signed_duration_since(created).num_hours(), 24);
    }

    #[tokio::test]
    async fn resolve_flow_fails_cleanly_on_missing_ticket() {
        let tools = tools();
        let flows = catalog(&tools);
        let engine = WorkflowEngine::new(
            Arc::new(MemoryKv::new()),
            Arc::new(MetricsRegistry::new()),
            4,
        );

        let mut context = WorkflowContext::default();
        context.data.insert("ticket_id".into(), json!("TKT-0-MISSING"));

        let id = engine
            .execute(flows["resolve_ticket"].clone(), context)
            .await
            .unwrap();
        let record = engine.wait_for(&id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::RolledBack);
        assert!(record
            .step("update_ticket")
            .unwrap()
            .error
            .as_deref()
            .unwrap()
            .contains("Ticket not found"));
    }
}
