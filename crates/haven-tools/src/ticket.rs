use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::schema::{ParamType, ParameterSchema, PropertySpec};
use crate::{Tool, ToolContext, ToolResult};

const VALID_STATUSES: &[&str] = &["open", "in_progress", "waiting_on_user", "resolved", "closed"];

/// Estimated resolution window per priority, in hours from creation.
fn resolution_hours(priority: &str) -> i64 {
    match priority {
        "urgent" => 4,
        "high" => 24,
        "medium" => 72,
        _ => 168,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: String,
    pub title: String,
    pub description: String,
    pub priority: String,
    pub category: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// RFC3339 timestamps.
    pub created_at: String,
    pub updated_at: String,
    pub estimated_resolution: String,
}

/// Ticketing backend seam. The production ticketing system lives elsewhere.
#[async_trait]
pub trait TicketBackend: Send + Sync {
    async fn create(&self, ticket: Ticket) -> Result<Ticket, String>;
    async fn get(&self, ticket_id: &str) -> Result<Option<Ticket>, String>;
    async fn update(&self, ticket: Ticket) -> Result<Ticket, String>;
}

/// In-process ticket store.
pub struct InMemoryTickets {
    tickets: DashMap<String, Ticket>,
}

impl InMemoryTickets {
    pub fn new() -> Self {
        Self {
            tickets: DashMap::new(),
        }
    }
}

impl Default for InMemoryTickets {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TicketBackend for InMemoryTickets {
    async fn create(&self, ticket: Ticket) -> Result<Ticket, String> {
        self.tickets.insert(ticket.ticket_id.clone(), ticket.clone());
        Ok(ticket)
    }

    async fn get(&self, ticket_id: &str) -> Result<Option<Ticket>, String> {
        Ok(self.tickets.get(ticket_id).map(|t| t.clone()))
    }

    async fn update(&self, ticket: Ticket) -> Result<Ticket, String> {
        self.tickets.insert(ticket.ticket_id.clone(), ticket.clone());
        Ok(ticket)
    }
}

/// Generate a ticket id of the form `TKT-<timestamp>-<alnum>`.
fn generate_ticket_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("TKT-{}-{}", chrono::Utc::now().timestamp_millis(), suffix)
}

/// `ticket` — create, check, or update support tickets.
pub struct TicketTool {
    backend: Arc<dyn TicketBackend>,
    schema: ParameterSchema,
}

impl TicketTool {
    pub fn new(backend: Arc<dyn TicketBackend>) -> Self {
        let schema = ParameterSchema::new()
            .property(
                "action",
                PropertySpec::new(ParamType::String, "What to do with the ticket")
                    .with_enum(&["create", "status", "update"]),
            )
            .property(
                "ticket_data",
                PropertySpec::new(
                    ParamType::Object,
                    "For create: {title, description, priority, category, user_email?, metadata?}",
                ),
            )
            .property(
                "ticket_id",
                PropertySpec::new(ParamType::String, "Existing ticket id (status/update)"),
            )
            .property(
                "update_data",
                PropertySpec::new(
                    ParamType::Object,
                    "For update: {status?, priority?, assigned_to?, resolution?}",
                ),
            )
            .require("action");
        Self { backend, schema }
    }

    async fn create(&self, params: &serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let data = match params.get("ticket_data").and_then(|d| d.as_object()) {
            Some(d) => d,
            None => return ToolResult::fail("missing required parameter: ticket_data"),
        };

        // title, description, priority, category are all required.
        let mut fields = std::collections::HashMap::new();
        for key in ["title", "description", "priority", "category"] {
            match data.get(key).and_then(|v| v.as_str()) {
                Some(v) if !v.trim().is_empty() => {
                    fields.insert(key, v.to_string());
                }
                _ => return ToolResult::fail(format!("ticket_data.{key} is required")),
            }
        }

        let priority = fields["priority"].clone();
        if !["low", "medium", "high", "urgent"].contains(&priority.as_str()) {
            return ToolResult::fail(
                "ticket_data.priority must be one of: low, medium, high, urgent",
            );
        }

        let now = chrono::Utc::now();
        let eta = now + chrono::Duration::hours(resolution_hours(&priority));
        let ticket = Ticket {
            ticket_id: generate_ticket_id(),
            title: fields.remove("title").unwrap(),
            description: fields.remove("description").unwrap(),
            priority,
            category: fields.remove("category").unwrap(),
            status: "open".to_string(),
            user_email: data.get("user_email").and_then(|v| v.as_str()).map(String::from),
            assigned_to: None,
            resolution: None,
            metadata: data
                .get("metadata")
                .cloned()
                .unwrap_or(serde_json::Value::Null),
            created_at: now.to_rfc3339(),
            updated_at: now.to_rfc3339(),
            estimated_resolution: eta.to_rfc3339(),
        };

        tracing::info!(
            ticket_id = %ticket.ticket_id,
            priority = %ticket.priority,
            session = ctx.session_id.as_deref().unwrap_or(""),
            "ticket created"
        );

        match self.backend.create(ticket).await {
            Ok(t) => ToolResult::ok(json!({
                "ticket_id": t.ticket_id,
                "status": t.status,
                "created_at": t.created_at,
                "estimated_resolution": t.estimated_resolution,
            })),
            Err(e) => ToolResult::fail(format!("ticket creation failed: {e}")),
        }
    }

    async fn status(&self, params: &serde_json::Value) -> ToolResult {
        let Some(id) = params.get("ticket_id").and_then(|v| v.as_str()) else {
            return ToolResult::fail("missing required parameter: ticket_id");
        };
        match self.backend.get(id).await {
            Ok(Some(t)) => ToolResult::ok(serde_json::to_value(&t).unwrap_or_default()),
            Ok(None) => ToolResult::fail("Ticket not found"),
            Err(e) => ToolResult::fail(format!("ticket lookup failed: {e}")),
        }
    }

    async fn update(&self, params: &serde_json::Value) -> ToolResult {
        let Some(id) = params.get("ticket_id").and_then(|v| v.as_str()) else {
            return ToolResult::fail("missing required parameter: ticket_id");
        };
        let Some(update) = params.get("update_data").and_then(|d| d.as_object()) else {
            return ToolResult::fail("missing required parameter: update_data");
        };

        let mut ticket = match self.backend.get(id).await {
            Ok(Some(t)) => t,
            Ok(None) => return ToolResult::fail("Ticket not found"),
            Err(e) => return ToolResult::fail(format!("ticket lookup failed: {e}")),
        };

        if let Some(status) = update.get("status").and_then(|v| v.as_str()) {
            if !VALID_STATUSES.contains(&status) {
                return ToolResult::fail(format!(
                    "update_data.status must be one of: {}",
                    VALID_STATUSES.join(", ")
                ));
            }
            ticket.status = status.to_string();
        }
        if let Some(priority) = update.get("priority").and_then(|v| v.as_str()) {
            if !["low", "medium", "high", "urgent"].contains(&priority) {
                return ToolResult::fail(
                    "update_data.priority must be one of: low, medium, high, urgent",
                );
            }
            ticket.priority = priority.to_string();
        }
        if let Some(assigned) = update.get("assigned_to").and_then(|v| v.as_str()) {
            ticket.assigned_to = Some(assigned.to_string());
        }
        if let Some(resolution) = update.get("resolution").and_then(|v| v.as_str()) {
            ticket.resolution = Some(resolution.to_string());
        }
        ticket.updated_at = chrono::Utc::now().to_rfc3339();

        match self.backend.update(ticket).await {
            Ok(t) => ToolResult::ok(serde_json::to_value(&t).unwrap_or_default()),
            Err(e) => ToolResult::fail(format!("ticket update failed: {e}")),
        }
    }
}

#[async_trait]
impl Tool for TicketTool {
    fn name(&self) -> &str {
        "ticket"
    }

    fn description(&self) -> &str {
        "Create a support ticket, check a ticket's status, or update an \
         existing ticket. Use action=create with ticket_data, or \
         action=status/update with ticket_id."
    }

    fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    async fn execute(&self, params: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        match params["action"].as_str() {
            Some("create") => self.create(&params, ctx).await,
            Some("status") => self.status(&params).await,
            Some("update") => self.update(&params).await,
            // The schema's enum already rejects anything else.
            _ => ToolResult::fail("unknown action"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> TicketTool {
        TicketTool::new(Arc::new(InMemoryTickets::new()))
    }

    fn ctx() -> ToolContext {
        ToolContext::default()
    }

    fn create_params(priority: &str) -> serde_json::Value {
        json!({
            "action": "create",
            "ticket_data": {
                "title": "Billing Issue",
                "description": "Customer was double charged",
                "priority": priority,
                "category": "billing",
            }
        })
    }

    #[tokio::test]
    async fn created_ticket_id_matches_pattern() {
        let res = tool().execute(create_params("high"), &ctx()).await;
        assert!(res.success, "{:?}", res.error);
        let id = res.data["ticket_id"].as_str().unwrap();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts[0], "TKT");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn high_priority_eta_is_24_hours() {
        let res = tool().execute(create_params("high"), &ctx()).await;
        let created = chrono::DateTime::parse_from_rfc3339(res.data["created_at"].as_str().unwrap())
            .unwrap();
        let eta = chrono::DateTime::parse_from_rfc3339(
            res.data["estimated_resolution"].as_str().unwrap(),
        )
        .unwrap();
        let delta = eta.signed_duration_since(created);
        assert_eq!(delta.num_hours(), 24);
    }

    #[tokio::test]
    async fn urgent_and_low_etas_follow_the_table() {
        for (priority, hours) in [("urgent", 4), ("medium", 72), ("low", 168)] {
            let res = tool().execute(create_params(priority), &ctx()).await;
            let created =
                chrono::DateTime::parse_from_rfc3339(res.data["created_at"].as_str().unwrap())
                    .unwrap();
            let eta = chrono::DateTime::parse_from_rfc3339(
                res.data["estimated_resolution"].as_str().unwrap(),
            )
            .unwrap();
            assert_eq!(eta.signed_duration_since(created).num_hours(), hours);
        }
    }

    #[tokio::test]
    async fn missing_description_is_field_level_error() {
        let res = tool()
            .execute(
                json!({
                    "action": "create",
                    "ticket_data": { "title": "x", "priority": "low", "category": "other" }
                }),
                &ctx(),
            )
            .await;
        assert!(!res.success);
        assert!(res.error.unwrap().contains("description"));
    }

    #[tokio::test]
    async fn status_of_missing_ticket_fails() {
        let res = tool()
            .execute(json!({ "action": "status", "ticket_id": "TKT-0-XXXXXX" }), &ctx())
            .await;
        assert!(!res.success);
        assert_eq!(res.error.as_deref(), Some("Ticket not found"));
    }

    #[tokio::test]
    async fn update_roundtrip_changes_status() {
        let t = tool();
        let created = t.execute(create_params("medium"), &ctx()).await;
        let id = created.data["ticket_id"].as_str().unwrap().to_string();

        let updated = t
            .execute(
                json!({
                    "action": "update",
                    "ticket_id": id,
                    "update_data": { "status": "in_progress", "assigned_to": "agent-7" }
                }),
                &ctx(),
            )
            .await;
        assert!(updated.success);
        assert_eq!(updated.data["status"], "in_progress");
        assert_eq!(updated.data["assigned_to"], "agent-7");
    }

    #[tokio::test]
    async fn invalid_update_status_is_rejected() {
        let t = tool();
        let created = t.execute(create_params("medium"), &ctx()).await;
        let id = created.data["ticket_id"].as_str().unwrap().to_string();

        let res = t
            .execute(
                json!({
                    "action": "update",
                    "ticket_id": id,
                    "update_data": { "status": "abandoned" }
                }),
                &ctx(),
            )
            .await;
        assert!(!res.success);
        assert!(res.error.unwrap().contains("waiting_on_user"));
    }
}
