use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use haven_llm::ToolSpec;

use crate::{to_specs, Tool, ToolContext, ToolResult, ToolResultMeta};

/// Default execution timeout when a tool does not override it.
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Name-keyed tool dispatch. Built once at startup, immutable afterwards.
///
/// `execute` is the single entry point used by both the LLM response path
/// and workflow steps: unknown-name, validation, permission, timeout, and
/// panic-adjacent failures all come back as unsuccessful `ToolResult`s, never
/// as errors.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    default_timeout_ms: u64,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder {
            tools: HashMap::new(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// LLM-facing definitions for every registered tool.
    pub fn specs(&self) -> Vec<ToolSpec> {
        to_specs(&self.tools)
    }

    /// Validate, authorize, and run the named tool under a timeout.
    pub async fn execute(
        &self,
        name: &str,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> ToolResult {
        let started_at = chrono::Utc::now().timestamp_millis();
        let clock = Instant::now();

        let mut result = self.execute_inner(name, params, ctx).await;
        result.metadata = ToolResultMeta {
            tool: name.to_string(),
            session_id: ctx.session_id.clone(),
            started_at,
            finished_at: chrono::Utc::now().timestamp_millis(),
            duration_ms: clock.elapsed().as_millis() as u64,
        };
        result
    }

    async fn execute_inner(
        &self,
        name: &str,
        mut params: serde_json::Value,
        ctx: &ToolContext,
    ) -> ToolResult {
        let Some(tool) = self.tools.get(name) else {
            return ToolResult::fail("unknown tool");
        };

        if let Err(msg) = tool.schema().validate(&mut params) {
            debug!(tool = name, %msg, "parameter validation failed");
            return ToolResult::fail(msg);
        }

        for tag in tool.required_permissions() {
            if !ctx.has_permission(tag) {
                warn!(tool = name, permission = %tag, "permission check failed");
                return ToolResult::fail("insufficient permissions");
            }
        }

        let timeout_ms = tool.timeout_ms().unwrap_or(self.default_timeout_ms);
        let deadline = std::time::Duration::from_millis(timeout_ms);

        match tokio::time::timeout(deadline, tool.execute(params, ctx)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tool = name, timeout_ms, "tool execution timed out");
                ToolResult::fail(format!("ToolTimeout: exceeded {timeout_ms}ms"))
            }
        }
    }
}

pub struct ToolRegistryBuilder {
    tools: HashMap<String, Arc<dyn Tool>>,
    default_timeout_ms: u64,
}

impl ToolRegistryBuilder {
    pub fn register(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry {
            tools: self.tools,
            default_timeout_ms: self.default_timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ParamType, ParameterSchema, PropertySpec};
    use async_trait::async_trait;

    struct EchoTool {
        schema: ParameterSchema,
        perms: Vec<String>,
    }

    impl EchoTool {
        fn new() -> Self {
            Self {
                schema: ParameterSchema::new()
                    .property("text", PropertySpec::new(ParamType::String, "Text to echo"))
                    .require("text"),
                perms: Vec::new(),
            }
        }

        fn locked() -> Self {
            Self {
                perms: vec!["admin".to_string()],
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back"
        }
        fn schema(&self) -> &ParameterSchema {
            &self.schema
        }
        fn required_permissions(&self) -> &[String] {
            &self.perms
        }
        async fn execute(&self, params: serde_json::Value, _ctx: &ToolContext) -> ToolResult {
            ToolResult::ok(serde_json::json!({ "echo": params["text"] }))
        }
    }

    struct SlowTool {
        schema: ParameterSchema,
    }

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Sleeps forever"
        }
        fn schema(&self) -> &ParameterSchema {
            &self.schema
        }
        fn timeout_ms(&self) -> Option<u64> {
            Some(20)
        }
        async fn execute(&self, _params: serde_json::Value, _ctx: &ToolContext) -> ToolResult {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            ToolResult::ok(serde_json::Value::Null)
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            session_id: Some("s-1".into()),
            request_id: "r-1".into(),
            permissions: vec!["user".into()],
        }
    }

    #[tokio::test]
    async fn unknown_tool_returns_unsuccessful_result() {
        let reg = ToolRegistry::builder().build();
        let res = reg.execute("nope", serde_json::json!({}), &ctx()).await;
        assert!(!res.success);
        assert_eq!(res.error.as_deref(), Some("unknown tool"));
    }

    #[tokio::test]
    async fn validation_failure_carries_field_message() {
        let reg = ToolRegistry::builder()
            .register(Arc::new(EchoTool::new()))
            .build();
        let res = reg.execute("echo", serde_json::json!({}), &ctx()).await;
        assert!(!res.success);
        assert!(res.error.unwrap().contains("text"));
    }

    #[tokio::test]
    async fn permission_check_blocks_unprivileged_callers() {
        let reg = ToolRegistry::builder()
            .register(Arc::new(EchoTool::locked()))
            .build();
        let res = reg
            .execute("echo", serde_json::json!({ "text": "hi" }), &ctx())
            .await;
        assert!(!res.success);
        assert_eq!(res.error.as_deref(), Some("insufficient permissions"));
    }

    #[tokio::test]
    async fn successful_execution_carries_metadata() {
        let reg = ToolRegistry::builder()
            .register(Arc::new(EchoTool::new()))
            .build();
        let res = reg
            .execute("echo", serde_json::json!({ "text": "hi" }), &ctx())
            .await;
        assert!(res.success);
        assert_eq!(res.data["echo"], "hi");
        assert_eq!(res.metadata.tool, "echo");
        assert_eq!(res.metadata.session_id.as_deref(), Some("s-1"));
        assert!(res.metadata.finished_at >= res.metadata.started_at);
    }

    #[tokio::test]
    async fn timeout_produces_tool_timeout_result() {
        let reg = ToolRegistry::builder()
            .register(Arc::new(SlowTool {
                schema: ParameterSchema::new(),
            }))
            .build();
        let res = reg.execute("slow", serde_json::json!({}), &ctx()).await;
        assert!(!res.success);
        assert!(res.error.unwrap().starts_with("ToolTimeout"));
    }
}
