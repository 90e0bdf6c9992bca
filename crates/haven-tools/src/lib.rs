//! Tool system for the support pipeline and workflows.
//!
//! Tools are values implementing the `Tool` capability set (describe,
//! validate via schema, execute); the registry owns dispatch, parameter
//! validation, permission checks, and timeouts.

pub mod kb;
pub mod registry;
pub mod schema;
pub mod ticket;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use haven_llm::ToolSpec;

use crate::schema::ParameterSchema;

/// Per-invocation context handed to every tool.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub session_id: Option<String>,
    pub request_id: String,
    /// Permission tags granted to the caller.
    pub permissions: Vec<String>,
}

impl ToolContext {
    pub fn has_permission(&self, tag: &str) -> bool {
        self.permissions.iter().any(|p| p == tag)
    }
}

/// Structured result of one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    /// Opaque payload for the LLM / workflow step.
    pub data: serde_json::Value,
    /// Human-readable failure description when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: ToolResultMeta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResultMeta {
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Unix ms when execution started / finished.
    pub started_at: i64,
    pub finished_at: i64,
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            metadata: ToolResultMeta::default(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: Some(message.into()),
            metadata: ToolResultMeta::default(),
        }
    }
}

/// Trait all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within the registry (e.g. "kb_search").
    fn name(&self) -> &str;

    /// Human-readable description, also surfaced to the LLM.
    fn description(&self) -> &str;

    /// Parameter schema used for validation and the LLM tool definition.
    fn schema(&self) -> &ParameterSchema;

    /// Permission tags a caller must hold. Empty = public.
    fn required_permissions(&self) -> &[String] {
        &[]
    }

    /// Per-tool execution timeout override in milliseconds.
    fn timeout_ms(&self) -> Option<u64> {
        None
    }

    /// Execute with validated parameters (defaults already applied).
    async fn execute(&self, params: serde_json::Value, ctx: &ToolContext) -> ToolResult;
}

/// Convert registered tools to the LLM API tool definitions.
pub fn to_specs(tools: &HashMap<String, std::sync::Arc<dyn Tool>>) -> Vec<ToolSpec> {
    let mut specs: Vec<ToolSpec> = tools
        .values()
        .map(|t| ToolSpec {
            name: t.name().to_string(),
            description: t.description().to_string(),
            input_schema: t.schema().to_json(),
        })
        .collect();
    specs.sort_by(|a, b| a.name.cmp(&b.name));
    specs
}

pub use registry::ToolRegistry;
