use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error tag produced when a step hits its timeout.
pub const TIMEOUT_TAG: &str = "timeout";
/// Sentinel tag for failures that must never be retried, whatever the
/// step's policy says.
pub const TERMINAL_TAG: &str = "terminal";

/// Delay growth strategy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    Fixed,
    Linear,
    Exponential,
}

/// Per-step retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub strategy: RetryStrategy,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Error tags that are worth retrying. Empty = every error is retryable.
    #[serde(default)]
    pub retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: RetryStrategy::Exponential,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
            retryable_errors: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether an error tag is worth another attempt. An empty
    /// `retryable_errors` list retries everything except the terminal
    /// sentinel, which wins over any policy.
    pub fn is_retryable(&self, tag: &str) -> bool {
        if tag == TERMINAL_TAG {
            return false;
        }
        self.retryable_errors.is_empty() || self.retryable_errors.iter().any(|t| t == tag)
    }
}

/// Static description of one step in a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDef {
    /// Unique within the workflow; also the scheduling tie-break key.
    pub id: String,
    pub name: String,
    /// Step ids that must complete before this one becomes eligible.
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Whether a compensation handler is registered for this step.
    #[serde(default)]
    pub compensated: bool,
}

impl StepDef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            depends_on: Vec::new(),
            timeout_ms: 30_000,
            retry: RetryPolicy::default(),
            compensated: false,
        }
    }

    pub fn after(mut self, dep: impl Into<String>) -> Self {
        self.depends_on.push(dep.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Failure returned by a step handler. The `tag` is matched against the
/// step's retryable-error list.
#[derive(Debug, Clone)]
pub struct StepError {
    pub message: String,
    pub tag: String,
}

impl StepError {
    pub fn new(message: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            tag: tag.into(),
        }
    }

    /// An error that should never be retried.
    pub fn terminal(message: impl Into<String>) -> Self {
        Self::new(message, TERMINAL_TAG)
    }
}

/// Everything a step sees when it runs.
#[derive(Debug, Clone)]
pub struct StepInput {
    pub context: WorkflowContext,
    /// Outputs of completed dependency steps, by step id.
    pub outputs: HashMap<String, Value>,
    /// Stable across retries of the same step so side effects deduplicate.
    pub idempotency_key: String,
    /// 1-based attempt counter.
    pub attempt: u32,
}

/// Execution-scoped context (session, user, arbitrary kv).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub data: HashMap<String, Value>,
}

/// The work a step performs.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(&self, input: &StepInput) -> std::result::Result<Value, StepError>;
}

/// Rollback action invoked after a terminal workflow failure.
#[async_trait]
pub trait CompensationHandler: Send + Sync {
    async fn compensate(&self, input: &StepInput) -> std::result::Result<(), String>;
}

/// A workflow is data: step records plus id-keyed dispatch tables.
///
/// Handlers are looked up by step id at run time, which keeps the engine free
/// of any control-flow coupling to concrete workflows and lets executions
/// resume from a persisted record.
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    pub steps: Vec<StepDef>,
    handlers: HashMap<String, Arc<dyn StepHandler>>,
    compensations: HashMap<String, Arc<dyn CompensationHandler>>,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            steps: Vec::new(),
            handlers: HashMap::new(),
            compensations: HashMap::new(),
        }
    }

    pub fn step(mut self, def: StepDef, handler: Arc<dyn StepHandler>) -> Self {
        self.handlers.insert(def.id.clone(), handler);
        self.steps.push(def);
        self
    }

    pub fn compensation(mut self, step_id: &str, handler: Arc<dyn CompensationHandler>) -> Self {
        if let Some(def) = self.steps.iter_mut().find(|s| s.id == step_id) {
            def.compensated = true;
        }
        self.compensations.insert(step_id.to_string(), handler);
        self
    }

    pub fn handler(&self, step_id: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(step_id).cloned()
    }

    pub fn compensation_handler(&self, step_id: &str) -> Option<Arc<dyn CompensationHandler>> {
        self.compensations.get(step_id).cloned()
    }

    /// Check the graph is well-formed: unique ids, known dependencies, and
    /// no cycles.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(format!("duplicate step id: {}", step.id));
            }
            if !self.handlers.contains_key(&step.id) {
                return Err(format!("step {} has no handler", step.id));
            }
        }
        for step in &self.steps {
            for dep in &step.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(format!("step {} depends on unknown step {}", step.id, dep));
                }
            }
        }
        // Kahn's algorithm: if not all steps are orderable there is a cycle.
        let mut indegree: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s.depends_on.len()))
            .collect();
        let mut queue: Vec<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut ordered = 0;
        while let Some(id) = queue.pop() {
            ordered += 1;
            for step in &self.steps {
                if step.depends_on.iter().any(|d| d == id) {
                    let d = indegree.get_mut(step.id.as_str()).unwrap();
                    *d -= 1;
                    if *d == 0 {
                        queue.push(step.id.as_str());
                    }
                }
            }
        }
        if ordered != self.steps.len() {
            return Err("dependency cycle detected".to_string());
        }
        Ok(())
    }
}

/// Observable status of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Compensated,
}

/// Runtime state of one step inside an execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    pub def: StepDef,
    pub status: StepStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub idempotency_key: String,
    /// Order in which this step completed, for reverse-order compensation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_seq: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    RolledBack,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

/// The persisted state of one workflow execution (kv key `workflow:<id>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub workflow_id: String,
    pub context: WorkflowContext,
    pub steps: Vec<StepState>,
    pub status: ExecutionStatus,
    /// Unix ms.
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
}

impl ExecutionRecord {
    pub fn step(&self, id: &str) -> Option<&StepState> {
        self.steps.iter().find(|s| s.def.id == id)
    }

    pub(crate) fn step_mut(&mut self, id: &str) -> Option<&mut StepState> {
        self.steps.iter_mut().find(|s| s.def.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl StepHandler for Noop {
        async fn run(&self, _input: &StepInput) -> std::result::Result<Value, StepError> {
            Ok(Value::Null)
        }
    }

    fn def_with(steps: Vec<StepDef>) -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new("wf", "test");
        for s in steps {
            def = def.step(s, Arc::new(Noop));
        }
        def
    }

    #[test]
    fn valid_dag_passes() {
        let def = def_with(vec![
            StepDef::new("a", "A"),
            StepDef::new("b", "B").after("a"),
            StepDef::new("c", "C").after("a").after("b"),
        ]);
        assert!(def.validate().is_ok());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let def = def_with(vec![StepDef::new("a", "A"), StepDef::new("a", "A2")]);
        assert!(def.validate().unwrap_err().contains("duplicate"));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let def = def_with(vec![StepDef::new("a", "A").after("ghost")]);
        assert!(def.validate().unwrap_err().contains("unknown"));
    }

    #[test]
    fn cycles_are_rejected() {
        let def = def_with(vec![
            StepDef::new("a", "A").after("b"),
            StepDef::new("b", "B").after("a"),
        ]);
        assert!(def.validate().unwrap_err().contains("cycle"));
    }

    #[test]
    fn empty_retryable_list_means_all_tags_retry() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable("timeout"));
        assert!(policy.is_retryable("anything"));

        let narrow = RetryPolicy {
            retryable_errors: vec!["timeout".into()],
            ..RetryPolicy::default()
        };
        assert!(narrow.is_retryable("timeout"));
        assert!(!narrow.is_retryable("validation"));
    }

    #[test]
    fn terminal_tag_beats_every_policy() {
        let open = RetryPolicy::default();
        assert!(!open.is_retryable(TERMINAL_TAG));

        // Even listing it explicitly does not make it retryable.
        let explicit = RetryPolicy {
            retryable_errors: vec![TERMINAL_TAG.into()],
            ..RetryPolicy::default()
        };
        assert!(!explicit.is_retryable(TERMINAL_TAG));
        assert_eq!(StepError::terminal("bad").tag, TERMINAL_TAG);
    }
}
