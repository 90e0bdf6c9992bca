use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use haven_monitor::MetricsRegistry;
use haven_storage::KvStore;

use crate::persist;
use crate::retry::delay_for;
use crate::types::{
    ExecutionRecord, ExecutionStatus, StepError, StepInput, StepState, StepStatus,
    WorkflowContext, WorkflowDefinition, TIMEOUT_TAG,
};
use crate::{Result, WorkflowError};

struct ExecutionHandle {
    record: Arc<Mutex<ExecutionRecord>>,
    finished: watch::Receiver<bool>,
}

/// Executes workflow definitions.
///
/// `execute` returns immediately with a running execution id; `get_status`
/// polls, `wait_for` awaits the terminal state. Execution state is persisted
/// to the warm kv after every transition, and `resume` picks a persisted
/// execution back up after a restart.
pub struct WorkflowEngine {
    kv: Arc<dyn KvStore>,
    metrics: Arc<MetricsRegistry>,
    max_concurrency: usize,
    executions: DashMap<String, ExecutionHandle>,
}

impl WorkflowEngine {
    pub fn new(kv: Arc<dyn KvStore>, metrics: Arc<MetricsRegistry>, max_concurrency: usize) -> Self {
        Self {
            kv,
            metrics,
            max_concurrency: max_concurrency.max(1),
            executions: DashMap::new(),
        }
    }

    /// Start an execution of `definition` and return its id.
    pub async fn execute(
        &self,
        definition: Arc<WorkflowDefinition>,
        context: WorkflowContext,
    ) -> Result<String> {
        definition
            .validate()
            .map_err(WorkflowError::InvalidDefinition)?;

        let execution_id = Uuid::new_v4().to_string();
        let steps: Vec<StepState> = definition
            .steps
            .iter()
            .map(|def| StepState {
                def: def.clone(),
                status: StepStatus::Pending,
                attempts: 0,
                output: None,
                error: None,
                // Deterministic per (execution, step) so retried side effects
                // can deduplicate downstream.
                idempotency_key: format!("{}:{}", execution_id, def.id),
                completed_seq: None,
            })
            .collect();

        let record = ExecutionRecord {
            id: execution_id.clone(),
            workflow_id: definition.id.clone(),
            context,
            steps,
            status: ExecutionStatus::Running,
            started_at: haven_core::types::now_ms(),
            finished_at: None,
        };
        persist::save(&self.kv, &record).await?;

        self.metrics
            .inc_counter("workflow_executions_total", &[("workflow", &definition.id)], 1);
        info!(execution = %execution_id, workflow = %definition.id, "workflow started");

        self.spawn_driver(definition, record);
        Ok(execution_id)
    }

    /// Resume a persisted execution after a restart. Running steps are reset
    /// to pending (steps are safe to re-run once; idempotency keys are
    /// unchanged).
    pub async fn resume(&self, definition: Arc<WorkflowDefinition>, execution_id: &str) -> Result<()> {
        let mut record = persist::load(&self.kv, execution_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound {
                id: execution_id.to_string(),
            })?;
        if record.status.is_terminal() {
            return Ok(());
        }
        for step in &mut record.steps {
            if step.status == StepStatus::Running {
                step.status = StepStatus::Pending;
            }
        }
        persist::save(&self.kv, &record).await?;
        info!(execution = %execution_id, "workflow resumed");
        self.spawn_driver(definition, record);
        Ok(())
    }

    pub async fn get_status(&self, execution_id: &str) -> Result<ExecutionRecord> {
        if let Some(handle) = self.executions.get(execution_id) {
            return Ok(handle.record.lock().await.clone());
        }
        persist::load(&self.kv, execution_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound {
                id: execution_id.to_string(),
            })
    }

    /// Await the final state (completed / failed / rolled-back).
    pub async fn wait_for(&self, execution_id: &str) -> Result<ExecutionRecord> {
        let (record, mut finished) = match self.executions.get(execution_id) {
            Some(handle) => (handle.record.clone(), handle.finished.clone()),
            None => {
                // Not in memory — either unknown or already terminal on disk.
                return self.get_status(execution_id).await;
            }
        };
        while !*finished.borrow() {
            if finished.changed().await.is_err() {
                break;
            }
        }
        let record = record.lock().await.clone();
        Ok(record)
    }

    fn spawn_driver(&self, definition: Arc<WorkflowDefinition>, record: ExecutionRecord) {
        let execution_id = record.id.clone();
        let record = Arc::new(Mutex::new(record));
        let (finish_tx, finish_rx) = watch::channel(false);

        self.executions.insert(
            execution_id,
            ExecutionHandle {
                record: record.clone(),
                finished: finish_rx,
            },
        );

        let driver = Driver {
            kv: self.kv.clone(),
            metrics: self.metrics.clone(),
            definition,
            record,
            semaphore: Arc::new(Semaphore::new(self.max_concurrency)),
        };
        tokio::spawn(async move {
            driver.run().await;
            let _ = finish_tx.send(true);
        });
    }
}

struct StepOutcome {
    step_id: String,
    attempts: u32,
    result: std::result::Result<serde_json::Value, String>,
}

struct Driver {
    kv: Arc<dyn KvStore>,
    metrics: Arc<MetricsRegistry>,
    definition: Arc<WorkflowDefinition>,
    record: Arc<Mutex<ExecutionRecord>>,
    semaphore: Arc<Semaphore>,
}

impl Driver {
    async fn run(&self) {
        let (tx, mut rx) = mpsc::unbounded_channel::<StepOutcome>();
        let mut in_flight: usize = 0;
        let mut failed = false;

        loop {
            in_flight += self.launch_eligible(&tx).await;
            if in_flight == 0 {
                break;
            }

            let Some(outcome) = rx.recv().await else {
                break;
            };
            in_flight -= 1;

            if !self.apply_outcome(outcome).await {
                failed = true;
                // Stop launching; let in-flight steps land so their
                // compensations run too.
                while in_flight > 0 {
                    if let Some(outcome) = rx.recv().await {
                        in_flight -= 1;
                        self.apply_outcome(outcome).await;
                    } else {
                        break;
                    }
                }
                break;
            }
        }

        if failed {
            self.finish(ExecutionStatus::Failed).await;
            self.compensate().await;
            self.finish(ExecutionStatus::RolledBack).await;
            self.metrics.inc_counter("workflow_rollbacks_total", &[], 1);
        } else {
            let all_completed = {
                let record = self.record.lock().await;
                record.steps.iter().all(|s| s.status == StepStatus::Completed)
            };
            let status = if all_completed {
                ExecutionStatus::Completed
            } else {
                // A valid DAG only stalls when something failed upstream.
                ExecutionStatus::Failed
            };
            self.finish(status).await;
        }
    }

    /// Mark dependency-satisfied pending steps running (ascending id) and
    /// spawn their tasks. Returns how many were launched.
    async fn launch_eligible(&self, tx: &mpsc::UnboundedSender<StepOutcome>) -> usize {
        let mut launches: Vec<(StepState, StepInput)> = Vec::new();
        {
            let mut record = self.record.lock().await;
            let completed: Vec<String> = record
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::Completed)
                .map(|s| s.def.id.clone())
                .collect();
            let outputs: HashMap<String, serde_json::Value> = record
                .steps
                .iter()
                .filter_map(|s| s.output.clone().map(|o| (s.def.id.clone(), o)))
                .collect();
            let context = record.context.clone();

            let mut eligible_ids: Vec<String> = record
                .steps
                .iter()
                .filter(|s| {
                    s.status == StepStatus::Pending
                        && s.def.depends_on.iter().all(|d| completed.contains(d))
                })
                .map(|s| s.def.id.clone())
                .collect();
            eligible_ids.sort();

            for id in eligible_ids {
                if let Some(step) = record.step_mut(&id) {
                    step.status = StepStatus::Running;
                    let input = StepInput {
                        context: context.clone(),
                        outputs: outputs.clone(),
                        idempotency_key: step.idempotency_key.clone(),
                        attempt: step.attempts + 1,
                    };
                    launches.push((step.clone(), input));
                }
            }
            if !launches.is_empty() {
                self.persist(&record).await;
            }
        }

        let launched = launches.len();
        for (step, input) in launches {
            let Some(handler) = self.definition.handler(&step.def.id) else {
                let _ = tx.send(StepOutcome {
                    step_id: step.def.id.clone(),
                    attempts: 0,
                    result: Err(format!("no handler for step {}", step.def.id)),
                });
                continue;
            };
            let tx = tx.clone();
            let semaphore = self.semaphore.clone();
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = run_step(handler, step, input, metrics).await;
                let _ = tx.send(outcome);
            });
        }
        launched
    }

    /// Record a step outcome. Returns false when the step failed terminally.
    async fn apply_outcome(&self, outcome: StepOutcome) -> bool {
        let mut record = self.record.lock().await;
        let next_seq = record
            .steps
            .iter()
            .filter_map(|s| s.completed_seq)
            .max()
            .unwrap_or(0)
            + 1;

        let ok = outcome.result.is_ok();
        if let Some(step) = record.step_mut(&outcome.step_id) {
            step.attempts = outcome.attempts;
            match outcome.result {
                Ok(output) => {
                    debug!(step = %step.def.id, "step completed");
                    step.status = StepStatus::Completed;
                    step.output = Some(output);
                    step.completed_seq = Some(next_seq);
                }
                Err(message) => {
                    warn!(step = %step.def.id, error = %message, "step failed terminally");
                    step.status = StepStatus::Failed;
                    step.error = Some(message);
                }
            }
        }
        self.persist(&record).await;
        ok
    }

    /// Invoke compensation handles of completed steps in reverse completion
    /// order. A compensation failure is logged and does not block the rest.
    async fn compensate(&self) {
        let (context, outputs, mut completed) = {
            let record = self.record.lock().await;
            let outputs: HashMap<String, serde_json::Value> = record
                .steps
                .iter()
                .filter_map(|s| s.output.clone().map(|o| (s.def.id.clone(), o)))
                .collect();
            let completed: Vec<StepState> = record
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::Completed)
                .cloned()
                .collect();
            (record.context.clone(), outputs, completed)
        };
        completed.sort_by_key(|s| std::cmp::Reverse(s.completed_seq));

        for step in completed {
            let Some(handler) = self.definition.compensation_handler(&step.def.id) else {
                continue;
            };
            let input = StepInput {
                context: context.clone(),
                outputs: outputs.clone(),
                idempotency_key: step.idempotency_key.clone(),
                attempt: step.attempts,
            };
            match handler.compensate(&input).await {
                Ok(()) => {
                    info!(step = %step.def.id, "step compensated");
                    let mut record = self.record.lock().await;
                    if let Some(s) = record.step_mut(&step.def.id) {
                        s.status = StepStatus::Compensated;
                    }
                    self.persist(&record).await;
                }
                Err(e) => {
                    warn!(step = %step.def.id, error = %e, "compensation failed, continuing");
                }
            }
        }
    }

    async fn finish(&self, status: ExecutionStatus) {
        let mut record = self.record.lock().await;
        record.status = status;
        if status.is_terminal() {
            record.finished_at = Some(haven_core::types::now_ms());
        }
        info!(execution = %record.id, status = ?status, "workflow state");
        self.persist(&record).await;
    }

    async fn persist(&self, record: &ExecutionRecord) {
        if let Err(e) = persist::save(&self.kv, record).await {
            warn!(execution = %record.id, error = %e, "execution persist failed");
        }
    }
}

/// Run one step to terminal success or failure, retrying per its policy.
/// The idempotency key is identical across attempts.
async fn run_step(
    handler: Arc<dyn crate::types::StepHandler>,
    step: StepState,
    mut input: StepInput,
    metrics: Arc<MetricsRegistry>,
) -> StepOutcome {
    let policy = &step.def.retry;
    let timeout = std::time::Duration::from_millis(step.def.timeout_ms);
    let mut attempt = input.attempt.max(1);

    loop {
        input.attempt = attempt;
        let result = match tokio::time::timeout(timeout, handler.run(&input)).await {
            Ok(r) => r,
            // A timeout is a retryable failure unless the policy says not.
            Err(_) => Err(StepError::new(
                format!("step timed out after {}ms", step.def.timeout_ms),
                TIMEOUT_TAG,
            )),
        };

        match result {
            Ok(output) => {
                return StepOutcome {
                    step_id: step.def.id,
                    attempts: attempt,
                    result: Ok(output),
                }
            }
            Err(e) => {
                let retryable = policy.is_retryable(&e.tag);
                if retryable && attempt < policy.max_attempts {
                    let delay = delay_for(policy, attempt);
                    debug!(
                        step = %step.def.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "step retry scheduled"
                    );
                    metrics.inc_counter("workflow_step_retries_total", &[], 1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return StepOutcome {
                    step_id: step.def.id,
                    attempts: attempt,
                    result: Err(e.message),
                };
            }
        }
    }
}
