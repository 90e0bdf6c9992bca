//! Service construction. Everything is built once here and handed to
//! `AppState` by reference — no global singletons, so tests can assemble the
//! same stack over in-memory stores.

use std::sync::Arc;

use tracing::info;

use haven_core::config::HavenConfig;
use haven_guard::SecurityGate;
use haven_llm::http::OpenAiCompatProvider;
use haven_llm::{LlmProvider, ModelRouter, PromptBuilder, Summarizer};
use haven_memory::SessionRegistry;
use haven_monitor::alerts::{Aggregation, Comparison};
use haven_monitor::{AlertEngine, AlertRule, AlertSeverity, HealthChecker, LogService, MetricsRegistry};
use haven_storage::{BlobStore, KvStore};
use haven_tools::kb::{KbSearchTool, StaticKnowledgeBase};
use haven_tools::ticket::{InMemoryTickets, TicketTool};
use haven_tools::ToolRegistry;
use haven_workflow::WorkflowEngine;

use crate::app::AppState;
use crate::probes::{BlobProbe, KvProbe, LlmProbe, MemoryProbe};
use crate::providers::StubProvider;

/// Primary, fallback, and summarization providers from config. Without a
/// configured endpoint the offline stub serves all three.
pub fn build_providers(
    config: &HavenConfig,
) -> (
    Box<dyn LlmProvider>,
    Option<Box<dyn LlmProvider>>,
    Arc<dyn LlmProvider>,
) {
    match &config.llm.base_url {
        Some(base_url) => {
            info!(base_url = %base_url, "using HTTP inference endpoint");
            let primary = Box::new(OpenAiCompatProvider::new(
                "primary",
                config.llm.api_key.clone(),
                base_url.clone(),
                config.llm.request_timeout_ms,
            ));
            let fallback = config.llm.fallback_enabled.then(|| {
                Box::new(OpenAiCompatProvider::new(
                    "fallback",
                    config
                        .llm
                        .fallback_key
                        .clone()
                        .or_else(|| config.llm.api_key.clone()),
                    base_url.clone(),
                    config.llm.request_timeout_ms,
                )) as Box<dyn LlmProvider>
            });
            let summary: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatProvider::new(
                "summarizer",
                config.llm.api_key.clone(),
                base_url.clone(),
                config.llm.request_timeout_ms,
            ));
            (primary, fallback, summary)
        }
        None => {
            info!("no inference endpoint configured, using offline stub provider");
            (
                Box::new(StubProvider),
                config
                    .llm
                    .fallback_enabled
                    .then(|| Box::new(StubProvider) as Box<dyn LlmProvider>),
                Arc::new(StubProvider),
            )
        }
    }
}

/// Assemble the full application state over the given stores and providers.
pub fn build_state(
    config: HavenConfig,
    kv: Arc<dyn KvStore>,
    blob: Arc<dyn BlobStore>,
    primary: Box<dyn LlmProvider>,
    fallback: Option<Box<dyn LlmProvider>>,
    summary_provider: Arc<dyn LlmProvider>,
) -> Arc<AppState> {
    let metrics = Arc::new(MetricsRegistry::new());
    metrics.register_buckets(
        "request_latency_ms",
        &[10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0],
    );

    let logs = Arc::new(LogService::new(
        kv.clone(),
        config.monitor.error_log_retention_days,
    ));

    let alerts = Arc::new(AlertEngine::new(metrics.clone()).with_kv(kv.clone()));
    for rule in default_alert_rules(&config) {
        alerts.add_rule(rule);
    }

    let llm = Arc::new(ModelRouter::new(
        primary,
        config.llm.primary_model.clone(),
        fallback,
        config.llm.fallback_model.clone(),
    ));

    let summarizer = Arc::new(Summarizer::new(
        summary_provider,
        config.llm.fallback_model.clone(),
    ));

    let sessions = Arc::new(SessionRegistry::new(
        kv.clone(),
        blob.clone(),
        summarizer,
        config.memory.clone(),
        metrics.clone(),
    ));

    let tools = Arc::new(
        ToolRegistry::builder()
            .register(Arc::new(KbSearchTool::new(Arc::new(
                StaticKnowledgeBase::new(),
            ))))
            .register(Arc::new(TicketTool::new(Arc::new(InMemoryTickets::new()))))
            .build(),
    );

    let workflows = Arc::new(WorkflowEngine::new(
        kv.clone(),
        metrics.clone(),
        config.workflow.max_concurrency,
    ));
    let flows = crate::flows::catalog(&tools);

    let mut health = HealthChecker::new(config.monitor.health_t1_ms, config.monitor.health_t2_ms);
    health.register(Arc::new(KvProbe { kv: kv.clone() }));
    health.register(Arc::new(BlobProbe { blob: blob.clone() }));
    health.register(Arc::new(MemoryProbe {
        sessions: sessions.clone(),
    }));
    health.register(Arc::new(LlmProbe { llm: llm.clone() }));

    let gate = SecurityGate::new(kv.clone(), config.limits.clone());
    let prompt = PromptBuilder::new(config.llm.max_tokens);

    Arc::new(AppState {
        config,
        gate,
        sessions,
        tools,
        workflows,
        flows,
        llm,
        prompt,
        metrics,
        alerts,
        logs,
        health,
        kv,
        blob,
        ws_clients: dashmap::DashMap::new(),
    })
}

fn default_alert_rules(config: &HavenConfig) -> Vec<AlertRule> {
    vec![
        AlertRule {
            id: "error-rate".into(),
            name: "request error rate".into(),
            metric: "request_error_rate".into(),
            aggregation: Aggregation::Avg,
            comparison: Comparison::Gt,
            threshold: config.monitor.alert_error_rate,
            window_secs: 300,
            duration_secs: 60,
            severity: AlertSeverity::High,
            enabled: true,
        },
        AlertRule {
            id: "latency-p95".into(),
            name: "request latency p95".into(),
            metric: "request_latency_p95_ms".into(),
            aggregation: Aggregation::Max,
            comparison: Comparison::Gt,
            threshold: config.monitor.alert_p95_ms,
            window_secs: 300,
            duration_secs: 60,
            severity: AlertSeverity::Medium,
            enabled: true,
        },
    ]
}
