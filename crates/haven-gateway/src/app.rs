use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use tokio::sync::mpsc;

use haven_core::config::HavenConfig;
use haven_guard::SecurityGate;
use haven_llm::{ModelRouter, PromptBuilder};
use haven_memory::SessionRegistry;
use haven_monitor::{AlertEngine, HealthChecker, LogService, MetricsRegistry};
use haven_storage::{BlobStore, KvStore};
use haven_tools::ToolRegistry;
use haven_workflow::{WorkflowDefinition, WorkflowEngine};

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: HavenConfig,
    pub gate: SecurityGate,
    pub sessions: Arc<SessionRegistry>,
    pub tools: Arc<ToolRegistry>,
    pub workflows: Arc<WorkflowEngine>,
    /// Named workflow catalog served by POST /workflows.
    pub flows: HashMap<String, Arc<WorkflowDefinition>>,
    pub llm: Arc<ModelRouter>,
    pub prompt: PromptBuilder,
    pub metrics: Arc<MetricsRegistry>,
    pub alerts: Arc<AlertEngine>,
    pub logs: Arc<LogService>,
    pub health: HealthChecker,
    pub kv: Arc<dyn KvStore>,
    pub blob: Arc<dyn BlobStore>,
    /// Active WS connections: conn_id -> outbound frame sender.
    pub ws_clients: DashMap<String, mpsc::Sender<String>>,
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sessions", post(crate::http::sessions::create))
        .route("/sessions/{id}", get(crate::http::sessions::fetch))
        .route("/sessions/{id}/end", post(crate::http::sessions::end))
        .route("/sessions/{id}/archive", post(crate::http::sessions::archive))
        .route("/sessions/{id}/restore", post(crate::http::sessions::restore))
        .route("/chat", post(crate::http::chat::chat))
        .route("/kb/search", post(crate::http::tools::kb_search))
        .route("/tickets", post(crate::http::tools::ticket))
        .route("/workflows", post(crate::http::workflows::execute))
        .route("/workflows/{id}", get(crate::http::workflows::status))
        .route("/workflows/{id}/wait", get(crate::http::workflows::wait))
        .route("/health", get(crate::http::ops::health))
        .route("/metrics", get(crate::http::ops::metrics))
        .route("/alerts", get(crate::http::ops::alerts))
        .route("/ws", get(crate::ws::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
}
