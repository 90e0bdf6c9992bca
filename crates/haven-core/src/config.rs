use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Wire constants
pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const MAX_PAYLOAD_BYTES: usize = 128 * 1024; // 128 KB hard cap per WS frame
pub const WS_IDLE_TIMEOUT_SECS: u64 = 600; // close silent connections after 10 min

/// Top-level config (haven.toml + HAVEN_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HavenConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Default for HavenConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            llm: LlmConfig::default(),
            limits: LimitsConfig::default(),
            memory: MemoryConfig::default(),
            workflow: WorkflowConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// LLM call layer settings (§ primary/fallback models, token budget).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_primary_model")]
    pub primary_model: String,
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,
    /// Disable to run on the primary model only.
    #[serde(default = "bool_true")]
    pub fallback_enabled: bool,
    pub api_key: Option<String>,
    /// Separate credential for the fallback provider, when it differs.
    pub fallback_key: Option<String>,
    pub base_url: Option<String>,
    /// Output token cap per response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary_model: default_primary_model(),
            fallback_model: default_fallback_model(),
            fallback_enabled: true,
            api_key: None,
            fallback_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Security-gate limits (§ rate windows, burst, content length).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_rate_per_minute")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_tokens_per_hour")]
    pub token_limit_per_hour: u32,
    #[serde(default = "default_ws_per_minute")]
    pub ws_msg_per_minute: u32,
    #[serde(default = "default_voice_per_minute")]
    pub voice_per_minute: u32,
    /// Requests admitted above the window limit before rejection kicks in.
    #[serde(default = "default_burst")]
    pub burst_allowance: u32,
    #[serde(default = "default_max_content")]
    pub max_content_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: default_rate_per_minute(),
            token_limit_per_hour: default_tokens_per_hour(),
            ws_msg_per_minute: default_ws_per_minute(),
            voice_per_minute: default_voice_per_minute(),
            burst_allowance: default_burst(),
            max_content_chars: default_max_content(),
        }
    }
}

/// Per-session memory retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Tail of messages that trimming never drops.
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
    /// Appends since the last summary before a regeneration is scheduled.
    #[serde(default = "default_summary_trigger")]
    pub summary_trigger: usize,
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u64,
    /// Bounded per-session inbound queue; overflow drops the oldest entry.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            keep_recent: default_keep_recent(),
            summary_trigger: default_summary_trigger(),
            session_ttl_hours: default_session_ttl_hours(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Eligible steps running in parallel per execution.
    #[serde(default = "default_workflow_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_workflow_concurrency(),
            default_step_timeout_ms: default_step_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Error-rate alert threshold (fraction of requests, 0..1).
    #[serde(default = "default_alert_error_rate")]
    pub alert_error_rate: f64,
    /// p95 latency alert threshold in milliseconds.
    #[serde(default = "default_alert_p95_ms")]
    pub alert_p95_ms: f64,
    /// Healthy/degraded latency boundary.
    #[serde(default = "default_health_t1_ms")]
    pub health_t1_ms: u64,
    /// Degraded/unhealthy latency boundary.
    #[serde(default = "default_health_t2_ms")]
    pub health_t2_ms: u64,
    #[serde(default = "default_error_retention_days")]
    pub error_log_retention_days: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            alert_error_rate: default_alert_error_rate(),
            alert_p95_ms: default_alert_p95_ms(),
            health_t1_ms: default_health_t1_ms(),
            health_t2_ms: default_health_t2_ms(),
            error_log_retention_days: default_error_retention_days(),
        }
    }
}

impl HavenConfig {
    /// Load config: explicit path > HAVEN_CONFIG env > ~/.haven/haven.toml,
    /// then apply `HAVEN_*` env overrides, then the flat legacy option names.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let mut config: HavenConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("HAVEN_").split("__"))
            .extract()
            .map_err(|e| crate::error::HavenError::Internal(format!("config: {e}")))?;

        config.apply_flat_env();
        Ok(config)
    }

    /// Recognize the flat, upper-case option names used by operators
    /// (`MAX_TOKENS=2048 haven-gateway` and friends).
    pub fn apply_flat_env(&mut self) {
        fn parse<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.parse().ok())
        }

        if let Some(v) = parse("MAX_TOKENS") {
            self.llm.max_tokens = v;
        }
        if let Some(v) = parse("RATE_LIMIT_PER_MINUTE") {
            self.limits.rate_limit_per_minute = v;
        }
        if let Some(v) = parse("SESSION_TTL_HOURS") {
            self.memory.session_ttl_hours = v;
        }
        if let Some(v) = parse("MAX_MESSAGES") {
            self.memory.max_messages = v;
        }
        if let Some(v) = parse("KEEP_RECENT") {
            self.memory.keep_recent = v;
        }
        if let Some(v) = parse("SUMMARY_TRIGGER") {
            self.memory.summary_trigger = v;
        }
        if let Some(v) = parse("ALERT_ERROR_RATE") {
            self.monitor.alert_error_rate = v;
        }
        if let Some(v) = parse("ALERT_P95_MS") {
            self.monitor.alert_p95_ms = v;
        }
        if let Some(v) = parse("FALLBACK_ENABLED") {
            self.llm.fallback_enabled = v;
        }
        if let Ok(v) = std::env::var("FALLBACK_KEY") {
            self.llm.fallback_key = Some(v);
        }
    }
}

fn default_config_path() -> String {
    if let Ok(p) = std::env::var("HAVEN_CONFIG") {
        return p;
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.haven/haven.toml", home)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.haven/haven.db", home)
}
fn default_primary_model() -> String {
    "support-large-1".to_string()
}
fn default_fallback_model() -> String {
    "support-small-1".to_string()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_rate_per_minute() -> u32 {
    30
}
fn default_tokens_per_hour() -> u32 {
    10_000
}
fn default_ws_per_minute() -> u32 {
    60
}
fn default_voice_per_minute() -> u32 {
    20
}
fn default_burst() -> u32 {
    10
}
fn default_max_content() -> usize {
    4000
}
fn default_max_messages() -> usize {
    100
}
fn default_keep_recent() -> usize {
    20
}
fn default_summary_trigger() -> usize {
    20
}
fn default_session_ttl_hours() -> u64 {
    24
}
fn default_mailbox_capacity() -> usize {
    100
}
fn default_workflow_concurrency() -> usize {
    4
}
fn default_step_timeout_ms() -> u64 {
    30_000
}
fn default_alert_error_rate() -> f64 {
    0.05
}
fn default_alert_p95_ms() -> f64 {
    5_000.0
}
fn default_health_t1_ms() -> u64 {
    1_000
}
fn default_health_t2_ms() -> u64 {
    3_000
}
fn default_error_retention_days() -> u64 {
    7
}
fn bool_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let c = HavenConfig::default();
        assert_eq!(c.limits.rate_limit_per_minute, 30);
        assert_eq!(c.limits.burst_allowance, 10);
        assert_eq!(c.limits.max_content_chars, 4000);
        assert_eq!(c.memory.max_messages, 100);
        assert_eq!(c.memory.keep_recent, 20);
        assert_eq!(c.memory.summary_trigger, 20);
        assert_eq!(c.memory.session_ttl_hours, 24);
        assert_eq!(c.workflow.max_concurrency, 4);
    }
}
