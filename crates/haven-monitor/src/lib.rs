//! Monitoring layer: structured logs, metrics, alert evaluation, and health
//! checks.
//!
//! All services here are constructed once at startup and passed by reference
//! (no module-level singletons) so tests stay deterministic.

pub mod alerts;
pub mod health;
pub mod log;
pub mod metrics;

pub use alerts::{AlertEngine, AlertInstance, AlertRule, AlertSeverity};
pub use health::{ComponentHealth, HealthChecker, HealthProbe, HealthReport, HealthStatus};
pub use log::{LogEntry, LogLevel, LogService};
pub use metrics::{MetricKind, MetricsRegistry};
