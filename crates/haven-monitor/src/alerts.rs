use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use haven_storage::KvStore;

use crate::metrics::MetricsRegistry;

/// Resolved alert instances kept for the `/alerts` recent view.
const MAX_RESOLVED_RETAINED: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Low => write!(f, "low"),
            AlertSeverity::Medium => write!(f, "medium"),
            AlertSeverity::High => write!(f, "high"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl Comparison {
    fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => value > threshold,
            Comparison::Gte => value >= threshold,
            Comparison::Lt => value < threshold,
            Comparison::Lte => value <= threshold,
            Comparison::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

/// A configured alert condition over one metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub metric: String,
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub threshold: f64,
    /// Seconds of samples the aggregation covers.
    pub window_secs: u64,
    /// Seconds the condition must hold continuously before firing.
    pub duration_secs: u64,
    pub severity: AlertSeverity,
    pub enabled: bool,
}

/// A fired (and possibly resolved) occurrence of a rule.
#[derive(Debug, Clone, Serialize)]
pub struct AlertInstance {
    pub rule_id: String,
    pub rule_name: String,
    /// Unix ms when the alert opened.
    pub fired_at: i64,
    /// Unix ms when the condition cleared; `None` while active.
    pub resolved_at: Option<i64>,
    pub observed_value: f64,
    pub severity: AlertSeverity,
    pub message: String,
}

/// Evaluates alert rules against the metrics registry's sample windows.
///
/// A rule fires once its condition has held continuously for `duration_secs`
/// and resolves as soon as an evaluation no longer satisfies it.
pub struct AlertEngine {
    registry: Arc<MetricsRegistry>,
    rules: Mutex<Vec<AlertRule>>,
    /// rule id -> unix ms when the condition was first observed holding.
    holding_since: DashMap<String, i64>,
    active: DashMap<String, AlertInstance>,
    resolved: Mutex<VecDeque<AlertInstance>>,
    /// Warm kv for `alert:<rule_id>` snapshots; in-memory only when absent.
    kv: Option<Arc<dyn KvStore>>,
}

impl AlertEngine {
    pub fn new(registry: Arc<MetricsRegistry>) -> Self {
        Self {
            registry,
            rules: Mutex::new(Vec::new()),
            holding_since: DashMap::new(),
            active: DashMap::new(),
            resolved: Mutex::new(VecDeque::new()),
            kv: None,
        }
    }

    /// Persist alert transitions to the warm kv under `alert:<rule_id>`.
    pub fn with_kv(mut self, kv: Arc<dyn KvStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    pub fn add_rule(&self, rule: AlertRule) {
        self.rules.lock().unwrap().push(rule);
    }

    pub fn active_alerts(&self) -> Vec<AlertInstance> {
        let mut alerts: Vec<AlertInstance> =
            self.active.iter().map(|e| e.value().clone()).collect();
        alerts.sort_by_key(|a| std::cmp::Reverse(a.fired_at));
        alerts
    }

    pub fn recent_resolved(&self) -> Vec<AlertInstance> {
        self.resolved.lock().unwrap().iter().cloned().collect()
    }

    /// One evaluation pass over every enabled rule.
    pub async fn evaluate(&self) {
        let rules = self.rules.lock().unwrap().clone();
        let now = chrono::Utc::now().timestamp_millis();

        for rule in rules.iter().filter(|r| r.enabled) {
            let samples = self.registry.samples_in_window(&rule.metric, rule.window_secs);
            let value = aggregate(rule.aggregation, &samples);

            let holds = match value {
                Some(v) => rule.comparison.holds(v, rule.threshold),
                None => false,
            };

            if holds {
                let since = *self
                    .holding_since
                    .entry(rule.id.clone())
                    .or_insert(now);
                let held_ms = now - since;
                if held_ms >= (rule.duration_secs as i64) * 1000
                    && !self.active.contains_key(&rule.id)
                {
                    let observed = value.unwrap_or_default();
                    warn!(
                        rule = %rule.name,
                        observed,
                        threshold = rule.threshold,
                        severity = %rule.severity,
                        "alert fired"
                    );
                    let instance = AlertInstance {
                        rule_id: rule.id.clone(),
                        rule_name: rule.name.clone(),
                        fired_at: now,
                        resolved_at: None,
                        observed_value: observed,
                        severity: rule.severity,
                        message: format!(
                            "{}: {} {:?} {} (observed {:.3})",
                            rule.name, rule.metric, rule.comparison, rule.threshold, observed
                        ),
                    };
                    self.persist(&instance).await;
                    self.active.insert(rule.id.clone(), instance);
                }
            } else {
                self.holding_since.remove(&rule.id);
                if let Some((_, mut instance)) = self.active.remove(&rule.id) {
                    instance.resolved_at = Some(now);
                    info!(rule = %instance.rule_name, "alert resolved");
                    self.persist(&instance).await;
                    let mut resolved = self.resolved.lock().unwrap();
                    resolved.push_back(instance);
                    while resolved.len() > MAX_RESOLVED_RETAINED {
                        resolved.pop_front();
                    }
                }
            }
        }
    }

    async fn persist(&self, instance: &AlertInstance) {
        let Some(ref kv) = self.kv else {
            return;
        };
        let key = format!("alert:{}", instance.rule_id);
        match serde_json::to_string(instance) {
            Ok(raw) => {
                if let Err(e) = kv.put(&key, &raw).await {
                    warn!(rule = %instance.rule_id, error = %e, "alert persist failed");
                }
            }
            Err(e) => warn!(error = %e, "alert instance not serializable"),
        }
    }

    /// Evaluation loop. Ticks every `interval_secs` until `shutdown` flips.
    pub async fn run(self: Arc<Self>, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
        info!("alert engine started");
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => self.evaluate().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("alert engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}

fn aggregate(agg: Aggregation, samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return match agg {
            // An empty window still has a well-defined count/sum.
            Aggregation::Count => Some(0.0),
            Aggregation::Sum => Some(0.0),
            _ => None,
        };
    }
    Some(match agg {
        Aggregation::Sum => samples.iter().sum(),
        Aggregation::Avg => samples.iter().sum::<f64>() / samples.len() as f64,
        Aggregation::Min => samples.iter().cloned().fold(f64::INFINITY, f64::min),
        Aggregation::Max => samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        Aggregation::Count => samples.len() as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(metric: &str, threshold: f64, duration_secs: u64) -> AlertRule {
        AlertRule {
            id: "r1".into(),
            name: "error rate".into(),
            metric: metric.into(),
            aggregation: Aggregation::Sum,
            comparison: Comparison::Gt,
            threshold,
            window_secs: 60,
            duration_secs,
            severity: AlertSeverity::High,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn fires_when_threshold_crossed_with_zero_duration() {
        let registry = Arc::new(MetricsRegistry::new());
        let engine = AlertEngine::new(registry.clone());
        engine.add_rule(rule("errors_total", 2.0, 0));

        registry.inc_counter("errors_total", &[], 3);
        engine.evaluate().await;

        let active = engine.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].observed_value, 3.0);
        assert_eq!(active[0].severity, AlertSeverity::High);
    }

    #[tokio::test]
    async fn does_not_fire_below_threshold() {
        let registry = Arc::new(MetricsRegistry::new());
        let engine = AlertEngine::new(registry.clone());
        engine.add_rule(rule("errors_total", 5.0, 0));

        registry.inc_counter("errors_total", &[], 3);
        engine.evaluate().await;
        assert!(engine.active_alerts().is_empty());
    }

    #[tokio::test]
    async fn duration_gates_firing() {
        let registry = Arc::new(MetricsRegistry::new());
        let engine = AlertEngine::new(registry.clone());
        engine.add_rule(rule("errors_total", 0.0, 3600));

        registry.inc_counter("errors_total", &[], 10);
        engine.evaluate().await;
        // Condition holds but hasn't held for an hour.
        assert!(engine.active_alerts().is_empty());
    }

    #[tokio::test]
    async fn resolves_when_condition_clears() {
        let registry = Arc::new(MetricsRegistry::new());
        let engine = AlertEngine::new(registry.clone());
        // min(queue_depth) > 2 — a single low sample clears it.
        engine.add_rule(AlertRule {
            aggregation: Aggregation::Min,
            ..rule("queue_depth", 2.0, 0)
        });

        registry.set_gauge("queue_depth", &[], 5.0);
        engine.evaluate().await;
        assert_eq!(engine.active_alerts().len(), 1);

        registry.set_gauge("queue_depth", &[], 0.0);
        engine.evaluate().await;
        assert!(engine.active_alerts().is_empty());
        let resolved = engine.recent_resolved();
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].resolved_at.is_some());
    }

    #[tokio::test]
    async fn disabled_rules_never_fire() {
        let registry = Arc::new(MetricsRegistry::new());
        let engine = AlertEngine::new(registry.clone());
        engine.add_rule(AlertRule {
            enabled: false,
            ..rule("errors_total", 0.0, 0)
        });
        registry.inc_counter("errors_total", &[], 10);
        engine.evaluate().await;
        assert!(engine.active_alerts().is_empty());
    }

    #[tokio::test]
    async fn fired_alerts_are_persisted_to_kv() {
        use haven_storage::MemoryKv;

        let registry = Arc::new(MetricsRegistry::new());
        let kv = Arc::new(MemoryKv::new());
        let engine = AlertEngine::new(registry.clone()).with_kv(kv.clone());
        engine.add_rule(rule("errors_total", 0.0, 0));

        registry.inc_counter("errors_total", &[], 5);
        engine.evaluate().await;

        let raw = kv.get("alert:r1").await.unwrap().unwrap();
        let stored: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored["rule_id"], "r1");
        assert!(stored["resolved_at"].is_null());
    }
}
