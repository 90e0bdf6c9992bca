use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// A probe against one collaborator interface (LLM, kv, blob, memory actors).
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;

    /// Perform a cheap liveness operation. The checker times it.
    async fn probe(&self) -> Result<(), String>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    /// Unix ms when the report was built.
    pub checked_at: i64,
}

/// Probes every registered collaborator and classifies by latency:
/// healthy below T1, degraded in [T1, T2), unhealthy on error or ≥ T2.
/// Overall status is the worst component.
pub struct HealthChecker {
    probes: Vec<Arc<dyn HealthProbe>>,
    t1_ms: u64,
    t2_ms: u64,
}

impl HealthChecker {
    pub fn new(t1_ms: u64, t2_ms: u64) -> Self {
        Self {
            probes: Vec::new(),
            t1_ms,
            t2_ms,
        }
    }

    pub fn register(&mut self, probe: Arc<dyn HealthProbe>) {
        self.probes.push(probe);
    }

    pub async fn check_all(&self) -> HealthReport {
        let mut components = Vec::with_capacity(self.probes.len());

        for probe in &self.probes {
            let started = Instant::now();
            let result = probe.probe().await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let (status, error) = match result {
                Err(e) => {
                    warn!(component = probe.name(), error = %e, "health probe failed");
                    (HealthStatus::Unhealthy, Some(e))
                }
                Ok(()) if latency_ms >= self.t2_ms => (HealthStatus::Unhealthy, None),
                Ok(()) if latency_ms >= self.t1_ms => (HealthStatus::Degraded, None),
                Ok(()) => (HealthStatus::Healthy, None),
            };

            components.push(ComponentHealth {
                name: probe.name().to_string(),
                status,
                latency_ms,
                error,
            });
        }

        let overall = components
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        HealthReport {
            status: overall,
            components,
            checked_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe {
        name: &'static str,
        delay_ms: u64,
        fail: bool,
    }

    #[async_trait]
    impl HealthProbe for FixedProbe {
        fn name(&self) -> &str {
            self.name
        }
        async fn probe(&self) -> Result<(), String> {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            if self.fail {
                Err("connection refused".into())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn all_fast_probes_are_healthy() {
        let mut checker = HealthChecker::new(1000, 3000);
        checker.register(Arc::new(FixedProbe { name: "kv", delay_ms: 0, fail: false }));
        checker.register(Arc::new(FixedProbe { name: "blob", delay_ms: 0, fail: false }));
        let report = checker.check_all().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.components.len(), 2);
    }

    #[tokio::test]
    async fn slow_probe_degrades_overall() {
        let mut checker = HealthChecker::new(10, 3000);
        checker.register(Arc::new(FixedProbe { name: "kv", delay_ms: 0, fail: false }));
        checker.register(Arc::new(FixedProbe { name: "llm", delay_ms: 50, fail: false }));
        let report = checker.check_all().await;
        assert_eq!(report.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn failing_probe_is_unhealthy_and_wins() {
        let mut checker = HealthChecker::new(1000, 3000);
        checker.register(Arc::new(FixedProbe { name: "kv", delay_ms: 0, fail: false }));
        checker.register(Arc::new(FixedProbe { name: "blob", delay_ms: 0, fail: true }));
        let report = checker.check_all().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        let blob = report.components.iter().find(|c| c.name == "blob").unwrap();
        assert!(blob.error.is_some());
    }
}
