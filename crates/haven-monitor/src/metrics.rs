use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use haven_storage::KvStore;

/// Samples older than this are pruned from the alert-evaluation ring.
const SAMPLE_RETENTION_SECS: i64 = 900;
/// Hard cap per series ring so a hot counter cannot grow without bound.
const MAX_SAMPLES_PER_NAME: usize = 50_000;

/// Default histogram buckets (milliseconds-flavored).
const DEFAULT_BUCKETS: &[f64] = &[
    5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

/// (name, sorted labels) — one time series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    name: String,
    labels: BTreeMap<String, String>,
}

impl SeriesKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn label_suffix(&self) -> String {
        if self.labels.is_empty() {
            return String::new();
        }
        let inner: Vec<String> = self
            .labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v.replace('"', "\\\"")))
            .collect();
        format!("{{{}}}", inner.join(","))
    }
}

#[derive(Debug, Clone)]
struct HistogramData {
    buckets: Vec<f64>,
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl HistogramData {
    fn new(buckets: Vec<f64>) -> Self {
        let n = buckets.len();
        Self {
            buckets,
            counts: vec![0; n],
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, value: f64) {
        for (i, bound) in self.buckets.iter().enumerate() {
            if value <= *bound {
                self.counts[i] += 1;
            }
        }
        self.sum += value;
        self.count += 1;
    }
}

/// Process-global metrics registry.
///
/// Counters are monotonically non-decreasing per series; gauges move freely;
/// histograms accumulate into a bucket set that is fixed per metric name.
/// Every write also appends a timestamped sample to a per-name ring consumed
/// by the alert engine's window aggregations.
pub struct MetricsRegistry {
    counters: DashMap<SeriesKey, u64>,
    gauges: DashMap<SeriesKey, f64>,
    histograms: DashMap<SeriesKey, HistogramData>,
    /// Registered bucket bounds per histogram name.
    bucket_defs: DashMap<String, Vec<f64>>,
    /// name -> ring of (unix ms, value) for alert-window aggregation.
    samples: DashMap<String, Mutex<VecDeque<(i64, f64)>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            gauges: DashMap::new(),
            histograms: DashMap::new(),
            bucket_defs: DashMap::new(),
            samples: DashMap::new(),
        }
    }

    /// Fix the bucket bounds for a histogram name. Must be called before the
    /// first `observe` of that name; later calls are ignored.
    pub fn register_buckets(&self, name: &str, bounds: &[f64]) {
        self.bucket_defs
            .entry(name.to_string())
            .or_insert_with(|| bounds.to_vec());
    }

    pub fn inc_counter(&self, name: &str, labels: &[(&str, &str)], delta: u64) {
        let key = SeriesKey::new(name, labels);
        *self.counters.entry(key).or_insert(0) += delta;
        self.record_sample(name, delta as f64);
    }

    pub fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = SeriesKey::new(name, labels);
        self.gauges.insert(key, value);
        self.record_sample(name, value);
    }

    pub fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = SeriesKey::new(name, labels);
        let buckets = self
            .bucket_defs
            .get(name)
            .map(|b| b.clone())
            .unwrap_or_else(|| DEFAULT_BUCKETS.to_vec());
        self.histograms
            .entry(key)
            .or_insert_with(|| HistogramData::new(buckets))
            .observe(value);
        self.record_sample(name, value);
    }

    /// Current value of a counter series (0 when never incremented).
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .get(&SeriesKey::new(name, labels))
            .map(|v| *v)
            .unwrap_or(0)
    }

    pub fn gauge_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.gauges.get(&SeriesKey::new(name, labels)).map(|v| *v)
    }

    /// Timestamped samples for `name` within the last `window_secs`.
    pub fn samples_in_window(&self, name: &str, window_secs: u64) -> Vec<f64> {
        let cutoff = chrono::Utc::now().timestamp_millis() - (window_secs as i64) * 1000;
        match self.samples.get(name) {
            Some(ring) => ring
                .lock()
                .unwrap()
                .iter()
                .filter(|(ts, _)| *ts >= cutoff)
                .map(|(_, v)| *v)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Percentile (0–100) over the sample window, e.g. p95 request latency.
    pub fn percentile_in_window(&self, name: &str, window_secs: u64, pct: f64) -> Option<f64> {
        let mut samples = self.samples_in_window(name, window_secs);
        if samples.is_empty() {
            return None;
        }
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((pct / 100.0) * (samples.len() as f64 - 1.0)).round() as usize;
        samples.get(rank.min(samples.len() - 1)).copied()
    }

    /// Render the whole registry in the text exposition format:
    /// `# TYPE <name> <kind>` then one `<name>{<labels>} <value>` per series.
    pub fn export(&self) -> String {
        let mut out = String::new();

        let mut counter_names: BTreeMap<String, Vec<(SeriesKey, u64)>> = BTreeMap::new();
        for entry in self.counters.iter() {
            counter_names
                .entry(entry.key().name.clone())
                .or_default()
                .push((entry.key().clone(), *entry.value()));
        }
        for (name, mut series) in counter_names {
            out.push_str(&format!("# TYPE {} {}\n", name, MetricKind::Counter.as_str()));
            series.sort_by(|a, b| a.0.label_suffix().cmp(&b.0.label_suffix()));
            for (key, value) in series {
                out.push_str(&format!("{}{} {}\n", name, key.label_suffix(), value));
            }
        }

        let mut gauge_names: BTreeMap<String, Vec<(SeriesKey, f64)>> = BTreeMap::new();
        for entry in self.gauges.iter() {
            gauge_names
                .entry(entry.key().name.clone())
                .or_default()
                .push((entry.key().clone(), *entry.value()));
        }
        for (name, mut series) in gauge_names {
            out.push_str(&format!("# TYPE {} {}\n", name, MetricKind::Gauge.as_str()));
            series.sort_by(|a, b| a.0.label_suffix().cmp(&b.0.label_suffix()));
            for (key, value) in series {
                out.push_str(&format!("{}{} {}\n", name, key.label_suffix(), value));
            }
        }

        let mut histo_names: BTreeMap<String, Vec<(SeriesKey, HistogramData)>> = BTreeMap::new();
        for entry in self.histograms.iter() {
            histo_names
                .entry(entry.key().name.clone())
                .or_default()
                .push((entry.key().clone(), entry.value().clone()));
        }
        for (name, mut series) in histo_names {
            out.push_str(&format!("# TYPE {} {}\n", name, MetricKind::Histogram.as_str()));
            series.sort_by(|a, b| a.0.label_suffix().cmp(&b.0.label_suffix()));
            for (key, data) in series {
                for (bound, count) in data.buckets.iter().zip(data.counts.iter()) {
                    let mut labels = key.labels.clone();
                    labels.insert("le".to_string(), format_bound(*bound));
                    let suffix = SeriesKey {
                        name: name.clone(),
                        labels,
                    }
                    .label_suffix();
                    out.push_str(&format!("{}_bucket{} {}\n", name, suffix, count));
                }
                let mut inf_labels = key.labels.clone();
                inf_labels.insert("le".to_string(), "+Inf".to_string());
                let inf_suffix = SeriesKey {
                    name: name.clone(),
                    labels: inf_labels,
                }
                .label_suffix();
                out.push_str(&format!("{}_bucket{} {}\n", name, inf_suffix, data.count));
                out.push_str(&format!(
                    "{}_sum{} {}\n",
                    name,
                    key.label_suffix(),
                    data.sum
                ));
                out.push_str(&format!(
                    "{}_count{} {}\n",
                    name,
                    key.label_suffix(),
                    data.count
                ));
            }
        }

        out
    }

    fn record_sample(&self, name: &str, value: f64) {
        let now = chrono::Utc::now().timestamp_millis();
        let ring = self
            .samples
            .entry(name.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut ring = ring.lock().unwrap();
        ring.push_back((now, value));
        let cutoff = now - SAMPLE_RETENTION_SECS * 1000;
        while ring.front().is_some_and(|(ts, _)| *ts < cutoff) {
            ring.pop_front();
        }
        while ring.len() > MAX_SAMPLES_PER_NAME {
            ring.pop_front();
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Write a per-minute export snapshot to the warm kv under
/// `metrics:<minute>` until shutdown. Keeps roughly the last hour.
pub async fn run_snapshot_loop(
    registry: Arc<MetricsRegistry>,
    kv: Arc<dyn KvStore>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("metrics snapshot loop started");
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let minute = chrono::Utc::now().timestamp() / 60;
                let key = format!("metrics:{minute}");
                if let Err(e) = kv.put(&key, &registry.export()).await {
                    warn!(error = %e, "metrics snapshot failed");
                    continue;
                }
                // Trim snapshots older than an hour.
                if let Ok(keys) = kv.keys_with_prefix("metrics:").await {
                    for key in keys {
                        let stale = key
                            .strip_prefix("metrics:")
                            .and_then(|m| m.parse::<i64>().ok())
                            .is_some_and(|m| m < minute - 60);
                        if stale {
                            let _ = kv.delete(&key).await;
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("metrics snapshot loop shutting down");
                    break;
                }
            }
        }
    }
}

fn format_bound(b: f64) -> String {
    if b == b.trunc() {
        format!("{}", b as i64)
    } else {
        format!("{}", b)
    }
}
