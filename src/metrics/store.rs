//! Bounded in-memory time series per node and per pod-container.
//!
//! Samples older than the retention horizon are pruned on write. Window
//! queries consider only samples in `[now - window, now]` and compute
//! P50/P95/P99 by linear interpolation on the sorted CPU and memory series
//! independently.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

/// Default retention: 7 days.
pub const DEFAULT_RETENTION_SECS: i64 = 7 * 24 * 3600;

#[derive(Debug, Clone, Copy)]
struct Sample {
    ts: DateTime<Utc>,
    cpu_millis: i64,
    memory_bytes: i64,
}

/// Percentile summary of one subject over one window.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub data_points: usize,
    pub cpu_p50: f64,
    pub cpu_p95: f64,
    pub cpu_p99: f64,
    pub cpu_max: f64,
    pub memory_p50: f64,
    pub memory_p95: f64,
    pub memory_p99: f64,
    pub memory_max: f64,
}

pub struct MetricsStore {
    retention: Duration,
    nodes: RwLock<HashMap<String, VecDeque<Sample>>>,
    containers: RwLock<HashMap<(String, String, String), VecDeque<Sample>>>,
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_RETENTION_SECS))
    }
}

impl MetricsStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            nodes: RwLock::new(HashMap::new()),
            containers: RwLock::new(HashMap::new()),
        }
    }

    pub fn record_node(&self, name: &str, ts: DateTime<Utc>, cpu_millis: i64, memory_bytes: i64) {
        let mut nodes = self.nodes.write();
        let series = nodes.entry(name.to_string()).or_default();
        push_sample(
            series,
            Sample {
                ts,
                cpu_millis,
                memory_bytes,
            },
            self.retention,
        );
    }

    pub fn record_pod_container(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        ts: DateTime<Utc>,
        cpu_millis: i64,
        memory_bytes: i64,
    ) {
        let mut containers = self.containers.write();
        let series = containers
            .entry((namespace.to_string(), pod.to_string(), container.to_string()))
            .or_default();
        push_sample(
            series,
            Sample {
                ts,
                cpu_millis,
                memory_bytes,
            },
            self.retention,
        );
    }

    /// Window summary for a node; None when no samples fall in the window.
    pub fn node_window(&self, name: &str, window: Duration) -> Option<MetricsWindow> {
        let snapshot: Vec<Sample> = {
            let nodes = self.nodes.read();
            nodes.get(name)?.iter().copied().collect()
        };
        summarize(&snapshot, window)
    }

    /// Window summary for one container of one pod.
    pub fn pod_container_window(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        window: Duration,
    ) -> Option<MetricsWindow> {
        let snapshot: Vec<Sample> = {
            let containers = self.containers.read();
            containers
                .get(&(
                    namespace.to_string(),
                    pod.to_string(),
                    container.to_string(),
                ))?
                .iter()
                .copied()
                .collect()
        };
        summarize(&snapshot, window)
    }

    /// Container names with any retained samples for the given pod.
    pub fn containers_for_pod(&self, namespace: &str, pod: &str) -> Vec<String> {
        let containers = self.containers.read();
        let mut names: Vec<String> = containers
            .keys()
            .filter(|(ns, p, _)| ns == namespace && p == pod)
            .map(|(_, _, c)| c.clone())
            .collect();
        names.sort();
        names
    }

    pub fn tracked_node_count(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn tracked_container_count(&self) -> usize {
        self.containers.read().len()
    }
}

/// Insert preserving timestamp order; an equal timestamp replaces the old
/// sample (last write wins). Prunes entries past the retention horizon.
fn push_sample(series: &mut VecDeque<Sample>, sample: Sample, retention: Duration) {
    let horizon = Utc::now() - retention;
    while series.front().map(|s| s.ts < horizon).unwrap_or(false) {
        series.pop_front();
    }
    if sample.ts < horizon {
        return;
    }
    // Writes are append-mostly; walk back only as far as needed.
    let mut idx = series.len();
    while idx > 0 && series[idx - 1].ts > sample.ts {
        idx -= 1;
    }
    if idx > 0 && series[idx - 1].ts == sample.ts {
        series[idx - 1] = sample;
    } else {
        series.insert(idx, sample);
    }
}

fn summarize(samples: &[Sample], window: Duration) -> Option<MetricsWindow> {
    let end = Utc::now();
    let start = end - window;
    let mut cpu: Vec<f64> = Vec::new();
    let mut memory: Vec<f64> = Vec::new();
    for s in samples {
        if s.ts >= start && s.ts <= end {
            cpu.push(s.cpu_millis as f64);
            memory.push(s.memory_bytes as f64);
        }
    }
    if cpu.is_empty() {
        return None;
    }
    cpu.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    memory.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(MetricsWindow {
        start,
        end,
        data_points: cpu.len(),
        cpu_p50: percentile(&cpu, 50.0),
        cpu_p95: percentile(&cpu, 95.0),
        cpu_p99: percentile(&cpu, 99.0),
        cpu_max: *cpu.last().unwrap_or(&0.0),
        memory_p50: percentile(&memory, 50.0),
        memory_p95: percentile(&memory, 95.0),
        memory_p99: percentile(&memory, 99.0),
        memory_max: *memory.last().unwrap_or(&0.0),
    })
}

/// Linear-interpolation percentile over an ascending-sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = p / 100.0 * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let frac = rank - lower as f64;
            if lower + 1 >= n {
                sorted[n - 1]
            } else {
                sorted[lower] + frac * (sorted[lower + 1] - sorted[lower])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_interpolates() {
        let v = vec![1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&v, 50.0) - 2.5).abs() < 1e-9);
        assert!((percentile(&v, 0.0) - 1.0).abs() < 1e-9);
        assert!((percentile(&v, 100.0) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn duplicate_timestamp_last_write_wins() {
        let store = MetricsStore::default();
        let ts = Utc::now();
        store.record_node("n1", ts, 100, 1_000);
        store.record_node("n1", ts, 200, 2_000);
        let w = store.node_window("n1", Duration::hours(1)).unwrap();
        assert_eq!(w.data_points, 1);
        assert!((w.cpu_max - 200.0).abs() < 1e-9);
    }

    #[test]
    fn empty_window_is_none() {
        let store = MetricsStore::default();
        assert!(store.node_window("missing", Duration::hours(6)).is_none());
        store.record_node("n1", Utc::now() - Duration::hours(12), 100, 1_000);
        assert!(store.node_window("n1", Duration::hours(6)).is_none());
    }
}
