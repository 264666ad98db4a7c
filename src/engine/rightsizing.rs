//! Pod rightsizing: workloads whose requests are far above what they use.
//!
//! Skipped entirely when almost no pods have usage data, so the engine never
//! emits confidently-wrong rightsizing advice on a cluster without metrics.

use std::collections::BTreeMap;

use chrono::Duration;

use crate::cloud::HOURS_PER_MONTH;
use crate::metrics::MetricsStore;
use crate::state::types::{ClusterSnapshot, PodState};

use super::types::{Priority, Recommendation, RecommendationType};
use super::{
    round2, EngineConfig, CONFIDENCE_POINT, CONFIDENCE_WINDOWED, MIN_POD_SAMPLES,
    POD_WINDOW_HOURS, SYSTEM_NAMESPACES,
};

/// Minimum share of pods with any usage data before rightsizing runs.
const MIN_USAGE_COVERAGE: f64 = 0.10;

/// A dimension under this fraction of its request is over-provisioned.
const OVERPROVISIONED_EFFICIENCY: f64 = 0.5;

/// Pods younger than this have not reached steady state.
const MIN_POD_AGE_MINUTES: i64 = 10;

const WASTED_HIGH_USD: f64 = 100.0;
const WASTED_MEDIUM_USD: f64 = 20.0;

struct Efficiency {
    cpu: Option<f64>,
    memory: Option<f64>,
    confidence: f64,
}

impl Efficiency {
    /// Highest efficiency across dimensions that have a request.
    fn max(&self) -> f64 {
        self.cpu.unwrap_or(0.0).max(self.memory.unwrap_or(0.0))
    }

    fn over_provisioned(&self) -> bool {
        if self.confidence == CONFIDENCE_WINDOWED {
            self.max() < OVERPROVISIONED_EFFICIENCY
        } else {
            // Point-in-time: either dimension with a non-zero request below
            // the threshold is enough.
            self.cpu.map(|e| e < OVERPROVISIONED_EFFICIENCY).unwrap_or(false)
                || self
                    .memory
                    .map(|e| e < OVERPROVISIONED_EFFICIENCY)
                    .unwrap_or(false)
        }
    }
}

/// Windowed efficiency needs a full 24h history for every container of the
/// pod; anything less falls back to point-in-time.
fn pod_efficiency(pod: &PodState, history: Option<&MetricsStore>) -> Efficiency {
    if let Some(store) = history {
        let windows: Vec<_> = pod
            .containers
            .iter()
            .map(|c| {
                store.pod_container_window(
                    &pod.namespace,
                    &pod.name,
                    c,
                    Duration::hours(POD_WINDOW_HOURS),
                )
            })
            .collect();
        let all_covered = !windows.is_empty()
            && windows
                .iter()
                .all(|w| w.as_ref().map(|w| w.data_points >= MIN_POD_SAMPLES).unwrap_or(false));
        if all_covered {
            let cpu_p95: f64 = windows.iter().flatten().map(|w| w.cpu_p95).sum();
            let mem_p95: f64 = windows.iter().flatten().map(|w| w.memory_p95).sum();
            return Efficiency {
                cpu: Some(cpu_p95 / pod.cpu_request_millis as f64),
                memory: if pod.memory_request_bytes > 0 {
                    Some(mem_p95 / pod.memory_request_bytes as f64)
                } else {
                    None
                },
                confidence: CONFIDENCE_WINDOWED,
            };
        }
    }
    Efficiency {
        cpu: Some(pod.cpu_used_millis as f64 / pod.cpu_request_millis as f64),
        memory: if pod.memory_request_bytes > 0 {
            Some(pod.memory_used_bytes as f64 / pod.memory_request_bytes as f64)
        } else {
            None
        },
        confidence: CONFIDENCE_POINT,
    }
}

struct OwnerWaste {
    wasted_usd: f64,
    pod_count: usize,
    confidence: f64,
}

pub fn rightsizing_recommendations(
    snapshot: &ClusterSnapshot,
    history: Option<&MetricsStore>,
    config: &EngineConfig,
) -> Vec<Recommendation> {
    if snapshot.pods.is_empty() {
        return Vec::new();
    }
    let with_usage = snapshot.pods.iter().filter(|p| p.has_usage()).count();
    if (with_usage as f64) < MIN_USAGE_COVERAGE * snapshot.pods.len() as f64 {
        return Vec::new();
    }

    let mut by_owner: BTreeMap<String, OwnerWaste> = BTreeMap::new();
    for pod in &snapshot.pods {
        if pod.phase != "Running"
            || SYSTEM_NAMESPACES.contains(&pod.namespace.as_str())
            || pod.cpu_request_millis <= 0
        {
            continue;
        }
        match pod.age_at(snapshot.taken_at) {
            Some(age) if age >= Duration::minutes(MIN_POD_AGE_MINUTES) => {}
            _ => continue,
        }
        let node = match pod.node_name.as_deref().and_then(|n| snapshot.node(n)) {
            Some(n) if n.cpu_requested_millis > 0 => n,
            _ => continue,
        };

        let efficiency = pod_efficiency(pod, history);
        if !efficiency.over_provisioned() {
            continue;
        }

        let allocated = node.hourly_cost_usd
            * HOURS_PER_MONTH
            * (pod.cpu_request_millis as f64 / node.cpu_requested_millis as f64);
        let wasted = allocated * (1.0 - efficiency.max().clamp(0.0, 1.0));

        let entry = by_owner.entry(pod.owner_key()).or_insert(OwnerWaste {
            wasted_usd: 0.0,
            pod_count: 0,
            confidence: efficiency.confidence,
        });
        entry.wasted_usd += wasted;
        entry.pod_count += 1;
        entry.confidence = entry.confidence.min(efficiency.confidence);
    }

    let mut recs = Vec::new();
    for (owner, waste) in by_owner {
        let wasted = round2(waste.wasted_usd);
        if wasted < config.min_savings_usd {
            continue;
        }
        let priority = if wasted > WASTED_HIGH_USD {
            Priority::High
        } else if wasted > WASTED_MEDIUM_USD {
            Priority::Medium
        } else {
            Priority::Low
        };
        recs.push(Recommendation::new(
            RecommendationType::Rightsizing,
            owner.clone(),
            format!(
                "Workload {} over-requests resources across {} pod(s); lower requests to match usage",
                owner, waste.pod_count
            ),
            wasted,
            priority,
            waste.confidence,
        ));
    }
    recs
}
