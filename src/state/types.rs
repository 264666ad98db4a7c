//! In-memory cluster model joined from Kubernetes inventory, cloud pricing
//! and metrics-server usage.
//!
//! Conventions: CPU is integer millicores, memory is bytes, cost is USD.
//! Usage fields are zero when metrics are unavailable; consumers branch on
//! `metrics_available` / presence, never on synthesized values.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cloud::{NodeGroup, HOURS_PER_MONTH};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodState {
    pub namespace: String,
    pub name: String,
    pub node_name: Option<String>,
    /// Kind of the first owner reference, or "Pod" when the pod has none.
    pub owner_kind: String,
    /// Name of the first owner reference, or the pod name when none.
    pub owner_name: String,
    pub phase: String,
    pub started_at: Option<DateTime<Utc>>,
    pub labels: BTreeMap<String, String>,
    pub cpu_request_millis: i64,
    pub memory_request_bytes: i64,
    pub cpu_limit_millis: i64,
    pub memory_limit_bytes: i64,
    pub gpu_request: i64,
    pub cpu_used_millis: i64,
    pub memory_used_bytes: i64,
    /// Container names, for per-container history lookups.
    pub containers: Vec<String>,
    pub evictable: bool,
}

impl PodState {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Grouping key for workload attribution: `namespace/ownerKind/ownerName`.
    pub fn owner_key(&self) -> String {
        format!("{}/{}/{}", self.namespace, self.owner_kind, self.owner_name)
    }

    pub fn is_daemonset(&self) -> bool {
        self.owner_kind == "DaemonSet"
    }

    /// Only Running and Pending pods contribute to node aggregates.
    pub fn is_active(&self) -> bool {
        self.phase == "Running" || self.phase == "Pending"
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.started_at.map(|t| now - t)
    }

    pub fn has_usage(&self) -> bool {
        self.cpu_used_millis > 0 || self.memory_used_bytes > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub name: String,
    pub instance_type: String,
    pub instance_family: String,
    pub region: Option<String>,
    pub zone: Option<String>,
    pub cpu_capacity_millis: i64,
    pub memory_capacity_bytes: i64,
    pub gpu_count: i64,
    pub is_spot: bool,
    pub is_gpu: bool,
    pub hourly_cost_usd: f64,
    pub labels: BTreeMap<String, String>,
    pub pods: Vec<PodState>,
    /// Sum of Running+Pending pod requests.
    pub cpu_requested_millis: i64,
    pub memory_requested_bytes: i64,
    /// Measured usage from metrics; zero when unavailable.
    pub cpu_used_millis: i64,
    pub memory_used_bytes: i64,
    pub node_group_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl NodeState {
    pub fn monthly_cost_usd(&self) -> f64 {
        self.hourly_cost_usd * HOURS_PER_MONTH
    }

    pub fn cpu_utilization_pct(&self) -> f64 {
        if self.cpu_capacity_millis > 0 {
            self.cpu_used_millis as f64 / self.cpu_capacity_millis as f64 * 100.0
        } else {
            0.0
        }
    }

    pub fn memory_utilization_pct(&self) -> f64 {
        if self.memory_capacity_bytes > 0 {
            self.memory_used_bytes as f64 / self.memory_capacity_bytes as f64 * 100.0
        } else {
            0.0
        }
    }

    /// Every pod on the node is DaemonSet-owned (vacuously true with no pods).
    pub fn all_pods_daemonset(&self) -> bool {
        self.pods.iter().all(|p| p.is_daemonset())
    }

    /// Pods exist but neither CPU nor memory usage was measured; treated as
    /// unknown usage, not idle.
    pub fn usage_unknown(&self) -> bool {
        !self.pods.is_empty() && self.cpu_used_millis == 0 && self.memory_used_bytes == 0
    }
}

/// Immutable point-in-time view of the cluster: the canonical input to the
/// recommendation engine and the cost allocator. Consumers must not mutate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub taken_at: DateTime<Utc>,
    pub nodes: Vec<NodeState>,
    pub pods: Vec<PodState>,
    pub node_groups: Vec<NodeGroup>,
    pub metrics_available: bool,
}

impl ClusterSnapshot {
    pub fn node(&self, name: &str) -> Option<&NodeState> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn total_monthly_cost_usd(&self) -> f64 {
        self.nodes.iter().map(|n| n.monthly_cost_usd()).sum()
    }

    pub fn mean_cpu_utilization_pct(&self) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        self.nodes.iter().map(|n| n.cpu_utilization_pct()).sum::<f64>() / self.nodes.len() as f64
    }

    pub fn mean_memory_utilization_pct(&self) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        self.nodes
            .iter()
            .map(|n| n.memory_utilization_pct())
            .sum::<f64>()
            / self.nodes.len() as f64
    }
}
