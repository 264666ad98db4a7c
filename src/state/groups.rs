//! Roll-up of per-node facts to node groups.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cloud::NodeGroup;
use crate::state::types::NodeState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSummary {
    pub id: String,
    pub name: String,
    pub instance_family: String,
    pub node_count: usize,
    pub cpu_capacity_millis: i64,
    pub cpu_used_millis: i64,
    pub cpu_requested_millis: i64,
    pub memory_capacity_bytes: i64,
    pub memory_used_bytes: i64,
    pub memory_requested_bytes: i64,
    /// Pods on member nodes, DaemonSet-owned excluded.
    pub pod_count: usize,
    pub monthly_cost_usd: f64,
    /// Set while the group has no non-DaemonSet pods; survives refreshes.
    pub empty_since: Option<DateTime<Utc>>,
}

impl GroupSummary {
    pub fn cpu_utilization_pct(&self) -> f64 {
        ratio_pct(self.cpu_used_millis, self.cpu_capacity_millis)
    }

    pub fn memory_utilization_pct(&self) -> f64 {
        ratio_pct(self.memory_used_bytes, self.memory_capacity_bytes)
    }

    pub fn cpu_allocation_pct(&self) -> f64 {
        ratio_pct(self.cpu_requested_millis, self.cpu_capacity_millis)
    }

    pub fn memory_allocation_pct(&self) -> f64 {
        ratio_pct(self.memory_requested_bytes, self.memory_capacity_bytes)
    }
}

fn ratio_pct(num: i64, denom: i64) -> f64 {
    if denom > 0 {
        num as f64 / denom as f64 * 100.0
    } else {
        0.0
    }
}

/// Aggregates nodes into group summaries and carries `empty_since` across
/// refreshes.
pub struct NodeGroupAggregator {
    empty_since: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Default for NodeGroupAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeGroupAggregator {
    pub fn new() -> Self {
        Self {
            empty_since: Mutex::new(HashMap::new()),
        }
    }

    pub fn aggregate(&self, nodes: &[NodeState], groups: &[NodeGroup]) -> Vec<GroupSummary> {
        let now = Utc::now();
        let mut empty_since = self.empty_since.lock();
        let mut summaries: Vec<GroupSummary> = Vec::with_capacity(groups.len());

        for group in groups {
            let members: Vec<&NodeState> = nodes
                .iter()
                .filter(|n| n.node_group_id.as_deref() == Some(group.id.as_str()))
                .collect();

            let mut summary = GroupSummary {
                id: group.id.clone(),
                name: group.name.clone(),
                instance_family: group.instance_family.clone(),
                node_count: members.len(),
                cpu_capacity_millis: 0,
                cpu_used_millis: 0,
                cpu_requested_millis: 0,
                memory_capacity_bytes: 0,
                memory_used_bytes: 0,
                memory_requested_bytes: 0,
                pod_count: 0,
                monthly_cost_usd: 0.0,
                empty_since: None,
            };
            for n in &members {
                summary.cpu_capacity_millis += n.cpu_capacity_millis;
                summary.cpu_used_millis += n.cpu_used_millis;
                summary.cpu_requested_millis += n.cpu_requested_millis;
                summary.memory_capacity_bytes += n.memory_capacity_bytes;
                summary.memory_used_bytes += n.memory_used_bytes;
                summary.memory_requested_bytes += n.memory_requested_bytes;
                summary.pod_count += n.pods.iter().filter(|p| !p.is_daemonset()).count();
                summary.monthly_cost_usd += n.monthly_cost_usd();
            }

            let is_empty = summary.pod_count == 0;
            summary.empty_since = match (is_empty, empty_since.get(&group.id)) {
                (true, Some(since)) => Some(*since),
                (true, None) => {
                    empty_since.insert(group.id.clone(), now);
                    Some(now)
                }
                (false, _) => {
                    empty_since.remove(&group.id);
                    None
                }
            };
            summaries.push(summary);
        }

        // Forget groups the provider no longer lists.
        empty_since.retain(|id, _| groups.iter().any(|g| &g.id == id));

        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }
}
