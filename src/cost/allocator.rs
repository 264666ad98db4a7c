//! Attribute node cost to namespaces and workloads.
//!
//! Each node's full monthly cost is distributed across its pods by a blended
//! CPU+memory request weight, so per-node allocations sum exactly to the
//! node's cost and cluster totals are conserved.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::state::types::{ClusterSnapshot, NodeState};

/// One pod's share of its node's monthly cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostAllocation {
    pub namespace: String,
    pub pod: String,
    pub node: String,
    pub owner_kind: String,
    pub owner_name: String,
    pub monthly_cost_usd: f64,
}

impl CostAllocation {
    pub fn owner_key(&self) -> String {
        format!("{}/{}/{}", self.namespace, self.owner_kind, self.owner_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceCost {
    pub namespace: String,
    pub monthly_cost_usd: f64,
    pub pod_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadCost {
    pub namespace: String,
    pub owner_kind: String,
    pub owner_name: String,
    pub monthly_cost_usd: f64,
    pub pod_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelValueCost {
    pub value: String,
    pub monthly_cost_usd: f64,
    pub pod_count: usize,
}

/// Blended weight of one pod on one node:
/// `0.5 * cpu_req/cpu_cap + 0.5 * mem_req/mem_cap`. A zero capacity
/// contributes zero to its half.
fn blended_weight(node: &NodeState, cpu_request_millis: i64, memory_request_bytes: i64) -> f64 {
    let cpu_half = if node.cpu_capacity_millis > 0 {
        0.5 * cpu_request_millis as f64 / node.cpu_capacity_millis as f64
    } else {
        0.0
    };
    let mem_half = if node.memory_capacity_bytes > 0 {
        0.5 * memory_request_bytes as f64 / node.memory_capacity_bytes as f64
    } else {
        0.0
    };
    cpu_half + mem_half
}

/// Two-pass allocation per node: compute weights, then distribute the node's
/// monthly cost proportionally. Nodes whose pods all weigh zero are skipped.
pub fn allocate(snapshot: &ClusterSnapshot) -> Vec<CostAllocation> {
    let mut out = Vec::new();
    for node in &snapshot.nodes {
        let weights: Vec<f64> = node
            .pods
            .iter()
            .map(|p| blended_weight(node, p.cpu_request_millis, p.memory_request_bytes))
            .collect();
        let total: f64 = weights.iter().sum();
        if total == 0.0 {
            continue;
        }
        let node_monthly = node.monthly_cost_usd();
        for (pod, w) in node.pods.iter().zip(weights) {
            out.push(CostAllocation {
                namespace: pod.namespace.clone(),
                pod: pod.name.clone(),
                node: node.name.clone(),
                owner_kind: pod.owner_kind.clone(),
                owner_name: pod.owner_name.clone(),
                monthly_cost_usd: node_monthly * w / total,
            });
        }
    }
    out
}

pub fn namespace_costs(allocations: &[CostAllocation]) -> Vec<NamespaceCost> {
    let mut by_ns: HashMap<&str, (f64, usize)> = HashMap::new();
    for a in allocations {
        let entry = by_ns.entry(a.namespace.as_str()).or_insert((0.0, 0));
        entry.0 += a.monthly_cost_usd;
        entry.1 += 1;
    }
    let mut out: Vec<NamespaceCost> = by_ns
        .into_iter()
        .map(|(ns, (cost, count))| NamespaceCost {
            namespace: ns.to_string(),
            monthly_cost_usd: cost,
            pod_count: count,
        })
        .collect();
    sort_desc(&mut out, |c| c.monthly_cost_usd, |c| c.namespace.clone());
    out
}

/// Per-workload costs keyed `namespace/ownerKind/ownerName`, cost descending.
/// Pass `top_n` to truncate.
pub fn workload_costs(allocations: &[CostAllocation], top_n: Option<usize>) -> Vec<WorkloadCost> {
    let mut by_owner: HashMap<String, WorkloadCost> = HashMap::new();
    for a in allocations {
        let entry = by_owner
            .entry(a.owner_key())
            .or_insert_with(|| WorkloadCost {
                namespace: a.namespace.clone(),
                owner_kind: a.owner_kind.clone(),
                owner_name: a.owner_name.clone(),
                monthly_cost_usd: 0.0,
                pod_count: 0,
            });
        entry.monthly_cost_usd += a.monthly_cost_usd;
        entry.pod_count += 1;
    }
    let mut out: Vec<WorkloadCost> = by_owner.into_values().collect();
    sort_desc(
        &mut out,
        |c| c.monthly_cost_usd,
        |c| format!("{}/{}/{}", c.namespace, c.owner_kind, c.owner_name),
    );
    if let Some(n) = top_n {
        out.truncate(n);
    }
    out
}

/// True for label keys that are Kubernetes plumbing rather than tenant
/// attribution; excluded from label-grouped views.
pub fn is_system_label_key(key: &str) -> bool {
    key.starts_with("kubernetes.io/")
        || key.starts_with("k8s.io/")
        || key.contains(".kubernetes.io/")
        || key.contains(".k8s.io/")
}

/// Label keys present on pods that are eligible for cost grouping, sorted.
pub fn groupable_label_keys(snapshot: &ClusterSnapshot) -> Vec<String> {
    let mut keys: Vec<String> = snapshot
        .pods
        .iter()
        .flat_map(|p| p.labels.keys().cloned())
        .filter(|k| !is_system_label_key(k))
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

/// Costs grouped by the values of one pod label. Pods without the label are
/// reported under `(none)`.
pub fn label_costs(
    snapshot: &ClusterSnapshot,
    allocations: &[CostAllocation],
    label_key: &str,
) -> Vec<LabelValueCost> {
    if is_system_label_key(label_key) {
        return Vec::new();
    }
    let label_by_pod: HashMap<String, &str> = snapshot
        .pods
        .iter()
        .filter_map(|p| {
            p.labels
                .get(label_key)
                .map(|v| (p.key(), v.as_str()))
        })
        .collect();
    let mut by_value: HashMap<String, (f64, usize)> = HashMap::new();
    for a in allocations {
        let value = label_by_pod
            .get(&format!("{}/{}", a.namespace, a.pod))
            .copied()
            .unwrap_or("(none)");
        let entry = by_value.entry(value.to_string()).or_insert((0.0, 0));
        entry.0 += a.monthly_cost_usd;
        entry.1 += 1;
    }
    let mut out: Vec<LabelValueCost> = by_value
        .into_iter()
        .map(|(value, (cost, count))| LabelValueCost {
            value,
            monthly_cost_usd: cost,
            pod_count: count,
        })
        .collect();
    sort_desc(&mut out, |c| c.monthly_cost_usd, |c| c.value.clone());
    out
}

/// Sort by cost descending with a stable name tiebreak.
fn sort_desc<T>(items: &mut [T], cost: impl Fn(&T) -> f64, name: impl Fn(&T) -> String) {
    items.sort_by(|a, b| {
        cost(b)
            .partial_cmp(&cost(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| name(a).cmp(&name(b)))
    });
}
