//! Shared fixture builders for integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use kubethrift::state::types::{ClusterSnapshot, NodeState, PodState};

pub fn node(name: &str, hourly: f64) -> NodeState {
    NodeState {
        name: name.to_string(),
        instance_type: "m5.large".to_string(),
        instance_family: "m5".to_string(),
        region: Some("us-east-1".to_string()),
        zone: None,
        cpu_capacity_millis: 4000,
        memory_capacity_bytes: 16_000_000_000,
        gpu_count: 0,
        is_spot: false,
        is_gpu: false,
        hourly_cost_usd: hourly,
        labels: BTreeMap::new(),
        pods: Vec::new(),
        cpu_requested_millis: 0,
        memory_requested_bytes: 0,
        cpu_used_millis: 0,
        memory_used_bytes: 0,
        node_group_id: None,
        created_at: Some(Utc::now() - Duration::days(30)),
    }
}

pub fn pod(namespace: &str, name: &str, owner_kind: &str, owner_name: &str) -> PodState {
    PodState {
        namespace: namespace.to_string(),
        name: name.to_string(),
        node_name: None,
        owner_kind: owner_kind.to_string(),
        owner_name: owner_name.to_string(),
        phase: "Running".to_string(),
        started_at: Some(Utc::now() - Duration::hours(2)),
        labels: BTreeMap::new(),
        cpu_request_millis: 0,
        memory_request_bytes: 0,
        cpu_limit_millis: 0,
        memory_limit_bytes: 0,
        gpu_request: 0,
        cpu_used_millis: 0,
        memory_used_bytes: 0,
        containers: vec!["main".to_string()],
        evictable: true,
    }
}

/// Attach a pod to a node, keeping request sums and back-references in sync.
pub fn attach(node: &mut NodeState, mut p: PodState) {
    p.node_name = Some(node.name.clone());
    if p.phase == "Running" || p.phase == "Pending" {
        node.cpu_requested_millis += p.cpu_request_millis;
        node.memory_requested_bytes += p.memory_request_bytes;
    }
    node.pods.push(p);
}

pub fn snapshot(nodes: Vec<NodeState>) -> ClusterSnapshot {
    let pods = nodes.iter().flat_map(|n| n.pods.clone()).collect();
    ClusterSnapshot {
        taken_at: Utc::now(),
        nodes,
        pods,
        node_groups: Vec::new(),
        metrics_available: true,
    }
}
