//! Node-group consolidation: shrink groups whose aggregate utilization
//! leaves room to retire whole nodes.

use std::collections::BTreeMap;

use chrono::Duration;

use crate::cloud::HOURS_PER_MONTH;
use crate::metrics::MetricsStore;
use crate::state::types::{ClusterSnapshot, NodeState};

use super::types::{Priority, Recommendation, RecommendationType};
use super::{
    round2, EngineConfig, CONFIDENCE_POINT, CONFIDENCE_WINDOWED, MIN_NODE_SAMPLES,
    NODE_WINDOW_HOURS,
};

/// Groups running at or above this on either axis are left alone.
const MAX_UTILIZATION_PCT: f64 = 25.0;

/// Sizing target: keep the surviving nodes near this utilization.
const TARGET_UTILIZATION_PCT: f64 = 50.0;

pub fn group_consolidation_recommendations(
    snapshot: &ClusterSnapshot,
    history: Option<&MetricsStore>,
    config: &EngineConfig,
) -> Vec<Recommendation> {
    let mut by_group: BTreeMap<&str, Vec<&NodeState>> = BTreeMap::new();
    for node in &snapshot.nodes {
        if let Some(id) = node.node_group_id.as_deref() {
            by_group.entry(id).or_default().push(node);
        }
    }

    let mut recs = Vec::new();
    for (group, members) in by_group {
        if members.len() < 2 || members.iter().any(|n| n.is_gpu) {
            continue;
        }

        let cpu_capacity: i64 = members.iter().map(|n| n.cpu_capacity_millis).sum();
        let memory_capacity: i64 = members.iter().map(|n| n.memory_capacity_bytes).sum();

        let windows: Vec<_> = history
            .map(|store| {
                members
                    .iter()
                    .map(|n| store.node_window(&n.name, Duration::hours(NODE_WINDOW_HOURS)))
                    .collect()
            })
            .unwrap_or_default();
        let all_windowed = windows.len() == members.len()
            && windows
                .iter()
                .all(|w| w.as_ref().map(|w| w.data_points >= MIN_NODE_SAMPLES).unwrap_or(false));

        let (cpu_util, memory_util, confidence) = if all_windowed {
            let cpu_p95: f64 = windows.iter().flatten().map(|w| w.cpu_p95).sum();
            let mem_p95: f64 = windows.iter().flatten().map(|w| w.memory_p95).sum();
            (
                ratio_pct(cpu_p95, cpu_capacity),
                ratio_pct(mem_p95, memory_capacity),
                CONFIDENCE_WINDOWED,
            )
        } else {
            let cpu_used: i64 = members.iter().map(|n| n.cpu_used_millis).sum();
            let mem_used: i64 = members.iter().map(|n| n.memory_used_bytes).sum();
            (
                ratio_pct(cpu_used as f64, cpu_capacity),
                ratio_pct(mem_used as f64, memory_capacity),
                CONFIDENCE_POINT,
            )
        };

        // Both zero means metrics almost certainly never arrived.
        if cpu_util == 0.0 && memory_util == 0.0 {
            continue;
        }
        if cpu_util >= MAX_UTILIZATION_PCT || memory_util >= MAX_UTILIZATION_PCT {
            continue;
        }

        let node_count = members.len();
        let utilization = cpu_util.max(memory_util);
        let target_count =
            ((node_count as f64 * utilization / TARGET_UTILIZATION_PCT).ceil() as usize).max(1);
        if target_count >= node_count {
            continue;
        }
        let removable = node_count - target_count;
        // Sum hourly directly; dividing per node and re-multiplying by the
        // month constant drifts.
        let hourly_sum: f64 = members.iter().map(|n| n.hourly_cost_usd).sum();
        let avg_hourly = hourly_sum / node_count as f64;
        let savings = round2(removable as f64 * avg_hourly * HOURS_PER_MONTH);
        if savings < config.min_savings_usd {
            continue;
        }
        recs.push(
            Recommendation::new(
                RecommendationType::Consolidation,
                group.to_string(),
                format!(
                    "Group {} runs {} nodes at {:.1}% peak utilization; {} can be removed",
                    group, node_count, utilization, removable
                ),
                savings,
                Priority::Medium,
                confidence,
            )
            .with_nodes_affected(removable as u32),
        );
    }
    recs
}

fn ratio_pct(used: f64, capacity: i64) -> f64 {
    if capacity > 0 {
        used / capacity as f64 * 100.0
    } else {
        0.0
    }
}
