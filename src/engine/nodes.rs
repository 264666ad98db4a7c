//! Node-level consolidation analyses: empty nodes and underutilized nodes.

use crate::cloud::HOURS_PER_MONTH;
use crate::metrics::MetricsStore;
use crate::state::types::ClusterSnapshot;

use super::types::{Priority, Recommendation, RecommendationType};
use super::{node_utilization, round2, EngineConfig, CONFIDENCE_EMPTY};

/// Threshold below which a node counts as underutilized on both axes.
const UNDERUTILIZED_PCT: f64 = 20.0;
/// Both axes below this escalate the priority.
const SEVERELY_UNDERUTILIZED_PCT: f64 = 10.0;

/// Nodes running nothing but DaemonSet pods are pure overhead; removing one
/// saves its whole monthly cost.
pub fn empty_node_recommendations(
    snapshot: &ClusterSnapshot,
    config: &EngineConfig,
) -> Vec<Recommendation> {
    let mut recs = Vec::new();
    for node in &snapshot.nodes {
        if node.is_gpu || !node.all_pods_daemonset() {
            continue;
        }
        let savings = round2(node.hourly_cost_usd * HOURS_PER_MONTH);
        if savings < config.min_savings_usd {
            continue;
        }
        recs.push(
            Recommendation::new(
                RecommendationType::Consolidation,
                node.name.clone(),
                format!(
                    "Node {} runs only DaemonSet pods ({} pods); drain and remove it",
                    node.name,
                    node.pods.len()
                ),
                savings,
                Priority::Critical,
                CONFIDENCE_EMPTY,
            )
            .with_nodes_affected(1),
        );
    }
    recs
}

/// Non-empty nodes whose measured CPU and memory are both below 20%.
/// Windowed P95 utilization is preferred; point-in-time is the low-confidence
/// fallback. Nodes with pods but zero measured usage are unknown, not idle.
pub fn underutilized_node_recommendations(
    snapshot: &ClusterSnapshot,
    history: Option<&MetricsStore>,
    config: &EngineConfig,
) -> Vec<Recommendation> {
    let mut recs = Vec::new();
    for node in &snapshot.nodes {
        if node.is_gpu || node.all_pods_daemonset() {
            continue;
        }
        if node.usage_unknown() {
            continue;
        }
        let estimate = node_utilization(node, history);
        if estimate.cpu_pct >= UNDERUTILIZED_PCT || estimate.memory_pct >= UNDERUTILIZED_PCT {
            continue;
        }
        let savings = round2(node.hourly_cost_usd * HOURS_PER_MONTH);
        if savings < config.min_savings_usd {
            continue;
        }
        let priority = if estimate.cpu_pct < SEVERELY_UNDERUTILIZED_PCT
            && estimate.memory_pct < SEVERELY_UNDERUTILIZED_PCT
        {
            Priority::High
        } else {
            Priority::Medium
        };
        recs.push(
            Recommendation::new(
                RecommendationType::Consolidation,
                node.name.clone(),
                format!(
                    "Node {} is underutilized (cpu {:.1}%, memory {:.1}%); migrate workloads and remove it",
                    node.name, estimate.cpu_pct, estimate.memory_pct
                ),
                savings,
                priority,
                estimate.confidence,
            )
            .with_nodes_affected(1),
        );
    }
    recs
}
