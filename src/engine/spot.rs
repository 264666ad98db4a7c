//! Spot adoption: on-demand capacity that could run on interruptible
//! instances, grouped by node group.

use std::collections::BTreeMap;

use crate::cloud::{SpotDiscountEstimator, HOURS_PER_MONTH};
use crate::state::types::ClusterSnapshot;

use super::types::{Priority, Recommendation, RecommendationType};
use super::{round2, EngineConfig, CONFIDENCE_POINT};

pub fn spot_recommendations(
    snapshot: &ClusterSnapshot,
    estimator: Option<&dyn SpotDiscountEstimator>,
    config: &EngineConfig,
) -> Vec<Recommendation> {
    // BTreeMap keeps group iteration stable.
    let mut groups: BTreeMap<String, (usize, f64)> = BTreeMap::new();
    for node in &snapshot.nodes {
        if node.is_gpu || node.is_spot {
            continue;
        }
        let key = node
            .node_group_id
            .clone()
            .unwrap_or_else(|| format!("ungrouped-{}", node.instance_type));
        let discount = estimator
            .map(|e| e.estimate_spot_discount(&node.instance_type).clamp(0.0, 1.0))
            .unwrap_or(config.default_spot_discount);
        let entry = groups.entry(key).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += node.hourly_cost_usd * discount;
    }

    let mut recs = Vec::new();
    for (group, (count, hourly_savings)) in groups {
        let savings = round2(hourly_savings * HOURS_PER_MONTH);
        if savings < config.min_savings_usd {
            continue;
        }
        recs.push(
            Recommendation::new(
                RecommendationType::Spot,
                group.clone(),
                format!(
                    "Move {} on-demand node(s) in {} to spot capacity",
                    count, group
                ),
                savings,
                Priority::Medium,
                CONFIDENCE_POINT,
            )
            .with_nodes_affected(count as u32),
        );
    }
    recs
}
