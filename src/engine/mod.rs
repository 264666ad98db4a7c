//! Recommendation engine: five analyses over a cluster snapshot plus usage
//! history, with dedup, prioritization and a TTL'd result cache.

pub mod groups;
pub mod nodes;
pub mod rightsizing;
pub mod spot;
pub mod types;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::Duration;
use parking_lot::Mutex;

use crate::cloud::SpotDiscountEstimator;
use crate::metrics::MetricsStore;
use crate::state::types::{ClusterSnapshot, NodeState};

pub use types::{computed_id, Priority, Recommendation, RecommendationType};

/// Recommendations below this monthly saving are noise.
pub const MIN_SAVINGS_USD: f64 = 5.0;

/// Spot discount assumed when no per-family estimator is registered.
pub const DEFAULT_SPOT_DISCOUNT: f64 = 0.60;

/// Node history window and the sample count required to trust it.
pub const NODE_WINDOW_HOURS: i64 = 6;
pub const MIN_NODE_SAMPLES: usize = 360;

/// Pod-container history window and required samples.
pub const POD_WINDOW_HOURS: i64 = 24;
pub const MIN_POD_SAMPLES: usize = 1440;

pub const CONFIDENCE_EMPTY: f64 = 0.95;
pub const CONFIDENCE_WINDOWED: f64 = 0.90;
pub const CONFIDENCE_POINT: f64 = 0.70;

pub(crate) const SYSTEM_NAMESPACES: &[&str] = &["kube-system", "kube-public", "kube-node-lease"];

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub min_savings_usd: f64,
    pub default_spot_discount: f64,
    pub cache_ttl: StdDuration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_savings_usd: MIN_SAVINGS_USD,
            default_spot_discount: DEFAULT_SPOT_DISCOUNT,
            cache_ttl: StdDuration::from_secs(300),
        }
    }
}

/// Measured utilization of one node, with the confidence tier of its source.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UtilizationEstimate {
    pub cpu_pct: f64,
    pub memory_pct: f64,
    pub confidence: f64,
}

/// Prefer the 6h P95 window when it has enough samples; fall back to
/// point-in-time usage at lower confidence.
pub(crate) fn node_utilization(
    node: &NodeState,
    history: Option<&MetricsStore>,
) -> UtilizationEstimate {
    if let Some(store) = history {
        if let Some(w) = store.node_window(&node.name, Duration::hours(NODE_WINDOW_HOURS)) {
            if w.data_points >= MIN_NODE_SAMPLES {
                let cpu_pct = if node.cpu_capacity_millis > 0 {
                    w.cpu_p95 / node.cpu_capacity_millis as f64 * 100.0
                } else {
                    0.0
                };
                let memory_pct = if node.memory_capacity_bytes > 0 {
                    w.memory_p95 / node.memory_capacity_bytes as f64 * 100.0
                } else {
                    0.0
                };
                return UtilizationEstimate {
                    cpu_pct,
                    memory_pct,
                    confidence: CONFIDENCE_WINDOWED,
                };
            }
        }
    }
    UtilizationEstimate {
        cpu_pct: node.cpu_utilization_pct(),
        memory_pct: node.memory_utilization_pct(),
        confidence: CONFIDENCE_POINT,
    }
}

struct CacheEntry {
    computed_at: Instant,
    recommendations: Vec<Recommendation>,
}

/// Engine instance owning its TTL cache; construct one per process and pass
/// it around instead of reaching for a global.
pub struct RecommendationEngine {
    config: EngineConfig,
    spot_estimator: Option<Arc<dyn SpotDiscountEstimator>>,
    cache: Mutex<Option<CacheEntry>>,
}

impl RecommendationEngine {
    pub fn new(
        config: EngineConfig,
        spot_estimator: Option<Arc<dyn SpotDiscountEstimator>>,
    ) -> Self {
        Self {
            config,
            spot_estimator,
            cache: Mutex::new(None),
        }
    }

    /// Ordered recommendations for the snapshot. Results are cached for the
    /// configured TTL; callers needing fresh output invalidate first.
    pub fn recommendations(
        &self,
        snapshot: &ClusterSnapshot,
        history: Option<&MetricsStore>,
    ) -> Vec<Recommendation> {
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.as_ref() {
                if entry.computed_at.elapsed() < self.config.cache_ttl {
                    return entry.recommendations.clone();
                }
            }
        }
        let recommendations = self.compute(snapshot, history);
        *self.cache.lock() = Some(CacheEntry {
            computed_at: Instant::now(),
            recommendations: recommendations.clone(),
        });
        recommendations
    }

    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    fn compute(
        &self,
        snapshot: &ClusterSnapshot,
        history: Option<&MetricsStore>,
    ) -> Vec<Recommendation> {
        let mut recs = Vec::new();
        recs.extend(nodes::empty_node_recommendations(snapshot, &self.config));
        recs.extend(nodes::underutilized_node_recommendations(
            snapshot,
            history,
            &self.config,
        ));
        recs.extend(spot::spot_recommendations(
            snapshot,
            self.spot_estimator.as_deref(),
            &self.config,
        ));
        recs.extend(rightsizing::rightsizing_recommendations(
            snapshot,
            history,
            &self.config,
        ));
        recs.extend(groups::group_consolidation_recommendations(
            snapshot,
            history,
            &self.config,
        ));
        // Total order: savings descending, id ascending on ties.
        recs.sort_by(|a, b| {
            b.monthly_savings_usd
                .partial_cmp(&a.monthly_savings_usd)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        recs
    }
}

/// Target strings that look like node-group-level recommendations rather
/// than single nodes or workloads.
fn is_group_level_target(rec: &Recommendation) -> bool {
    const NODE_NAME_PREFIXES: &[&str] = &["ip-", "gke-", "aks-", "node"];
    matches!(
        rec.rec_type,
        RecommendationType::Consolidation | RecommendationType::Spot
    ) && !rec.target.contains('/')
        && !NODE_NAME_PREFIXES
            .iter()
            .any(|p| rec.target.starts_with(p))
}

/// Total potential savings under the dedup contract: per-target maxima, with
/// targets textually subsumed by an already-counted node-group target
/// skipped so node-level consolidations do not double-count their group.
pub fn total_potential_savings(recommendations: &[Recommendation]) -> f64 {
    let mut best: HashMap<&str, &Recommendation> = HashMap::new();
    for rec in recommendations {
        match best.get(rec.target.as_str()) {
            Some(existing) if existing.monthly_savings_usd >= rec.monthly_savings_usd => {}
            _ => {
                best.insert(rec.target.as_str(), rec);
            }
        }
    }
    let mut maxima: Vec<&Recommendation> = best.into_values().collect();
    maxima.sort_by(|a, b| {
        b.monthly_savings_usd
            .partial_cmp(&a.monthly_savings_usd)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.target.cmp(&b.target))
    });

    let mut counted_groups: HashSet<&str> = HashSet::new();
    let mut total = 0.0;
    for rec in maxima {
        let subsumed = counted_groups
            .iter()
            .any(|g| rec.target.as_str() != *g && rec.target.contains(*g));
        if subsumed {
            continue;
        }
        total += rec.monthly_savings_usd;
        if is_group_level_target(rec) {
            counted_groups.insert(rec.target.as_str());
        }
    }
    total
}

/// Round to cents for display and savings comparisons.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
