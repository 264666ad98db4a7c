//! Cost monitor: recomputes recommendations from the latest cluster
//! snapshot, routes high-impact proposals through the safety gate and
//! records the outcomes to the audit trail. The state cache refreshes on
//! its own ticker; this controller only reads it.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::info;

use crate::audit::AuditLog;
use crate::cloud::{fetch_all_commitments, ProviderHandle};
use crate::engine::{total_potential_savings, RecommendationEngine};
use crate::safety::gate::{ClusterContext, SafetyGate, ValidationRequest};
use crate::state::ClusterStateCache;

use super::Reconciler;

pub struct CostMonitorController {
    cache: Arc<ClusterStateCache>,
    engine: Arc<RecommendationEngine>,
    provider: ProviderHandle,
    gate: Option<Arc<SafetyGate>>,
    audit: Arc<AuditLog>,
}

impl CostMonitorController {
    pub fn new(
        cache: Arc<ClusterStateCache>,
        engine: Arc<RecommendationEngine>,
        provider: ProviderHandle,
        gate: Option<Arc<SafetyGate>>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            cache,
            engine,
            provider,
            gate,
            audit,
        }
    }
}

#[async_trait]
impl Reconciler for CostMonitorController {
    fn name(&self) -> &str {
        "cost-monitor"
    }

    async fn reconcile(&self) -> Result<()> {
        if self.cache.last_refresh().is_none() {
            log::debug!("cluster state not refreshed yet, skipping tick");
            return Ok(());
        }
        let snapshot = self.cache.snapshot();
        let history = self.cache.history();

        // Each tick works on a fresh snapshot; drop the cached result.
        self.engine.invalidate();
        let recommendations = self.engine.recommendations(&snapshot, Some(history.as_ref()));
        let total = total_potential_savings(&recommendations);

        if let Some(gate) = &self.gate {
            let commitments = fetch_all_commitments(&self.provider)
                .await
                .unwrap_or_default();
            let context =
                ClusterContext::build(&snapshot, &self.cache.group_summaries(), &commitments);
            for rec in &recommendations {
                let request = ValidationRequest::from_recommendation(rec);
                if !gate.requires_validation(&request) {
                    continue;
                }
                let decision = gate.evaluate(&request, &context).await;
                self.audit.record(
                    "gate-decision",
                    &rec.target,
                    "system",
                    &format!(
                        "{}: {}",
                        if decision.approved { "approved" } else { "denied" },
                        decision.reasoning
                    ),
                );
            }
        }

        info!(
            "cost monitor: {} nodes, ${:.2}/mo, {} recommendation(s), ${:.2}/mo potential savings",
            snapshot.nodes.len(),
            snapshot.total_monthly_cost_usd(),
            recommendations.len(),
            total
        );
        self.audit.record(
            "cost-report",
            "cluster",
            "system",
            &format!(
                "{} recommendations, ${:.2}/mo potential savings",
                recommendations.len(),
                total
            ),
        );
        Ok(())
    }
}
