//! Commitment monitor: joins provider commitments with discovered node
//! groups, then reports expiring and underutilized agreements.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};

use crate::audit::AuditLog;
use crate::cloud::{fetch_all_commitments, ProviderHandle};
use crate::state::commitments::CommitmentTracker;
use crate::state::ClusterStateCache;

use super::Reconciler;

pub struct CommitmentMonitorController {
    provider: ProviderHandle,
    cache: Arc<ClusterStateCache>,
    tracker: CommitmentTracker,
    audit: Arc<AuditLog>,
}

impl CommitmentMonitorController {
    pub fn new(
        provider: ProviderHandle,
        cache: Arc<ClusterStateCache>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            provider,
            cache,
            tracker: CommitmentTracker::default(),
            audit,
        }
    }
}

#[async_trait]
impl Reconciler for CommitmentMonitorController {
    fn name(&self) -> &str {
        "commitment-monitor"
    }

    async fn reconcile(&self) -> Result<()> {
        let commitments = fetch_all_commitments(&self.provider).await?;
        let groups = self.cache.get_node_groups();
        let commitments = self.tracker.annotate_utilization(commitments, &groups);

        let expiring = self.tracker.expiring(&commitments, Utc::now());
        for e in &expiring {
            warn!(
                "commitment {} expires in {} day(s) (within {}d window)",
                e.commitment.id, e.days_until_expiry, e.window_days
            );
        }
        let underutilized = self.tracker.underutilized(&commitments);
        for u in &underutilized {
            warn!(
                "commitment {} at {:.1}% utilization wastes ${:.2}/mo",
                u.commitment.id, u.commitment.utilization_pct, u.wasted_monthly_usd
            );
            self.audit.record(
                "commitment-underutilized",
                &u.commitment.id,
                "system",
                &format!(
                    "{:.1}% utilized, ${:.2}/mo wasted",
                    u.commitment.utilization_pct, u.wasted_monthly_usd
                ),
            );
        }
        info!(
            "commitment monitor: {} commitment(s), {} expiring, {} underutilized",
            commitments.len(),
            expiring.len(),
            underutilized.len()
        );
        Ok(())
    }
}
