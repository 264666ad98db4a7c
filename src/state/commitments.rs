//! Match reserved-capacity commitments to live node groups and compute
//! utilization, expiry warnings and waste.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cloud::{Commitment, NodeGroup, HOURS_PER_MONTH};

/// Expiry warning windows, days. The report uses the smallest window the
/// expiry fits in.
pub const DEFAULT_WARNING_WINDOWS_DAYS: [i64; 3] = [30, 60, 90];

/// A commitment below this utilization counts as underutilized.
pub const UNDERUTILIZED_THRESHOLD_PCT: f64 = 50.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiringCommitment {
    pub commitment: Commitment,
    pub days_until_expiry: i64,
    /// Smallest configured warning window the expiry fits in.
    pub window_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnderutilizedCommitment {
    pub commitment: Commitment,
    pub wasted_monthly_usd: f64,
}

pub struct CommitmentTracker {
    warning_windows_days: Vec<i64>,
}

impl Default for CommitmentTracker {
    fn default() -> Self {
        Self {
            warning_windows_days: DEFAULT_WARNING_WINDOWS_DAYS.to_vec(),
        }
    }
}

impl CommitmentTracker {
    pub fn new(mut warning_windows_days: Vec<i64>) -> Self {
        warning_windows_days.sort_unstable();
        if warning_windows_days.is_empty() {
            warning_windows_days = DEFAULT_WARNING_WINDOWS_DAYS.to_vec();
        }
        Self {
            warning_windows_days,
        }
    }

    /// Recompute `utilization_pct` for each commitment from discovered node
    /// groups. Inactive commitments report zero.
    pub fn annotate_utilization(
        &self,
        commitments: Vec<Commitment>,
        groups: &[NodeGroup],
    ) -> Vec<Commitment> {
        commitments
            .into_iter()
            .map(|mut c| {
                c.utilization_pct = if c.status == "active" {
                    let running: u32 = groups
                        .iter()
                        .filter(|g| commitment_matches_group(&c, g))
                        .map(|g| g.current_count)
                        .sum();
                    if c.count > 0 {
                        (running as f64 / c.count as f64 * 100.0).min(100.0)
                    } else {
                        0.0
                    }
                } else {
                    0.0
                };
                c
            })
            .collect()
    }

    /// Commitments expiring within the largest warning window, each tagged
    /// with the tightest window its expiry fits in.
    pub fn expiring(
        &self,
        commitments: &[Commitment],
        now: DateTime<Utc>,
    ) -> Vec<ExpiringCommitment> {
        let mut out = Vec::new();
        for c in commitments {
            let days = (c.expires_at - now).num_days();
            if days < 0 {
                continue;
            }
            if let Some(window) = self
                .warning_windows_days
                .iter()
                .find(|w| days <= **w)
                .copied()
            {
                out.push(ExpiringCommitment {
                    commitment: c.clone(),
                    days_until_expiry: days,
                    window_days: window,
                });
            }
        }
        out.sort_by_key(|e| e.days_until_expiry);
        out
    }

    /// Active commitments below 50% utilization, with the monthly spend that
    /// buys nothing.
    pub fn underutilized(&self, commitments: &[Commitment]) -> Vec<UnderutilizedCommitment> {
        let mut out: Vec<UnderutilizedCommitment> = commitments
            .iter()
            .filter(|c| c.status == "active" && c.utilization_pct < UNDERUTILIZED_THRESHOLD_PCT)
            .map(|c| UnderutilizedCommitment {
                wasted_monthly_usd: c.hourly_cost_usd
                    * HOURS_PER_MONTH
                    * (1.0 - c.utilization_pct / 100.0),
                commitment: c.clone(),
            })
            .collect();
        out.sort_by(|a, b| {
            b.wasted_monthly_usd
                .partial_cmp(&a.wasted_monthly_usd)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        out
    }
}

/// A group satisfies a commitment when regions agree (case-insensitive,
/// only enforced when both sides specify one) and the instance type matches
/// for type-locked commitments, or the instance family matches
/// (case-insensitive) for family-flexible ones.
fn commitment_matches_group(c: &Commitment, g: &NodeGroup) -> bool {
    if let (Some(cr), Some(gr)) = (c.region.as_deref(), g.region.as_deref()) {
        if !cr.eq_ignore_ascii_case(gr) {
            return false;
        }
    }
    if let Some(ct) = c.instance_type.as_deref() {
        return ct == g.instance_type;
    }
    if let Some(cf) = c.instance_family.as_deref() {
        return cf.eq_ignore_ascii_case(&g.instance_family);
    }
    false
}
