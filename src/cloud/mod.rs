//! Cloud-provider contract: pricing, node-group inventory and commitments.
//!
//! Real SDK bindings live behind [`CloudProvider`]; optional capabilities
//! (spot-discount estimation, capacity-based fallback pricing, background
//! refresh) are separate trait objects on a [`ProviderHandle`] so callers
//! detect them by presence instead of downcasting.

pub mod labels;
pub mod static_provider;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hours in an average calendar month (365.25 * 24 / 12).
pub const HOURS_PER_MONTH: f64 = 730.5;

/// Spot discount assumed when a provider has no per-family estimator.
pub const DEFAULT_SPOT_DISCOUNT: f64 = 0.65;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupLifecycle {
    OnDemand,
    Spot,
    Mixed,
}

impl Default for GroupLifecycle {
    fn default() -> Self {
        GroupLifecycle::OnDemand
    }
}

/// A provider-managed bag of nodes (EKS node group, GKE node pool, AKS agent pool).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeGroup {
    pub id: String,
    pub name: String,
    pub instance_type: String,
    pub instance_family: String,
    #[serde(default)]
    pub region: Option<String>,
    pub current_count: u32,
    pub min_count: u32,
    pub max_count: u32,
    pub desired_count: u32,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<String>,
    #[serde(default)]
    pub lifecycle: GroupLifecycle,
    /// Share of the group expected to run on spot capacity, 0-100.
    #[serde(default)]
    pub spot_percentage: f64,
    #[serde(default)]
    pub disk_type: Option<String>,
    #[serde(default)]
    pub disk_size_gb: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitmentKind {
    ReservedInstance,
    SavingsPlan,
    CommittedUseDiscount,
    Reservation,
}

/// A reserved-capacity agreement. `utilization_pct` is computed against live
/// node groups, never trusted from the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commitment {
    pub id: String,
    pub kind: CommitmentKind,
    #[serde(default)]
    pub instance_family: Option<String>,
    #[serde(default)]
    pub instance_type: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    pub count: u32,
    pub hourly_cost_usd: f64,
    pub on_demand_equivalent_usd: f64,
    pub expires_at: DateTime<Utc>,
    /// Provider-reported status; only "active" commitments are matched.
    pub status: String,
    #[serde(default)]
    pub utilization_pct: f64,
}

/// Region pricing: instance type -> on-demand hourly USD.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingTable {
    pub region: String,
    pub hourly_by_instance_type: std::collections::HashMap<String, f64>,
}

impl PricingTable {
    pub fn hourly(&self, instance_type: &str) -> Option<f64> {
        self.hourly_by_instance_type.get(instance_type).copied()
    }
}

/// Required provider capability set. Partial failures are the caller's
/// problem: each commitment list is fetched independently so one failing
/// endpoint does not lose the others.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn list_instance_types(&self, region: &str) -> Result<Vec<String>>;

    async fn pricing_table(&self, region: &str) -> Result<PricingTable>;

    async fn node_groups(&self) -> Result<Vec<NodeGroup>>;

    async fn reserved_instances(&self) -> Result<Vec<Commitment>>;

    async fn savings_plans(&self) -> Result<Vec<Commitment>>;

    async fn committed_use_discounts(&self) -> Result<Vec<Commitment>>;

    async fn reservations(&self) -> Result<Vec<Commitment>>;

    /// Instance type for a node, from provider metadata or well-known labels.
    fn instance_type(&self, node_labels: &BTreeMap<String, String>) -> Option<String> {
        node_labels
            .get("node.kubernetes.io/instance-type")
            .or_else(|| node_labels.get("beta.kubernetes.io/instance-type"))
            .cloned()
    }

    fn region(&self, node_labels: &BTreeMap<String, String>) -> Option<String> {
        node_labels
            .get("topology.kubernetes.io/region")
            .or_else(|| node_labels.get("failure-domain.beta.kubernetes.io/region"))
            .cloned()
    }

    fn zone(&self, node_labels: &BTreeMap<String, String>) -> Option<String> {
        node_labels
            .get("topology.kubernetes.io/zone")
            .or_else(|| node_labels.get("failure-domain.beta.kubernetes.io/zone"))
            .cloned()
    }
}

/// Optional capability: per-family spot discount estimation.
pub trait SpotDiscountEstimator: Send + Sync {
    /// Expected spot discount for an instance type, in [0, 1].
    fn estimate_spot_discount(&self, instance_type: &str) -> f64;
}

/// Optional capability: price a node from raw capacity when the instance
/// type is missing from the pricing table.
pub trait FallbackPricer: Send + Sync {
    fn estimate_price_from_capacity(
        &self,
        instance_type: &str,
        region: &str,
        cpu_millis: i64,
        memory_bytes: i64,
    ) -> Option<f64>;
}

/// Optional capability: provider-side cache refresh daemon.
#[async_trait]
pub trait BackgroundRefresher: Send + Sync {
    async fn refresh(&self) -> Result<()>;
}

/// A registered provider plus whichever optional capabilities it implements.
#[derive(Clone)]
pub struct ProviderHandle {
    pub provider: Arc<dyn CloudProvider>,
    pub spot_estimator: Option<Arc<dyn SpotDiscountEstimator>>,
    pub fallback_pricer: Option<Arc<dyn FallbackPricer>>,
    pub refresher: Option<Arc<dyn BackgroundRefresher>>,
}

impl ProviderHandle {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self {
            provider,
            spot_estimator: None,
            fallback_pricer: None,
            refresher: None,
        }
    }

    pub fn with_spot_estimator(mut self, est: Arc<dyn SpotDiscountEstimator>) -> Self {
        self.spot_estimator = Some(est);
        self
    }

    pub fn with_fallback_pricer(mut self, pricer: Arc<dyn FallbackPricer>) -> Self {
        self.fallback_pricer = Some(pricer);
        self
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn BackgroundRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Spot discount for an instance type: estimator when present, else the default.
    pub fn spot_discount(&self, instance_type: &str) -> f64 {
        self.spot_estimator
            .as_ref()
            .map(|e| e.estimate_spot_discount(instance_type).clamp(0.0, 1.0))
            .unwrap_or(DEFAULT_SPOT_DISCOUNT)
    }
}

/// Fetch every commitment kind concurrently, accumulating what succeeds.
/// Partial failures are logged and tolerated; only a total failure is an
/// error.
pub async fn fetch_all_commitments(handle: &ProviderHandle) -> Result<Vec<Commitment>> {
    let p = &handle.provider;
    let (ri, sp, cud, res) = futures::future::join4(
        p.reserved_instances(),
        p.savings_plans(),
        p.committed_use_discounts(),
        p.reservations(),
    )
    .await;
    let mut commitments = Vec::new();
    let mut failures = 0usize;
    let mut last_error = None;
    for (label, result) in [
        ("reserved instances", ri),
        ("savings plans", sp),
        ("committed use discounts", cud),
        ("reservations", res),
    ] {
        match result {
            Ok(mut list) => commitments.append(&mut list),
            Err(e) => {
                log::warn!("{} fetch failed: {}", label, e);
                failures += 1;
                last_error = Some(e);
            }
        }
    }
    if failures == 4 {
        return Err(
            last_error.unwrap_or_else(|| anyhow::anyhow!("all commitment endpoints failed"))
        );
    }
    Ok(commitments)
}

/// Derive the instance family from an instance type: the leading segment
/// before the first size separator ("m5.xlarge" -> "m5", "n2-standard-4" -> "n2").
pub fn instance_family(instance_type: &str) -> String {
    let t = instance_type.trim();
    if let Some(idx) = t.find('.') {
        return t[..idx].to_string();
    }
    if let Some(idx) = t.find('-') {
        return t[..idx].to_string();
    }
    t.to_string()
}
