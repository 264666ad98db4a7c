//! Config-backed provider: serves the pricing table, node groups and
//! commitments declared in the optimizer config file. Stands in for real
//! cloud SDK bindings and gives tests a deterministic provider.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    instance_family, CloudProvider, Commitment, FallbackPricer, NodeGroup, PricingTable,
    ProviderHandle, SpotDiscountEstimator,
};

/// Per-capacity pricing used when an instance type is missing from the table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CapacityPricing {
    pub usd_per_vcpu_hour: f64,
    pub usd_per_gb_hour: f64,
}

/// The cloud inventory section of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticInventory {
    /// On-demand hourly USD by instance type, applied to every region.
    pub pricing: HashMap<String, f64>,
    pub node_groups: Vec<NodeGroup>,
    pub reserved_instances: Vec<Commitment>,
    pub savings_plans: Vec<Commitment>,
    pub committed_use_discounts: Vec<Commitment>,
    pub reservations: Vec<Commitment>,
    /// Spot discount by instance family; presence enables the estimator capability.
    pub spot_discounts: Option<HashMap<String, f64>>,
    /// Presence enables the capacity-based fallback pricer capability.
    pub capacity_pricing: Option<CapacityPricing>,
}

pub struct StaticProvider {
    inventory: StaticInventory,
}

impl StaticProvider {
    pub fn new(inventory: StaticInventory) -> Self {
        Self { inventory }
    }

    /// Build a [`ProviderHandle`] registering the optional capabilities the
    /// inventory declares.
    pub fn into_handle(self) -> ProviderHandle {
        let spot = self.inventory.spot_discounts.clone();
        let capacity = self.inventory.capacity_pricing;
        let mut handle = ProviderHandle::new(Arc::new(self));
        if let Some(by_family) = spot {
            handle = handle.with_spot_estimator(Arc::new(StaticSpotEstimator { by_family }));
        }
        if let Some(pricing) = capacity {
            handle = handle.with_fallback_pricer(Arc::new(CapacityPricer { pricing }));
        }
        handle
    }
}

#[async_trait]
impl CloudProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn list_instance_types(&self, _region: &str) -> Result<Vec<String>> {
        let mut types: Vec<String> = self.inventory.pricing.keys().cloned().collect();
        types.sort();
        Ok(types)
    }

    async fn pricing_table(&self, region: &str) -> Result<PricingTable> {
        Ok(PricingTable {
            region: region.to_string(),
            hourly_by_instance_type: self.inventory.pricing.clone(),
        })
    }

    async fn node_groups(&self) -> Result<Vec<NodeGroup>> {
        Ok(self.inventory.node_groups.clone())
    }

    async fn reserved_instances(&self) -> Result<Vec<Commitment>> {
        Ok(self.inventory.reserved_instances.clone())
    }

    async fn savings_plans(&self) -> Result<Vec<Commitment>> {
        Ok(self.inventory.savings_plans.clone())
    }

    async fn committed_use_discounts(&self) -> Result<Vec<Commitment>> {
        Ok(self.inventory.committed_use_discounts.clone())
    }

    async fn reservations(&self) -> Result<Vec<Commitment>> {
        Ok(self.inventory.reservations.clone())
    }
}

struct StaticSpotEstimator {
    by_family: HashMap<String, f64>,
}

impl SpotDiscountEstimator for StaticSpotEstimator {
    fn estimate_spot_discount(&self, instance_type: &str) -> f64 {
        let family = instance_family(instance_type);
        self.by_family
            .get(&family)
            .or_else(|| self.by_family.get(instance_type))
            .copied()
            .unwrap_or(super::DEFAULT_SPOT_DISCOUNT)
            .clamp(0.0, 1.0)
    }
}

struct CapacityPricer {
    pricing: CapacityPricing,
}

impl FallbackPricer for CapacityPricer {
    fn estimate_price_from_capacity(
        &self,
        _instance_type: &str,
        _region: &str,
        cpu_millis: i64,
        memory_bytes: i64,
    ) -> Option<f64> {
        if cpu_millis <= 0 && memory_bytes <= 0 {
            return None;
        }
        let vcpus = cpu_millis as f64 / 1000.0;
        let gb = memory_bytes as f64 / 1e9;
        Some(vcpus * self.pricing.usd_per_vcpu_hour + gb * self.pricing.usd_per_gb_hour)
    }
}
