//! Kubernetes inventory and metrics-server contracts.
//!
//! [`ClusterInventory`] and [`UsageMetricsProvider`] are the seams the state
//! cache refreshes through; [`client::K8sClient`] implements both against a
//! live API server.

pub mod client;
pub mod quantity;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, Pod};

pub use client::K8sClient;

/// One measured node usage point.
#[derive(Debug, Clone)]
pub struct NodeUsageSample {
    pub node: String,
    pub ts: DateTime<Utc>,
    pub cpu_millis: i64,
    pub memory_bytes: i64,
}

/// One measured container usage point.
#[derive(Debug, Clone)]
pub struct ContainerUsageSample {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    pub ts: DateTime<Utc>,
    pub cpu_millis: i64,
    pub memory_bytes: i64,
}

/// Paginated inventory listing. Implementations bound each page fetch with a
/// per-call deadline.
#[async_trait]
pub trait ClusterInventory: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    async fn list_pods(&self) -> Result<Vec<Pod>>;
}

/// Usage samples from a metrics server. `Ok(None)` means the metrics API is
/// unavailable; values are never synthesized from requests.
#[async_trait]
pub trait UsageMetricsProvider: Send + Sync {
    async fn node_metrics(&self) -> Result<Option<Vec<NodeUsageSample>>>;

    async fn pod_metrics(&self) -> Result<Option<Vec<ContainerUsageSample>>>;
}
