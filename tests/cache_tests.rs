use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use k8s_openapi::api::core::v1::{Node, Pod};
use kubethrift::cloud::static_provider::{CapacityPricing, StaticInventory, StaticProvider};
use kubethrift::cloud::{NodeGroup, ProviderHandle};
use kubethrift::k8s::{
    ClusterInventory, ContainerUsageSample, NodeUsageSample, UsageMetricsProvider,
};
use kubethrift::metrics::MetricsStore;
use kubethrift::state::ClusterStateCache;
use serde_json::json;

struct FakeInventory {
    nodes: Vec<Node>,
    pods: Vec<Pod>,
}

#[async_trait]
impl ClusterInventory for FakeInventory {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.nodes.clone())
    }

    async fn list_pods(&self) -> Result<Vec<Pod>> {
        Ok(self.pods.clone())
    }
}

struct FakeUsage {
    nodes: Option<Vec<NodeUsageSample>>,
    pods: Option<Vec<ContainerUsageSample>>,
}

#[async_trait]
impl UsageMetricsProvider for FakeUsage {
    async fn node_metrics(&self) -> Result<Option<Vec<NodeUsageSample>>> {
        Ok(self.nodes.clone())
    }

    async fn pod_metrics(&self) -> Result<Option<Vec<ContainerUsageSample>>> {
        Ok(self.pods.clone())
    }
}

fn k8s_node(name: &str, labels: serde_json::Value) -> Node {
    serde_json::from_value(json!({
        "metadata": {"name": name, "labels": labels},
        "status": {
            "allocatable": {"cpu": "4", "memory": "16Gi"},
            "capacity": {"cpu": "4", "memory": "16Gi"}
        }
    }))
    .unwrap()
}

fn k8s_pod(namespace: &str, name: &str, node: &str, cpu: &str, memory: &str) -> Pod {
    serde_json::from_value(json!({
        "metadata": {
            "name": name,
            "namespace": namespace,
            "ownerReferences": [{
                "apiVersion": "apps/v1",
                "kind": "ReplicaSet",
                "name": format!("{}-rs", name),
                "uid": "u1"
            }]
        },
        "spec": {
            "nodeName": node,
            "containers": [{
                "name": "app",
                "resources": {"requests": {"cpu": cpu, "memory": memory}}
            }]
        },
        "status": {
            "phase": "Running",
            "startTime": (Utc::now() - Duration::hours(1)).to_rfc3339()
        }
    }))
    .unwrap()
}

fn inventory_with_group() -> StaticInventory {
    let mut inv = StaticInventory::default();
    inv.pricing.insert("m5.large".to_string(), 0.096);
    inv.node_groups.push(NodeGroup {
        id: "web-pool".to_string(),
        name: "web-pool".to_string(),
        instance_type: "m5.large".to_string(),
        instance_family: "m5".to_string(),
        region: Some("us-east-1".to_string()),
        current_count: 1,
        min_count: 0,
        max_count: 5,
        desired_count: 1,
        labels: Default::default(),
        taints: Vec::new(),
        lifecycle: Default::default(),
        spot_percentage: 0.0,
        disk_type: None,
        disk_size_gb: None,
    });
    inv
}

fn cache_for(
    nodes: Vec<Node>,
    pods: Vec<Pod>,
    usage: FakeUsage,
    inventory: StaticInventory,
) -> (ClusterStateCache, Arc<MetricsStore>) {
    let history = Arc::new(MetricsStore::default());
    let handle: ProviderHandle = StaticProvider::new(inventory).into_handle();
    let cache = ClusterStateCache::new(
        Arc::new(FakeInventory { nodes, pods }),
        Arc::new(usage),
        handle,
        Arc::clone(&history),
    );
    (cache, history)
}

fn node_labels(instance_type: &str) -> serde_json::Value {
    json!({
        "node.kubernetes.io/instance-type": instance_type,
        "topology.kubernetes.io/region": "us-east-1",
        "eks.amazonaws.com/nodegroup": "web-pool"
    })
}

#[tokio::test]
async fn refresh_joins_inventory_pricing_and_groups() {
    let (cache, _) = cache_for(
        vec![k8s_node("n1", node_labels("m5.large"))],
        vec![k8s_pod("prod", "api-1", "n1", "500m", "1Gi")],
        FakeUsage {
            nodes: None,
            pods: None,
        },
        inventory_with_group(),
    );
    cache.refresh().await.unwrap();

    let node = cache.get_node("n1").expect("node published");
    assert_eq!(node.instance_type, "m5.large");
    assert_eq!(node.instance_family, "m5");
    assert_eq!(node.cpu_capacity_millis, 4000);
    assert_eq!(node.memory_capacity_bytes, 16 * 1024 * 1024 * 1024);
    assert!((node.hourly_cost_usd - 0.096).abs() < 1e-9);
    assert_eq!(node.node_group_id.as_deref(), Some("web-pool"));
    assert_eq!(node.cpu_requested_millis, 500);
    assert_eq!(node.pods.len(), 1);
    assert_eq!(node.pods[0].owner_kind, "ReplicaSet");

    assert!(!cache.metrics_available());
    let snapshot = cache.snapshot();
    assert_eq!(snapshot.nodes.len(), 1);
    assert_eq!(snapshot.pods.len(), 1);
    assert!(!snapshot.metrics_available);
    assert!(cache.last_refresh().is_some());
}

#[tokio::test]
async fn usage_samples_flow_into_state_and_history() {
    let now = Utc::now();
    let (cache, history) = cache_for(
        vec![k8s_node("n1", node_labels("m5.large"))],
        vec![k8s_pod("prod", "api-1", "n1", "500m", "1Gi")],
        FakeUsage {
            nodes: Some(vec![NodeUsageSample {
                node: "n1".to_string(),
                ts: now,
                cpu_millis: 1200,
                memory_bytes: 2_000_000_000,
            }]),
            pods: Some(vec![
                ContainerUsageSample {
                    namespace: "prod".to_string(),
                    pod: "api-1".to_string(),
                    container: "app".to_string(),
                    ts: now,
                    cpu_millis: 80,
                    memory_bytes: 300_000_000,
                },
                ContainerUsageSample {
                    namespace: "prod".to_string(),
                    pod: "api-1".to_string(),
                    container: "sidecar".to_string(),
                    ts: now,
                    cpu_millis: 20,
                    memory_bytes: 100_000_000,
                },
            ]),
        },
        inventory_with_group(),
    );
    cache.refresh().await.unwrap();

    assert!(cache.metrics_available());
    let node = cache.get_node("n1").unwrap();
    assert_eq!(node.cpu_used_millis, 1200);

    // Container samples sum onto the pod and land per-container in history.
    let pods = cache.get_all_pods();
    assert_eq!(pods[0].cpu_used_millis, 100);
    assert_eq!(pods[0].memory_used_bytes, 400_000_000);
    assert!(history.node_window("n1", Duration::hours(6)).is_some());
    assert!(history
        .pod_container_window("prod", "api-1", "sidecar", Duration::hours(24))
        .is_some());
}

#[tokio::test]
async fn spot_nodes_get_discounted_pricing() {
    let mut labels = node_labels("m5.large");
    labels["node.kubernetes.io/lifecycle"] = json!("spot");
    let mut inv = inventory_with_group();
    inv.spot_discounts = Some([("m5".to_string(), 0.70)].into_iter().collect());

    let (cache, _) = cache_for(
        vec![k8s_node("n1", labels)],
        vec![],
        FakeUsage {
            nodes: None,
            pods: None,
        },
        inv,
    );
    cache.refresh().await.unwrap();

    let node = cache.get_node("n1").unwrap();
    assert!(node.is_spot);
    assert!((node.hourly_cost_usd - 0.096 * 0.30).abs() < 1e-9);
}

#[tokio::test]
async fn unknown_instance_type_uses_capacity_fallback() {
    let mut inv = StaticInventory::default();
    inv.capacity_pricing = Some(CapacityPricing {
        usd_per_vcpu_hour: 0.02,
        usd_per_gb_hour: 0.004,
    });
    let (cache, _) = cache_for(
        vec![k8s_node("n1", json!({"node.kubernetes.io/instance-type": "exotic.2xlarge"}))],
        vec![],
        FakeUsage {
            nodes: None,
            pods: None,
        },
        inv,
    );
    cache.refresh().await.unwrap();

    let node = cache.get_node("n1").unwrap();
    let expected = 4.0 * 0.02 + (16.0 * 1024.0 * 1024.0 * 1024.0 / 1e9) * 0.004;
    assert!((node.hourly_cost_usd - expected).abs() < 1e-6);
}

#[tokio::test]
async fn init_container_requests_follow_the_max_rule() {
    let pod: Pod = serde_json::from_value(json!({
        "metadata": {"name": "migrator", "namespace": "prod"},
        "spec": {
            "nodeName": "n1",
            "initContainers": [{
                "name": "init",
                "resources": {"requests": {"cpu": "2", "memory": "1Gi"}}
            }],
            "containers": [
                {"name": "a", "resources": {"requests": {"cpu": "500m", "memory": "256Mi"}}},
                {"name": "b", "resources": {"requests": {"cpu": "300m", "memory": "256Mi"}}}
            ]
        },
        "status": {"phase": "Running"}
    }))
    .unwrap();

    let (cache, _) = cache_for(
        vec![k8s_node("n1", node_labels("m5.large"))],
        vec![pod],
        FakeUsage {
            nodes: None,
            pods: None,
        },
        inventory_with_group(),
    );
    cache.refresh().await.unwrap();

    let pods = cache.get_all_pods();
    assert_eq!(pods.len(), 1);
    // max(init 2000m, 500m + 300m) and max(1Gi, 512Mi).
    assert_eq!(pods[0].cpu_request_millis, 2000);
    assert_eq!(pods[0].memory_request_bytes, 1024 * 1024 * 1024);
    // No owner reference: attributed as Pod/<name>.
    assert_eq!(pods[0].owner_kind, "Pod");
    assert_eq!(pods[0].owner_name, "migrator");
}

#[tokio::test]
async fn empty_since_survives_refreshes() {
    let (cache, _) = cache_for(
        vec![k8s_node("n1", node_labels("m5.large"))],
        vec![],
        FakeUsage {
            nodes: None,
            pods: None,
        },
        inventory_with_group(),
    );
    cache.refresh().await.unwrap();
    let first = cache.group_summaries();
    assert_eq!(first.len(), 1);
    let since = first[0].empty_since.expect("group with no pods is empty");

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    cache.refresh().await.unwrap();
    let second = cache.group_summaries();
    assert_eq!(second[0].empty_since, Some(since));
}
