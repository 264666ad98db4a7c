use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::Request;
use kube::api::ListParams;
use kube::config::Kubeconfig;
use kube::{Api, Client, Config};
use k8s_openapi::api::core::v1::{Node, Pod};
use serde::Deserialize;

use super::quantity::{parse_cpu_str, parse_memory_str};
use super::{ClusterInventory, ContainerUsageSample, NodeUsageSample, UsageMetricsProvider};

/// Page size for node/pod list calls; bounds peak memory on large clusters.
const LIST_PAGE_SIZE: u32 = 500;

/// Per-call deadline for list requests, seconds.
const LIST_TIMEOUT_SECS: u32 = 15;

fn infer_cluster_name() -> Option<String> {
    let kubeconfig = Kubeconfig::read().ok()?;
    let current = kubeconfig.current_context.as_ref()?;
    let named = kubeconfig.contexts.iter().find(|nc| nc.name == *current)?;
    let ctx = named.context.as_ref()?;
    Some(ctx.cluster.clone())
}

#[derive(Clone)]
pub struct K8sClient {
    client: Client,
    cluster_name: Option<String>,
}

impl K8sClient {
    pub async fn new(config_file: Option<&str>) -> Result<Self> {
        if let Some(path) = config_file {
            std::env::set_var("KUBECONFIG", path);
        }
        let cluster_name = infer_cluster_name();
        let config = Config::infer().await?;
        let client = Client::try_from(config)?;
        Ok(Self {
            client,
            cluster_name,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Cluster name from kubeconfig current context, or None if in-cluster or unset.
    pub fn cluster_name(&self) -> Option<&str> {
        self.cluster_name.as_deref()
    }

    pub fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    pub fn pods(&self) -> Api<Pod> {
        Api::all(self.client.clone())
    }

    /// List with cursor pagination so a single response never carries more
    /// than one page of objects.
    async fn list_paged<K>(&self, api: Api<K>) -> Result<Vec<K>>
    where
        K: Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        let mut items = Vec::new();
        let mut continue_token: Option<String> = None;
        loop {
            let mut lp = ListParams::default()
                .limit(LIST_PAGE_SIZE)
                .timeout(LIST_TIMEOUT_SECS);
            if let Some(token) = &continue_token {
                lp = lp.continue_token(token);
            }
            let page = api.list(&lp).await?;
            items.extend(page.items);
            continue_token = page.metadata.continue_.filter(|t| !t.is_empty());
            if continue_token.is_none() {
                break;
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl ClusterInventory for K8sClient {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        self.list_paged(self.nodes()).await
    }

    async fn list_pods(&self) -> Result<Vec<Pod>> {
        self.list_paged(self.pods()).await
    }
}

#[async_trait]
impl UsageMetricsProvider for K8sClient {
    /// Node usage from metrics.k8s.io/v1beta1 (requires metrics-server).
    /// Returns None when the API is unavailable.
    async fn node_metrics(&self) -> Result<Option<Vec<NodeUsageSample>>> {
        let req = Request::builder()
            .method("GET")
            .uri("/apis/metrics.k8s.io/v1beta1/nodes")
            .body(vec![])
            .map_err(|e| anyhow::anyhow!("build request: {}", e))?;
        let list: NodeMetricsList = match self.client.request(req).await {
            Ok(l) => l,
            Err(_) => return Ok(None),
        };
        let out = list
            .items
            .into_iter()
            .map(|m| {
                let ts = parse_metric_timestamp(m.timestamp.as_deref());
                NodeUsageSample {
                    node: m.metadata.name,
                    ts,
                    cpu_millis: m
                        .usage
                        .get("cpu")
                        .and_then(|s| parse_cpu_str(s))
                        .unwrap_or(0),
                    memory_bytes: m
                        .usage
                        .get("memory")
                        .and_then(|s| parse_memory_str(s))
                        .unwrap_or(0),
                }
            })
            .collect();
        Ok(Some(out))
    }

    /// Per-container pod usage from metrics.k8s.io/v1beta1; None when the
    /// API is unavailable.
    async fn pod_metrics(&self) -> Result<Option<Vec<ContainerUsageSample>>> {
        let req = Request::builder()
            .method("GET")
            .uri("/apis/metrics.k8s.io/v1beta1/pods")
            .body(vec![])
            .map_err(|e| anyhow::anyhow!("build request: {}", e))?;
        let list: PodMetricsList = match self.client.request(req).await {
            Ok(l) => l,
            Err(_) => return Ok(None),
        };
        let mut out = Vec::new();
        for pm in list.items {
            let namespace = pm.metadata.namespace.unwrap_or_default();
            let pod = pm.metadata.name;
            let ts = parse_metric_timestamp(pm.timestamp.as_deref());
            for c in pm.containers {
                out.push(ContainerUsageSample {
                    namespace: namespace.clone(),
                    pod: pod.clone(),
                    container: c.name,
                    ts,
                    cpu_millis: c
                        .usage
                        .get("cpu")
                        .and_then(|s| parse_cpu_str(s))
                        .unwrap_or(0),
                    memory_bytes: c
                        .usage
                        .get("memory")
                        .and_then(|s| parse_memory_str(s))
                        .unwrap_or(0),
                });
            }
        }
        Ok(Some(out))
    }
}

fn parse_metric_timestamp(ts: Option<&str>) -> DateTime<Utc> {
    ts.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[derive(Deserialize)]
struct NodeMetricsList {
    items: Vec<NodeMetrics>,
}

#[derive(Deserialize)]
struct NodeMetrics {
    metadata: MetricsMeta,
    #[serde(default)]
    timestamp: Option<String>,
    usage: std::collections::HashMap<String, String>,
}

#[derive(Deserialize)]
struct PodMetricsList {
    items: Vec<PodMetrics>,
}

#[derive(Deserialize)]
struct PodMetrics {
    metadata: MetricsMeta,
    #[serde(default)]
    timestamp: Option<String>,
    containers: Vec<ContainerMetrics>,
}

#[derive(Deserialize)]
struct MetricsMeta {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Deserialize)]
struct ContainerMetrics {
    name: String,
    usage: std::collections::HashMap<String, String>,
}
