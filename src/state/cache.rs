//! Cluster state cache: a concurrent, periodically refreshed snapshot of
//! nodes, pods and node groups, joining Kubernetes inventory with provider
//! pricing and metrics-server usage.
//!
//! Refresh does all network I/O first and publishes the new maps under a
//! briefly held write lock, so readers see either the pre- or post-refresh
//! state, never a mix.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Container, Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use log::{debug, info, warn};
use parking_lot::RwLock;

use crate::cloud::{instance_family, labels, NodeGroup, PricingTable, ProviderHandle};
use crate::k8s::quantity::{parse_cpu_str, parse_memory_str};
use crate::k8s::{ClusterInventory, UsageMetricsProvider};
use crate::metrics::MetricsStore;
use crate::state::groups::{GroupSummary, NodeGroupAggregator};
use crate::state::types::{ClusterSnapshot, NodeState, PodState};

const GPU_RESOURCE_KEY: &str = "nvidia.com/gpu";
const SAFE_TO_EVICT_ANNOTATION: &str = "cluster-autoscaler.kubernetes.io/safe-to-evict";

/// Node and pod maps published together so a reader never observes a mix of
/// pre- and post-refresh state.
#[derive(Default)]
struct PublishedState {
    nodes: HashMap<String, NodeState>,
    pods: HashMap<String, PodState>,
    metrics_available: bool,
    last_refresh: Option<DateTime<Utc>>,
}

pub struct ClusterStateCache {
    inventory: Arc<dyn ClusterInventory>,
    usage: Arc<dyn UsageMetricsProvider>,
    provider: ProviderHandle,
    history: Arc<MetricsStore>,
    state: RwLock<PublishedState>,
    groups: RwLock<Vec<NodeGroup>>,
    group_summaries: RwLock<Vec<GroupSummary>>,
    aggregator: NodeGroupAggregator,
    pricing: RwLock<PricingTable>,
}

impl ClusterStateCache {
    pub fn new(
        inventory: Arc<dyn ClusterInventory>,
        usage: Arc<dyn UsageMetricsProvider>,
        provider: ProviderHandle,
        history: Arc<MetricsStore>,
    ) -> Self {
        Self {
            inventory,
            usage,
            provider,
            history,
            state: RwLock::new(PublishedState::default()),
            groups: RwLock::new(Vec::new()),
            group_summaries: RwLock::new(Vec::new()),
            aggregator: NodeGroupAggregator::new(),
            pricing: RwLock::new(PricingTable::default()),
        }
    }

    /// Full refresh. Inventory failures abort and leave the last-known state
    /// published; cloud and metrics failures degrade within the refresh.
    pub async fn refresh(&self) -> Result<()> {
        let started = std::time::Instant::now();

        let k8s_nodes = self.inventory.list_nodes().await.context("list nodes")?;
        let k8s_pods = self.inventory.list_pods().await.context("list pods")?;

        let groups = match self.provider.provider.node_groups().await {
            Ok(g) => g,
            Err(e) => {
                warn!("node group discovery failed, keeping last-known groups: {}", e);
                self.groups.read().clone()
            }
        };

        let node_samples = match self.usage.node_metrics().await {
            Ok(v) => v,
            Err(e) => {
                warn!("node metrics fetch failed: {}", e);
                None
            }
        };
        let metrics_available = node_samples.is_some();
        if !metrics_available {
            debug!("metrics server unavailable; usage stays at zero");
        }
        let pod_samples = match self.usage.pod_metrics().await {
            Ok(v) => v,
            Err(e) => {
                warn!("pod metrics fetch failed: {}", e);
                None
            }
        };

        let mut node_usage: HashMap<String, (i64, i64)> = HashMap::new();
        if let Some(samples) = &node_samples {
            for s in samples {
                self.history
                    .record_node(&s.node, s.ts, s.cpu_millis, s.memory_bytes);
                node_usage.insert(s.node.clone(), (s.cpu_millis, s.memory_bytes));
            }
        }
        // Sum container samples per pod; history keeps them per container.
        let mut pod_usage: HashMap<(String, String), (i64, i64)> = HashMap::new();
        if let Some(samples) = &pod_samples {
            for s in samples {
                self.history.record_pod_container(
                    &s.namespace,
                    &s.pod,
                    &s.container,
                    s.ts,
                    s.cpu_millis,
                    s.memory_bytes,
                );
                let entry = pod_usage
                    .entry((s.namespace.clone(), s.pod.clone()))
                    .or_insert((0, 0));
                entry.0 += s.cpu_millis;
                entry.1 += s.memory_bytes;
            }
        }

        // Region from the first node; the pricing table is fetched once per
        // refresh, never per node.
        let default_region = k8s_nodes
            .iter()
            .find_map(|n| {
                self.provider
                    .provider
                    .region(&node_labels(n))
            })
            .unwrap_or_else(|| "unknown".to_string());
        let pricing = match self.provider.provider.pricing_table(&default_region).await {
            Ok(table) => {
                *self.pricing.write() = table.clone();
                table
            }
            Err(e) => {
                warn!(
                    "pricing fetch for region {} failed, using last-known table: {}",
                    default_region, e
                );
                self.pricing.read().clone()
            }
        };

        let mut pod_map: HashMap<String, PodState> = HashMap::new();
        for pod in &k8s_pods {
            if let Some(mut ps) = pod_state_from(pod) {
                if let Some((cpu, mem)) = pod_usage.get(&(ps.namespace.clone(), ps.name.clone())) {
                    ps.cpu_used_millis = *cpu;
                    ps.memory_used_bytes = *mem;
                }
                pod_map.insert(ps.key(), ps);
            }
        }

        let mut pods_by_node: HashMap<String, Vec<PodState>> = HashMap::new();
        for ps in pod_map.values() {
            if let Some(node) = &ps.node_name {
                pods_by_node.entry(node.clone()).or_default().push(ps.clone());
            }
        }

        let mut node_map: HashMap<String, NodeState> = HashMap::new();
        for node in &k8s_nodes {
            let name = match node.metadata.name.as_deref() {
                Some(n) => n.to_string(),
                None => continue,
            };
            let mut pods = pods_by_node.remove(&name).unwrap_or_default();
            pods.sort_by(|a, b| a.key().cmp(&b.key()));
            let usage = node_usage.get(&name).copied();
            let ns = self.build_node(node, name, pods, usage, &groups, &pricing, &default_region);
            node_map.insert(ns.name.clone(), ns);
        }

        let nodes_for_groups: Vec<NodeState> = node_map.values().cloned().collect();
        let summaries = self.aggregator.aggregate(&nodes_for_groups, &groups);

        let node_count = node_map.len();
        let pod_count = pod_map.len();

        // Publish: exclusive locks held only for the swaps.
        {
            let mut state = self.state.write();
            *state = PublishedState {
                nodes: node_map,
                pods: pod_map,
                metrics_available,
                last_refresh: Some(Utc::now()),
            };
        }
        {
            let mut g = self.groups.write();
            *g = groups;
        }
        {
            let mut s = self.group_summaries.write();
            *s = summaries;
        }

        info!(
            "cluster state refreshed: {} nodes, {} pods, metrics_available={} ({} ms)",
            node_count,
            pod_count,
            metrics_available,
            started.elapsed().as_millis()
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build_node(
        &self,
        node: &Node,
        name: String,
        pods: Vec<PodState>,
        usage: Option<(i64, i64)>,
        groups: &[NodeGroup],
        pricing: &PricingTable,
        default_region: &str,
    ) -> NodeState {
        let labels_map = node_labels(node);
        let status = node.status.as_ref();
        let allocatable = status.and_then(|s| s.allocatable.as_ref());
        let capacity = status.and_then(|s| s.capacity.as_ref());

        // Allocatable is what pods can actually consume; capacity is the
        // fallback when the kubelet has not reported allocatable.
        let cpu_capacity_millis = quantity_from(allocatable, "cpu", parse_cpu_str)
            .or_else(|| quantity_from(capacity, "cpu", parse_cpu_str))
            .unwrap_or(0);
        let memory_capacity_bytes = quantity_from(allocatable, "memory", parse_memory_str)
            .or_else(|| quantity_from(capacity, "memory", parse_memory_str))
            .unwrap_or(0);
        let gpu_count = quantity_from(allocatable, GPU_RESOURCE_KEY, |s| s.parse::<i64>().ok())
            .or_else(|| quantity_from(capacity, GPU_RESOURCE_KEY, |s| s.parse::<i64>().ok()))
            .unwrap_or(0);

        let instance_type = self
            .provider
            .provider
            .instance_type(&labels_map)
            .unwrap_or_else(|| "unknown".to_string());
        let family = instance_family(&instance_type);
        let region = self.provider.provider.region(&labels_map);
        let zone = self.provider.provider.zone(&labels_map);
        let is_spot = labels::is_spot_node(&labels_map);
        let node_group_id = labels::resolve_group_id(&labels_map, groups);

        let mut cpu_requested = 0i64;
        let mut memory_requested = 0i64;
        for p in pods.iter().filter(|p| p.is_active()) {
            cpu_requested += p.cpu_request_millis;
            memory_requested += p.memory_request_bytes;
        }

        let (cpu_used, memory_used) = usage.unwrap_or((0, 0));

        let on_demand = pricing.hourly(&instance_type).or_else(|| {
            self.provider.fallback_pricer.as_ref().and_then(|p| {
                p.estimate_price_from_capacity(
                    &instance_type,
                    region.as_deref().unwrap_or(default_region),
                    cpu_capacity_millis,
                    memory_capacity_bytes,
                )
            })
        });
        let on_demand = match on_demand {
            Some(v) => v,
            None => {
                debug!("no price for instance type {} on {}", instance_type, name);
                0.0
            }
        };
        let hourly_cost_usd = if is_spot {
            on_demand * (1.0 - self.provider.spot_discount(&instance_type))
        } else {
            on_demand
        };

        NodeState {
            name,
            instance_type,
            instance_family: family,
            region,
            zone,
            cpu_capacity_millis,
            memory_capacity_bytes,
            gpu_count,
            is_spot,
            is_gpu: gpu_count > 0,
            hourly_cost_usd,
            labels: labels_map,
            pods,
            cpu_requested_millis: cpu_requested,
            memory_requested_bytes: memory_requested,
            cpu_used_millis: cpu_used,
            memory_used_bytes: memory_used,
            node_group_id,
            created_at: node.metadata.creation_timestamp.as_ref().map(|t| t.0),
        }
    }

    pub fn get_all_nodes(&self) -> Vec<NodeState> {
        let state = self.state.read();
        let mut nodes: Vec<NodeState> = state.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        nodes
    }

    pub fn get_node(&self, name: &str) -> Option<NodeState> {
        self.state.read().nodes.get(name).cloned()
    }

    pub fn get_all_pods(&self) -> Vec<PodState> {
        let state = self.state.read();
        let mut pods: Vec<PodState> = state.pods.values().cloned().collect();
        pods.sort_by(|a, b| a.key().cmp(&b.key()));
        pods
    }

    pub fn get_node_groups(&self) -> Vec<NodeGroup> {
        self.groups.read().clone()
    }

    pub fn group_summaries(&self) -> Vec<GroupSummary> {
        self.group_summaries.read().clone()
    }

    pub fn metrics_available(&self) -> bool {
        self.state.read().metrics_available
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_refresh
    }

    pub fn history(&self) -> Arc<MetricsStore> {
        Arc::clone(&self.history)
    }

    /// Immutable view of the current state; the canonical engine and
    /// allocator input. Node and pod lists come from one lock acquisition,
    /// so they always belong to the same refresh.
    pub fn snapshot(&self) -> ClusterSnapshot {
        let (nodes, pods, metrics_available) = {
            let state = self.state.read();
            let mut nodes: Vec<NodeState> = state.nodes.values().cloned().collect();
            nodes.sort_by(|a, b| a.name.cmp(&b.name));
            let mut pods: Vec<PodState> = state.pods.values().cloned().collect();
            pods.sort_by(|a, b| a.key().cmp(&b.key()));
            (nodes, pods, state.metrics_available)
        };
        ClusterSnapshot {
            taken_at: Utc::now(),
            nodes,
            pods,
            node_groups: self.get_node_groups(),
            metrics_available,
        }
    }
}

fn node_labels(node: &Node) -> BTreeMap<String, String> {
    node.metadata
        .labels
        .clone()
        .map(|l| l.into_iter().collect())
        .unwrap_or_default()
}

fn quantity_from<T>(
    map: Option<&std::collections::BTreeMap<String, Quantity>>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    map.and_then(|m| m.get(key)).and_then(|q| parse(q.0.as_str()))
}

fn container_request(c: &Container, key: &str) -> Option<Quantity> {
    c.resources
        .as_ref()
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get(key))
        .cloned()
}

fn container_limit(c: &Container, key: &str) -> Option<Quantity> {
    c.resources
        .as_ref()
        .and_then(|r| r.limits.as_ref())
        .and_then(|r| r.get(key))
        .cloned()
}

fn sum_resource(
    containers: &[Container],
    key: &str,
    parse: impl Fn(&str) -> Option<i64>,
    pick: impl Fn(&Container, &str) -> Option<Quantity>,
) -> i64 {
    containers
        .iter()
        .filter_map(|c| pick(c, key).and_then(|q| parse(q.0.as_str())))
        .sum()
}

fn max_resource(
    containers: &[Container],
    key: &str,
    parse: impl Fn(&str) -> Option<i64>,
    pick: impl Fn(&Container, &str) -> Option<Quantity>,
) -> i64 {
    containers
        .iter()
        .filter_map(|c| pick(c, key).and_then(|q| parse(q.0.as_str())))
        .max()
        .unwrap_or(0)
}

/// Effective pod resource per the standard model:
/// `max(max over init containers, sum over regular containers)`.
fn effective_resource(
    spec: &k8s_openapi::api::core::v1::PodSpec,
    key: &str,
    parse: impl Fn(&str) -> Option<i64> + Copy,
    pick: impl Fn(&Container, &str) -> Option<Quantity> + Copy,
) -> i64 {
    let regular = sum_resource(&spec.containers, key, parse, pick);
    let init = spec
        .init_containers
        .as_ref()
        .map(|ics| max_resource(ics, key, parse, pick))
        .unwrap_or(0);
    regular.max(init)
}

fn pod_state_from(pod: &Pod) -> Option<PodState> {
    let name = pod.metadata.name.as_deref()?.to_string();
    let namespace = pod
        .metadata
        .namespace
        .as_deref()
        .unwrap_or("default")
        .to_string();
    let spec = pod.spec.as_ref()?;

    let (owner_kind, owner_name) = pod
        .metadata
        .owner_references
        .as_ref()
        .and_then(|refs| refs.first())
        .map(|r| (r.kind.clone(), r.name.clone()))
        .unwrap_or_else(|| ("Pod".to_string(), name.clone()));

    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.clone())
        .unwrap_or_else(|| "Unknown".to_string());
    let started_at = pod
        .status
        .as_ref()
        .and_then(|s| s.start_time.as_ref())
        .map(|t| t.0);

    let cpu_request_millis = effective_resource(spec, "cpu", parse_cpu_str, container_request);
    let memory_request_bytes =
        effective_resource(spec, "memory", parse_memory_str, container_request);
    let cpu_limit_millis = effective_resource(spec, "cpu", parse_cpu_str, container_limit);
    let memory_limit_bytes = effective_resource(spec, "memory", parse_memory_str, container_limit);
    let gpu_request = effective_resource(
        spec,
        GPU_RESOURCE_KEY,
        |s| s.parse::<i64>().ok(),
        container_request,
    );

    let safe_to_evict = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(SAFE_TO_EVICT_ANNOTATION))
        .map(|v| v != "false")
        .unwrap_or(true);
    let is_daemonset = owner_kind == "DaemonSet";

    Some(PodState {
        namespace,
        name,
        node_name: spec.node_name.clone(),
        owner_kind,
        owner_name,
        phase,
        started_at,
        labels: pod
            .metadata
            .labels
            .clone()
            .map(|l| l.into_iter().collect())
            .unwrap_or_default(),
        cpu_request_millis,
        memory_request_bytes,
        cpu_limit_millis,
        memory_limit_bytes,
        gpu_request,
        cpu_used_millis: 0,
        memory_used_bytes: 0,
        containers: spec.containers.iter().map(|c| c.name.clone()).collect(),
        evictable: safe_to_evict && !is_daemonset,
    })
}
