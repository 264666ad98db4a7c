mod common;

use chrono::{Duration, Utc};
use kubethrift::engine::{
    computed_id, total_potential_savings, EngineConfig, Priority, Recommendation,
    RecommendationEngine, RecommendationType,
};
use kubethrift::metrics::MetricsStore;

use common::{attach, node, pod, snapshot};

fn engine() -> RecommendationEngine {
    RecommendationEngine::new(EngineConfig::default(), None)
}

/// Seed `count` node samples spread over the last ~5 hours.
fn seed_node_history(store: &MetricsStore, name: &str, count: usize, cpu: i64, mem: i64) {
    let now = Utc::now();
    for i in 0..count {
        store.record_node(
            name,
            now - Duration::seconds(30 * i as i64 + 5),
            cpu,
            mem,
        );
    }
}

#[test]
fn empty_node_yields_critical_consolidation() {
    let mut n1 = node("n1", 0.20);
    attach(&mut n1, pod("kube-system", "fluentd-abc", "DaemonSet", "fluentd"));
    let snap = snapshot(vec![n1]);

    let recs = engine().recommendations(&snap, None);
    let consolidations: Vec<&Recommendation> = recs
        .iter()
        .filter(|r| r.rec_type == RecommendationType::Consolidation)
        .collect();
    assert_eq!(consolidations.len(), 1);
    let rec = consolidations[0];
    assert_eq!(rec.target, "n1");
    assert_eq!(rec.priority, Priority::Critical);
    assert!((rec.confidence - 0.95).abs() < 1e-9);
    assert!((rec.monthly_savings_usd - 146.10).abs() < 0.005);
    assert_eq!(rec.status, "pending");
}

#[test]
fn underutilized_node_with_history_is_high_confidence() {
    let mut n2 = node("n2", 0.50);
    n2.cpu_capacity_millis = 16_000;
    n2.memory_capacity_bytes = 64_000_000_000;
    n2.cpu_used_millis = 800;
    n2.memory_used_bytes = 1_920_000_000;
    let mut p = pod("default", "web-1", "Deployment", "web");
    p.cpu_request_millis = 1000;
    p.memory_request_bytes = 2_000_000_000;
    attach(&mut n2, p);
    let snap = snapshot(vec![n2]);

    let store = MetricsStore::default();
    seed_node_history(&store, "n2", 500, 800, 1_920_000_000);

    let recs = engine().recommendations(&snap, Some(&store));
    let rec = recs
        .iter()
        .find(|r| r.rec_type == RecommendationType::Consolidation && r.target == "n2")
        .expect("expected a consolidation recommendation for n2");
    assert_eq!(rec.priority, Priority::High);
    assert!((rec.confidence - 0.90).abs() < 1e-9);
}

#[test]
fn underutilized_node_without_enough_history_falls_back() {
    let mut n2 = node("n2", 0.50);
    n2.cpu_capacity_millis = 16_000;
    n2.memory_capacity_bytes = 64_000_000_000;
    n2.cpu_used_millis = 800;
    n2.memory_used_bytes = 1_920_000_000;
    let mut p = pod("default", "web-1", "Deployment", "web");
    p.cpu_request_millis = 1000;
    attach(&mut n2, p);
    let snap = snapshot(vec![n2]);

    let store = MetricsStore::default();
    seed_node_history(&store, "n2", 100, 800, 1_920_000_000);

    let recs = engine().recommendations(&snap, Some(&store));
    let rec = recs
        .iter()
        .find(|r| r.rec_type == RecommendationType::Consolidation && r.target == "n2")
        .expect("expected a consolidation recommendation for n2");
    assert!((rec.confidence - 0.70).abs() < 1e-9);
}

#[test]
fn node_with_pods_but_no_usage_is_unknown_not_idle() {
    let mut n = node("n3", 0.50);
    let mut p = pod("default", "api-1", "Deployment", "api");
    p.cpu_request_millis = 500;
    attach(&mut n, p);
    // cpu_used and memory_used stay zero: metrics never arrived.
    let snap = snapshot(vec![n]);

    let recs = engine().recommendations(&snap, None);
    assert!(!recs
        .iter()
        .any(|r| r.rec_type == RecommendationType::Consolidation && r.target == "n3"));
}

#[test]
fn rightsizing_skips_system_namespaces() {
    let mut n = node("n1", 0.50);
    n.cpu_used_millis = 2000;
    n.memory_used_bytes = 8_000_000_000;
    let mut p = pod("kube-system", "coredns-1", "Deployment", "coredns");
    p.cpu_request_millis = 2000;
    p.cpu_used_millis = 200;
    attach(&mut n, p);
    let snap = snapshot(vec![n]);

    let recs = engine().recommendations(&snap, None);
    assert!(!recs
        .iter()
        .any(|r| r.rec_type == RecommendationType::Rightsizing));
}

#[test]
fn rightsizing_flags_overprovisioned_workload() {
    let mut n = node("n1", 1.00);
    n.cpu_used_millis = 900;
    n.memory_used_bytes = 4_000_000_000;
    for i in 0..3 {
        let mut p = pod("prod", &format!("api-{}", i), "Deployment", "api");
        p.cpu_request_millis = 1000;
        p.memory_request_bytes = 2_000_000_000;
        p.cpu_used_millis = 100;
        p.memory_used_bytes = 200_000_000;
        attach(&mut n, p);
    }
    let snap = snapshot(vec![n]);

    let recs = engine().recommendations(&snap, None);
    let rec = recs
        .iter()
        .find(|r| r.rec_type == RecommendationType::Rightsizing)
        .expect("expected a rightsizing recommendation");
    assert_eq!(rec.target, "prod/Deployment/api");
    assert!((rec.confidence - 0.70).abs() < 1e-9);
    assert!(rec.monthly_savings_usd > 5.0);
}

#[test]
fn rightsizing_needs_usage_coverage() {
    // Eleven pods, none with usage data: the 10% coverage guard disables
    // rightsizing entirely.
    let mut n = node("n1", 1.00);
    for i in 0..11 {
        let mut p = pod("prod", &format!("api-{}", i), "Deployment", "api");
        p.cpu_request_millis = 1000;
        attach(&mut n, p);
    }
    n.cpu_used_millis = 100;
    let snap = snapshot(vec![n]);

    let recs = engine().recommendations(&snap, None);
    assert!(!recs
        .iter()
        .any(|r| r.rec_type == RecommendationType::Rightsizing));
}

#[test]
fn spot_grouping_emits_one_group_recommendation() {
    let mut a = node("web-a", 0.10);
    a.node_group_id = Some("web-pool".to_string());
    a.cpu_used_millis = 2000;
    let mut pa = pod("prod", "web-1", "Deployment", "web");
    pa.cpu_request_millis = 2000;
    attach(&mut a, pa);

    let mut b = node("web-b", 0.10);
    b.node_group_id = Some("web-pool".to_string());
    b.cpu_used_millis = 2000;
    let mut pb = pod("prod", "web-2", "Deployment", "web");
    pb.cpu_request_millis = 2000;
    attach(&mut b, pb);

    let mut already_spot = node("spot-a", 0.04);
    already_spot.is_spot = true;
    let mut ps = pod("prod", "batch-1", "Job", "batch");
    ps.cpu_request_millis = 500;
    attach(&mut already_spot, ps);

    let mut gpu = node("gpu-a", 2.00);
    gpu.is_gpu = true;
    gpu.gpu_count = 4;
    let mut pg = pod("ml", "train-1", "Job", "train");
    pg.cpu_request_millis = 1000;
    attach(&mut gpu, pg);

    let snap = snapshot(vec![a, b, already_spot, gpu]);
    let recs = engine().recommendations(&snap, None);

    let spot_recs: Vec<&Recommendation> = recs
        .iter()
        .filter(|r| r.rec_type == RecommendationType::Spot)
        .collect();
    assert_eq!(spot_recs.len(), 1);
    assert_eq!(spot_recs[0].target, "web-pool");
    let expected = 2.0 * 0.10 * 0.60 * 730.5;
    let delta = (spot_recs[0].monthly_savings_usd - expected).abs();
    assert!(delta / expected < 0.05, "savings {} not within 5% of {}", spot_recs[0].monthly_savings_usd, expected);
}

#[test]
fn spot_grouping_counts_daemonset_only_and_empty_nodes() {
    let mut a = node("web-a", 0.10);
    a.node_group_id = Some("web-pool".to_string());
    a.cpu_used_millis = 2000;
    let mut pa = pod("prod", "web-1", "Deployment", "web");
    pa.cpu_request_millis = 2000;
    attach(&mut a, pa);

    // Only a DaemonSet pod: still on-demand capacity worth converting.
    let mut b = node("web-b", 0.10);
    b.node_group_id = Some("web-pool".to_string());
    attach(&mut b, pod("kube-system", "fluentd-b", "DaemonSet", "fluentd"));

    // No pods at all.
    let mut c = node("web-c", 0.10);
    c.node_group_id = Some("web-pool".to_string());

    let snap = snapshot(vec![a, b, c]);
    let recs = engine().recommendations(&snap, None);

    let spot_recs: Vec<&Recommendation> = recs
        .iter()
        .filter(|r| r.rec_type == RecommendationType::Spot)
        .collect();
    assert_eq!(spot_recs.len(), 1);
    assert_eq!(spot_recs[0].target, "web-pool");
    assert!(spot_recs[0].description.contains("3 on-demand node(s)"));
    let expected = 3.0 * 0.10 * 0.60 * 730.5;
    assert!((spot_recs[0].monthly_savings_usd - expected).abs() < 0.01);
}

#[test]
fn savings_threshold_suppresses_tiny_nodes() {
    let mut n = node("tiny", 0.001);
    attach(&mut n, pod("kube-system", "proxy-1", "DaemonSet", "kube-proxy"));
    let snap = snapshot(vec![n]);

    let recs = engine().recommendations(&snap, None);
    assert!(recs.is_empty());
}

#[test]
fn group_consolidation_from_point_in_time() {
    let mut nodes = Vec::new();
    for i in 0..4 {
        let mut n = node(&format!("w-{}", i), 0.50);
        n.node_group_id = Some("workers".to_string());
        n.cpu_used_millis = 400; // 10% of 4000m
        n.memory_used_bytes = 1_600_000_000; // 10%
        let mut p = pod("prod", &format!("svc-{}", i), "Deployment", "svc");
        p.cpu_request_millis = 500;
        p.cpu_used_millis = 400;
        attach(&mut n, p);
        nodes.push(n);
    }
    let snap = snapshot(nodes);

    let recs = engine().recommendations(&snap, None);
    let rec = recs
        .iter()
        .find(|r| r.rec_type == RecommendationType::Consolidation && r.target == "workers")
        .expect("expected group consolidation");
    // 4 nodes at 10% -> target ceil(4*10/50)=1, removable 3.
    assert!((rec.monthly_savings_usd - 3.0 * 0.50 * 730.5).abs() < 0.01);
    assert_eq!(rec.priority, Priority::Medium);
    assert!((rec.confidence - 0.70).abs() < 1e-9);
}

#[test]
fn dedup_counts_each_target_once() {
    let a = Recommendation::new(
        RecommendationType::Consolidation,
        "web-pool",
        "consolidate",
        4000.0,
        Priority::High,
        0.9,
    );
    let b = Recommendation::new(
        RecommendationType::Spot,
        "web-pool",
        "spot",
        3000.0,
        Priority::Medium,
        0.7,
    );
    let total = total_potential_savings(&[a, b]);
    assert!((total - 4000.0).abs() < 1e-9);
}

#[test]
fn dedup_skips_nodes_subsumed_by_group() {
    let group = Recommendation::new(
        RecommendationType::Consolidation,
        "web-pool",
        "shrink group",
        500.0,
        Priority::Medium,
        0.9,
    );
    let member = Recommendation::new(
        RecommendationType::Consolidation,
        "web-pool-worker-1",
        "remove node",
        100.0,
        Priority::High,
        0.9,
    );
    let unrelated = Recommendation::new(
        RecommendationType::Rightsizing,
        "prod/Deployment/api",
        "rightsize",
        50.0,
        Priority::Low,
        0.7,
    );
    let recs = vec![group, member, unrelated];
    let total = total_potential_savings(&recs);
    assert!((total - 550.0).abs() < 1e-9);
    let naive: f64 = recs.iter().map(|r| r.monthly_savings_usd).sum();
    assert!(total <= naive);
}

#[test]
fn output_is_sorted_by_savings_then_id() {
    let mut big = node("big", 2.00);
    attach(&mut big, pod("kube-system", "ds-1", "DaemonSet", "logger"));
    let mut small = node("small", 0.10);
    attach(&mut small, pod("kube-system", "ds-2", "DaemonSet", "logger"));
    let snap = snapshot(vec![small.clone(), big.clone()]);

    let recs = engine().recommendations(&snap, None);
    assert!(recs.len() >= 2);
    for pair in recs.windows(2) {
        assert!(pair[0].monthly_savings_usd >= pair[1].monthly_savings_usd);
    }
    assert_eq!(recs[0].target, "big");
}

#[test]
fn recommendation_ids_are_stable() {
    assert_eq!(
        computed_id(RecommendationType::Spot, "web-pool"),
        computed_id(RecommendationType::Spot, "web-pool")
    );
}

#[test]
fn ttl_cache_returns_same_result_until_invalidated() {
    let mut n1 = node("n1", 0.20);
    attach(&mut n1, pod("kube-system", "ds-1", "DaemonSet", "logger"));
    let snap = snapshot(vec![n1]);
    let eng = engine();

    let first = eng.recommendations(&snap, None);
    // An emptied snapshot does not change the cached answer within the TTL.
    let empty = snapshot(vec![]);
    let second = eng.recommendations(&empty, None);
    assert_eq!(first.len(), second.len());

    eng.invalidate();
    let third = eng.recommendations(&empty, None);
    assert!(third.is_empty());
}
