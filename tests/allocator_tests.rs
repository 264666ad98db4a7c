mod common;

use kubethrift::cloud::HOURS_PER_MONTH;
use kubethrift::cost::{
    allocate, groupable_label_keys, label_costs, namespace_costs, workload_costs,
};

use common::{attach, node, pod, snapshot};

#[test]
fn per_node_allocations_conserve_cost() {
    let mut n = node("n1", 0.75);
    let mut a = pod("prod", "api-1", "Deployment", "api");
    a.cpu_request_millis = 1000;
    a.memory_request_bytes = 4_000_000_000;
    attach(&mut n, a);
    let mut b = pod("prod", "worker-1", "StatefulSet", "worker");
    b.cpu_request_millis = 250;
    b.memory_request_bytes = 1_000_000_000;
    attach(&mut n, b);
    let mut c = pod("staging", "web-1", "Deployment", "web");
    c.cpu_request_millis = 3000;
    attach(&mut n, c);
    let snap = snapshot(vec![n]);

    let allocations = allocate(&snap);
    assert_eq!(allocations.len(), 3);
    let total: f64 = allocations.iter().map(|a| a.monthly_cost_usd).sum();
    let node_monthly = 0.75 * HOURS_PER_MONTH;
    assert!(
        (total - node_monthly).abs() <= 0.01,
        "allocated {} vs node cost {}",
        total,
        node_monthly
    );
}

#[test]
fn zero_weight_node_is_skipped() {
    let mut n = node("n1", 0.50);
    attach(&mut n, pod("prod", "noreq-1", "Deployment", "noreq"));
    let snap = snapshot(vec![n]);
    assert!(allocate(&snap).is_empty());
}

#[test]
fn zero_capacity_contributes_nothing_to_its_half() {
    let mut n = node("n1", 1.00);
    n.memory_capacity_bytes = 0;
    let mut a = pod("prod", "api-1", "Deployment", "api");
    a.cpu_request_millis = 1000;
    a.memory_request_bytes = 8_000_000_000;
    attach(&mut n, a);
    let mut b = pod("prod", "api-2", "Deployment", "api");
    b.cpu_request_millis = 3000;
    attach(&mut n, b);
    let snap = snapshot(vec![n]);

    let allocations = allocate(&snap);
    // Memory half is dead: shares split purely on CPU requests 1000:3000.
    let share_a = allocations
        .iter()
        .find(|al| al.pod == "api-1")
        .unwrap()
        .monthly_cost_usd;
    let total: f64 = allocations.iter().map(|a| a.monthly_cost_usd).sum();
    assert!((share_a / total - 0.25).abs() < 1e-9);
}

#[test]
fn namespace_and_workload_grouping() {
    let mut n = node("n1", 1.00);
    for (ns, name, kind, owner, cpu) in [
        ("prod", "api-1", "Deployment", "api", 1000),
        ("prod", "api-2", "Deployment", "api", 1000),
        ("staging", "job-1", "Pod", "job-1", 500),
    ] {
        let mut p = pod(ns, name, kind, owner);
        p.cpu_request_millis = cpu;
        attach(&mut n, p);
    }
    let snap = snapshot(vec![n]);
    let allocations = allocate(&snap);

    let namespaces = namespace_costs(&allocations);
    assert_eq!(namespaces.len(), 2);
    assert_eq!(namespaces[0].namespace, "prod");
    assert!(namespaces[0].monthly_cost_usd > namespaces[1].monthly_cost_usd);

    let workloads = workload_costs(&allocations, Some(10));
    assert_eq!(workloads.len(), 2);
    assert_eq!(workloads[0].owner_name, "api");
    assert_eq!(workloads[0].pod_count, 2);
    // Ownerless pods group under Pod/<name>.
    assert_eq!(workloads[1].owner_kind, "Pod");

    let top1 = workload_costs(&allocations, Some(1));
    assert_eq!(top1.len(), 1);
    assert_eq!(top1[0].owner_name, "api");
}

#[test]
fn system_label_keys_are_excluded() {
    let mut n = node("n1", 1.00);
    let mut p = pod("prod", "api-1", "Deployment", "api");
    p.cpu_request_millis = 1000;
    p.labels.insert("team".to_string(), "payments".to_string());
    p.labels
        .insert("kubernetes.io/metadata.name".to_string(), "x".to_string());
    p.labels
        .insert("app.kubernetes.io/name".to_string(), "api".to_string());
    p.labels
        .insert("topology.k8s.io/zone".to_string(), "a".to_string());
    attach(&mut n, p);
    let snap = snapshot(vec![n]);

    let keys = groupable_label_keys(&snap);
    assert_eq!(keys, vec!["team".to_string()]);

    let allocations = allocate(&snap);
    assert!(label_costs(&snap, &allocations, "kubernetes.io/metadata.name").is_empty());
    let by_team = label_costs(&snap, &allocations, "team");
    assert_eq!(by_team.len(), 1);
    assert_eq!(by_team[0].value, "payments");
}
