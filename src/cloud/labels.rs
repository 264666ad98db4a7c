//! Well-known node labels: spot lifecycle markers and node-group discriminators.

use std::collections::BTreeMap;

use super::NodeGroup;

/// Label key/value pairs that mark a node as interruptible capacity.
const SPOT_LABELS: &[(&str, &str)] = &[
    ("node.kubernetes.io/lifecycle", "spot"),
    ("cloud.google.com/gke-spot", "true"),
    ("cloud.google.com/gke-preemptible", "true"),
    ("kubernetes.azure.com/scalesetpriority", "spot"),
];

/// Cloud-specific node-group membership labels, checked in order.
const GROUP_LABELS: &[&str] = &[
    "eks.amazonaws.com/nodegroup",
    "cloud.google.com/gke-nodepool",
    "kubernetes.azure.com/agentpool",
];

pub fn is_spot_node(node_labels: &BTreeMap<String, String>) -> bool {
    SPOT_LABELS
        .iter()
        .any(|(k, v)| node_labels.get(*k).map(|s| s.as_str()) == Some(*v))
}

/// Node-group name from a cloud-specific well-known label, if present.
pub fn well_known_group_label(node_labels: &BTreeMap<String, String>) -> Option<String> {
    GROUP_LABELS
        .iter()
        .find_map(|k| node_labels.get(*k).cloned())
}

/// A node belongs to a group when every label declared on the group matches.
/// Groups that declare no labels never match this way.
pub fn labels_match_group(node_labels: &BTreeMap<String, String>, group: &NodeGroup) -> bool {
    if group.labels.is_empty() {
        return false;
    }
    group
        .labels
        .iter()
        .all(|(k, v)| node_labels.get(k) == Some(v))
}

/// Resolve a node's group id: well-known labels first, then full label match.
pub fn resolve_group_id(
    node_labels: &BTreeMap<String, String>,
    groups: &[NodeGroup],
) -> Option<String> {
    if let Some(name) = well_known_group_label(node_labels) {
        // The well-known label carries the group *name*; map it to the id
        // when a discovered group matches, else use the name itself.
        return Some(
            groups
                .iter()
                .find(|g| g.name == name || g.id == name)
                .map(|g| g.id.clone())
                .unwrap_or(name),
        );
    }
    groups
        .iter()
        .find(|g| labels_match_group(node_labels, g))
        .map(|g| g.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::GroupLifecycle;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn group(id: &str, group_labels: &[(&str, &str)]) -> NodeGroup {
        NodeGroup {
            id: id.to_string(),
            name: id.to_string(),
            instance_type: "m5.large".to_string(),
            instance_family: "m5".to_string(),
            region: None,
            current_count: 1,
            min_count: 0,
            max_count: 10,
            desired_count: 1,
            labels: labels(group_labels),
            taints: Vec::new(),
            lifecycle: GroupLifecycle::OnDemand,
            spot_percentage: 0.0,
            disk_type: None,
            disk_size_gb: None,
        }
    }

    #[test]
    fn spot_detection() {
        assert!(is_spot_node(&labels(&[(
            "node.kubernetes.io/lifecycle",
            "spot"
        )])));
        assert!(is_spot_node(&labels(&[(
            "cloud.google.com/gke-preemptible",
            "true"
        )])));
        assert!(!is_spot_node(&labels(&[(
            "node.kubernetes.io/lifecycle",
            "normal"
        )])));
    }

    #[test]
    fn well_known_label_wins_over_label_match() {
        let node = labels(&[
            ("eks.amazonaws.com/nodegroup", "web-pool"),
            ("team", "payments"),
        ]);
        let groups = vec![group("web-pool", &[]), group("other", &[("team", "payments")])];
        assert_eq!(resolve_group_id(&node, &groups), Some("web-pool".to_string()));
    }

    #[test]
    fn label_match_fallback() {
        let node = labels(&[("team", "payments"), ("tier", "backend")]);
        let groups = vec![group("by-labels", &[("team", "payments")])];
        assert_eq!(resolve_group_id(&node, &groups), Some("by-labels".to_string()));
        assert_eq!(resolve_group_id(&labels(&[]), &groups), None);
    }
}
