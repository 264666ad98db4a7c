//! Cost report assembly and rendering (Markdown or JSON).

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cloud::Commitment;
use crate::cost::allocator::{NamespaceCost, WorkloadCost};
use crate::engine::Recommendation;
use crate::state::commitments::{ExpiringCommitment, UnderutilizedCommitment};
use crate::state::groups::GroupSummary;
use crate::state::types::ClusterSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCostRow {
    pub name: String,
    pub instance_type: String,
    pub lifecycle: String,
    pub cpu_utilization_pct: f64,
    pub memory_utilization_pct: f64,
    pub hourly_cost_usd: f64,
    pub monthly_cost_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostReport {
    pub cluster_name: String,
    pub report_id: String,
    pub timestamp: DateTime<Utc>,
    pub node_count: usize,
    pub pod_count: usize,
    pub monthly_cost_usd: f64,
    pub metrics_available: bool,
    pub nodes: Vec<NodeCostRow>,
    pub namespaces: Vec<NamespaceCost>,
    pub top_workloads: Vec<WorkloadCost>,
    pub groups: Vec<GroupSummary>,
    pub commitments: Vec<Commitment>,
    pub expiring_commitments: Vec<ExpiringCommitment>,
    pub underutilized_commitments: Vec<UnderutilizedCommitment>,
    pub recommendations: Vec<Recommendation>,
    pub total_potential_savings_usd: f64,
}

pub struct ReportInputs<'a> {
    pub cluster_name: &'a str,
    pub snapshot: &'a ClusterSnapshot,
    pub groups: &'a [GroupSummary],
    pub commitments: &'a [Commitment],
    pub expiring: &'a [ExpiringCommitment],
    pub underutilized: &'a [UnderutilizedCommitment],
    pub namespaces: Vec<NamespaceCost>,
    pub top_workloads: Vec<WorkloadCost>,
    pub recommendations: Vec<Recommendation>,
    pub total_potential_savings_usd: f64,
}

pub fn build_report(inputs: ReportInputs<'_>) -> CostReport {
    let snapshot = inputs.snapshot;
    let nodes = snapshot
        .nodes
        .iter()
        .map(|n| NodeCostRow {
            name: n.name.clone(),
            instance_type: n.instance_type.clone(),
            lifecycle: if n.is_spot { "spot" } else { "on-demand" }.to_string(),
            cpu_utilization_pct: n.cpu_utilization_pct(),
            memory_utilization_pct: n.memory_utilization_pct(),
            hourly_cost_usd: n.hourly_cost_usd,
            monthly_cost_usd: n.monthly_cost_usd(),
        })
        .collect();
    CostReport {
        cluster_name: inputs.cluster_name.to_string(),
        report_id: Uuid::new_v4().to_string(),
        timestamp: snapshot.taken_at,
        node_count: snapshot.nodes.len(),
        pod_count: snapshot.pods.len(),
        monthly_cost_usd: snapshot.total_monthly_cost_usd(),
        metrics_available: snapshot.metrics_available,
        nodes,
        namespaces: inputs.namespaces,
        top_workloads: inputs.top_workloads,
        groups: inputs.groups.to_vec(),
        commitments: inputs.commitments.to_vec(),
        expiring_commitments: inputs.expiring.to_vec(),
        underutilized_commitments: inputs.underutilized.to_vec(),
        recommendations: inputs.recommendations,
        total_potential_savings_usd: inputs.total_potential_savings_usd,
    }
}

pub fn write_json(report: &CostReport, path: &str) -> Result<()> {
    let file = std::fs::File::create(Path::new(path))?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}

pub fn write_markdown(report: &CostReport, path: &str) -> Result<()> {
    std::fs::write(Path::new(path), render_markdown(report))?;
    Ok(())
}

pub fn render_markdown(report: &CostReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Cost Report: {}\n\n", report.cluster_name));
    out.push_str(&format!(
        "- Generated: {}\n- Report ID: {}\n- Nodes: {} | Pods: {}\n- Monthly cost: ${:.2}\n- Potential savings: ${:.2}/mo\n- Metrics server: {}\n\n",
        report.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        report.report_id,
        report.node_count,
        report.pod_count,
        report.monthly_cost_usd,
        report.total_potential_savings_usd,
        if report.metrics_available { "available" } else { "unavailable" }
    ));

    out.push_str("## Nodes\n\n");
    out.push_str("| Node | Instance Type | Lifecycle | CPU % | Memory % | $/h | $/mo |\n");
    out.push_str("|------|---------------|-----------|-------|----------|-----|------|\n");
    for n in &report.nodes {
        out.push_str(&format!(
            "| {} | {} | {} | {:.1} | {:.1} | {:.4} | {:.2} |\n",
            n.name,
            n.instance_type,
            n.lifecycle,
            n.cpu_utilization_pct,
            n.memory_utilization_pct,
            n.hourly_cost_usd,
            n.monthly_cost_usd
        ));
    }
    out.push('\n');

    if !report.namespaces.is_empty() {
        out.push_str("## Cost by Namespace\n\n");
        out.push_str("| Namespace | Pods | $/mo |\n|-----------|------|------|\n");
        for ns in &report.namespaces {
            out.push_str(&format!(
                "| {} | {} | {:.2} |\n",
                ns.namespace, ns.pod_count, ns.monthly_cost_usd
            ));
        }
        out.push('\n');
    }

    if !report.top_workloads.is_empty() {
        out.push_str("## Top Workloads\n\n");
        out.push_str("| Workload | Pods | $/mo |\n|----------|------|------|\n");
        for w in &report.top_workloads {
            out.push_str(&format!(
                "| {}/{}/{} | {} | {:.2} |\n",
                w.namespace, w.owner_kind, w.owner_name, w.pod_count, w.monthly_cost_usd
            ));
        }
        out.push('\n');
    }

    if !report.groups.is_empty() {
        out.push_str("## Node Groups\n\n");
        out.push_str(
            "| Group | Nodes | Pods | CPU % | Memory % | $/mo |\n|-------|-------|------|-------|----------|------|\n",
        );
        for g in &report.groups {
            out.push_str(&format!(
                "| {} | {} | {} | {:.1} | {:.1} | {:.2} |\n",
                g.name,
                g.node_count,
                g.pod_count,
                g.cpu_utilization_pct(),
                g.memory_utilization_pct(),
                g.monthly_cost_usd
            ));
        }
        out.push('\n');
    }

    if !report.commitments.is_empty() {
        out.push_str("## Commitments\n\n");
        out.push_str(
            "| ID | Kind | Scope | Count | Utilization % | Expires |\n|----|------|-------|-------|---------------|---------|\n",
        );
        for c in &report.commitments {
            let scope = c
                .instance_type
                .clone()
                .or_else(|| c.instance_family.clone())
                .unwrap_or_else(|| "-".to_string());
            out.push_str(&format!(
                "| {} | {:?} | {} | {} | {:.1} | {} |\n",
                c.id,
                c.kind,
                scope,
                c.count,
                c.utilization_pct,
                c.expires_at.format("%Y-%m-%d")
            ));
        }
        out.push('\n');
        for e in &report.expiring_commitments {
            out.push_str(&format!(
                "- ⚠️ `{}` expires in {} day(s)\n",
                e.commitment.id, e.days_until_expiry
            ));
        }
        for u in &report.underutilized_commitments {
            out.push_str(&format!(
                "- ⚠️ `{}` underutilized, ${:.2}/mo wasted\n",
                u.commitment.id, u.wasted_monthly_usd
            ));
        }
        out.push('\n');
    }

    out.push_str("## Recommendations\n\n");
    if report.recommendations.is_empty() {
        out.push_str("No recommendations above the savings threshold.\n");
    } else {
        out.push_str("| Priority | Type | Target | Savings $/mo | Confidence | Description |\n");
        out.push_str("|----------|------|--------|--------------|------------|-------------|\n");
        for r in &report.recommendations {
            out.push_str(&format!(
                "| {} | {} | {} | {:.2} | {:.2} | {} |\n",
                r.priority.as_str(),
                r.rec_type.as_str(),
                r.target,
                r.monthly_savings_usd,
                r.confidence,
                r.description
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_has_headline_sections() {
        let report = CostReport {
            cluster_name: "test".to_string(),
            report_id: "r1".to_string(),
            timestamp: Utc::now(),
            node_count: 0,
            pod_count: 0,
            monthly_cost_usd: 0.0,
            metrics_available: false,
            nodes: Vec::new(),
            namespaces: Vec::new(),
            top_workloads: Vec::new(),
            groups: Vec::new(),
            commitments: Vec::new(),
            expiring_commitments: Vec::new(),
            underutilized_commitments: Vec::new(),
            recommendations: Vec::new(),
            total_potential_savings_usd: 0.0,
        };
        let md = render_markdown(&report);
        assert!(md.contains("# Cost Report: test"));
        assert!(md.contains("## Recommendations"));
        assert!(md.contains("No recommendations"));
    }
}
