//! Recommendation value types and deterministic ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationType {
    Consolidation,
    Spot,
    Rightsizing,
}

impl RecommendationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationType::Consolidation => "consolidation",
            RecommendationType::Spot => "spot",
            RecommendationType::Rightsizing => "rightsizing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// Deterministic id: `computed-` plus the first 8 bytes of
/// SHA-256 over `type:target`, hex-encoded. Purely a function of its inputs.
pub fn computed_id(rec_type: RecommendationType, target: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rec_type.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(target.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
    format!("computed-{}", hex)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    #[serde(rename = "type")]
    pub rec_type: RecommendationType,
    pub target: String,
    pub description: String,
    pub monthly_savings_usd: f64,
    pub priority: Priority,
    /// Computed recommendations are always pending; execution state lives
    /// with the persistence layer.
    pub status: String,
    pub created_at: DateTime<Utc>,
    /// 0-1; windowed-P95 evidence scores higher than point-in-time.
    pub confidence: f64,
    /// Forces validation through the safety gate regardless of thresholds.
    #[serde(default)]
    pub requires_ai_gate: bool,
    /// Nodes a change would touch; feeds the gate's max-evict threshold.
    #[serde(default)]
    pub nodes_affected: u32,
}

impl Recommendation {
    pub fn new(
        rec_type: RecommendationType,
        target: impl Into<String>,
        description: impl Into<String>,
        monthly_savings_usd: f64,
        priority: Priority,
        confidence: f64,
    ) -> Self {
        let target = target.into();
        Self {
            id: computed_id(rec_type, &target),
            rec_type,
            target,
            description: description.into(),
            monthly_savings_usd,
            priority,
            status: "pending".to_string(),
            created_at: Utc::now(),
            confidence,
            requires_ai_gate: false,
            nodes_affected: 0,
        }
    }

    pub fn with_nodes_affected(mut self, n: u32) -> Self {
        self.nodes_affected = n;
        self
    }
}
