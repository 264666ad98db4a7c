//! Safety gate: decides whether a recommendation may execute automatically.
//!
//! Low-impact changes pass on policy alone. Anything flagged, above the cost
//! threshold or touching too many nodes is submitted to an external LLM
//! validator; every transport, timeout or parse failure fails closed. The
//! validator response is the only untrusted input in the system and is
//! parsed defensively.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Datelike, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::cloud::Commitment;
use crate::engine::Recommendation;
use crate::state::groups::GroupSummary;
use crate::state::types::ClusterSnapshot;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("validator transport failed: {0}")]
    Transport(String),
    #[error("validator timed out after {0:?}")]
    Timeout(Duration),
    #[error("validator response was not valid JSON")]
    Parse { raw: String },
    #[error("gate disabled or no validator configured")]
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub enabled: bool,
    /// Absolute monthly cost impact above which validation is required.
    pub cost_threshold_usd: f64,
    /// Nodes affected above which validation is required.
    pub max_nodes_affected: u32,
    pub timeout: Duration,
    pub timezone: Tz,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cost_threshold_usd: 500.0,
            max_nodes_affected: 3,
            timeout: Duration::from_secs(10),
            timezone: Tz::UTC,
        }
    }
}

impl GateConfig {
    pub fn with_timezone_name(mut self, name: &str) -> Self {
        match Tz::from_str(name) {
            Ok(tz) => self.timezone = tz,
            Err(_) => {
                log::warn!("unknown timezone {:?}, staying on UTC", name);
                self.timezone = Tz::UTC;
            }
        }
        self
    }
}

/// Validator response contract. Unknown fields are ignored; missing optional
/// fields default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub approved: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub suggestion: String,
}

impl ValidationResponse {
    /// The fail-closed decision used on every validator error.
    fn denied(reasoning: String) -> Self {
        Self {
            approved: false,
            confidence: 0.0,
            reasoning,
            warnings: Vec::new(),
            suggestion: String::new(),
        }
    }
}

/// Everything the validator is shown about one proposed change.
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    pub action_summary: String,
    pub target: String,
    pub summary: String,
    pub estimated_monthly_impact_usd: f64,
    pub nodes_affected: u32,
    pub pods_affected: u32,
    pub risk_level: String,
    pub action_steps: Vec<String>,
    pub risk_factors: Vec<String>,
    pub requires_ai_gate: bool,
}

impl ValidationRequest {
    pub fn from_recommendation(rec: &Recommendation) -> Self {
        Self {
            action_summary: format!("{} on {}", rec.rec_type.as_str(), rec.target),
            target: rec.target.clone(),
            summary: rec.description.clone(),
            estimated_monthly_impact_usd: rec.monthly_savings_usd,
            nodes_affected: rec.nodes_affected,
            pods_affected: 0,
            risk_level: rec.priority.as_str().to_string(),
            action_steps: Vec::new(),
            risk_factors: Vec::new(),
            requires_ai_gate: rec.requires_ai_gate,
        }
    }
}

/// Cluster-wide context lines included in every validation prompt.
#[derive(Debug, Clone)]
pub struct ClusterContext {
    pub node_count: usize,
    pub group_count: usize,
    pub mean_cpu_utilization_pct: f64,
    pub mean_memory_utilization_pct: f64,
    pub monthly_cost_usd: f64,
    pub active_commitment_count: usize,
    pub group_lines: Vec<String>,
}

impl ClusterContext {
    pub fn build(
        snapshot: &ClusterSnapshot,
        groups: &[GroupSummary],
        commitments: &[Commitment],
    ) -> Self {
        Self {
            node_count: snapshot.nodes.len(),
            group_count: groups.len(),
            mean_cpu_utilization_pct: snapshot.mean_cpu_utilization_pct(),
            mean_memory_utilization_pct: snapshot.mean_memory_utilization_pct(),
            monthly_cost_usd: snapshot.total_monthly_cost_usd(),
            active_commitment_count: commitments.iter().filter(|c| c.status == "active").count(),
            group_lines: groups
                .iter()
                .map(|g| {
                    format!(
                        "{}: {} nodes, cpu {:.1}%, memory {:.1}%, ${:.2}/mo",
                        g.name,
                        g.node_count,
                        g.cpu_utilization_pct(),
                        g.memory_utilization_pct(),
                        g.monthly_cost_usd
                    )
                })
                .collect(),
        }
    }
}

/// Transport seam to the external validator; returns the raw response text.
#[async_trait]
pub trait LlmValidator: Send + Sync {
    async fn validate(&self, prompt: &str) -> Result<String>;
}

/// OpenAI-compatible chat-completions transport.
pub struct HttpLlmValidator {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl HttpLlmValidator {
    pub fn new(url: String, api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl LlmValidator for HttpLlmValidator {
    async fn validate(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.0,
        });
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let value: serde_json::Value = resp.json().await?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("no message content in validator response"))?;
        Ok(content.to_string())
    }
}

pub struct SafetyGate {
    config: GateConfig,
    validator: Option<Arc<dyn LlmValidator>>,
}

impl SafetyGate {
    pub fn new(config: GateConfig, validator: Option<Arc<dyn LlmValidator>>) -> Self {
        Self { config, validator }
    }

    /// Whether the change needs external validation before it may execute.
    /// High-impact changes cannot opt out by clearing the flag.
    pub fn requires_validation(&self, request: &ValidationRequest) -> bool {
        request.requires_ai_gate
            || request.estimated_monthly_impact_usd.abs() > self.config.cost_threshold_usd
            || request.nodes_affected > self.config.max_nodes_affected
    }

    /// Gate decision for one change. Low-impact requests pass on policy;
    /// everything else goes to the validator and fails closed on any error.
    pub async fn evaluate(
        &self,
        request: &ValidationRequest,
        context: &ClusterContext,
    ) -> ValidationResponse {
        if !self.requires_validation(request) {
            return ValidationResponse {
                approved: true,
                confidence: 1.0,
                reasoning: "below auto-approval thresholds".to_string(),
                warnings: Vec::new(),
                suggestion: String::new(),
            };
        }
        match self.validate_remote(request, context).await {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!("gate validation failed for {}: {}", request.target, e);
                ValidationResponse::denied(format!("validation unavailable ({}); failing closed", e))
            }
        }
    }

    async fn validate_remote(
        &self,
        request: &ValidationRequest,
        context: &ClusterContext,
    ) -> Result<ValidationResponse, GateError> {
        if !self.config.enabled {
            return Err(GateError::Unavailable);
        }
        let validator = self.validator.as_ref().ok_or(GateError::Unavailable)?;
        let prompt = self.build_prompt(request, context);
        let raw = tokio::time::timeout(self.config.timeout, validator.validate(&prompt))
            .await
            .map_err(|_| GateError::Timeout(self.config.timeout))?
            .map_err(|e| GateError::Transport(e.to_string()))?;
        parse_validation_response(&raw)
    }

    fn build_prompt(&self, request: &ValidationRequest, context: &ClusterContext) -> String {
        let now = Utc::now().with_timezone(&self.config.timezone);
        let business_hours = is_business_hours(&now);
        let mut prompt = String::new();
        prompt.push_str(
            "You are the safety validator for a Kubernetes cost-optimization control plane.\n\
             Decide whether the proposed change may execute automatically.\n\n",
        );
        prompt.push_str(&format!("Proposed action: {}\n\n", request.action_summary));
        prompt.push_str("Cluster context:\n");
        prompt.push_str(&format!("- nodes: {}\n", context.node_count));
        prompt.push_str(&format!("- node groups: {}\n", context.group_count));
        prompt.push_str(&format!(
            "- mean utilization: cpu {:.1}%, memory {:.1}%\n",
            context.mean_cpu_utilization_pct, context.mean_memory_utilization_pct
        ));
        prompt.push_str(&format!(
            "- monthly cost: ${:.2}\n- active commitments: {}\n",
            context.monthly_cost_usd, context.active_commitment_count
        ));
        for line in &context.group_lines {
            prompt.push_str(&format!("  - {}\n", line));
        }
        prompt.push_str(&format!(
            "\nRecommendation:\n- target: {}\n- summary: {}\n- estimated monthly impact: ${:.2}\n\
             - nodes affected: {}\n- pods affected: {}\n- risk level: {}\n",
            request.target,
            request.summary,
            request.estimated_monthly_impact_usd,
            request.nodes_affected,
            request.pods_affected,
            request.risk_level
        ));
        if !request.action_steps.is_empty() {
            prompt.push_str("\nAction steps:\n");
            for step in &request.action_steps {
                prompt.push_str(&format!("- {}\n", step));
            }
        }
        if !request.risk_factors.is_empty() {
            prompt.push_str("\nRisk factors:\n");
            for risk in &request.risk_factors {
                prompt.push_str(&format!("- {}\n", risk));
            }
        }
        prompt.push_str(&format!(
            "\nLocal time: {} ({}), business hours: {}\n",
            now.format("%Y-%m-%d %H:%M %Z"),
            now.format("%A"),
            if business_hours { "yes" } else { "no" }
        ));
        prompt.push_str(
            "\nPolicy:\n\
             - Never approve a change that alters a node group's instance family.\n\
             - Be stricter during business hours.\n\
             - Prefer smaller incremental changes over large ones.\n\
             - Never reduce capacity below current demand.\n\
             - Preserve commitment utilization.\n\n\
             Respond with JSON only: {\"approved\": bool, \"confidence\": 0..1, \
             \"reasoning\": string, \"warnings\": [string], \"suggestion\": string}\n",
        );
        prompt
    }
}

/// Business hours: Monday-Friday, 06:00-20:00 local.
fn is_business_hours<T: Datelike + Timelike>(now: &T) -> bool {
    let weekday = now.weekday().number_from_monday();
    (1..=5).contains(&weekday) && (6..20).contains(&now.hour())
}

/// Parse the validator's reply: straight JSON first, then a balanced-brace
/// extraction for models that wrap JSON in prose.
pub fn parse_validation_response(raw: &str) -> Result<ValidationResponse, GateError> {
    if let Ok(resp) = serde_json::from_str::<ValidationResponse>(raw.trim()) {
        return Ok(resp);
    }
    if let Some(candidate) = extract_balanced_json(raw) {
        if let Ok(resp) = serde_json::from_str::<ValidationResponse>(candidate) {
            return Ok(resp);
        }
    }
    Err(GateError::Parse {
        raw: raw.to_string(),
    })
}

/// First balanced `{...}` block in the text, honoring strings and escapes.
fn extract_balanced_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let bytes = raw.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let resp = parse_validation_response(
            r#"{"approved": true, "confidence": 0.8, "reasoning": "ok", "warnings": [], "suggestion": ""}"#,
        )
        .unwrap();
        assert!(resp.approved);
        assert!((resp.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn extracts_json_from_prose() {
        let raw = "Sure, here is my verdict:\n{\"approved\": false, \"reasoning\": \"a {brace} in \\\"text\\\"\"}\nHope that helps.";
        let resp = parse_validation_response(raw).unwrap();
        assert!(!resp.approved);
        assert!(resp.reasoning.contains("{brace}"));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(
            parse_validation_response("I cannot decide"),
            Err(GateError::Parse { .. })
        ));
    }

    #[test]
    fn business_hours_boundaries() {
        use chrono::TimeZone;
        let monday_noon = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        let monday_late = Utc.with_ymd_and_hms(2024, 3, 4, 20, 0, 0).unwrap();
        let sunday_noon = Utc.with_ymd_and_hms(2024, 3, 3, 12, 0, 0).unwrap();
        assert!(is_business_hours(&monday_noon));
        assert!(!is_business_hours(&monday_late));
        assert!(!is_business_hours(&sunday_noon));
    }
}
