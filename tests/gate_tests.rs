mod common;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use kubethrift::engine::{Priority, Recommendation, RecommendationType};
use kubethrift::safety::gate::{
    ClusterContext, GateConfig, LlmValidator, SafetyGate, ValidationRequest,
};

use common::{node, snapshot};

struct CannedValidator {
    response: String,
}

#[async_trait]
impl LlmValidator for CannedValidator {
    async fn validate(&self, _prompt: &str) -> Result<String> {
        Ok(self.response.clone())
    }
}

struct FailingValidator;

#[async_trait]
impl LlmValidator for FailingValidator {
    async fn validate(&self, _prompt: &str) -> Result<String> {
        Err(anyhow::anyhow!("connection refused"))
    }
}

struct SlowValidator;

#[async_trait]
impl LlmValidator for SlowValidator {
    async fn validate(&self, _prompt: &str) -> Result<String> {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        Ok("{\"approved\": true}".to_string())
    }
}

mockall::mock! {
    Validator {}

    #[async_trait]
    impl LlmValidator for Validator {
        async fn validate(&self, prompt: &str) -> Result<String>;
    }
}

fn context() -> ClusterContext {
    let snap = snapshot(vec![node("n1", 1.0)]);
    ClusterContext::build(&snap, &[], &[])
}

fn request(impact: f64, nodes_affected: u32) -> ValidationRequest {
    let rec = Recommendation::new(
        RecommendationType::Consolidation,
        "web-pool",
        "shrink the pool",
        impact,
        Priority::Medium,
        0.9,
    )
    .with_nodes_affected(nodes_affected);
    ValidationRequest::from_recommendation(&rec)
}

#[test]
fn validation_thresholds() {
    let gate = SafetyGate::new(GateConfig::default(), None);
    assert!(!gate.requires_validation(&request(100.0, 1)));
    assert!(gate.requires_validation(&request(600.0, 1)));
    assert!(gate.requires_validation(&request(100.0, 4)));

    // The flag forces validation and cannot be bypassed by low impact.
    let mut flagged = request(1.0, 0);
    flagged.requires_ai_gate = true;
    assert!(gate.requires_validation(&flagged));
}

#[tokio::test]
async fn low_impact_passes_without_validator() {
    let gate = SafetyGate::new(GateConfig::default(), None);
    let decision = gate.evaluate(&request(100.0, 1), &context()).await;
    assert!(decision.approved);
}

#[tokio::test]
async fn absent_validator_fails_closed() {
    let gate = SafetyGate::new(GateConfig::default(), None);
    let decision = gate.evaluate(&request(900.0, 1), &context()).await;
    assert!(!decision.approved);
    assert!(decision.reasoning.contains("failing closed"));
}

#[tokio::test]
async fn disabled_gate_fails_closed() {
    let config = GateConfig {
        enabled: false,
        ..GateConfig::default()
    };
    let gate = SafetyGate::new(
        config,
        Some(Arc::new(CannedValidator {
            response: "{\"approved\": true, \"confidence\": 1.0}".to_string(),
        })),
    );
    let decision = gate.evaluate(&request(900.0, 1), &context()).await;
    assert!(!decision.approved);
}

#[tokio::test]
async fn transport_error_fails_closed() {
    let gate = SafetyGate::new(GateConfig::default(), Some(Arc::new(FailingValidator)));
    let decision = gate.evaluate(&request(900.0, 1), &context()).await;
    assert!(!decision.approved);
    assert!((decision.confidence - 0.0).abs() < 1e-9);
}

#[tokio::test]
async fn timeout_fails_closed() {
    let config = GateConfig {
        timeout: std::time::Duration::from_millis(50),
        ..GateConfig::default()
    };
    let gate = SafetyGate::new(config, Some(Arc::new(SlowValidator)));
    let decision = gate.evaluate(&request(900.0, 1), &context()).await;
    assert!(!decision.approved);
    assert!(decision.reasoning.contains("timed out"));
}

#[tokio::test]
async fn unparseable_reply_fails_closed() {
    let gate = SafetyGate::new(
        GateConfig::default(),
        Some(Arc::new(CannedValidator {
            response: "I would rather not say.".to_string(),
        })),
    );
    let decision = gate.evaluate(&request(900.0, 1), &context()).await;
    assert!(!decision.approved);
}

#[tokio::test]
async fn approval_with_wrapped_json_is_parsed() {
    let gate = SafetyGate::new(
        GateConfig::default(),
        Some(Arc::new(CannedValidator {
            response: "Assessment follows.\n{\"approved\": true, \"confidence\": 0.85, \
                       \"reasoning\": \"plenty of headroom\", \"warnings\": [\"check PDBs\"], \
                       \"suggestion\": \"remove one node first\"}"
                .to_string(),
        })),
    );
    let decision = gate.evaluate(&request(900.0, 1), &context()).await;
    assert!(decision.approved);
    assert!((decision.confidence - 0.85).abs() < 1e-9);
    assert_eq!(decision.warnings, vec!["check PDBs".to_string()]);
}

#[tokio::test]
async fn prompt_carries_cluster_and_policy_context() {
    let mut mock = MockValidator::new();
    mock.expect_validate()
        .withf(|prompt: &str| {
            prompt.contains("nodes: 1")
                && prompt.contains("business hours")
                && prompt.contains("instance family")
                && prompt.contains("web-pool")
        })
        .returning(|_| Ok("{\"approved\": false, \"reasoning\": \"too broad\"}".to_string()));
    let gate = SafetyGate::new(GateConfig::default(), Some(Arc::new(mock)));
    let decision = gate.evaluate(&request(900.0, 1), &context()).await;
    assert!(!decision.approved);
    assert_eq!(decision.reasoning, "too broad");
}
