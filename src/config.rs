//! Optimizer configuration: a YAML file with serde defaults for every knob,
//! plus the static cloud inventory served by the config-backed provider.

use std::path::Path;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::cloud::static_provider::StaticInventory;
use crate::engine::EngineConfig;
use crate::safety::breaker::BreakerConfig;
use crate::safety::gate::GateConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Report/cluster label; falls back to the kubeconfig context name.
    pub cluster_name: Option<String>,
    /// Cluster state refresh cadence, seconds.
    pub reconcile_interval_secs: u64,
    /// Metrics history retention, seconds.
    pub metrics_retention_secs: i64,
    /// Node locks without a heartbeat for this long are expired.
    pub lock_max_age_secs: i64,
    pub audit: AuditSettings,
    pub breaker: BreakerSettings,
    pub engine: EngineSettings,
    pub gate: GateSettings,
    pub controllers: ControllerSettings,
    pub cloud: StaticInventory,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            cluster_name: None,
            reconcile_interval_secs: 300,
            metrics_retention_secs: 7 * 24 * 3600,
            lock_max_age_secs: 900,
            audit: AuditSettings::default(),
            breaker: BreakerSettings::default(),
            engine: EngineSettings::default(),
            gate: GateSettings::default(),
            controllers: ControllerSettings::default(),
            cloud: StaticInventory::default(),
        }
    }
}

impl OptimizerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn metrics_retention(&self) -> Duration {
        Duration::seconds(self.metrics_retention_secs)
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        let window = Duration::seconds(self.breaker.window_secs as i64);
        BreakerConfig {
            window,
            failure_threshold: self.breaker.failure_threshold,
            min_samples: self.breaker.min_samples,
            cooldown: self
                .breaker
                .cooldown_secs
                .map(|s| Duration::seconds(s as i64))
                .unwrap_or(window),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            min_savings_usd: self.engine.min_savings_usd,
            default_spot_discount: self.engine.spot_discount,
            cache_ttl: StdDuration::from_secs(self.engine.cache_ttl_secs),
        }
    }

    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            enabled: self.gate.enabled,
            cost_threshold_usd: self.gate.cost_threshold_usd,
            max_nodes_affected: self.gate.max_nodes_affected,
            timeout: StdDuration::from_secs(self.gate.timeout_secs),
            timezone: chrono_tz::Tz::UTC,
        }
        .with_timezone_name(&self.gate.timezone)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub capacity: usize,
    /// JSONL file receiving durable appends; memory-only when unset.
    pub durable_path: Option<String>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            capacity: 1000,
            durable_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub window_secs: u64,
    pub failure_threshold: f64,
    pub min_samples: usize,
    /// Defaults to the window when unset.
    pub cooldown_secs: Option<u64>,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            window_secs: 300,
            failure_threshold: 0.5,
            min_samples: 5,
            cooldown_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub min_savings_usd: f64,
    pub spot_discount: f64,
    pub cache_ttl_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            min_savings_usd: 5.0,
            spot_discount: 0.60,
            cache_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    pub enabled: bool,
    /// Chat-completions endpoint of the validator.
    pub api_url: String,
    /// Environment variable holding the validator API key.
    pub api_key_env: String,
    pub model: String,
    pub cost_threshold_usd: f64,
    pub max_nodes_affected: u32,
    pub timeout_secs: u64,
    /// IANA timezone for the business-hours clock.
    pub timezone: String,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key_env: "KUBETHRIFT_GATE_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            cost_threshold_usd: 500.0,
            max_nodes_affected: 3,
            timeout_secs: 10,
            timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    pub cost_monitor: ControllerLoopSettings,
    pub commitment_monitor: ControllerLoopSettings,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            cost_monitor: ControllerLoopSettings {
                enabled: true,
                interval_secs: 300,
            },
            commitment_monitor: ControllerLoopSettings {
                enabled: true,
                interval_secs: 3600,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerLoopSettings {
    pub enabled: bool,
    pub interval_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let c = OptimizerConfig::default();
        assert_eq!(c.reconcile_interval_secs, 300);
        assert_eq!(c.audit.capacity, 1000);
        assert_eq!(c.breaker.min_samples, 5);
        assert!((c.engine.spot_discount - 0.60).abs() < 1e-9);
        assert!((c.gate.cost_threshold_usd - 500.0).abs() < 1e-9);
        assert_eq!(c.gate.max_nodes_affected, 3);
        assert_eq!(c.gate.timeout_secs, 10);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "engine:\n  min_savings_usd: 10.0\ngate:\n  timezone: America/New_York\n";
        let c: OptimizerConfig = serde_yaml::from_str(yaml).unwrap();
        assert!((c.engine.min_savings_usd - 10.0).abs() < 1e-9);
        assert_eq!(c.gate.timezone, "America/New_York");
        assert_eq!(c.breaker.window_secs, 300);
    }
}
