//! Ticker-driven reconcile loops with circuit-breaker protection.

pub mod commitment_monitor;
pub mod cost_monitor;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::safety::breaker::CircuitBreaker;

pub use commitment_monitor::CommitmentMonitorController;
pub use cost_monitor::CostMonitorController;

/// One periodic control loop body.
#[async_trait]
pub trait Reconciler: Send + Sync {
    fn name(&self) -> &str;

    async fn reconcile(&self) -> Result<()>;
}

/// Spawns controllers and drives their tick loops. Each tick consults the
/// breaker first; a tripped breaker skips the tick entirely. Shutdown via
/// the watch channel is immediate and clean.
pub struct ControllerRunner {
    breaker: Arc<CircuitBreaker>,
    shutdown: watch::Receiver<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl ControllerRunner {
    pub fn new(breaker: Arc<CircuitBreaker>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            breaker,
            shutdown,
            handles: Vec::new(),
        }
    }

    pub fn spawn(&mut self, reconciler: Arc<dyn Reconciler>, interval: Duration) {
        let breaker = Arc::clone(&self.breaker);
        let mut shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let name = reconciler.name().to_string();
            info!("controller {} started, interval {:?}", name, interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("controller {} stopping", name);
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = breaker.check(&name) {
                            warn!("controller {} skipped tick: {}", name, e);
                            continue;
                        }
                        match reconciler.reconcile().await {
                            Ok(()) => breaker.record_success(&name),
                            Err(e) => {
                                error!("controller {} reconcile failed: {:#}", name, e);
                                breaker.record_failure(&name);
                            }
                        }
                    }
                }
            }
        });
        self.handles.push(handle);
    }

    /// Wait for every controller task to exit.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
