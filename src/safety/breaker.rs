//! Per-controller circuit breaker with a sliding error window and a
//! half-open probe.
//!
//! Closed until the failure ratio over the window crosses the threshold with
//! enough samples; then tripped for one cooldown. The first `is_tripped`
//! query after the cooldown moves the breaker to half-open and admits exactly
//! one probe. A success while half-open clears the breaker and its history; a
//! failure re-trips immediately.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BreakerError {
    #[error("circuit breaker open for controller {controller} since {since}")]
    Open {
        controller: String,
        since: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub window: Duration,
    pub failure_threshold: f64,
    pub min_samples: usize,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        let window = Duration::minutes(5);
        Self {
            window,
            failure_threshold: 0.5,
            min_samples: 5,
            cooldown: window,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Tripped { since: DateTime<Utc> },
    HalfOpen { since: DateTime<Utc> },
}

#[derive(Debug)]
struct Entry {
    samples: VecDeque<(DateTime<Utc>, bool)>,
    state: State,
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            samples: VecDeque::new(),
            state: State::Closed,
        }
    }
}

/// Breaker registry, one entry per controller name. Injectable: constructed
/// by the owner, never a process global.
pub struct CircuitBreaker {
    config: BreakerConfig,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_success(&self, controller: &str) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(controller.to_string()).or_default();
        if matches!(entry.state, State::HalfOpen { .. }) {
            log::info!("circuit breaker for {} closed after successful probe", controller);
            entry.state = State::Closed;
            entry.samples.clear();
            return;
        }
        entry.samples.push_back((Utc::now(), true));
    }

    pub fn record_failure(&self, controller: &str) {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        let entry = entries.entry(controller.to_string()).or_default();
        if matches!(entry.state, State::HalfOpen { .. }) {
            log::warn!("circuit breaker for {} re-tripped by failed probe", controller);
            entry.state = State::Tripped { since: now };
            entry.samples.clear();
            return;
        }
        entry.samples.push_back((now, false));
        let horizon = now - self.config.window;
        while entry
            .samples
            .front()
            .map(|(ts, _)| *ts < horizon)
            .unwrap_or(false)
        {
            entry.samples.pop_front();
        }
        let total = entry.samples.len();
        let failures = entry.samples.iter().filter(|(_, ok)| !ok).count();
        if entry.state == State::Closed
            && total >= self.config.min_samples
            && failures as f64 / total as f64 >= self.config.failure_threshold
        {
            log::warn!(
                "circuit breaker tripped for {}: {}/{} failures in window",
                controller,
                failures,
                total
            );
            entry.state = State::Tripped { since: now };
        }
    }

    /// True while the breaker blocks the controller. A tripped breaker whose
    /// cooldown has elapsed transitions to half-open and returns false once,
    /// admitting a single probe.
    pub fn is_tripped(&self, controller: &str) -> bool {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        let entry = entries.entry(controller.to_string()).or_default();
        match entry.state {
            State::Closed => false,
            State::HalfOpen { .. } => true,
            State::Tripped { since } => {
                if now - since >= self.config.cooldown {
                    log::info!("circuit breaker for {} half-open, admitting probe", controller);
                    entry.state = State::HalfOpen { since: now };
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Typed guard used by controllers: Err when the breaker blocks.
    pub fn check(&self, controller: &str) -> Result<(), BreakerError> {
        if self.is_tripped(controller) {
            let since = {
                let entries = self.entries.lock();
                match entries.get(controller).map(|e| e.state) {
                    Some(State::Tripped { since }) | Some(State::HalfOpen { since }) => since,
                    _ => Utc::now(),
                }
            };
            return Err(BreakerError::Open {
                controller: controller.to_string(),
                since,
            });
        }
        Ok(())
    }

    /// Manual trip override.
    pub fn trip(&self, controller: &str) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(controller.to_string()).or_default();
        entry.state = State::Tripped { since: Utc::now() };
    }

    /// Manual reset: closed with history cleared.
    pub fn reset(&self, controller: &str) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(controller.to_string()).or_default();
        entry.state = State::Closed;
        entry.samples.clear();
    }

    pub fn status(&self, controller: &str) -> String {
        let entries = self.entries.lock();
        match entries.get(controller).map(|e| e.state) {
            None | Some(State::Closed) => "closed".to_string(),
            Some(State::HalfOpen { since }) => {
                format!("half-open since {}", since.format("%Y-%m-%d %H:%M:%S UTC"))
            }
            Some(State::Tripped { since }) => {
                format!("tripped since {}", since.format("%Y-%m-%d %H:%M:%S UTC"))
            }
        }
    }
}
