pub mod breaker;
pub mod gate;
pub mod node_lock;

pub use breaker::{BreakerConfig, CircuitBreaker};
pub use gate::{SafetyGate, ValidationRequest, ValidationResponse};
pub use node_lock::{LockError, NodeLockManager};
