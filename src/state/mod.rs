pub mod cache;
pub mod commitments;
pub mod groups;
pub mod types;

pub use cache::ClusterStateCache;
pub use types::{ClusterSnapshot, NodeState, PodState};
