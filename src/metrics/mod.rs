pub mod store;

pub use store::{MetricsStore, MetricsWindow};
