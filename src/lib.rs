pub mod audit;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod controller;
pub mod cost;
pub mod engine;
pub mod k8s;
pub mod metrics;
pub mod reporting;
pub mod safety;
pub mod state;
