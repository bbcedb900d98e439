//! FedReconcile Observability
//!
//! This crate provides observability features:
//! - Metrics collection (Prometheus)
//! - Health endpoints

pub mod health;
pub mod metrics;

pub use health::{ComponentStatus, HealthState, MetricsRefresher, ReadinessChecker, health_router};
pub use metrics::{Metrics, RelayOutcome};
