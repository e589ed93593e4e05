//! Observability seams for the Strongroom engine.
//!
//! The engine records one operation count and one duration per use-case
//! call through the injected [`MetricsSink`]; logging is `tracing`
//! end-to-end. Nothing in this crate knows about concrete exporters.

pub mod logging;
pub mod metrics;

pub use logging::init_tracing;
pub use metrics::{CountingMetrics, MetricsSink, NoopMetrics, OperationStatus, TracingMetrics};
