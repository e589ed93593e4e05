use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Outcome label attached to every recorded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Success,
    Error,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Success => "success",
            OperationStatus::Error => "error",
        }
    }

    pub fn from_result<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            OperationStatus::Success
        } else {
            OperationStatus::Error
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Injected metrics sink.
///
/// Use-case crates call this for every operation; the concrete exporter
/// (Prometheus, OTLP, statsd) is wired at the binary edge and stays out
/// of the engine.
pub trait MetricsSink: Send + Sync {
    fn record_operation(&self, domain: &str, op: &str, status: OperationStatus);

    fn record_duration(
        &self,
        domain: &str,
        op: &str,
        duration: Duration,
        status: OperationStatus,
    );
}

/// Sink that emits metrics as structured tracing events under the
/// `metrics` target. Good enough for single-node deployments where logs
/// are already scraped.
#[derive(Debug, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record_operation(&self, domain: &str, op: &str, status: OperationStatus) {
        debug!(
            target: "metrics",
            domain = %domain,
            op = %op,
            status = %status,
            "operation"
        );
    }

    fn record_duration(
        &self,
        domain: &str,
        op: &str,
        duration: Duration,
        status: OperationStatus,
    ) {
        debug!(
            target: "metrics",
            domain = %domain,
            op = %op,
            status = %status,
            duration_ms = duration.as_millis() as u64,
            "duration"
        );
    }
}

/// Sink that drops everything. Default for tests.
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_operation(&self, _domain: &str, _op: &str, _status: OperationStatus) {}

    fn record_duration(
        &self,
        _domain: &str,
        _op: &str,
        _duration: Duration,
        _status: OperationStatus,
    ) {
    }
}

/// Counting sink for assertions in tests.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    pub operations: AtomicU64,
    pub errors: AtomicU64,
}

impl CountingMetrics {
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

impl MetricsSink for CountingMetrics {
    fn record_operation(&self, _domain: &str, _op: &str, status: OperationStatus) {
        self.operations.fetch_add(1, Ordering::Relaxed);
        if status == OperationStatus::Error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_duration(
        &self,
        _domain: &str,
        _op: &str,
        _duration: Duration,
        _status: OperationStatus,
    ) {
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_result() {
        let ok: Result<(), ()> = Ok(());
        let err: Result<(), ()> = Err(());
        assert_eq!(OperationStatus::from_result(&ok), OperationStatus::Success);
        assert_eq!(OperationStatus::from_result(&err), OperationStatus::Error);
    }

    #[test]
    fn test_counting_sink() {
        let sink = CountingMetrics::default();
        sink.record_operation("secret", "get", OperationStatus::Success);
        sink.record_operation("secret", "get", OperationStatus::Error);
        sink.record_duration(
            "secret",
            "get",
            Duration::from_millis(3),
            OperationStatus::Success,
        );

        assert_eq!(sink.operation_count(), 2);
        assert_eq!(sink.error_count(), 1);
    }
}
