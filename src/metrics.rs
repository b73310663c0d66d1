//! Coordinator Metrics
//!
//! Prometheus collectors for provisioning outcomes, store retries and
//! convergence polling. Collectors live in a private registry so several
//! coordinators can coexist in one process; the front end exposes
//! [`CoordinatorMetrics::gather_text`] on its metrics endpoint.

use crate::error::{Error, Result};
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Operation outcome label values
pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_ERROR: &str = "error";

/// Collectors recorded by the coordinator
#[derive(Clone)]
pub struct CoordinatorMetrics {
    registry: Registry,
    operations: IntCounterVec,
    store_retries: IntCounterVec,
    poll_attempts: Histogram,
    finalizer_conflicts: IntCounter,
}

impl CoordinatorMetrics {
    /// Create and register all collectors
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new(
                "lvm_coordinator_operations_total",
                "Coordinator operations by kind and outcome",
            ),
            &["operation", "outcome"],
        )
        .map_err(metrics_error)?;

        let store_retries = IntCounterVec::new(
            Opts::new(
                "lvm_coordinator_store_retries_total",
                "Store calls retried after a transient failure",
            ),
            &["operation"],
        )
        .map_err(metrics_error)?;

        let poll_attempts = Histogram::with_opts(
            HistogramOpts::new(
                "lvm_coordinator_poll_attempts",
                "Status reads until a logical volume converged",
            )
            .buckets(vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 300.0, 600.0]),
        )
        .map_err(metrics_error)?;

        let finalizer_conflicts = IntCounter::new(
            "lvm_coordinator_finalizer_conflicts_total",
            "Version conflicts hit while removing finalizers",
        )
        .map_err(metrics_error)?;

        registry.register(Box::new(operations.clone())).map_err(metrics_error)?;
        registry.register(Box::new(store_retries.clone())).map_err(metrics_error)?;
        registry.register(Box::new(poll_attempts.clone())).map_err(metrics_error)?;
        registry
            .register(Box::new(finalizer_conflicts.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            operations,
            store_retries,
            poll_attempts,
            finalizer_conflicts,
        })
    }

    /// Count a finished coordinator operation
    pub fn record_operation<T>(&self, operation: &str, result: &Result<T>) {
        let outcome = if result.is_ok() { OUTCOME_SUCCESS } else { OUTCOME_ERROR };
        self.operations.with_label_values(&[operation, outcome]).inc();
    }

    /// Count one retried store call
    pub fn record_store_retry(&self, operation: &str) {
        self.store_retries.with_label_values(&[operation]).inc();
    }

    /// Observe the poll attempts of a converged volume
    pub fn observe_poll_attempts(&self, attempts: u32) {
        self.poll_attempts.observe(f64::from(attempts));
    }

    /// Count one finalizer update conflict
    pub fn record_finalizer_conflict(&self) {
        self.finalizer_conflicts.inc();
    }

    /// Current count for an operation/outcome pair
    pub fn operation_count(&self, operation: &str, outcome: &str) -> u64 {
        self.operations.with_label_values(&[operation, outcome]).get()
    }

    /// Current retry count for a store operation
    pub fn store_retry_count(&self, operation: &str) -> u64 {
        self.store_retries.with_label_values(&[operation]).get()
    }

    /// Current finalizer conflict count
    pub fn finalizer_conflict_count(&self) -> u64 {
        self.finalizer_conflicts.get()
    }

    /// Render all collectors in the Prometheus text format
    pub fn gather_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics encoding: {}", e)))
    }
}

impl std::fmt::Debug for CoordinatorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorMetrics").finish_non_exhaustive()
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}
