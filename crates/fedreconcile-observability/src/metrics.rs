//! Metrics collection with Prometheus
//!
//! This module provides Prometheus metrics for FedReconcile:
//! - Login attempts by outcome
//! - Relay calls by outcome and upstream latency
//! - Artifact staging and downloads
//! - Lease lifecycle (active, reclaimed, cleanup failures)

use prometheus::{
    CounterVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Arc;

/// How a relay call ended, used as a metric label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Success,
    Unauthenticated,
    Forbidden,
    BadRequest,
    UpstreamError,
    UpstreamUnreachable,
    Internal,
}

impl RelayOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::BadRequest => "bad_request",
            Self::UpstreamError => "upstream_error",
            Self::UpstreamUnreachable => "upstream_unreachable",
            Self::Internal => "internal",
        }
    }
}

/// Metrics collector for FedReconcile
#[derive(Clone)]
pub struct Metrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Login attempts by outcome
    pub logins_total: IntCounterVec,

    /// Relay calls by outcome
    pub relay_requests_total: IntCounterVec,
    /// Round trip to the validation service
    pub upstream_duration_seconds: HistogramVec,
    /// Bytes forwarded upstream, by input slot
    pub upload_bytes_total: CounterVec,

    /// Artifacts staged for download, by kind
    pub artifacts_staged_total: IntCounterVec,
    /// Download requests by outcome (served, not_found)
    pub artifact_downloads_total: IntCounterVec,

    // Lease lifecycle, mirrored from the lease registry at scrape time
    pub leases_active: IntGauge,
    pub leases_reclaimed: IntGauge,
    pub lease_cleanup_failures: IntGauge,
    pub lease_bytes_freed: IntGauge,

    /// Leases acquired since start
    pub leases_acquired_total: IntCounter,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let logins_total = IntCounterVec::new(
            Opts::new("fedreconcile_logins_total", "Login attempts by outcome"),
            &["outcome"],
        )?;

        let relay_requests_total = IntCounterVec::new(
            Opts::new(
                "fedreconcile_relay_requests_total",
                "Validation relay calls by outcome",
            ),
            &["outcome"],
        )?;

        // Reconciliation runs are slow; buckets reach the client timeout
        let upstream_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "fedreconcile_upstream_duration_seconds",
                "Validation service round trip in seconds",
            )
            .buckets(vec![
                0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
            ]),
            &["contract", "outcome"],
        )?;

        let upload_bytes_total = CounterVec::new(
            Opts::new(
                "fedreconcile_upload_bytes_total",
                "Bytes received for validation",
            ),
            &["slot"],
        )?;

        let artifacts_staged_total = IntCounterVec::new(
            Opts::new(
                "fedreconcile_artifacts_staged_total",
                "Artifacts staged for download",
            ),
            &["kind"],
        )?;

        let artifact_downloads_total = IntCounterVec::new(
            Opts::new(
                "fedreconcile_artifact_downloads_total",
                "Artifact download requests by outcome",
            ),
            &["outcome"],
        )?;

        let leases_active = IntGauge::new(
            "fedreconcile_leases_active",
            "Leases currently holding scratch files",
        )?;
        let leases_reclaimed = IntGauge::new(
            "fedreconcile_leases_reclaimed",
            "Leases reclaimed since start",
        )?;
        let lease_cleanup_failures = IntGauge::new(
            "fedreconcile_lease_cleanup_failures",
            "Lease directories that could not be removed",
        )?;
        let lease_bytes_freed = IntGauge::new(
            "fedreconcile_lease_bytes_freed",
            "Scratch bytes freed by lease reclaim",
        )?;
        let leases_acquired_total = IntCounter::new(
            "fedreconcile_leases_acquired_total",
            "Leases acquired by relay calls",
        )?;

        registry.register(Box::new(logins_total.clone()))?;
        registry.register(Box::new(relay_requests_total.clone()))?;
        registry.register(Box::new(upstream_duration_seconds.clone()))?;
        registry.register(Box::new(upload_bytes_total.clone()))?;
        registry.register(Box::new(artifacts_staged_total.clone()))?;
        registry.register(Box::new(artifact_downloads_total.clone()))?;
        registry.register(Box::new(leases_active.clone()))?;
        registry.register(Box::new(leases_reclaimed.clone()))?;
        registry.register(Box::new(lease_cleanup_failures.clone()))?;
        registry.register(Box::new(lease_bytes_freed.clone()))?;
        registry.register(Box::new(leases_acquired_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            logins_total,
            relay_requests_total,
            upstream_duration_seconds,
            upload_bytes_total,
            artifacts_staged_total,
            artifact_downloads_total,
            leases_active,
            leases_reclaimed,
            lease_cleanup_failures,
            lease_bytes_freed,
            leases_acquired_total,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_login(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.logins_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_relay(&self, outcome: RelayOutcome) {
        self.relay_requests_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// Record one upstream round trip
    pub fn record_upstream(&self, contract: &str, success: bool, duration_secs: f64) {
        let outcome = if success { "success" } else { "failure" };
        self.upstream_duration_seconds
            .with_label_values(&[contract, outcome])
            .observe(duration_secs);
    }

    pub fn record_upload(&self, slot: &str, bytes: usize) {
        self.upload_bytes_total
            .with_label_values(&[slot])
            .inc_by(bytes as f64);
    }

    pub fn record_artifact_staged(&self, kind: &str) {
        self.artifacts_staged_total.with_label_values(&[kind]).inc();
    }

    pub fn record_download(&self, served: bool) {
        let outcome = if served { "served" } else { "not_found" };
        self.artifact_downloads_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_lease_acquired(&self) {
        self.leases_acquired_total.inc();
    }

    /// Mirror the lease registry's counters into gauges
    pub fn set_lease_stats(&self, active: usize, reclaimed: u64, failures: u64, bytes_freed: u64) {
        self.leases_active.set(active as i64);
        self.leases_reclaimed.set(reclaimed as i64);
        self.lease_cleanup_failures.set(failures as i64);
        self.lease_bytes_freed.set(bytes_freed as i64);
    }
}
