//! Prometheus metrics collection for edgelist.
//!
//! Exposed as Prometheus text on `GET /metrics`.
//!
//! - `edgelist_rpc_total{method}` - RPC calls by method
//! - `edgelist_rpc_errors_total{method,code}` - failed RPC calls by error code
//! - `edgelist_rpc_duration_seconds{method}` - RPC latency histogram
//! - `edgelist_items_written_total{op}` - item rows written by create/update/delete
//! - `edgelist_sync_items_served_total` - items returned to cursor pollers
//! - `edgelist_notify_signals_total` - change signals observed
//! - `edgelist_orphans_disabled_total` - items disabled because their list or policy vanished

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// RPC Metrics
// ========================================================================

/// RPC calls by method.
pub static RPC_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();

/// RPC errors by method and error code.
pub static RPC_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

/// RPC latency by method.
pub static RPC_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

// ========================================================================
// Distribution Metrics
// ========================================================================

/// Item rows written, by operation.
pub static ITEMS_WRITTEN: OnceLock<IntCounterVec> = OnceLock::new();

/// Items handed to cursor pollers.
pub static SYNC_ITEMS_SERVED: OnceLock<IntCounter> = OnceLock::new();

pub static NOTIFY_SIGNALS: OnceLock<IntCounter> = OnceLock::new();

pub static ORPHANS_DISABLED: OnceLock<IntCounter> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at startup before any metrics are recorded. Until
/// then every recorder below is a no-op.
pub fn init() {
    let r = registry();

    // Helper macro to register metric
    macro_rules! register {
        ($metric:ident, $init:expr) => {
            match $init {
                Ok(m) => {
                    if let Err(e) = r.register(Box::new(m.clone())) {
                        tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                    }
                    let _ = $metric.set(m);
                }
                Err(e) => {
                    tracing::warn!(error = %e, concat!("Failed to create metric ", stringify!($metric)));
                }
            }
        };
    }

    register!(RPC_COUNTER, IntCounterVec::new(Opts::new("edgelist_rpc_total", "RPC calls by method"), &["method"]));
    register!(RPC_ERRORS, IntCounterVec::new(Opts::new("edgelist_rpc_errors_total", "RPC errors by method and code"), &["method", "code"]));
    register!(RPC_LATENCY, HistogramVec::new(
        HistogramOpts::new("edgelist_rpc_duration_seconds", "RPC latency by method")
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["method"]));
    register!(ITEMS_WRITTEN, IntCounterVec::new(Opts::new("edgelist_items_written_total", "IP item rows written by operation"), &["op"]));
    register!(SYNC_ITEMS_SERVED, IntCounter::new("edgelist_sync_items_served_total", "IP items served to cursor pollers"));
    register!(NOTIFY_SIGNALS, IntCounter::new("edgelist_notify_signals_total", "Change signals observed"));
    register!(ORPHANS_DISABLED, IntCounter::new("edgelist_orphans_disabled_total", "Orphaned IP items disabled on read"));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Helper functions for metric updates
// ============================================================================

/// Record an RPC call with latency.
#[inline]
pub fn record_rpc(method: &str, duration_secs: f64) {
    if let Some(c) = RPC_COUNTER.get() {
        c.with_label_values(&[method]).inc();
    }
    if let Some(h) = RPC_LATENCY.get() {
        h.with_label_values(&[method]).observe(duration_secs);
    }
}

/// Record an RPC error.
#[inline]
pub fn record_rpc_error(method: &str, code: &str) {
    if let Some(c) = RPC_ERRORS.get() {
        c.with_label_values(&[method, code]).inc();
    }
}

/// Record item rows written by `op` ("create", "update", "delete", "replace").
#[inline]
pub fn record_items_written(op: &str, count: usize) {
    if let Some(c) = ITEMS_WRITTEN.get() {
        c.with_label_values(&[op]).inc_by(count as u64);
    }
}

#[inline]
pub fn record_sync_served(count: usize) {
    if let Some(c) = SYNC_ITEMS_SERVED.get() {
        c.inc_by(count as u64);
    }
}

#[inline]
pub fn record_notify_signal() {
    if let Some(c) = NOTIFY_SIGNALS.get() {
        c.inc();
    }
}

#[inline]
pub fn record_orphan_disabled() {
    if let Some(c) = ORPHANS_DISABLED.get() {
        c.inc();
    }
}
