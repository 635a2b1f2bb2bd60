//! Telemetry utilities for RPC timing and request spans.

use std::time::Instant;

/// Guard for timing an RPC call and recording metrics.
///
/// Records call latency when dropped.
pub struct RpcTimer {
    method: &'static str,
    start: Instant,
}

impl RpcTimer {
    /// Start timing an RPC call.
    pub fn new(method: &'static str) -> Self {
        Self {
            method,
            start: Instant::now(),
        }
    }
}

impl Drop for RpcTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        crate::metrics::record_rpc(self.method, duration);
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, info_span};

    /// Create a span for one RPC call.
    pub fn rpc(method: &str, caller: &str) -> Span {
        info_span!("rpc", method = %method, caller = %caller)
    }
}
