//! Runtime counters and request bookkeeping
//!
//! Handlers call `RequestGuard::begin` on entry; dropping the guard
//! decrements the in-flight count, so it stays accurate even when a client
//! disconnects and axum drops the handler future.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Maximum time to wait for in-flight requests after a shutdown signal
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime metrics tracked while the service is running
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    /// Requests currently being processed. Reported when the drain deadline
    /// expires with work still running.
    pub in_flight: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_seconds": self.started_at.elapsed().as_secs(),
            "requests_served": self.requests_total.load(Ordering::Relaxed),
            "errors_total": self.errors_total.load(Ordering::Relaxed),
            "in_flight": self.in_flight.load(Ordering::Relaxed),
        })
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts one request for its whole lifetime.
pub struct RequestGuard {
    in_flight: Arc<AtomicU64>,
    pub request_id: String,
    pub started: Instant,
}

impl RequestGuard {
    pub fn begin(metrics: &ServiceMetrics) -> Self {
        metrics.requests_total.fetch_add(1, Ordering::Relaxed);
        metrics.in_flight.fetch_add(1, Ordering::Relaxed);
        Self {
            in_flight: metrics.in_flight.clone(),
            request_id: format!("req_{}", uuid::Uuid::new_v4().as_simple()),
            started: Instant::now(),
        }
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
