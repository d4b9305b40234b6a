//! Atomic counters for hot-path metrics
//!
//! Lock-free counters that can be safely updated from any worker thread.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance
pub static METRICS: Metrics = Metrics::new();

/// Atomic metrics counters
pub struct Metrics {
    // Session metrics
    pub sessions_opened: AtomicU64,
    pub sessions_active: AtomicU64,
    pub sessions_lost: AtomicU64,
    pub accepts_discarded: AtomicU64,

    // Endpoint metrics
    pub listen_failures: AtomicU64,
    pub dial_failures: AtomicU64,

    // Traffic metrics
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub chunks_received: AtomicU64,
    pub chunks_sent: AtomicU64,

    // Error metrics
    pub write_failures: AtomicU64,
    pub close_errors: AtomicU64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            sessions_opened: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            sessions_lost: AtomicU64::new(0),
            accepts_discarded: AtomicU64::new(0),
            listen_failures: AtomicU64::new(0),
            dial_failures: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            chunks_received: AtomicU64::new(0),
            chunks_sent: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            close_errors: AtomicU64::new(0),
        }
    }

    // Session tracking
    #[inline]
    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn session_closed(&self) {
        // Saturate: a session may be retired before its open was counted
        let _ = self
            .sessions_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    #[inline]
    pub fn session_lost(&self) {
        self.sessions_lost.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn accept_discarded(&self) {
        self.accepts_discarded.fetch_add(1, Ordering::Relaxed);
    }

    // Endpoint tracking
    #[inline]
    pub fn listen_failed(&self) {
        self.listen_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn dial_failed(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Traffic tracking
    #[inline]
    pub fn bytes_rx(&self, count: u64) {
        self.bytes_received.fetch_add(count, Ordering::Relaxed);
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn bytes_tx(&self, count: u64) {
        self.bytes_sent.fetch_add(count, Ordering::Relaxed);
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
    }

    // Error tracking
    #[inline]
    pub fn write_failed(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn close_error(&self) {
        self.close_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            sessions_lost: self.sessions_lost.load(Ordering::Relaxed),
            accepts_discarded: self.accepts_discarded.load(Ordering::Relaxed),
            listen_failures: self.listen_failures.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            close_errors: self.close_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics for reporting
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub sessions_opened: u64,
    pub sessions_active: u64,
    pub sessions_lost: u64,
    pub accepts_discarded: u64,
    pub listen_failures: u64,
    pub dial_failures: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub chunks_received: u64,
    pub chunks_sent: u64,
    pub write_failures: u64,
    pub close_errors: u64,
}
