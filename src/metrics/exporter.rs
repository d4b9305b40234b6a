//! Prometheus metrics exporter
//!
//! HTTP endpoint for Prometheus scraping.

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;

use super::counters::{MetricsSnapshot, METRICS};
use crate::config::MetricsConfig;

/// Initialize the Prometheus metrics exporter.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    describe_counter!("rose_sessions_opened", "Sessions adopted by the manager");
    describe_gauge!("rose_sessions_active", "Currently adopted sessions");
    describe_counter!("rose_sessions_lost", "Sessions lost to read failure");
    describe_counter!("rose_accepts_discarded", "Inbound connections closed unadopted");
    describe_counter!("rose_listen_failures", "Failed attempts to bind the listener");
    describe_counter!("rose_dial_failures", "Failed outbound dials");
    describe_counter!("rose_bytes_received", "Total bytes received");
    describe_counter!("rose_bytes_sent", "Total bytes sent");
    describe_counter!("rose_chunks_received", "Total read chunks forwarded");
    describe_counter!("rose_chunks_sent", "Total writes confirmed");
    describe_counter!("rose_write_failures", "Writes that failed");
    describe_counter!("rose_close_errors", "Errors while closing sessions or listeners");

    PrometheusBuilder::new()
        .with_http_listener(config.bind_addr)
        .install()?;

    tokio::spawn(sync_metrics_task());

    Ok(())
}

/// Periodically push counter deltas into the metrics registry
async fn sync_metrics_task() {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut last = MetricsSnapshot::default();

    loop {
        interval.tick().await;

        let snap = METRICS.snapshot();
        gauge!("rose_sessions_active").set(snap.sessions_active as f64);

        let deltas = [
            ("rose_sessions_opened", snap.sessions_opened, last.sessions_opened),
            ("rose_sessions_lost", snap.sessions_lost, last.sessions_lost),
            ("rose_accepts_discarded", snap.accepts_discarded, last.accepts_discarded),
            ("rose_listen_failures", snap.listen_failures, last.listen_failures),
            ("rose_dial_failures", snap.dial_failures, last.dial_failures),
            ("rose_bytes_received", snap.bytes_received, last.bytes_received),
            ("rose_bytes_sent", snap.bytes_sent, last.bytes_sent),
            ("rose_chunks_received", snap.chunks_received, last.chunks_received),
            ("rose_chunks_sent", snap.chunks_sent, last.chunks_sent),
            ("rose_write_failures", snap.write_failures, last.write_failures),
            ("rose_close_errors", snap.close_errors, last.close_errors),
        ];

        for (name, now, before) in deltas {
            let delta = now.saturating_sub(before);
            if delta > 0 {
                counter!(name).increment(delta);
            }
        }

        last = snap;
    }
}
