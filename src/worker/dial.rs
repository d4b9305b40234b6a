//! Outbound dial

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use tracing::{debug, warn};

use super::close_session;
use crate::connection::{ConnectionManager, Generation};
use crate::metrics::METRICS;
use crate::transport::{ServiceRecord, Transport};

/// One pending outbound connection attempt.
///
/// A blocking dial cannot be interrupted; cancelling only marks the
/// attempt stale so the manager discards whatever it produces.
pub struct DialWorker {
    generation: Generation,
    target: String,
    cancelled: AtomicBool,
}

impl DialWorker {
    pub(crate) fn spawn(
        generation: Generation,
        target: &str,
        transport: Arc<dyn Transport>,
        record: ServiceRecord,
        manager: Weak<ConnectionManager>,
    ) -> io::Result<Arc<Self>> {
        let worker = Arc::new(Self {
            generation,
            target: target.to_string(),
            cancelled: AtomicBool::new(false),
        });

        let runner = worker.clone();
        thread::Builder::new()
            .name(format!("rose-dial-{generation}"))
            .spawn(move || runner.run(transport.as_ref(), &record, manager))?;

        Ok(worker)
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            debug!(generation = %self.generation, peer = %self.target, "Cancelling dial");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn run(&self, transport: &dyn Transport, record: &ServiceRecord, manager: Weak<ConnectionManager>) {
        debug!(generation = %self.generation, peer = %self.target, "BEGIN dial");
        let result = transport.dial(&self.target, record);

        match (result, manager.upgrade()) {
            (Ok(session), Some(manager)) => manager.dial_completed(self.generation, session),
            (Ok(session), None) => close_session(&session),
            (Err(e), manager) => {
                METRICS.dial_failed();
                if self.is_cancelled() {
                    debug!(generation = %self.generation, error = %e, "Cancelled dial failed");
                } else {
                    warn!(generation = %self.generation, peer = %self.target, error = %e, "connect() failed");
                }
                if let Some(manager) = manager {
                    manager.dial_failed(self.generation);
                }
            }
        }

        debug!(generation = %self.generation, "END dial");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use std::time::Duration;

    #[test]
    fn test_dial_without_manager_closes_session() {
        let transport = Arc::new(MemoryTransport::new());
        let worker = DialWorker::spawn(
            Generation::from_raw(1),
            "peer",
            transport.clone(),
            ServiceRecord::default(),
            Weak::new(),
        )
        .unwrap();

        let mut remote = None;
        for _ in 0..500 {
            remote = transport.take_dialed();
            if remote.is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        let remote = remote.expect("dial never reached the transport");
        let mut buf = [0u8; 4];
        assert!(remote.read(&mut buf).is_err());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let transport = Arc::new(MemoryTransport::new());
        transport.set_dial_failure(true);
        let worker = DialWorker::spawn(
            Generation::from_raw(2),
            "peer",
            transport,
            ServiceRecord::default(),
            Weak::new(),
        )
        .unwrap();

        worker.cancel();
        worker.cancel();
        assert!(worker.is_cancelled());
    }
}
