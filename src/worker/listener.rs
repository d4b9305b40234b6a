//! Accept loop over an advertised endpoint

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use tracing::{debug, error, warn};

use super::close_session;
use crate::connection::{ConnectionManager, Generation};
use crate::error::ListenError;
use crate::metrics::METRICS;
use crate::transport::{Acceptor, ServiceRecord, Transport};

/// Owns a bound listening endpoint and hands accepted sessions to the
/// manager
pub struct ListenerWorker {
    generation: Generation,
    acceptor: Box<dyn Acceptor>,
    cancelled: AtomicBool,
}

impl ListenerWorker {
    /// Bind `record` on `transport` and start accepting on a new thread
    pub(crate) fn spawn(
        generation: Generation,
        transport: &dyn Transport,
        record: &ServiceRecord,
        manager: Weak<ConnectionManager>,
    ) -> Result<Arc<Self>, ListenError> {
        let acceptor = transport.listen(record)?;

        let worker = Arc::new(Self {
            generation,
            acceptor,
            cancelled: AtomicBool::new(false),
        });

        let runner = worker.clone();
        thread::Builder::new()
            .name(format!("rose-listener-{generation}"))
            .spawn(move || runner.run(manager))
            .map_err(|e| {
                worker.cancel();
                ListenError::Spawn(e)
            })?;

        Ok(worker)
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Close the endpoint. Any pending accept fails and the loop exits.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!(generation = %self.generation, "Cancelling listener");
        if let Err(e) = self.acceptor.close() {
            METRICS.close_error();
            warn!(generation = %self.generation, error = %e, "close() of listener failed");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn run(self: Arc<Self>, manager: Weak<ConnectionManager>) {
        debug!(generation = %self.generation, "BEGIN listener");

        loop {
            let session = match self.acceptor.accept() {
                Ok(session) => session,
                Err(e) => {
                    if self.is_cancelled() {
                        debug!(generation = %self.generation, "Listener closed");
                    } else {
                        error!(generation = %self.generation, error = %e, "accept() failed");
                    }
                    break;
                }
            };

            debug!(generation = %self.generation, peer = session.peer(), "Inbound connection accepted");

            let Some(manager) = manager.upgrade() else {
                close_session(&session);
                break;
            };
            manager.offer_inbound(self.generation, session);
        }

        if let Some(manager) = manager.upgrade() {
            manager.listener_exited(self.generation);
        }

        debug!(generation = %self.generation, "END listener");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_idempotent() {
        let transport = MemoryTransport::new();
        let worker = ListenerWorker::spawn(
            Generation::from_raw(1),
            &transport,
            &ServiceRecord::default(),
            Weak::new(),
        )
        .unwrap();

        assert!(!worker.is_cancelled());
        worker.cancel();
        worker.cancel();
        assert!(worker.is_cancelled());

        // Once the worker is gone a connection is either refused or
        // dropped unadopted, which the remote end sees as end of stream.
        drop(worker);
        std::thread::sleep(Duration::from_millis(50));
        if let Ok(remote) = transport.connect() {
            let mut buf = [0u8; 4];
            assert!(remote.read(&mut buf).is_err());
        }
    }

    #[test]
    fn test_accept_without_manager_closes_session() {
        let transport = MemoryTransport::new();
        let worker = ListenerWorker::spawn(
            Generation::from_raw(2),
            &transport,
            &ServiceRecord::default(),
            Weak::new(),
        )
        .unwrap();

        let remote = transport.connect().unwrap();
        let mut buf = [0u8; 4];
        let err = remote.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);

        worker.cancel();
    }

    #[test]
    fn test_bind_failure_is_reported() {
        let transport = MemoryTransport::new();
        transport.set_listen_failure(true);

        let result = ListenerWorker::spawn(
            Generation::from_raw(3),
            &transport,
            &ServiceRecord::default(),
            Weak::new(),
        );
        assert!(matches!(result, Err(ListenError::Unavailable(_))));
    }
}
