//! In-process transport
//!
//! Channel-backed sessions with the same blocking and close-to-unblock
//! behaviour as a real socket. Used by tests, benches and local demos.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use tracing::debug;

use super::{end_of_stream, Acceptor, ServiceRecord, SessionIo, StreamSession, Transport};
use crate::error::{DialError, ListenError};

/// Create a connected pair of sessions.
///
/// The first session is the end named `a_name`; each end reports the
/// other's name as its peer.
pub fn pipe(a_name: &str, b_name: &str) -> (StreamSession, StreamSession) {
    let (a_tx, b_rx) = channel::unbounded();
    let (b_tx, a_rx) = channel::unbounded();

    let a = StreamSession::new(b_name, Box::new(PipeEnd::new(a_tx, a_rx)));
    let b = StreamSession::new(a_name, Box::new(PipeEnd::new(b_tx, b_rx)));
    (a, b)
}

/// One direction pair of an in-memory pipe
struct PipeEnd {
    tx: Mutex<Option<Sender<Bytes>>>,
    rx: Receiver<Bytes>,
    /// Remainder of a chunk larger than the caller's buffer
    pending: Mutex<Bytes>,
    /// Dropped on shutdown to wake a blocked read
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
}

impl PipeEnd {
    fn new(tx: Sender<Bytes>, rx: Receiver<Bytes>) -> Self {
        let (close_tx, close_rx) = channel::bounded(0);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
            pending: Mutex::new(Bytes::new()),
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
        }
    }

    fn is_shut(&self) -> bool {
        self.close_tx.lock().is_none()
    }
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "session closed locally")
}

impl SessionIo for PipeEnd {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_shut() {
            return Err(aborted());
        }

        {
            let mut pending = self.pending.lock();
            if !pending.is_empty() {
                let n = pending.len().min(buf.len());
                let head = pending.split_to(n);
                buf[..n].copy_from_slice(&head);
                return Ok(n);
            }
        }

        select! {
            recv(self.rx) -> chunk => match chunk {
                Ok(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        *self.pending.lock() = chunk.slice(n..);
                    }
                    Ok(n)
                }
                Err(_) => Err(end_of_stream()),
            },
            recv(self.close_rx) -> _ => Err(aborted()),
        }
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        match &*self.tx.lock() {
            Some(tx) => tx
                .send(Bytes::copy_from_slice(buf))
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "session closed")),
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        self.tx.lock().take();
        self.close_tx.lock().take();
        Ok(())
    }
}

/// Listening end of the memory transport
struct MemoryAcceptor {
    incoming: Receiver<StreamSession>,
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
}

impl Acceptor for MemoryAcceptor {
    fn accept(&self) -> io::Result<StreamSession> {
        if self.close_tx.lock().is_none() {
            return Err(aborted());
        }

        select! {
            recv(self.incoming) -> session => session.map_err(|_| {
                io::Error::new(io::ErrorKind::NotConnected, "transport replaced listener")
            }),
            recv(self.close_rx) -> _ => Err(aborted()),
        }
    }

    fn close(&self) -> io::Result<()> {
        self.close_tx.lock().take();
        Ok(())
    }
}

/// Channel-backed [`Transport`]
#[derive(Default)]
pub struct MemoryTransport {
    incoming: Mutex<Option<Sender<StreamSession>>>,
    dialed: Mutex<VecDeque<StreamSession>>,
    listen_failure: AtomicBool,
    dial_failure: AtomicBool,
    listens: AtomicUsize,
    next_peer: AtomicU64,
}

impl MemoryTransport {
    /// Create a transport with no active listener
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to the current listener, returning the remote end
    pub fn connect(&self) -> io::Result<StreamSession> {
        let id = self.next_peer.fetch_add(1, Ordering::Relaxed);
        let (local, remote) = pipe("memory:host", &format!("memory:{id}"));

        let incoming = self.incoming.lock();
        let tx = incoming
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused))?;
        tx.send(local)
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionRefused))?;

        Ok(remote)
    }

    /// Remote end of the oldest successful dial not yet taken
    pub fn take_dialed(&self) -> Option<StreamSession> {
        self.dialed.lock().pop_front()
    }

    /// Make subsequent `listen` calls fail as if no radio were present
    pub fn set_listen_failure(&self, fail: bool) {
        self.listen_failure.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `dial` calls be refused
    pub fn set_dial_failure(&self, fail: bool) {
        self.dial_failure.store(fail, Ordering::SeqCst);
    }

    /// Number of listeners successfully bound so far
    pub fn listen_count(&self) -> usize {
        self.listens.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    fn listen(&self, record: &ServiceRecord) -> Result<Box<dyn Acceptor>, ListenError> {
        if self.listen_failure.load(Ordering::SeqCst) {
            return Err(ListenError::Unavailable("memory transport disabled".into()));
        }

        let (tx, rx) = channel::unbounded();
        let (close_tx, close_rx) = channel::bounded(0);
        *self.incoming.lock() = Some(tx);
        self.listens.fetch_add(1, Ordering::SeqCst);

        debug!(service = %record, "Memory listener bound");

        Ok(Box::new(MemoryAcceptor {
            incoming: rx,
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
        }))
    }

    fn dial(&self, target: &str, _record: &ServiceRecord) -> Result<StreamSession, DialError> {
        if self.dial_failure.load(Ordering::SeqCst) {
            return Err(DialError::Refused {
                target: target.to_string(),
            });
        }

        let (local, remote) = pipe("memory:host", target);
        self.dialed.lock().push_back(remote);
        Ok(local)
    }
}
