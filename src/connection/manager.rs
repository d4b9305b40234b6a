//! Connection manager
//!
//! Single-peer state machine. Owns at most one listener, one session and
//! one pending dial, and serializes every transition behind one lock.
//!
//! Notifications are sent while the lock is held. The channel never
//! blocks, so the owner observes `StateChanged` events in exactly the
//! order transitions were applied, and a handler that calls back into the
//! manager cannot deadlock.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::state::{ConnectionState, Event, EventReceiver, EventSender, Generation};
use crate::config::Config;
use crate::metrics::METRICS;
use crate::transport::{ServiceRecord, StreamSession, Transport};
use crate::worker::{close_session, DialWorker, ListenerWorker, SessionWorker};

/// Connection manager configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Identity advertised by the listener
    pub record: ServiceRecord,
    /// Read loop buffer size
    pub read_buffer_size: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            record: ServiceRecord::default(),
            read_buffer_size: 1024,
        }
    }
}

impl From<&Config> for ManagerConfig {
    fn from(config: &Config) -> Self {
        Self {
            record: config.service.record(),
            read_buffer_size: config.session.read_buffer_size,
        }
    }
}

/// State guarded by the transition lock
#[derive(Default)]
struct Inner {
    state: ConnectionState,
    listener: Option<Arc<ListenerWorker>>,
    session: Option<Arc<SessionWorker>>,
    dial: Option<Arc<DialWorker>>,
    last_generation: u64,
}

impl Inner {
    fn next_generation(&mut self) -> Generation {
        self.last_generation += 1;
        Generation::from_raw(self.last_generation)
    }

    fn is_current_listener(&self, generation: Generation) -> bool {
        self.listener.as_ref().is_some_and(|w| w.generation() == generation)
    }

    fn is_current_session(&self, generation: Generation) -> bool {
        self.session.as_ref().is_some_and(|w| w.generation() == generation)
    }

    fn is_current_dial(&self, generation: Generation) -> bool {
        self.dial.as_ref().is_some_and(|w| w.generation() == generation)
    }

    fn cancel_listener(&mut self) {
        if let Some(worker) = self.listener.take() {
            worker.cancel();
        }
    }

    fn cancel_session(&mut self) {
        if let Some(worker) = self.session.take() {
            worker.cancel();
        }
    }

    fn cancel_dial(&mut self) {
        if let Some(worker) = self.dial.take() {
            worker.cancel();
        }
    }
}

/// Manages the single peer connection
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    config: ManagerConfig,
    inner: Mutex<Inner>,
    events: EventSender,
}

impl ConnectionManager {
    /// Create a manager in state `None` along with its event stream
    pub fn new(transport: Arc<dyn Transport>, config: ManagerConfig) -> (Arc<Self>, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::with_sender(transport, config, tx), rx)
    }

    /// Create a manager that notifies through an existing channel
    pub fn with_sender(
        transport: Arc<dyn Transport>,
        config: ManagerConfig,
        events: EventSender,
    ) -> Arc<Self> {
        debug!(service = %config.record, "New connection manager");

        Arc::new(Self {
            transport,
            config,
            inner: Mutex::new(Inner::default()),
            events,
        })
    }

    /// Current state snapshot
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Enter `Listening`, dropping any live session or pending dial.
    ///
    /// Idempotent: an already running listener is kept.
    pub fn start(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        self.start_locked(&mut inner);
    }

    /// Dial `target`, entering `Connecting` until the dial resolves.
    ///
    /// The listener keeps running; an inbound peer accepted first wins.
    pub fn connect(self: &Arc<Self>, target: &str) {
        let mut inner = self.inner.lock();
        info!(peer = target, "connect");

        inner.cancel_dial();
        inner.cancel_session();

        let generation = inner.next_generation();
        match DialWorker::spawn(
            generation,
            target,
            self.transport.clone(),
            self.config.record.clone(),
            Arc::downgrade(self),
        ) {
            Ok(worker) => {
                inner.dial = Some(worker);
                self.set_state(&mut inner, ConnectionState::Connecting);
            }
            Err(e) => {
                METRICS.dial_failed();
                error!(peer = target, error = %e, "Failed to spawn dial thread");
                self.notify(Event::ConnectionFailed);
                self.start_locked(&mut inner);
            }
        }
    }

    /// Adopt an established session, retiring the listener and any
    /// previous session.
    pub fn connected(self: &Arc<Self>, session: StreamSession) {
        let mut inner = self.inner.lock();
        self.connected_locked(&mut inner, session);
    }

    /// Cancel every worker and enter `None`
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        info!("stop");

        inner.cancel_session();
        inner.cancel_listener();
        inner.cancel_dial();
        self.set_state(&mut inner, ConnectionState::None);
    }

    /// Write to the live session. A no-op unless `Connected`.
    ///
    /// Returns whether the bytes reached the session. A failed write is
    /// logged by the session worker and never changes state. The I/O
    /// happens outside the transition lock.
    pub fn write(&self, data: &[u8]) -> bool {
        let worker = {
            let inner = self.inner.lock();
            if inner.state != ConnectionState::Connected {
                trace!(state = %inner.state, bytes = data.len(), "Write ignored");
                return false;
            }
            match &inner.session {
                Some(worker) => worker.clone(),
                None => return false,
            }
        };

        worker.write(data)
    }

    /// Hand an accepted session from listener `generation` to the manager
    pub(crate) fn offer_inbound(self: &Arc<Self>, generation: Generation, session: StreamSession) {
        let mut inner = self.inner.lock();

        if inner.is_current_listener(generation) && inner.state.accepts_inbound() {
            self.connected_locked(&mut inner, session);
            return;
        }

        // Either not ready or already connected
        let state = inner.state;
        drop(inner);

        METRICS.accept_discarded();
        debug!(%generation, %state, peer = session.peer(), "Closing unwanted connection");
        close_session(&session);
    }

    /// Listener `generation` left its accept loop
    pub(crate) fn listener_exited(&self, generation: Generation) {
        let mut inner = self.inner.lock();
        if inner.is_current_listener(generation) {
            // No state change: the next start() binds a fresh listener
            warn!(%generation, state = %inner.state, "Listener stopped accepting");
            inner.listener = None;
        }
    }

    /// Forward a data event from session `generation` if it is still live
    pub(crate) fn deliver(&self, generation: Generation, event: Event) -> bool {
        let inner = self.inner.lock();
        if !inner.is_current_session(generation) {
            trace!(%generation, "Dropping event from superseded session");
            return false;
        }
        self.notify(event);
        true
    }

    /// Session `generation` failed to read: report and re-listen
    pub(crate) fn connection_lost(self: &Arc<Self>, generation: Generation) {
        let mut inner = self.inner.lock();
        if !inner.is_current_session(generation) {
            debug!(%generation, "Ignoring loss of superseded session");
            return;
        }

        error!(%generation, "Connection lost");
        METRICS.session_lost();
        self.notify(Event::ConnectionFailed);
        self.start_locked(&mut inner);
    }

    /// Dial `generation` produced a session
    pub(crate) fn dial_completed(self: &Arc<Self>, generation: Generation, session: StreamSession) {
        let mut inner = self.inner.lock();

        if inner.is_current_dial(generation) && inner.state == ConnectionState::Connecting {
            inner.dial = None;
            self.connected_locked(&mut inner, session);
            return;
        }

        drop(inner);
        debug!(%generation, peer = session.peer(), "Closing session from stale dial");
        close_session(&session);
    }

    /// Dial `generation` failed: report and re-listen
    pub(crate) fn dial_failed(self: &Arc<Self>, generation: Generation) {
        let mut inner = self.inner.lock();
        if !inner.is_current_dial(generation) {
            return;
        }

        inner.dial = None;
        self.notify(Event::ConnectionFailed);
        self.start_locked(&mut inner);
    }

    fn start_locked(self: &Arc<Self>, inner: &mut Inner) {
        debug!("start");

        inner.cancel_session();
        inner.cancel_dial();
        self.set_state(inner, ConnectionState::Listening);

        if inner.listener.is_some() {
            return;
        }

        let generation = inner.next_generation();
        match ListenerWorker::spawn(
            generation,
            self.transport.as_ref(),
            &self.config.record,
            Arc::downgrade(self),
        ) {
            Ok(worker) => inner.listener = Some(worker),
            Err(e) => {
                // Stay in Listening with no listener until the next start()
                METRICS.listen_failed();
                error!(service = %self.config.record, error = %e, "listen() failed");
            }
        }
    }

    fn connected_locked(self: &Arc<Self>, inner: &mut Inner, session: StreamSession) {
        info!(peer = session.peer(), "connected");

        inner.cancel_session();
        inner.cancel_dial();
        inner.cancel_listener();

        let generation = inner.next_generation();
        match SessionWorker::spawn(
            generation,
            session,
            self.config.read_buffer_size,
            Arc::downgrade(self),
        ) {
            Ok(worker) => {
                METRICS.session_opened();
                inner.session = Some(worker);
                self.set_state(inner, ConnectionState::Connected);
            }
            Err(e) => {
                error!(%generation, error = %e, "Failed to spawn session thread");
                self.notify(Event::ConnectionFailed);
                self.start_locked(inner);
            }
        }
    }

    fn set_state(&self, inner: &mut Inner, state: ConnectionState) {
        debug!(from = %inner.state, to = %state, "setState()");
        inner.state = state;
        self.notify(Event::StateChanged(state));
    }

    fn notify(&self, event: Event) {
        if self.events.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        inner.cancel_session();
        inner.cancel_listener();
        inner.cancel_dial();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use std::thread;
    use std::time::{Duration, Instant};

    fn recv(rx: &mut EventReceiver) -> Event {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(event) = rx.try_recv() {
                return event;
            }
            assert!(Instant::now() < deadline, "no event within 5s");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn manager() -> (Arc<MemoryTransport>, Arc<ConnectionManager>, EventReceiver) {
        let transport = Arc::new(MemoryTransport::new());
        let (manager, rx) = ConnectionManager::new(transport.clone(), ManagerConfig::default());
        (transport, manager, rx)
    }

    #[test]
    fn test_accept_after_lost_race_is_discarded() {
        let (transport, manager, mut rx) = manager();
        manager.start();
        assert_eq!(recv(&mut rx), Event::StateChanged(ConnectionState::Listening));

        // Simulate a concurrent transition that left the listener alive
        manager.inner.lock().state = ConnectionState::None;

        let remote = transport.connect().unwrap();
        let mut buf = [0u8; 4];
        let err = remote.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);

        assert_eq!(manager.state(), ConnectionState::None);
        assert!(manager.inner.lock().session.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_listener_exit_allows_fresh_listener() {
        let (transport, manager, mut rx) = manager();
        manager.start();
        recv(&mut rx);

        // Rebinding behind the manager's back ends its accept loop
        let _stray = transport.listen(&ServiceRecord::default()).unwrap();
        wait_until(|| manager.inner.lock().listener.is_none());
        assert_eq!(manager.state(), ConnectionState::Listening);

        manager.start();
        assert_eq!(recv(&mut rx), Event::StateChanged(ConnectionState::Listening));
        assert_eq!(transport.listen_count(), 3);

        let _remote = transport.connect().unwrap();
        assert_eq!(recv(&mut rx), Event::StateChanged(ConnectionState::Connected));
    }

    #[test]
    fn test_repeated_start_keeps_listener() {
        let (transport, manager, mut rx) = manager();
        manager.start();
        manager.start();

        assert_eq!(recv(&mut rx), Event::StateChanged(ConnectionState::Listening));
        assert_eq!(recv(&mut rx), Event::StateChanged(ConnectionState::Listening));
        assert_eq!(transport.listen_count(), 1);
    }

    #[test]
    fn test_generations_increase() {
        let (transport, manager, mut rx) = manager();
        manager.start();
        recv(&mut rx);
        let listener_gen = manager.inner.lock().listener.as_ref().unwrap().generation();

        let _remote = transport.connect().unwrap();
        assert_eq!(recv(&mut rx), Event::StateChanged(ConnectionState::Connected));
        let session_gen = manager.inner.lock().session.as_ref().unwrap().generation();

        assert!(session_gen > listener_gen);
        assert!(manager.inner.lock().listener.is_none());
    }

    #[test]
    fn test_drop_closes_session() {
        let (transport, manager, mut rx) = manager();
        manager.start();
        recv(&mut rx);
        let remote = transport.connect().unwrap();
        recv(&mut rx);

        drop(manager);

        let mut buf = [0u8; 4];
        let err = remote.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
