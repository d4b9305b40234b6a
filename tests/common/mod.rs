//! Shared helpers for manager integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rose_link::connection::EventReceiver;
use rose_link::{ConnectionManager, Event, ManagerConfig, MemoryTransport};

/// Wait for the next owner notification
pub async fn next_event(rx: &mut EventReceiver) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Assert nothing else is delivered for a short while
pub async fn assert_quiet(rx: &mut EventReceiver) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    if let Ok(event) = rx.try_recv() {
        panic!("unexpected event: {event:?}");
    }
}

/// A manager over a fresh memory transport
pub fn memory_manager() -> (Arc<MemoryTransport>, Arc<ConnectionManager>, EventReceiver) {
    let transport = Arc::new(MemoryTransport::new());
    let (manager, rx) = ConnectionManager::new(transport.clone(), ManagerConfig::default());
    (transport, manager, rx)
}
