//! Rose Link - single-peer stream connection manager
//!
//! Advertises a discoverable service, adopts at most one peer at a time,
//! streams raw bytes both ways and re-arms listening when the peer is lost.

pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod transport;
pub mod util;
pub mod worker;

pub use config::Config;
pub use connection::{ConnectionManager, ConnectionState, Event, ManagerConfig};
pub use transport::{MemoryTransport, ServiceRecord, StreamSession, TcpTransport, Transport};

/// Library version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
