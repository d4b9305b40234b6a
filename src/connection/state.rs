//! Connection state and owner notifications

use bytes::Bytes;
use std::fmt;
use tokio::sync::mpsc;

/// Manager connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Doing nothing
    #[default]
    None,
    /// Listening for an inbound connection
    Listening,
    /// Dialing an outbound connection
    Connecting,
    /// Connected to a peer
    Connected,
}

impl ConnectionState {
    /// Whether an inbound accept may be adopted in this state
    pub fn accepts_inbound(self) -> bool {
        matches!(self, Self::Listening | Self::Connecting)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Listening => "listening",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag distinguishing a worker from any worker it superseded
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    /// Create from raw u64
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Notification delivered to the owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The manager transitioned
    StateChanged(ConnectionState),
    /// A session was lost or a dial failed; re-listening has begun
    ConnectionFailed,
    /// Inbound bytes from the live session. May be empty.
    DataReceived(Bytes),
    /// Outbound bytes written to the live session
    DataSent(Bytes),
}

impl Event {
    /// Byte count carried by data events
    pub fn byte_count(&self) -> Option<usize> {
        match self {
            Self::DataReceived(data) | Self::DataSent(data) => Some(data.len()),
            _ => None,
        }
    }
}

/// Sending half of the owner notification channel
pub type EventSender = mpsc::UnboundedSender<Event>;

/// Receiving half of the owner notification channel
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;
