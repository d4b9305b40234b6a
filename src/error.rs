//! Error types at the transport seams
//!
//! Everything past these seams is converted at the worker boundary into
//! either a state transition or a log line.

use std::io;

use thiserror::Error;

/// Failure to create or advertise a listening endpoint
#[derive(Debug, Error)]
pub enum ListenError {
    /// No transport is available (e.g. the radio is off)
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// Binding the endpoint failed
    #[error("bind failed: {0}")]
    Bind(#[source] io::Error),

    /// The accept thread could not be started
    #[error("failed to spawn listener thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Failure to open an outbound session
#[derive(Debug, Error)]
pub enum DialError {
    /// The peer refused the connection or is not reachable
    #[error("connection to {target} refused")]
    Refused { target: String },

    /// The peer did not answer in time
    #[error("connection to {target} timed out")]
    Timeout { target: String },

    /// The target could not be resolved or another I/O failure occurred
    #[error("dial {target} failed: {source}")]
    Io {
        target: String,
        #[source]
        source: io::Error,
    },
}

impl DialError {
    /// Classify an I/O error raised while dialing `target`
    pub fn from_io(target: &str, source: io::Error) -> Self {
        let target = target.to_string();
        match source.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused { target },
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout { target },
            _ => Self::Io { target, source },
        }
    }
}
