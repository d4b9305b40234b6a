//! Transport abstraction
//!
//! The connection manager never touches sockets directly. It asks a
//! [`Transport`] for a listening [`Acceptor`] or an outbound
//! [`StreamSession`], and drives those through blocking calls on
//! dedicated worker threads.

pub mod memory;
pub mod tcp;

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use uuid::{uuid, Uuid};

use crate::error::{DialError, ListenError};

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

/// Default advertised service name
pub const DEFAULT_SERVICE_NAME: &str = "RoseService";

/// Default advertised service identifier
pub const DEFAULT_SERVICE_UUID: Uuid = uuid!("227600fc-217a-4766-83bb-49e596bb9e88");

/// Identity advertised by a listening endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Human-readable service name
    pub name: String,
    /// Stable service identifier
    pub uuid: Uuid,
}

impl Default for ServiceRecord {
    fn default() -> Self {
        Self {
            name: DEFAULT_SERVICE_NAME.to_string(),
            uuid: DEFAULT_SERVICE_UUID,
        }
    }
}

impl fmt::Display for ServiceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.uuid)
    }
}

/// A transport able to advertise a listening endpoint and dial peers
pub trait Transport: Send + Sync + 'static {
    /// Bind and advertise a listening endpoint for `record`.
    fn listen(&self, record: &ServiceRecord) -> Result<Box<dyn Acceptor>, ListenError>;

    /// Open an outbound session to `target`.
    fn dial(&self, target: &str, record: &ServiceRecord) -> Result<StreamSession, DialError>;
}

/// A bound listening endpoint
pub trait Acceptor: Send + Sync {
    /// Block until a peer connects.
    ///
    /// Returns an error once [`close`](Acceptor::close) has been called,
    /// including for a call that was already blocked.
    fn accept(&self) -> io::Result<StreamSession>;

    /// Close the endpoint, unblocking any pending `accept`.
    fn close(&self) -> io::Result<()>;
}

/// Raw byte I/O over one accepted connection.
///
/// All methods take `&self`: one thread blocks in `read` while another
/// writes, and a third may call `shutdown` to force the read to return.
pub trait SessionIo: Send + Sync {
    /// Read into `buf`. End of stream is reported as
    /// [`io::ErrorKind::UnexpectedEof`]; `Ok(0)` is a zero-length chunk.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole of `buf`.
    fn write_all(&self, buf: &[u8]) -> io::Result<()>;

    /// Tear down both directions.
    fn shutdown(&self) -> io::Result<()>;
}

/// One live transport connection
pub struct StreamSession {
    peer: String,
    io: Box<dyn SessionIo>,
    closed: AtomicBool,
}

impl StreamSession {
    /// Wrap a connection to `peer`
    pub fn new(peer: impl Into<String>, io: Box<dyn SessionIo>) -> Self {
        Self {
            peer: peer.into(),
            io,
            closed: AtomicBool::new(false),
        }
    }

    /// Opaque identifier of the remote end
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Blocking read from the readable stream
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.io.read(buf)
    }

    /// Blocking write to the writable stream
    pub fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "session closed"));
        }
        self.io.write_all(buf)
    }

    /// Close the session. Only the first call reaches the transport.
    pub fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.io.shutdown()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Error returned by reads on a stream the peer has closed
pub(crate) fn end_of_stream() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream")
}
