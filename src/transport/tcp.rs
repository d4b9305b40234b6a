//! TCP transport
//!
//! Stands in for the short-range radio on hosts that have none. The
//! service record is announced in the logs when the listener binds.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use socket2::Socket;
use tracing::{debug, info, warn};

use super::{end_of_stream, Acceptor, ServiceRecord, SessionIo, StreamSession, Transport};
use crate::error::{DialError, ListenError};
use crate::util::{create_tcp_listener, loopback_for, tune_stream};

/// How long a cancelling thread waits on the loopback wake-up connect
const WAKE_TIMEOUT: Duration = Duration::from_millis(200);

/// TCP-backed [`Transport`]
pub struct TcpTransport {
    bind_addr: SocketAddr,
    dial_timeout: Duration,
    bound: Mutex<Option<SocketAddr>>,
}

impl TcpTransport {
    /// Create a transport listening on `bind_addr`
    pub fn new(bind_addr: SocketAddr, dial_timeout: Duration) -> Self {
        Self {
            bind_addr,
            dial_timeout,
            bound: Mutex::new(None),
        }
    }

    /// Address of the most recently bound listener
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock()
    }
}

impl Transport for TcpTransport {
    fn listen(&self, record: &ServiceRecord) -> Result<Box<dyn Acceptor>, ListenError> {
        let socket = create_tcp_listener(self.bind_addr).map_err(ListenError::Bind)?;
        let local_addr = socket
            .local_addr()
            .map_err(ListenError::Bind)?
            .as_socket()
            .unwrap_or(self.bind_addr);

        *self.bound.lock() = Some(local_addr);
        info!(service = %record, addr = %local_addr, "Service advertised");

        Ok(Box::new(TcpAcceptor {
            socket,
            local_addr,
            closed: AtomicBool::new(false),
        }))
    }

    fn dial(&self, target: &str, record: &ServiceRecord) -> Result<StreamSession, DialError> {
        let addr = target
            .to_socket_addrs()
            .map_err(|e| DialError::from_io(target, e))?
            .next()
            .ok_or_else(|| {
                DialError::from_io(
                    target,
                    io::Error::new(io::ErrorKind::NotFound, "no address resolved"),
                )
            })?;

        debug!(service = %record, %addr, "Dialing peer");
        let stream = TcpStream::connect_timeout(&addr, self.dial_timeout)
            .map_err(|e| DialError::from_io(target, e))?;
        if let Err(e) = tune_stream(&stream) {
            warn!(%addr, error = %e, "Failed to tune dialed stream");
        }

        Ok(StreamSession::new(addr.to_string(), Box::new(TcpSessionIo { stream })))
    }
}

struct TcpAcceptor {
    socket: Socket,
    local_addr: SocketAddr,
    closed: AtomicBool,
}

fn listener_closed() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "listener closed")
}

impl Acceptor for TcpAcceptor {
    fn accept(&self) -> io::Result<StreamSession> {
        if self.closed.load(Ordering::Acquire) {
            return Err(listener_closed());
        }

        let (socket, addr) = self.socket.accept()?;

        // The wake-up connection from close() lands here
        if self.closed.load(Ordering::Acquire) {
            return Err(listener_closed());
        }

        let stream: TcpStream = socket.into();
        if let Err(e) = tune_stream(&stream) {
            warn!(error = %e, "Failed to tune accepted stream");
        }

        let peer = addr
            .as_socket()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(StreamSession::new(peer, Box::new(TcpSessionIo { stream })))
    }

    fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Linux wakes a blocked accept on shutdown; elsewhere the
        // loopback connect below does it.
        let _ = self.socket.shutdown(Shutdown::Both);
        let _ = TcpStream::connect_timeout(&loopback_for(self.local_addr), WAKE_TIMEOUT);
        Ok(())
    }
}

struct TcpSessionIo {
    stream: TcpStream,
}

impl SessionIo for TcpSessionIo {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match (&self.stream).read(buf)? {
            0 if !buf.is_empty() => Err(end_of_stream()),
            n => Ok(n),
        }
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        (&self.stream).write_all(buf)
    }

    fn shutdown(&self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn transport() -> TcpTransport {
        TcpTransport::new("127.0.0.1:0".parse().unwrap(), Duration::from_secs(2))
    }

    #[test]
    fn test_accept_exchange_and_eof() {
        let transport = transport();
        let acceptor = transport.listen(&ServiceRecord::default()).unwrap();
        let addr = transport.bound_addr().unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        let session = acceptor.accept().unwrap();

        client.write_all(b"rose").unwrap();
        let mut buf = [0u8; 16];
        let n = session.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"rose");

        session.write_all(b"petal").unwrap();
        let mut reply = [0u8; 5];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"petal");

        drop(client);
        let err = session.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_close_unblocks_accept() {
        let transport = transport();
        let acceptor: Arc<dyn Acceptor> = Arc::from(transport.listen(&ServiceRecord::default()).unwrap());

        let waiter = {
            let acceptor = acceptor.clone();
            thread::spawn(move || acceptor.accept())
        };

        thread::sleep(Duration::from_millis(50));
        acceptor.close().unwrap();
        acceptor.close().unwrap();

        assert!(waiter.join().unwrap().is_err());
        assert!(acceptor.accept().is_err());
    }

    #[test]
    fn test_dial_refused() {
        // Bind and drop to find a port nobody listens on
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let err = transport()
            .dial(&addr.to_string(), &ServiceRecord::default())
            .unwrap_err();
        assert!(matches!(err, DialError::Refused { .. }));
    }
}
