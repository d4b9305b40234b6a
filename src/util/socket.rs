//! Socket utilities and tuning

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::time::Duration;

/// Only one peer is ever adopted, so a short backlog is enough
pub const LISTEN_BACKLOG: i32 = 1;

/// Create a blocking TCP listening socket
pub fn create_tcp_listener(addr: SocketAddr) -> io::Result<Socket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // Re-listen after a lost peer must not trip over TIME_WAIT
    socket.set_reuse_address(true)?;

    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket)
}

/// Apply per-connection options to an accepted or dialed stream
pub fn tune_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;

    // Keepalive lets a silent peer loss surface as a read error
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(10));
    SockRef::from(stream).set_tcp_keepalive(&keepalive)?;

    Ok(())
}

/// Address to connect to when waking a listener bound to `local`
pub fn loopback_for(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_for_unspecified() {
        let addr: SocketAddr = "0.0.0.0:7420".parse().unwrap();
        assert_eq!(loopback_for(addr), "127.0.0.1:7420".parse().unwrap());

        let addr: SocketAddr = "[::]:7420".parse().unwrap();
        assert_eq!(loopback_for(addr), "[::1]:7420".parse().unwrap());

        let addr: SocketAddr = "192.168.1.5:7420".parse().unwrap();
        assert_eq!(loopback_for(addr), addr);
    }

    #[test]
    fn test_listener_binds_ephemeral_port() {
        let socket = create_tcp_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let local = socket.local_addr().unwrap().as_socket().unwrap();
        assert_ne!(local.port(), 0);
    }
}
