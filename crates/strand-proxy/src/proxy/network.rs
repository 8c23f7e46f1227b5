//! Listener setup for the acceptor pool.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;

/// Bind a non-blocking listening socket.
///
/// Returned as a std listener so each acceptor thread can take its own
/// `try_clone` and register it with that thread's runtime.
pub fn create_listener(addr: SocketAddr, backlog: i32) -> std::io::Result<std::net::TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;

    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_port_assigned() {
        let listener = create_listener("127.0.0.1:0".parse().unwrap(), 128).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_clones_share_port() {
        let listener = create_listener("127.0.0.1:0".parse().unwrap(), 128).unwrap();
        let clone = listener.try_clone().unwrap();
        assert_eq!(
            listener.local_addr().unwrap(),
            clone.local_addr().unwrap()
        );
    }

    #[test]
    fn test_port_in_use_rejected() {
        let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = first.local_addr().unwrap();
        assert!(create_listener(addr, 128).is_err());
    }
}
