//! Listening socket setup.

use std::io;
use std::net::{SocketAddr, TcpListener};

/// Create a bound, listening TCP socket.
///
/// The socket is non-blocking; accepts are driven by the ring, never by a
/// blocking `accept(2)` on the loop thread.
pub fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

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
    fn test_ephemeral_port() {
        let listener = create_listener("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        // Listening, so a client can connect even before anyone accepts
        std::net::TcpStream::connect(addr).unwrap();
    }

    #[test]
    fn test_port_in_use() {
        let first = create_listener("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let addr = first.local_addr().unwrap();
        assert!(create_listener(addr, 16).is_err());
    }
}
