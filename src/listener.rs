//! TCP plumbing: listen with ephemeral-port reporting, accept, connect.
//!
//! All sockets are IPv4 and blocking. The bound port is returned
//! synchronously from [`open`] so callers never have to poll for it.

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener, TcpStream};

use anyhow::Context;
use tracing::trace;

/// Open a listening socket on the requested port (0 for ephemeral) and
/// report the actually bound port.
pub fn open(port: u16) -> anyhow::Result<(TcpListener, u16)> {
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    let listener = TcpListener::bind(addr).context("listener creation")?;
    let bound = listener.local_addr().context("reading bound port")?.port();
    trace!(requested = port, bound, "listening");
    Ok((listener, bound))
}

/// Accept one connection, yielding a bidirectional stream.
pub fn accept(listener: &TcpListener) -> anyhow::Result<TcpStream> {
    let (stream, addr) = listener.accept().context("accepting connection")?;
    trace!(%addr, "accepted connection");
    Ok(stream)
}

/// Connect to the given port on localhost.
pub fn connect(port: u16) -> anyhow::Result<TcpStream> {
    let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
    let stream = TcpStream::connect(addr).with_context(|| format!("connecting to {addr}"))?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn ephemeral_bind_reports_a_real_port() {
        let (_listener, port) = open(0).unwrap();
        assert_ne!(port, 0);
    }

    #[test]
    fn accepted_stream_is_bidirectional() {
        let (listener, port) = open(0).unwrap();
        let client = std::thread::spawn(move || {
            let mut stream = connect(port).unwrap();
            stream.write_all(b"ping").unwrap();
            let mut buf = [0; 4];
            stream.read_exact(&mut buf).unwrap();
            buf
        });
        let mut stream = accept(&listener).unwrap();
        let mut buf = [0; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        stream.write_all(b"pong").unwrap();
        assert_eq!(&client.join().unwrap(), b"pong");
    }
}
