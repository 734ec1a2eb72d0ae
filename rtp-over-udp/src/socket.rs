//! Datagram channel abstraction.
//!
//! Both engines talk to the network only through the [`Datagram`] trait:
//! send raw bytes to an address, or wait a bounded time for the next
//! datagram.  [`Socket`] is the production implementation over
//! `tokio::net::UdpSocket`; [`crate::simulator::SimSocket`] is an in-memory
//! implementation with fault injection for tests.  All protocol logic lives
//! elsewhere; this module owns only byte I/O.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;

/// Receive buffer size.  Larger than any datagram the engines emit.
pub const RECV_BUFFER: usize = 2048;

/// Outcome of one bounded receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recv {
    Datagram(Vec<u8>, SocketAddr),
    TimedOut,
}

/// An unreliable, unordered datagram channel.
///
/// Implementations may lose, duplicate, or reorder datagrams.  Only one
/// `recv_from` is ever outstanding per engine.
#[async_trait]
pub trait Datagram: Send + Sync {
    async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> io::Result<()>;

    /// Wait at most `timeout` for the next datagram.
    async fn recv_from(&self, timeout: Duration) -> io::Result<Recv>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// A UDP socket speaking raw datagrams.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        log::trace!("[socket] bound {local_addr}");
        Ok(Self { local_addr, inner })
    }
}

#[async_trait]
impl Datagram for Socket {
    async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> io::Result<()> {
        self.inner.send_to(bytes, dest).await?;
        Ok(())
    }

    async fn recv_from(&self, timeout: Duration) -> io::Result<Recv> {
        let mut buf = vec![0u8; RECV_BUFFER];
        match tokio::time::timeout(timeout, self.inner.recv_from(&mut buf)).await {
            Ok(Ok((n, addr))) => {
                buf.truncate(n);
                Ok(Recv::Datagram(buf, addr))
            }
            // An ICMP port-unreachable from an earlier send surfaces as
            // ConnectionReset on some platforms; the peer is just not there yet.
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionReset => Ok(Recv::TimedOut),
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => Ok(Recv::TimedOut),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn datagram_crosses_loopback() {
        let a = Socket::bind(loopback()).await.unwrap();
        let b = Socket::bind(loopback()).await.unwrap();

        a.send_to(b"ping", b.local_addr).await.unwrap();
        let got = b.recv_from(Duration::from_secs(2)).await.unwrap();

        assert_eq!(got, Recv::Datagram(b"ping".to_vec(), a.local_addr));
    }

    #[tokio::test]
    async fn silent_socket_times_out() {
        let a = Socket::bind(loopback()).await.unwrap();
        let got = a.recv_from(Duration::from_millis(20)).await.unwrap();
        assert_eq!(got, Recv::TimedOut);
    }
}
