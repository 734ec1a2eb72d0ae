//! Upper-casing echo server.
//!
//! Serves one peer at a time: receive a complete stream, ASCII-upper-case it,
//! and send it back to the peer from a fresh ephemeral socket.  The listening
//! socket is never used for sending, so the next peer can connect while a
//! reply is still in flight.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::config::Config;
use crate::connection::ConnError;
use crate::gbn_connection::{StreamReceiver, StreamSender};
use crate::socket::{Datagram, Socket};

/// The transformation applied to every request.
pub fn transform(request: &[u8]) -> Vec<u8> {
    request.to_ascii_uppercase()
}

/// Serve a single request on `listener`, replying through `reply_socket`.
///
/// Returns the peer that was served.
pub async fn serve_one<L, R>(
    listener: &mut StreamReceiver<L>,
    reply_socket: R,
    config: &Config,
) -> Result<SocketAddr, ConnError>
where
    L: Datagram,
    R: Datagram,
{
    let (request, peer) = listener.recv().await?;
    log::info!("[server] {} bytes from {peer}", request.len());

    let mut reply = StreamSender::from_socket(reply_socket, config.clone())?;
    reply.connect(peer).await?;
    reply.send(&transform(&request)).await?;
    reply.close().await?;
    Ok(peer)
}

/// Listen on `bind` and serve peers forever.
///
/// A failed exchange is logged and the server moves on to the next peer;
/// only errors on the listening socket itself end the loop.
pub async fn run(bind: SocketAddr, config: Config) -> Result<(), ConnError> {
    let mut listener = StreamReceiver::bind(bind, config.clone()).await?;
    log::info!("[server] listening on {}", listener.local_addr()?);

    loop {
        let reply_socket = Socket::bind(ephemeral_for(bind)).await?;
        match serve_one(&mut listener, reply_socket, &config).await {
            Ok(peer) => log::info!("[server] replied to {peer}"),
            Err(ConnError::Io(e)) => return Err(ConnError::Io(e)),
            Err(e) => log::warn!("[server] exchange failed: {e}"),
        }
    }
}

/// An OS-chosen port in the same address family as `addr`.
pub fn ephemeral_for(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimNetwork;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    #[test]
    fn transform_only_touches_ascii_letters() {
        assert_eq!(transform(b"hello, World 42!"), b"HELLO, WORLD 42!");
        assert_eq!(transform(&[0xC3, 0xA9, b'a']), [0xC3, 0xA9, b'A']);
        assert!(transform(b"").is_empty());
    }

    #[test]
    fn ephemeral_keeps_address_family() {
        assert!(ephemeral_for("127.0.0.1:9000".parse().unwrap()).is_ipv4());
        assert!(ephemeral_for("[::1]:9000".parse().unwrap()).is_ipv6());
        assert_eq!(ephemeral_for("127.0.0.1:9000".parse().unwrap()).port(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn serve_one_replies_from_reply_socket() {
        let net = SimNetwork::reliable();
        let config = Config::with_window(4);
        let mut listener = StreamReceiver::from_socket(net.bind(addr(9000)), config.clone()).unwrap();
        let reply_socket = net.bind(addr(9001));

        let client = {
            let net = net.clone();
            let config = config.clone();
            tokio::spawn(async move {
                let mut tx = StreamSender::from_socket(net.bind(addr(5000)), config.clone()).unwrap();
                tx.connect(addr(9000)).await.unwrap();
                tx.send(b"shout this").await.unwrap();
                tx.close().await.unwrap();
                let mut rx = StreamReceiver::from_socket(tx.into_socket(), config).unwrap();
                rx.recv().await.unwrap()
            })
        };

        let served = serve_one(&mut listener, reply_socket, &config).await.unwrap();
        assert_eq!(served, addr(5000));

        let (reply, from) = client.await.unwrap();
        assert_eq!(reply, b"SHOUT THIS");
        assert_eq!(from, addr(9001));
    }
}
