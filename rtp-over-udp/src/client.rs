//! Client side of the echo exchange.
//!
//! Sends one message, then turns the same local port into a receiver and
//! waits for the server's reply stream.

use std::net::SocketAddr;

use crate::config::Config;
use crate::connection::ConnError;
use crate::gbn_connection::{StreamReceiver, StreamSender};
use crate::server::ephemeral_for;
use crate::socket::{Datagram, Socket};

/// Send `message` to `server` over `socket` and return the reply.
pub async fn exchange<D: Datagram>(
    socket: D,
    server: SocketAddr,
    message: &[u8],
    config: &Config,
) -> Result<Vec<u8>, ConnError> {
    let mut tx = StreamSender::from_socket(socket, config.clone())?;
    tx.connect(server).await?;
    tx.send(message).await?;
    tx.close().await?;

    let mut rx = StreamReceiver::from_socket(tx.into_socket(), config.clone())?;
    let (reply, from) = rx.recv().await?;
    log::info!("[client] {} byte reply from {from}", reply.len());
    Ok(reply)
}

/// Bind an ephemeral UDP socket and run one [`exchange`] with `server`.
pub async fn run(server: SocketAddr, message: &[u8], config: Config) -> Result<Vec<u8>, ConnError> {
    let socket = Socket::bind(ephemeral_for(server)).await?;
    log::info!("[client] {} -> {server}", socket.local_addr);
    exchange(socket, server, message, &config).await
}
