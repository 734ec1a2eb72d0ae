//! Go-Back-N connection drivers: handshake, windowed transfer, teardown.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │ connect / send / close          │ recv
//!      ▼                                 ▼
//!  StreamSender<D>                   StreamReceiver<D>
//!    ├── Connection (FSM, peer)        └── GbnReceiver (per peer, fresh each recv)
//!    ├── GbnSender  (window, seq nums)        ├── Connection (FSM, peer)
//!    └── D: Datagram                          └── reorder buffer
//!                         D: Datagram ◀───────┘
//! ```
//!
//! Both drivers run a single loop with exactly one outstanding
//! `recv_from(timeout)`.  A timeout is the retry signal, never an error.
//!
//! ```ignore
//! let mut tx = StreamSender::bind("0.0.0.0:0".parse()?, Config::with_window(4)).await?;
//! tx.connect(peer).await?;
//! tx.send(b"hello").await?;
//! tx.close().await?;
//!
//! let mut rx = StreamReceiver::bind(addr, Config::with_window(4)).await?;
//! let (bytes, from) = rx.recv().await?;
//! ```

use std::net::SocketAddr;

use tokio::time::Instant;

use crate::config::Config;
use crate::connection::{ConnError, Connection};
use crate::gbn_receiver::{GbnReceiver, Verdict};
use crate::gbn_sender::GbnSender;
use crate::packet::{Packet, PacketType};
use crate::socket::{Datagram, Recv, Socket};
use crate::state::{ConnectionState, Role};
use crate::timer::{Deadline, RetryBudget};

/// Sequence number of a checksum-valid ACK, or `None` for anything else.
fn parse_ack(bytes: &[u8]) -> Option<u32> {
    let packet = Packet::decode(bytes).ok()?;
    (packet.header.kind == PacketType::Ack && packet.verify()).then_some(packet.header.seq)
}

// ---------------------------------------------------------------------------
// StreamSender
// ---------------------------------------------------------------------------

/// Sending half: turns a byte stream into a reliable DATA sequence.
pub struct StreamSender<D: Datagram = Socket> {
    socket: D,
    conn: Connection,
    window: GbnSender,
    config: Config,
}

impl StreamSender<Socket> {
    /// Bind a UDP socket at `local` (use port `0` for an ephemeral one).
    pub async fn bind(local: SocketAddr, config: Config) -> Result<Self, ConnError> {
        let socket = Socket::bind(local).await?;
        Self::from_socket(socket, config)
    }
}

impl<D: Datagram> StreamSender<D> {
    pub fn from_socket(socket: D, config: Config) -> Result<Self, ConnError> {
        config.validate()?;
        Ok(Self {
            socket,
            conn: Connection::new(Role::Sender, config.window_size),
            window: GbnSender::new(config.window_size, config.max_payload),
            config,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.conn.peer()
    }

    /// Oldest unacknowledged sequence number.
    pub fn base(&self) -> u32 {
        self.window.base()
    }

    /// Number of DATA packets queued so far.
    pub fn total_chunks(&self) -> u32 {
        self.window.total_chunks()
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Give the socket back, e.g. to receive a reply on the same port.
    pub fn into_socket(self) -> D {
        self.socket
    }

    /// Run the START handshake with `peer`.
    ///
    /// START is resent every poll interval until a checksum-valid ACK(1)
    /// arrives from `peer`.  Anything else is ignored.  Fails with
    /// [`ConnError::HandshakeFailed`] only when
    /// [`crate::timer::TimerConfig::max_handshake_attempts`] is set.
    pub async fn connect(&mut self, peer: SocketAddr) -> Result<(), ConnError> {
        self.conn.expect_state(ConnectionState::Idle)?;
        self.conn.bind_peer(peer);
        self.conn.transition(ConnectionState::Handshaking)?;

        let start = Packet::start().encode();
        let mut budget = RetryBudget::new(self.config.timers.max_handshake_attempts);

        while budget.try_consume() {
            self.socket.send_to(&start, peer).await?;
            log::debug!("[sender] → START to {peer} (attempt {})", budget.attempts());

            let resend_at = Deadline::after(self.config.timers.poll_interval);
            loop {
                match self.socket.recv_from(resend_at.remaining()).await? {
                    Recv::Datagram(bytes, from) if from == peer && parse_ack(&bytes) == Some(1) => {
                        self.conn.transition(ConnectionState::Established)?;
                        log::info!("[sender] connected to {peer}");
                        return Ok(());
                    }
                    Recv::Datagram(..) => log::trace!("[sender] ignoring datagram while handshaking"),
                    Recv::TimedOut => break,
                }
                if resend_at.expired() {
                    break;
                }
            }
            log::debug!("[sender] START timed out");
        }

        Err(ConnError::HandshakeFailed {
            attempts: budget.attempts(),
        })
    }

    /// Reliably deliver `data`, returning once every chunk is acknowledged.
    ///
    /// May be called repeatedly; sequence numbers continue across calls.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), ConnError> {
        self.conn.expect_state(ConnectionState::Established)?;
        let peer = self.bound_peer()?;

        let queued = self.window.push_stream(data);
        log::info!(
            "[sender] sending {} bytes as {queued} packet(s), window {}",
            data.len(),
            self.window.window_size()
        );

        let poll = self.config.timers.poll_interval;
        let mut retransmit_at = Deadline::after(poll);

        while !self.window.is_complete() {
            self.transmit_fresh(peer).await?;

            let mut timed_out = false;
            match self.socket.recv_from(retransmit_at.remaining()).await? {
                Recv::Datagram(bytes, from) if from == peer => {
                    if let Some(ack) = parse_ack(&bytes) {
                        let acked = self.window.on_ack(ack);
                        if acked > 0 {
                            log::debug!(
                                "[sender] ← ACK {ack} (slid {acked}, base={})",
                                self.window.base()
                            );
                            retransmit_at = Deadline::after(poll);
                            continue;
                        }
                        log::trace!("[sender] ← stale ACK {ack}");
                    }
                }
                Recv::Datagram(..) => {}
                Recv::TimedOut => timed_out = true,
            }

            if (timed_out || retransmit_at.expired()) && self.window.has_unacked() {
                self.retransmit_window(peer).await?;
                retransmit_at = Deadline::after(poll);
            }
        }

        log::debug!("[sender] all {} packet(s) acknowledged", self.window.total_chunks());
        Ok(())
    }

    /// Run the END handshake and close.
    ///
    /// END is resent every poll interval until ACK(N + 2) arrives or the close
    /// deadline passes; in the latter case the connection is force-closed.
    /// Unacknowledged data is flushed first.
    pub async fn close(&mut self) -> Result<(), ConnError> {
        match self.conn.state() {
            ConnectionState::Closed => return Ok(()),
            ConnectionState::Established => {}
            actual => {
                return Err(ConnError::BadState {
                    expected: ConnectionState::Established,
                    actual,
                })
            }
        }
        if !self.window.is_complete() {
            self.send(&[]).await?;
        }
        let peer = self.bound_peer()?;

        let end_seq = self.window.end_seq();
        let end = Packet::end(end_seq).encode();
        self.conn.transition(ConnectionState::Closing)?;

        let deadline = Deadline::after(self.config.timers.close_deadline);
        loop {
            self.socket.send_to(&end, peer).await?;
            log::debug!("[sender] → END seq={end_seq}");

            let resend_at = Deadline::after(deadline.clamp(self.config.timers.poll_interval));
            loop {
                match self.socket.recv_from(resend_at.remaining()).await? {
                    Recv::Datagram(bytes, from) if from == peer && parse_ack(&bytes) == Some(end_seq + 1) => {
                        self.conn.transition(ConnectionState::Closed)?;
                        log::info!("[sender] closed connection to {peer}");
                        return Ok(());
                    }
                    Recv::Datagram(..) => {}
                    Recv::TimedOut => break,
                }
                if resend_at.expired() {
                    break;
                }
            }

            if deadline.expired() {
                log::warn!("[sender] END not ACKed; force-closing");
                self.conn.transition(ConnectionState::Closed)?;
                return Ok(());
            }
        }
    }

    fn bound_peer(&self) -> Result<SocketAddr, ConnError> {
        self.conn.peer().ok_or(ConnError::BadState {
            expected: ConnectionState::Established,
            actual: self.conn.state(),
        })
    }

    /// Send every packet that newly fits in the window.
    async fn transmit_fresh(&mut self, peer: SocketAddr) -> Result<(), ConnError> {
        let fresh = self.window.admit(Instant::now());
        if fresh.is_empty() {
            return Ok(());
        }
        for entry in self.window.window_entries().filter(|e| fresh.contains(&e.seq)) {
            self.socket.send_to(&entry.encoded, peer).await?;
        }
        log::debug!(
            "[sender] → DATA {}..{} (in flight {})",
            fresh.start,
            fresh.end,
            self.window.in_flight()
        );
        Ok(())
    }

    /// Retransmit every in-flight packet (the go-back-N step).
    async fn retransmit_window(&mut self, peer: SocketAddr) -> Result<(), ConnError> {
        log::debug!(
            "[sender] timeout; retransmitting {} packet(s) from base {}",
            self.window.in_flight(),
            self.window.base()
        );
        for entry in self.window.window_entries() {
            self.socket.send_to(&entry.encoded, peer).await?;
        }
        self.window.on_retransmit(Instant::now());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StreamReceiver
// ---------------------------------------------------------------------------

/// Receiving half: accepts one peer at a time and reassembles its stream.
pub struct StreamReceiver<D: Datagram = Socket> {
    socket: D,
    config: Config,
}

impl StreamReceiver<Socket> {
    /// Reserve the local endpoint `local`.
    pub async fn bind(local: SocketAddr, config: Config) -> Result<Self, ConnError> {
        let socket = Socket::bind(local).await?;
        Self::from_socket(socket, config)
    }
}

impl<D: Datagram> StreamReceiver<D> {
    pub fn from_socket(socket: D, config: Config) -> Result<Self, ConnError> {
        config.validate()?;
        Ok(Self { socket, config })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn into_socket(self) -> D {
        self.socket
    }

    /// Serve one peer from START to END and return its complete stream.
    ///
    /// Never returns partial data.  Each call starts from a fresh engine, so
    /// a server may call this in a loop to serve peers one after another.
    pub async fn recv(&mut self) -> Result<(Vec<u8>, SocketAddr), ConnError> {
        let mut engine = GbnReceiver::new(self.config.window_size);
        let poll = self.config.timers.poll_interval;
        let mut last_heard = Instant::now();

        loop {
            if let Recv::Datagram(bytes, from) = self.socket.recv_from(poll).await? {
                let outcome = engine.on_datagram(&bytes, from);
                if !matches!(outcome.verdict, Verdict::Foreign | Verdict::Malformed) {
                    last_heard = Instant::now();
                }
                if let Some((ack, to)) = outcome.reply {
                    self.socket.send_to(&ack.encode(), to).await?;
                    log::trace!("[receiver] → ACK {} ({:?})", ack.header.seq, outcome.verdict);
                }
                if let Some(delivered) = engine.take_stream() {
                    return Ok(delivered);
                }
            }

            if let Some(limit) = self.config.timers.idle_timeout {
                if engine.state() == ConnectionState::Established && last_heard.elapsed() >= limit {
                    log::warn!("[receiver] peer {:?} idle for {limit:?}; giving up", engine.peer());
                    return Err(ConnError::IdleTimeout);
                }
            }
        }
    }

    /// Alias for [`StreamReceiver::recv`].
    pub async fn accept_and_receive(&mut self) -> Result<(Vec<u8>, SocketAddr), ConnError> {
        self.recv().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::simulator::{SimNetwork, SimSocket};
    use crate::timer::TimerConfig;

    const POLL: Duration = Duration::from_millis(500);

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    fn config(window: u32, max_payload: usize) -> Config {
        Config {
            window_size: window,
            max_payload,
            timers: TimerConfig::default(),
        }
    }

    /// Next decoded packet at a scripted peer, or `None` on timeout.
    async fn next_packet(peer: &SimSocket) -> Option<Packet> {
        match peer.recv_from(Duration::from_secs(5)).await.unwrap() {
            Recv::Datagram(bytes, _) => Some(Packet::decode(&bytes).unwrap()),
            Recv::TimedOut => None,
        }
    }

    async fn reply(peer: &SimSocket, packet: Packet) {
        peer.send_to(&packet.encode(), addr(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_retransmitted_until_acked() {
        let net = SimNetwork::reliable();
        let mut tx = StreamSender::from_socket(net.bind(addr(1)), config(4, 8)).unwrap();
        let peer = net.bind(addr(2));

        let fake = tokio::spawn(async move {
            // Ignore the first two STARTs, then answer with noise and ACK(1).
            for _ in 0..2 {
                assert_eq!(next_packet(&peer).await.unwrap(), Packet::start());
            }
            assert_eq!(next_packet(&peer).await.unwrap(), Packet::start());
            reply(&peer, Packet::ack(7)).await;
            reply(&peer, Packet::ack(1)).await;
            peer
        });

        tx.connect(addr(2)).await.unwrap();
        assert_eq!(tx.state(), ConnectionState::Established);
        fake.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn capped_handshake_fails() {
        let net = SimNetwork::reliable();
        let mut cfg = config(4, 8);
        cfg.timers.max_handshake_attempts = Some(3);
        let mut tx = StreamSender::from_socket(net.bind(addr(1)), cfg).unwrap();
        let _silent = net.bind(addr(2));

        let err = tx.connect(addr(2)).await.unwrap_err();
        assert!(matches!(err, ConnError::HandshakeFailed { attempts: 3 }));
        let starts = net.trace().len();
        assert_eq!(starts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_ack_does_not_complete_handshake() {
        let net = SimNetwork::reliable();
        let mut cfg = config(4, 8);
        cfg.timers.max_handshake_attempts = Some(2);
        let mut tx = StreamSender::from_socket(net.bind(addr(1)), cfg).unwrap();
        let peer = net.bind(addr(2));

        tokio::spawn(async move {
            while next_packet(&peer).await.is_some() {
                let mut bad = Packet::ack(1).encode();
                bad[15] ^= 0x10;
                peer.send_to(&bad, addr(1)).await.unwrap();
            }
        });

        assert!(matches!(
            tx.connect(addr(2)).await,
            Err(ConnError::HandshakeFailed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn send_before_connect_is_rejected() {
        let net = SimNetwork::reliable();
        let mut tx = StreamSender::from_socket(net.bind(addr(1)), config(4, 8)).unwrap();
        assert!(matches!(tx.send(b"x").await, Err(ConnError::BadState { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_retransmits_whole_window() {
        let net = SimNetwork::reliable();
        let mut tx = StreamSender::from_socket(net.bind(addr(1)), config(3, 1)).unwrap();
        let peer = net.bind(addr(2));

        let fake = tokio::spawn(async move {
            next_packet(&peer).await.unwrap();
            reply(&peer, Packet::ack(1)).await;

            // First flight: seq 1, 2, 3.  Stay silent so the sender times out.
            let mut seen = Vec::new();
            for _ in 0..3 {
                seen.push(next_packet(&peer).await.unwrap().header.seq);
            }
            assert_eq!(seen, [1, 2, 3]);

            // Go-back-N: the same three again.
            let mut again = Vec::new();
            for _ in 0..3 {
                again.push(next_packet(&peer).await.unwrap().header.seq);
            }
            assert_eq!(again, [1, 2, 3]);

            // Cumulative ACK for everything; then seq 4 enters the window.
            reply(&peer, Packet::ack(4)).await;
            let p = next_packet(&peer).await.unwrap();
            assert_eq!((p.header.kind, p.header.seq), (PacketType::Data, 4));
            reply(&peer, Packet::ack(5)).await;
            peer
        });

        tx.connect(addr(2)).await.unwrap();
        tx.send(b"abcd").await.unwrap();
        assert_eq!(tx.base(), 5);
        fake.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn close_force_closes_after_deadline() {
        let net = SimNetwork::reliable();
        let mut tx = StreamSender::from_socket(net.bind(addr(1)), config(4, 8)).unwrap();
        let peer = net.bind(addr(2));

        let fake = tokio::spawn(async move {
            next_packet(&peer).await.unwrap();
            reply(&peer, Packet::ack(1)).await;
            // Never acknowledge END.
            let end = next_packet(&peer).await.unwrap();
            assert_eq!((end.header.kind, end.header.seq), (PacketType::End, 1));
            peer
        });

        tx.connect(addr(2)).await.unwrap();
        let started = Instant::now();
        tx.close().await.unwrap();
        assert_eq!(tx.state(), ConnectionState::Closed);
        assert!(started.elapsed() >= POLL);
        assert!(started.elapsed() < POLL * 2);
        fake.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn close_completes_on_end_ack() {
        let net = SimNetwork::reliable();
        let mut tx = StreamSender::from_socket(net.bind(addr(1)), config(4, 8)).unwrap();
        let peer = net.bind(addr(2));

        let fake = tokio::spawn(async move {
            next_packet(&peer).await.unwrap();
            reply(&peer, Packet::ack(1)).await;
            let data = next_packet(&peer).await.unwrap();
            assert_eq!(data.payload, b"hi");
            reply(&peer, Packet::ack(2)).await;
            let end = next_packet(&peer).await.unwrap();
            assert_eq!((end.header.kind, end.header.seq), (PacketType::End, 2));
            reply(&peer, Packet::ack(3)).await;
            peer
        });

        tx.connect(addr(2)).await.unwrap();
        tx.send(b"hi").await.unwrap();
        tx.close().await.unwrap();
        assert_eq!(tx.state(), ConnectionState::Closed);
        fake.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn receiver_idle_timeout_fires_once_established() {
        let net = SimNetwork::reliable();
        let mut cfg = config(4, 8);
        cfg.timers.idle_timeout = Some(Duration::from_secs(2));
        let mut rx = StreamReceiver::from_socket(net.bind(addr(2)), cfg).unwrap();
        let peer = net.bind(addr(1));

        peer.send_to(&Packet::start().encode(), addr(2)).await.unwrap();
        let err = rx.recv().await.unwrap_err();
        assert!(matches!(err, ConnError::IdleTimeout));
    }

    #[test]
    fn zero_window_is_rejected_at_construction() {
        let net = SimNetwork::reliable();
        let result = StreamSender::from_socket(net.bind(addr(1)), config(0, 8));
        assert!(matches!(result, Err(ConnError::Config(_))));
    }
}
