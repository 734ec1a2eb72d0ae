//! Receive-side state machine: admission, reordering, cumulative ACKs.
//!
//! [`GbnReceiver`] consumes raw datagrams and decides, for each one, whether
//! to reply and with what.  It never touches a socket; the caller sends the
//! returned reply and, once [`GbnReceiver::is_closed`], collects the stream
//! with [`GbnReceiver::take_stream`].
//!
//! Rules, in the order they are applied:
//!
//! 1. Malformed datagrams are dropped silently.
//! 2. Checksum failures are dropped; if the sender is the bound peer, the
//!    current cumulative ACK is re-sent as a hint.
//! 3. Only one peer is served.  The first valid START(0) binds it; START from
//!    the bound peer is answered with ACK(1) again; anything from any other
//!    address is ignored without reply.
//! 4. DATA below `next_expected` is re-ACKed and discarded.  DATA inside
//!    `[next_expected, next_expected + window)` is buffered on first arrival
//!    and the contiguous prefix is delivered.  DATA at or past the upper edge
//!    is dropped with no reply.
//! 5. END with `seq == next_expected` is answered with ACK(next_expected + 1)
//!    and closes the connection; any other END is ignored.
//!
//! Every ACK carries `next_expected` **after** the packet was processed.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use crate::connection::Connection;
use crate::packet::{Packet, PacketType};
use crate::seq::{advance, in_window};
use crate::state::{ConnectionState, Role};

/// What the receiver made of one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Failed to parse.
    Malformed,
    /// Parsed, but the checksum did not match.
    Corrupt,
    /// From an address other than the bound peer, or before any peer is bound.
    Foreign,
    /// START accepted or re-acknowledged.
    Handshake,
    /// DATA already delivered.
    Duplicate,
    /// DATA stored in the reorder buffer (and possibly delivered).
    Buffered,
    /// DATA beyond the receive window.
    OutOfWindow,
    /// END accepted; the stream is complete.
    EndAccepted,
    /// END with the wrong sequence number.
    EndRejected,
    /// Valid packet that has no meaning in the current state.
    Unexpected,
}

/// Result of feeding one datagram to the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub verdict: Verdict,
    /// ACK to send, and where.
    pub reply: Option<(Packet, SocketAddr)>,
}

impl Outcome {
    fn silent(verdict: Verdict) -> Self {
        Self {
            verdict,
            reply: None,
        }
    }

    fn ack(verdict: Verdict, seq: u32, to: SocketAddr) -> Self {
        Self {
            verdict,
            reply: Some((Packet::ack(seq), to)),
        }
    }
}

/// Receive-side state for one connection.
#[derive(Debug)]
pub struct GbnReceiver {
    conn: Connection,

    /// Next sequence number to deliver.  `0` until a peer is bound.
    next_expected: u32,

    /// Packets received ahead of `next_expected`, within the window.
    reorder: BTreeMap<u32, Vec<u8>>,

    /// Contiguously delivered payload bytes.
    output: Vec<u8>,

    /// Set once [`GbnReceiver::take_stream`] has handed the stream out.
    taken: bool,
}

impl GbnReceiver {
    pub fn new(window_size: u32) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        Self {
            conn: Connection::new(Role::Receiver, window_size),
            next_expected: 0,
            reorder: BTreeMap::new(),
            output: Vec::new(),
            taken: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.conn.peer()
    }

    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    /// Number of packets parked in the reorder buffer.
    pub fn buffered(&self) -> usize {
        self.reorder.len()
    }

    /// Bytes delivered in order so far.
    pub fn delivered(&self) -> &[u8] {
        &self.output
    }

    pub fn is_closed(&self) -> bool {
        self.conn.state().is_closed()
    }

    /// The reassembled stream and its sender, once closed.  Yields at most once.
    pub fn take_stream(&mut self) -> Option<(Vec<u8>, SocketAddr)> {
        if !self.is_closed() || self.taken {
            return None;
        }
        let peer = self.conn.peer()?;
        self.taken = true;
        Some((std::mem::take(&mut self.output), peer))
    }

    /// Process one raw datagram from `from`.
    pub fn on_datagram(&mut self, bytes: &[u8], from: SocketAddr) -> Outcome {
        let outcome = match Packet::decode(bytes) {
            Err(e) => {
                log::trace!("[receiver] drop malformed datagram from {from}: {e}");
                Outcome::silent(Verdict::Malformed)
            }
            Ok(packet) if !packet.verify() => self.on_corrupt(&packet, from),
            Ok(packet) => self.on_packet(packet, from),
        };
        self.check_rep();
        outcome
    }

    fn on_corrupt(&self, packet: &Packet, from: SocketAddr) -> Outcome {
        if self.conn.is_bound_to(from) && !self.is_closed() {
            log::debug!(
                "[receiver] bad checksum on {} seq={}; hint ACK {}",
                packet.header.kind,
                packet.header.seq,
                self.next_expected
            );
            Outcome::ack(Verdict::Corrupt, self.next_expected, from)
        } else {
            Outcome::silent(Verdict::Corrupt)
        }
    }

    fn on_packet(&mut self, packet: Packet, from: SocketAddr) -> Outcome {
        let seq = packet.header.seq;

        if self.conn.peer().is_none() {
            return self.on_unbound(&packet, from);
        }
        if !self.conn.is_bound_to(from) || self.is_closed() {
            log::debug!("[receiver] ignore {} from {from}", packet.header.kind);
            return Outcome::silent(Verdict::Foreign);
        }

        match packet.header.kind {
            PacketType::Start if seq == 0 => {
                log::debug!("[receiver] repeated START; re-ACK 1");
                Outcome::ack(Verdict::Handshake, 1, from)
            }
            PacketType::Data => self.on_data(seq, packet.payload, from),
            PacketType::End => self.on_end(seq, from),
            PacketType::Start | PacketType::Ack => Outcome::silent(Verdict::Unexpected),
        }
    }

    fn on_unbound(&mut self, packet: &Packet, from: SocketAddr) -> Outcome {
        if packet.header.kind != PacketType::Start || packet.header.seq != 0 {
            return Outcome::silent(Verdict::Foreign);
        }
        if self.conn.transition(ConnectionState::Established).is_err() {
            return Outcome::silent(Verdict::Unexpected);
        }
        self.conn.bind_peer(from);
        self.next_expected = 1;
        log::info!("[receiver] accepted peer {from}");
        Outcome::ack(Verdict::Handshake, 1, from)
    }

    fn on_data(&mut self, seq: u32, payload: Vec<u8>, from: SocketAddr) -> Outcome {
        let window = self.conn.window_size();

        if seq < self.next_expected {
            log::trace!("[receiver] duplicate DATA seq={seq}; ACK {}", self.next_expected);
            return Outcome::ack(Verdict::Duplicate, self.next_expected, from);
        }
        if !in_window(seq, self.next_expected, window) {
            log::debug!(
                "[receiver] DATA seq={seq} outside [{}, {}); dropped",
                self.next_expected,
                u64::from(self.next_expected) + u64::from(window)
            );
            return Outcome::silent(Verdict::OutOfWindow);
        }

        self.reorder.entry(seq).or_insert(payload);
        let output = &mut self.output;
        let drained = advance(&mut self.next_expected, &mut self.reorder, |chunk| {
            output.extend_from_slice(&chunk)
        });
        log::debug!(
            "[receiver] DATA seq={seq} buffered, delivered {drained}; ACK {}",
            self.next_expected
        );
        Outcome::ack(Verdict::Buffered, self.next_expected, from)
    }

    fn on_end(&mut self, seq: u32, from: SocketAddr) -> Outcome {
        if seq != self.next_expected {
            log::debug!("[receiver] END seq={seq} but expecting {}; ignored", self.next_expected);
            return Outcome::silent(Verdict::EndRejected);
        }
        if self.conn.transition(ConnectionState::Closed).is_err() {
            return Outcome::silent(Verdict::Unexpected);
        }
        log::info!(
            "[receiver] END from {from}; {} bytes reassembled",
            self.output.len()
        );
        Outcome::ack(Verdict::EndAccepted, seq.saturating_add(1), from)
    }

    fn check_rep(&self) {
        debug_assert!(self.reorder.keys().all(|&k| {
            in_window(k, self.next_expected, self.conn.window_size())
        }));
    }
}
