//! Go-Back-N send-side state machine.
//!
//! [`GbnSender`] turns an outgoing byte stream into pre-encoded DATA packets
//! and maintains a sliding window of up to `window_size` of them in flight.
//!
//! # Protocol contract
//!
//! - DATA packets carry sequence numbers `1..=N` in stream order.  Each one is
//!   encoded exactly once, when the stream is pushed; the bytes never change.
//! - At most `window_size` packets are outstanding: every outstanding `seq`
//!   satisfies [`in_window`]`(seq, base, window_size)`.
//! - ACKs are **cumulative**: `ack = K` means every packet with `seq < K` has
//!   been received contiguously.  Those packets are evicted and `base = K`.
//! - On timeout the caller retransmits **all** outstanding packets (go back
//!   N) and calls [`GbnSender::on_retransmit`].
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::VecDeque;
use std::ops::Range;

use tokio::time::Instant;

use crate::packet::Packet;
use crate::seq::in_window;

/// A DATA packet that has been transmitted but not yet acknowledged.
#[derive(Debug, Clone)]
pub struct OutstandingPacket {
    pub seq: u32,
    /// The exact bytes handed to the socket.
    pub encoded: Vec<u8>,
    /// Time of the most recent transmission.
    pub last_sent_at: Instant,
    /// Total number of times this packet has been transmitted.
    pub tx_count: u32,
}

/// Go-Back-N send-side state for one connection.
///
/// # Sequence-number layout
///
/// ```text
///   base           next_unsent      base + window
///     │                 │                 │
///  ───┼─────────────────┼─────────────────┼──────▶ seq space
///     │ <── in flight ─▶│ <── sendable ──▶│ <── pending
/// ```
#[derive(Debug)]
pub struct GbnSender {
    /// Oldest unacknowledged sequence number (left window edge).
    base: u32,

    /// Sequence number of the next packet not yet transmitted.
    next_unsent: u32,

    window_size: u32,

    max_payload: usize,

    /// In-flight packets `[base, next_unsent)`, oldest first.
    outstanding: VecDeque<OutstandingPacket>,

    /// Encoded packets `[next_unsent, N]` waiting for window space.
    pending: VecDeque<Vec<u8>>,
}

impl GbnSender {
    /// Create an empty sender.  The first DATA packet will carry `seq = 1`.
    pub fn new(window_size: u32, max_payload: usize) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        assert!(max_payload >= 1, "max_payload must be at least 1");
        Self {
            base: 1,
            next_unsent: 1,
            window_size,
            max_payload,
            outstanding: VecDeque::new(),
            pending: VecDeque::new(),
        }
    }

    /// Split `data` into chunks of at most `max_payload` bytes and queue one
    /// DATA packet per chunk, continuing the sequence space.
    ///
    /// Returns the number of packets queued.
    pub fn push_stream(&mut self, data: &[u8]) -> u32 {
        let first = self.total_chunks() + 1;
        let mut queued = 0;
        for (i, chunk) in data.chunks(self.max_payload).enumerate() {
            let seq = first + i as u32;
            self.pending.push_back(Packet::data(seq, chunk.to_vec()).encode());
            queued += 1;
        }
        queued
    }

    /// Number of DATA packets queued so far (`N`).
    pub fn total_chunks(&self) -> u32 {
        self.next_unsent - 1 + self.pending.len() as u32
    }

    /// Sequence number the END packet must carry (`N + 1`).
    pub fn end_seq(&self) -> u32 {
        self.total_chunks() + 1
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn next_unsent(&self) -> u32 {
        self.next_unsent
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Number of packets currently awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.outstanding.len()
    }

    pub fn has_unacked(&self) -> bool {
        !self.outstanding.is_empty()
    }

    /// `true` once every queued packet is acknowledged (`base > N`).
    pub fn is_complete(&self) -> bool {
        self.base > self.total_chunks()
    }

    /// Move every pending packet that fits in `[base, base + window)` into the
    /// outstanding set, stamped with `now`.
    ///
    /// Returns the sequence numbers admitted; the caller transmits exactly
    /// those (see [`GbnSender::window_entries`]).
    pub fn admit(&mut self, now: Instant) -> Range<u32> {
        let first = self.next_unsent;
        while in_window(self.next_unsent, self.base, self.window_size) {
            let Some(encoded) = self.pending.pop_front() else {
                break;
            };
            self.outstanding.push_back(OutstandingPacket {
                seq: self.next_unsent,
                encoded,
                last_sent_at: now,
                tx_count: 1,
            });
            self.next_unsent += 1;
        }
        first..self.next_unsent
    }

    /// Process a cumulative ACK.
    ///
    /// Evicts every outstanding packet with `seq < ack`, sets `base = ack`,
    /// and returns how many packets were newly acknowledged.  Returns `0` for
    /// a duplicate (`ack <= base`) or an ACK for data never sent
    /// (`ack > next_unsent`).
    pub fn on_ack(&mut self, ack: u32) -> usize {
        if ack <= self.base || ack > self.next_unsent {
            return 0;
        }
        let mut acked = 0;
        while self.outstanding.front().is_some_and(|p| p.seq < ack) {
            self.outstanding.pop_front();
            acked += 1;
        }
        self.base = ack;
        acked
    }

    /// Iterate over all in-flight packets from oldest to newest.
    pub fn window_entries(&self) -> impl Iterator<Item = &OutstandingPacket> {
        self.outstanding.iter()
    }

    /// Refresh `last_sent_at` and bump `tx_count` for every in-flight packet.
    ///
    /// Call immediately after retransmitting the whole window.
    pub fn on_retransmit(&mut self, now: Instant) {
        for entry in self.outstanding.iter_mut() {
            entry.tx_count += 1;
            entry.last_sent_at = now;
        }
    }

    /// When the oldest in-flight packet was last sent, or `None` when idle.
    pub fn oldest_sent_at(&self) -> Option<Instant> {
        self.outstanding.iter().map(|p| p.last_sent_at).min()
    }
}
