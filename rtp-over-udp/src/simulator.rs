//! In-memory network simulator for deterministic testing.
//!
//! Real networks drop, reorder, duplicate, and corrupt datagrams.  To exercise
//! the reliability mechanisms without depending on actual network conditions,
//! [`SimNetwork`] connects any number of [`SimSocket`]s through a shared fault
//! model:
//!
//! | Fault              | Description                                         |
//! |--------------------|-----------------------------------------------------|
//! | Packet loss        | Drop a datagram with probability `loss_rate`.       |
//! | Periodic loss      | Drop every n-th datagram, each distinct one once.   |
//! | Reordering         | Hold a datagram back until the next one is sent.    |
//! | Duplication        | Deliver a datagram twice.                           |
//! | Corruption         | Flip one random bit.                                |
//!
//! Randomness comes from a seeded [`StdRng`], so failures are reproducible.
//! Every datagram offered to the network is recorded in a [`Transmission`]
//! trace that tests can inspect afterwards.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::socket::{Datagram, Recv};

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    pub loss_rate: f64,
    pub duplicate_rate: f64,
    pub reorder_rate: f64,
    pub corrupt_rate: f64,
    /// Drop every n-th datagram offered to the network, unless that exact
    /// datagram was already dropped once.
    pub drop_every_nth_once: Option<u64>,
    pub seed: u64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        // No faults by default: the simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            corrupt_rate: 0.0,
            drop_every_nth_once: None,
            seed: 0,
        }
    }
}

/// What happened to one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    Delivered,
    Dropped,
    Duplicated,
    Corrupted,
    /// Held back to be delivered after the next datagram.
    Delayed,
    /// No socket bound at the destination.
    Unroutable,
}

/// One datagram as it was handed to the network, before any fault applied.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub bytes: Vec<u8>,
    pub fate: Fate,
}

type Inbox = mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>;

struct Held {
    bytes: Vec<u8>,
    from: SocketAddr,
    to: SocketAddr,
}

struct NetInner {
    config: FaultConfig,
    rng: StdRng,
    endpoints: HashMap<SocketAddr, (u64, Inbox)>,
    next_socket_id: u64,
    offered: u64,
    dropped_once: HashSet<Vec<u8>>,
    held: Option<Held>,
    trace: Vec<Transmission>,
}

impl NetInner {
    fn chance(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.random_bool(p.min(1.0))
    }

    fn deliver(&self, bytes: Vec<u8>, from: SocketAddr, to: SocketAddr) -> bool {
        match self.endpoints.get(&to) {
            // A closed receiver half behaves like an unbound port.
            Some((_, inbox)) => inbox.send((bytes, from)).is_ok(),
            None => false,
        }
    }

    fn offer(&mut self, mut bytes: Vec<u8>, from: SocketAddr, to: SocketAddr) {
        self.offered += 1;
        let original = bytes.clone();

        let fate = if !self.endpoints.contains_key(&to) {
            Fate::Unroutable
        } else if self.periodic_drop(&bytes) || self.chance(self.config.loss_rate) {
            Fate::Dropped
        } else if self.held.is_none() && self.chance(self.config.reorder_rate) {
            self.held = Some(Held { bytes, from, to });
            Fate::Delayed
        } else {
            let fate = if !bytes.is_empty() && self.chance(self.config.corrupt_rate) {
                let bit = self.rng.random_range(0..bytes.len() * 8);
                bytes[bit / 8] ^= 1 << (bit % 8);
                Fate::Corrupted
            } else if self.chance(self.config.duplicate_rate) {
                self.deliver(bytes.clone(), from, to);
                Fate::Duplicated
            } else {
                Fate::Delivered
            };
            self.deliver(bytes, from, to);
            fate
        };

        if fate != Fate::Delayed {
            if let Some(held) = self.held.take() {
                self.deliver(held.bytes, held.from, held.to);
            }
        }

        log::trace!("[sim] {from} -> {to} {} bytes: {fate:?}", original.len());
        self.trace.push(Transmission {
            from,
            to,
            bytes: original,
            fate,
        });
    }

    fn periodic_drop(&mut self, bytes: &[u8]) -> bool {
        match self.config.drop_every_nth_once {
            Some(n) if n > 0 && self.offered % n == 0 => self.dropped_once.insert(bytes.to_vec()),
            _ => false,
        }
    }
}

/// A simulated network shared by every [`SimSocket`] created from it.
#[derive(Clone)]
pub struct SimNetwork {
    inner: Arc<Mutex<NetInner>>,
}

impl SimNetwork {
    pub fn new(config: FaultConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            inner: Arc::new(Mutex::new(NetInner {
                config,
                rng,
                endpoints: HashMap::new(),
                next_socket_id: 0,
                offered: 0,
                dropped_once: HashSet::new(),
                held: None,
                trace: Vec::new(),
            })),
        }
    }

    /// A fault-free network.
    pub fn reliable() -> Self {
        Self::new(FaultConfig::default())
    }

    /// Attach a socket at `addr`, replacing any previous socket there.
    pub fn bind(&self, addr: SocketAddr) -> SimSocket {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut net = self.lock();
        let id = net.next_socket_id;
        net.next_socket_id += 1;
        net.endpoints.insert(addr, (id, tx));
        drop(net);
        SimSocket {
            addr,
            id,
            inbox: tokio::sync::Mutex::new(rx),
            net: self.clone(),
        }
    }

    /// Every datagram offered so far, in send order.
    pub fn trace(&self) -> Vec<Transmission> {
        self.lock().trace.clone()
    }

    /// Replace the fault model; the RNG and trace are kept.
    pub fn set_faults(&self, config: FaultConfig) {
        self.lock().config = config;
    }

    fn lock(&self) -> MutexGuard<'_, NetInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A datagram endpoint on a [`SimNetwork`].
pub struct SimSocket {
    addr: SocketAddr,
    id: u64,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
    net: SimNetwork,
}

#[async_trait]
impl Datagram for SimSocket {
    async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> io::Result<()> {
        self.net.lock().offer(bytes.to_vec(), self.addr, dest);
        Ok(())
    }

    async fn recv_from(&self, timeout: Duration) -> io::Result<Recv> {
        let mut inbox = self.inbox.lock().await;
        match tokio::time::timeout(timeout, inbox.recv()).await {
            Ok(Some((bytes, from))) => Ok(Recv::Datagram(bytes, from)),
            Ok(None) => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "simulated socket detached from network",
            )),
            Err(_elapsed) => Ok(Recv::TimedOut),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

impl Drop for SimSocket {
    fn drop(&mut self) {
        let mut net = self.net.lock();
        // Only unbind if a newer socket has not taken the address over.
        if net.endpoints.get(&self.addr).is_some_and(|(id, _)| *id == self.id) {
            net.endpoints.remove(&self.addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    const WAIT: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn reliable_network_delivers_in_order() {
        let net = SimNetwork::reliable();
        let a = net.bind(addr(1));
        let b = net.bind(addr(2));

        a.send_to(b"one", addr(2)).await.unwrap();
        a.send_to(b"two", addr(2)).await.unwrap();

        assert_eq!(b.recv_from(WAIT).await.unwrap(), Recv::Datagram(b"one".to_vec(), addr(1)));
        assert_eq!(b.recv_from(WAIT).await.unwrap(), Recv::Datagram(b"two".to_vec(), addr(1)));
        assert_eq!(b.recv_from(WAIT).await.unwrap(), Recv::TimedOut);
    }

    #[tokio::test]
    async fn unbound_destination_is_unroutable() {
        let net = SimNetwork::reliable();
        let a = net.bind(addr(1));
        a.send_to(b"lost", addr(9)).await.unwrap();
        assert_eq!(net.trace()[0].fate, Fate::Unroutable);
    }

    #[tokio::test]
    async fn periodic_drop_spares_retransmissions() {
        let net = SimNetwork::new(FaultConfig {
            drop_every_nth_once: Some(2),
            ..FaultConfig::default()
        });
        let a = net.bind(addr(1));
        let b = net.bind(addr(2));

        a.send_to(b"x", addr(2)).await.unwrap(); // 1st: delivered
        a.send_to(b"y", addr(2)).await.unwrap(); // 2nd: dropped
        a.send_to(b"z", addr(2)).await.unwrap(); // 3rd: delivered
        a.send_to(b"y", addr(2)).await.unwrap(); // 4th: "y" already dropped once

        let fates: Vec<Fate> = net.trace().iter().map(|t| t.fate).collect();
        assert_eq!(
            fates,
            [Fate::Delivered, Fate::Dropped, Fate::Delivered, Fate::Delivered]
        );
        let mut got = Vec::new();
        while let Recv::Datagram(bytes, _) = b.recv_from(WAIT).await.unwrap() {
            got.push(bytes);
        }
        assert_eq!(got, [b"x".to_vec(), b"z".to_vec(), b"y".to_vec()]);
    }

    #[tokio::test]
    async fn full_reorder_swaps_neighbours() {
        let net = SimNetwork::new(FaultConfig {
            reorder_rate: 1.0,
            ..FaultConfig::default()
        });
        let a = net.bind(addr(1));
        let b = net.bind(addr(2));

        a.send_to(b"first", addr(2)).await.unwrap();
        a.send_to(b"second", addr(2)).await.unwrap();

        assert_eq!(b.recv_from(WAIT).await.unwrap(), Recv::Datagram(b"second".to_vec(), addr(1)));
        assert_eq!(b.recv_from(WAIT).await.unwrap(), Recv::Datagram(b"first".to_vec(), addr(1)));
    }

    #[tokio::test]
    async fn corruption_flips_exactly_one_bit() {
        let net = SimNetwork::new(FaultConfig {
            corrupt_rate: 1.0,
            seed: 7,
            ..FaultConfig::default()
        });
        let a = net.bind(addr(1));
        let b = net.bind(addr(2));

        let sent = vec![0u8; 32];
        a.send_to(&sent, addr(2)).await.unwrap();
        let Recv::Datagram(got, _) = b.recv_from(WAIT).await.unwrap() else {
            panic!("nothing delivered");
        };
        let flipped: u32 = got.iter().zip(&sent).map(|(x, y)| (x ^ y).count_ones()).sum();
        assert_eq!(flipped, 1);
    }

    #[tokio::test]
    async fn duplication_delivers_twice() {
        let net = SimNetwork::new(FaultConfig {
            duplicate_rate: 1.0,
            ..FaultConfig::default()
        });
        let a = net.bind(addr(1));
        let b = net.bind(addr(2));

        a.send_to(b"dup", addr(2)).await.unwrap();
        assert!(matches!(b.recv_from(WAIT).await.unwrap(), Recv::Datagram(..)));
        assert!(matches!(b.recv_from(WAIT).await.unwrap(), Recv::Datagram(..)));
        assert_eq!(b.recv_from(WAIT).await.unwrap(), Recv::TimedOut);
    }
}
