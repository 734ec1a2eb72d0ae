//! `rtp-over-udp` — a reliable byte stream transported over UDP datagrams.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐   START / DATA / END   ┌────────────────┐
//!  │ StreamSender │───────────────────────▶│ StreamReceiver │
//!  └──────┬───────┘                        └───────┬────────┘
//!         │        cumulative ACKs                 │
//!         │◀───────────────────────────────────────┘
//!         │
//!  ┌──────▼───────────────────────────────────────────┐
//!  │ GbnSender / GbnReceiver  (sans-IO window engines) │
//!  │ Connection  (role + state machine + bound peer)   │
//!  └──────┬───────────────────────────────────────────┘
//!         │ encoded packets
//!  ┌──────▼──────┐
//!  │  Datagram   │  Socket (tokio UdpSocket) or SimSocket (fault injection)
//!  └─────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]          — wire format and CRC-32 framing
//! - [`seq`]             — window membership and in-order drain
//! - [`state`]           — finite-state-machine types
//! - [`connection`]      — per-connection lifecycle and errors
//! - [`config`]          — window, payload and timer settings
//! - [`timer`]           — poll interval, deadlines and retry budget
//! - [`gbn_sender`]      — Go-Back-N outbound window state machine
//! - [`gbn_receiver`]    — Go-Back-N inbound cumulative-ACK state machine
//! - [`gbn_connection`]  — async drivers tying the engines to a socket
//! - [`socket`]          — async datagram abstraction
//! - [`simulator`]       — lossy/reordering in-memory network for testing
//! - [`server`] / [`client`] — upper-casing echo service

pub mod client;
pub mod config;
pub mod connection;
pub mod gbn_connection;
pub mod gbn_receiver;
pub mod gbn_sender;
pub mod packet;
pub mod seq;
pub mod server;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use config::Config;
pub use connection::ConnError;
pub use gbn_connection::{StreamReceiver, StreamSender};
