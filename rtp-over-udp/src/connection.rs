//! Per-connection identity and lifecycle bookkeeping.
//!
//! A [`Connection`] records what both engines share: which [`Role`] it plays,
//! the current [`ConnectionState`], the bound peer, and the fixed window size.
//! Every state change goes through [`Connection::transition`], which rejects
//! moves the FSM in [`crate::state`] does not allow.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::ConfigError;
use crate::state::{ConnectionState, Role};

/// Errors surfaced by the connection engines.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// START went unacknowledged for the configured number of attempts.
    #[error("handshake failed after {attempts} attempts")]
    HandshakeFailed { attempts: u32 },
    #[error("operation requires {expected} but connection is {actual}")]
    BadState {
        expected: ConnectionState,
        actual: ConnectionState,
    },
    #[error("{role} cannot move from {from} to {to}")]
    IllegalTransition {
        role: Role,
        from: ConnectionState,
        to: ConnectionState,
    },
    /// The bound peer went silent for longer than the configured idle timeout.
    #[error("peer idle for too long")]
    IdleTimeout,
}

/// Shared connection record.
#[derive(Debug, Clone)]
pub struct Connection {
    role: Role,
    state: ConnectionState,
    peer: Option<SocketAddr>,
    window_size: u32,
}

impl Connection {
    pub fn new(role: Role, window_size: u32) -> Self {
        Self {
            role,
            state: ConnectionState::Idle,
            peer: None,
            window_size,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// `true` when `addr` is the bound peer.
    pub fn is_bound_to(&self, addr: SocketAddr) -> bool {
        self.peer == Some(addr)
    }

    /// Bind the peer address.  Called once, on the first accepted START
    /// (receiver) or by `connect` (sender).
    pub fn bind_peer(&mut self, addr: SocketAddr) {
        debug_assert!(
            self.peer.is_none() || self.peer == Some(addr),
            "peer already bound to {:?}",
            self.peer
        );
        self.peer = Some(addr);
    }

    /// Move to `next`, or fail without changing anything.
    pub fn transition(&mut self, next: ConnectionState) -> Result<(), ConnError> {
        if !self.state.can_transition(self.role, next) {
            return Err(ConnError::IllegalTransition {
                role: self.role,
                from: self.state,
                to: next,
            });
        }
        log::debug!("[{}] {} -> {}", self.role, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Fail with [`ConnError::BadState`] unless the state is `expected`.
    pub fn expect_state(&self, expected: ConnectionState) -> Result<(), ConnError> {
        if self.state != expected {
            return Err(ConnError::BadState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }
}
