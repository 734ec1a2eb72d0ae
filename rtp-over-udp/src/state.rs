//! Connection finite-state machine (FSM) types.
//!
//! This module defines every state a [`crate::connection::Connection`] can
//! occupy and which transitions are legal for each [`Role`].  The transitions
//! themselves are driven by the engines in [`crate::gbn_connection`] and
//! [`crate::gbn_receiver`]; [`crate::connection::Connection::transition`]
//! rejects anything not listed here.
//!
//! ```text
//!  Sender:    Idle ──START──▶ Handshaking ──ACK(1)──▶ Established
//!                                                          │ all data ACKed
//!                                                          ▼
//!             Closed ◀──ACK(N+2) or deadline── Closing ◀── END(N+1)
//!
//!  Receiver:  Idle ──START/ACK(1)──▶ Established ──END/ACK(next+1)──▶ Closed
//! ```

/// Which side of the transfer a connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Sender => f.write_str("sender"),
            Role::Receiver => f.write_str("receiver"),
        }
    }
}

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No peer yet; initial state.
    #[default]
    Idle,
    /// START sent; waiting for ACK(1).  Sender only.
    Handshaking,
    /// Handshake complete; data transfer in progress.
    Established,
    /// END sent; waiting for its ACK or the close deadline.  Sender only.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// `true` if `role` may move from `self` to `next`.
    pub fn can_transition(self, role: Role, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match role {
            Role::Sender => matches!(
                (self, next),
                (Idle, Handshaking)
                    | (Handshaking, Established)
                    | (Established, Closing)
                    | (Closing, Closed)
            ),
            Role::Receiver => matches!((self, next), (Idle, Established) | (Established, Closed)),
        }
    }

    pub fn is_closed(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    #[test]
    fn sender_walks_full_lifecycle() {
        let path = [Idle, Handshaking, Established, Closing, Closed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(Role::Sender, pair[1]), "{pair:?}");
        }
    }

    #[test]
    fn receiver_skips_handshaking_and_closing() {
        assert!(Idle.can_transition(Role::Receiver, Established));
        assert!(Established.can_transition(Role::Receiver, Closed));
        assert!(!Idle.can_transition(Role::Receiver, Handshaking));
        assert!(!Established.can_transition(Role::Receiver, Closing));
    }

    #[test]
    fn no_way_back_from_closed() {
        for next in [Idle, Handshaking, Established, Closing, Closed] {
            assert!(!Closed.can_transition(Role::Sender, next));
            assert!(!Closed.can_transition(Role::Receiver, next));
        }
    }

    #[test]
    fn sender_cannot_skip_handshake() {
        assert!(!Idle.can_transition(Role::Sender, Established));
        assert!(!Established.can_transition(Role::Sender, Closed));
    }
}
