//! The session lifecycle state machine.

use std::fmt;

/// Lifecycle of a gateway session.
///
/// ```text
/// Connecting → AwaitingAuth → AwaitingHandshakeAck → LinkingDownstream → Established
///      │              │                 │                      │               │
///      └──────────────┴─────────────────┴──────────┬───────────┴───────────────┘
///                                                  ▼
///                                               Closing → Closed
/// ```
///
/// - **Connecting**: the inbound link was accepted.
/// - **AwaitingAuth**: waiting for both the login and the client data,
///   in either order.
/// - **AwaitingHandshakeAck**: the pack offer was sent; waiting for the
///   client to answer it.
/// - **LinkingDownstream**: the backend connection is being opened.
/// - **Established**: registered; packets are translated both ways.
/// - **Closing**: one link ended; the other is being torn down.
/// - **Closed**: terminal. Deregistration has happened.
///
/// States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SessionState {
    Connecting,
    AwaitingAuth,
    AwaitingHandshakeAck,
    LinkingDownstream,
    Established,
    Closing,
    Closed,
}

impl SessionState {
    /// The next state along the main chain.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Connecting => Some(Self::AwaitingAuth),
            Self::AwaitingAuth => Some(Self::AwaitingHandshakeAck),
            Self::AwaitingHandshakeAck => Some(Self::LinkingDownstream),
            Self::LinkingDownstream => Some(Self::Established),
            Self::Established => Some(Self::Closing),
            Self::Closing => Some(Self::Closed),
            Self::Closed => None,
        }
    }

    /// Returns `true` if moving to `target` is allowed.
    ///
    /// One step forward, or straight to `Closing` from any state that is
    /// not already closing.
    pub fn can_transition_to(self, target: Self) -> bool {
        if target == Self::Closing {
            return self < Self::Closing;
        }
        self.next() == Some(target)
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }

    /// Returns `true` once both links are up and translation runs.
    pub fn is_linked(self) -> bool {
        self == Self::Established
    }

    /// Returns `true` while the session is being torn down or is gone.
    pub fn is_closing(self) -> bool {
        self >= Self::Closing
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "CONNECTING",
            Self::AwaitingAuth => "AWAITING_AUTH",
            Self::AwaitingHandshakeAck => "AWAITING_HANDSHAKE_ACK",
            Self::LinkingDownstream => "LINKING_DOWNSTREAM",
            Self::Established => "ESTABLISHED",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    const ALL: [SessionState; 7] = [
        Connecting,
        AwaitingAuth,
        AwaitingHandshakeAck,
        LinkingDownstream,
        Established,
        Closing,
        Closed,
    ];

    #[test]
    fn test_next_follows_main_chain() {
        let mut state = Connecting;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            seen.push(next);
            state = next;
        }
        assert_eq!(seen, ALL);
    }

    #[test]
    fn test_can_transition_to_never_regresses() {
        for from in ALL {
            for to in ALL {
                if to <= from {
                    assert!(!from.can_transition_to(to), "{from} -> {to}");
                }
            }
        }
    }

    #[test]
    fn test_any_open_state_can_close() {
        for from in [Connecting, AwaitingAuth, AwaitingHandshakeAck, LinkingDownstream, Established] {
            assert!(from.can_transition_to(Closing));
            assert!(!from.can_transition_to(Closed));
        }
        assert!(Closing.can_transition_to(Closed));
    }

    #[test]
    fn test_cannot_skip_handshake_gate() {
        assert!(!AwaitingAuth.can_transition_to(Established));
        assert!(!AwaitingHandshakeAck.can_transition_to(Established));
        assert!(!Connecting.can_transition_to(LinkingDownstream));
    }

    #[test]
    fn test_predicates() {
        assert!(Closed.is_terminal());
        assert!(!Closing.is_terminal());
        assert!(Established.is_linked());
        assert!(!LinkingDownstream.is_linked());
        assert!(Closing.is_closing());
        assert!(!Established.is_closing());
    }

    #[test]
    fn test_display_uses_upper_snake_names() {
        assert_eq!(AwaitingHandshakeAck.to_string(), "AWAITING_HANDSHAKE_ACK");
    }
}
