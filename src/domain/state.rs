use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-request lifecycle as seen by the engine.
///
/// Expiry is not a state: a request that lapses simply disappears from the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    /// Request event received
    Requested,
    /// Stored in the ledger, no peer known yet
    AwaitingPeer,
    /// At least one peer holds a token for it
    Invited,
    /// A peer redeemed its token and completion was published
    Fulfilled,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Requested => "REQUESTED",
            RequestState::AwaitingPeer => "AWAITING_PEER",
            RequestState::Invited => "INVITED",
            RequestState::Fulfilled => "FULFILLED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: RequestState) -> bool {
        use RequestState::*;

        match (self, target) {
            (Requested, AwaitingPeer) => true,
            (Requested, Invited) => true, // Peers already known
            (AwaitingPeer, Invited) => true,
            (Invited, Invited) => true, // Another peer invited
            (Invited, Fulfilled) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Fulfilled)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-token lifecycle: `Issued -> (Redeemed | Blacklisted) -> gone after the blacklist TTL`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenState {
    Issued,
    Redeemed,
    Blacklisted,
}

impl TokenState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenState::Issued => "ISSUED",
            TokenState::Redeemed => "REDEEMED",
            TokenState::Blacklisted => "BLACKLISTED",
        }
    }

    /// No transition ever leads back to `Issued`
    pub fn can_transition_to(&self, target: TokenState) -> bool {
        matches!(
            (self, target),
            (TokenState::Issued, TokenState::Redeemed) | (TokenState::Issued, TokenState::Blacklisted)
        )
    }
}

impl fmt::Display for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
