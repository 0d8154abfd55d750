//! Transfer: one chunk moving from a giver to a taker, and its deterministic identity.

use sha2::{Digest, Sha256};

use crate::peer::ConnectionId;
use crate::protocol::{ByteRange, Method};

/// Hex digest identifying a transfer. Both endpoints derive it from their own messages.
pub type TransferId = String;

/// Derive the transfer id from the two client ids, url and byte range. The peer pair is
/// sorted first, so either endpoint gets the same id.
pub fn transfer_id(peer_a: &str, peer_b: &str, url: &str, range: ByteRange) -> TransferId {
    let (lo, hi) = if peer_a <= peer_b {
        (peer_a, peer_b)
    } else {
        (peer_b, peer_a)
    };
    let mut hasher = Sha256::new();
    hasher.update(lo.as_bytes());
    hasher.update([0u8]);
    hasher.update(hi.as_bytes());
    hasher.update([0u8]);
    hasher.update(url.as_bytes());
    hasher.update([0u8]);
    hasher.update(range.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Side a peer plays in one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Taker,
    Giver,
}

/// Lifecycle position of a live transfer. Terminal outcomes are reported as `Outcome`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Registered and the connector has been told to dial.
    Created,
    /// The acceptor has seen the inbound connection (it asked to verify it).
    InFlight,
}

/// How a transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Verified,
    HashMismatch,
    Stalled,
    PeerGone,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Verified)
    }
}

#[derive(Debug, Clone)]
pub struct Transfer {
    pub id: TransferId,
    pub taker: ConnectionId,
    pub giver: ConnectionId,
    pub taker_id: String,
    pub giver_id: String,
    pub url: String,
    pub chunk: usize,
    pub range: ByteRange,
    /// Endpoint that opens the peer-to-peer connection.
    pub connector: ConnectionId,
    pub phase: Phase,
    pub verification_requested: bool,
    pub created_tick: u64,
}

impl Transfer {
    pub fn new(
        taker: (ConnectionId, &str),
        giver: (ConnectionId, &str),
        url: &str,
        chunk: usize,
        range: ByteRange,
        taker_connects: bool,
        created_tick: u64,
    ) -> Self {
        Self {
            id: transfer_id(taker.1, giver.1, url, range),
            taker: taker.0,
            giver: giver.0,
            taker_id: taker.1.to_string(),
            giver_id: giver.1.to_string(),
            url: url.to_string(),
            chunk,
            range,
            connector: if taker_connects { taker.0 } else { giver.0 },
            phase: Phase::Created,
            verification_requested: false,
            created_tick,
        }
    }

    /// Endpoint that listens for the connector.
    pub fn acceptor(&self) -> ConnectionId {
        if self.connector == self.taker {
            self.giver
        } else {
            self.taker
        }
    }

    /// `Get` when the taker dials out, `Put` when the giver does.
    pub fn method(&self) -> Method {
        if self.connector == self.taker {
            Method::Get
        } else {
            Method::Put
        }
    }

    pub fn role_of(&self, conn: ConnectionId) -> Option<Role> {
        if conn == self.taker {
            Some(Role::Taker)
        } else if conn == self.giver {
            Some(Role::Giver)
        } else {
            None
        }
    }

    /// The endpoint other than `conn`.
    pub fn other(&self, conn: ConnectionId) -> ConnectionId {
        if conn == self.taker {
            self.giver
        } else {
            self.taker
        }
    }

    pub fn is_stalled(&self, now_tick: u64, timeout_ticks: u64) -> bool {
        now_tick.saturating_sub(self.created_tick) > timeout_ticks
    }
}
