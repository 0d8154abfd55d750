//! Peer record: one connection's identity, chunk table, trust node and active transfers.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

use crate::chunk::ChunkTable;
use crate::transfer::{Role, TransferId};
use crate::trust::TrustNode;

/// Listen port assumed until the peer says otherwise.
pub const DEFAULT_LISTEN_PORT: u16 = 6000;

/// Server-assigned handle for one live connection. Monotonic, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

pub struct PeerRecord {
    pub addr: SocketAddr,
    /// Set by `client_info`; `None` until the peer registers.
    pub client_id: Option<String>,
    pub listen_port: u16,
    pub chunks: ChunkTable,
    pub trust: TrustNode,
    /// Transfers this peer takes part in, with the role it plays.
    pub transfers: BTreeMap<TransferId, Role>,
}

impl PeerRecord {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            client_id: None,
            listen_port: DEFAULT_LISTEN_PORT,
            chunks: ChunkTable::new(),
            trust: TrustNode::new(),
            transfers: BTreeMap::new(),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.client_id.is_some()
    }

    /// Client id, or the empty string before registration.
    pub fn name(&self) -> &str {
        self.client_id.as_deref().unwrap_or("")
    }

    pub fn count_role(&self, role: Role) -> usize {
        self.transfers.values().filter(|&&r| r == role).count()
    }

    /// Below the concurrent download ceiling.
    pub fn wants_download(&self, max_per_role: usize) -> bool {
        self.is_registered() && self.count_role(Role::Taker) < max_per_role
    }

    /// Below the concurrent upload ceiling.
    pub fn wants_upload(&self, max_per_role: usize) -> bool {
        self.is_registered() && self.count_role(Role::Giver) < max_per_role
    }

    /// Peer accepts inbound peer-to-peer connections.
    pub fn is_listening(&self) -> bool {
        self.listen_port != 0
    }
}
