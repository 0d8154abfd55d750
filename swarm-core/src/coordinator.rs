//! Transfer lifecycle: the indexed peer and transfer tables, transfer creation, verification
//! outcome, stall sweep and disconnect cleanup.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::net::SocketAddr;

use crate::core::OutboundAction;
use crate::file::FileInfo;
use crate::peer::{ConnectionId, PeerRecord};
use crate::protocol::Message;
use crate::transfer::{Outcome, Role, Transfer, TransferId};

/// A taker/giver pair the scheduler wants to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub taker: ConnectionId,
    pub giver: ConnectionId,
    pub url: String,
    pub chunk: usize,
}

/// All mutable swarm state. Transfers point at peers by `ConnectionId`; a missing peer is "gone".
#[derive(Default)]
pub struct Coordinator {
    peers: BTreeMap<ConnectionId, PeerRecord>,
    transfers: HashMap<TransferId, Transfer>,
    used_client_ids: HashSet<String>,
    /// Peers whose chunk state or slots changed since the scheduler last looked.
    dirty: BTreeSet<ConnectionId>,
    /// Chunk geometry of every url a peer has requested or provided.
    files: HashMap<String, FileInfo>,
    next_conn: u64,
    tick: u64,
    outbox: Vec<OutboundAction>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_peer(&mut self, addr: SocketAddr) -> ConnectionId {
        self.next_conn += 1;
        let conn = ConnectionId(self.next_conn);
        self.peers.insert(conn, PeerRecord::new(addr));
        conn
    }

    pub fn peers(&self) -> &BTreeMap<ConnectionId, PeerRecord> {
        &self.peers
    }

    pub fn peer(&self, conn: ConnectionId) -> Option<&PeerRecord> {
        self.peers.get(&conn)
    }

    pub fn peer_mut(&mut self, conn: ConnectionId) -> Option<&mut PeerRecord> {
        self.peers.get_mut(&conn)
    }

    pub fn transfers(&self) -> &HashMap<TransferId, Transfer> {
        &self.transfers
    }

    pub fn transfer(&self, id: &str) -> Option<&Transfer> {
        self.transfers.get(id)
    }

    pub fn transfer_mut(&mut self, id: &str) -> Option<&mut Transfer> {
        self.transfers.get_mut(id)
    }

    /// Claim a client id. Returns false if a connected peer already holds it.
    pub fn claim_client_id(&mut self, client_id: &str) -> bool {
        self.used_client_ids.insert(client_id.to_string())
    }

    pub fn learn_file(&mut self, url: &str, info: FileInfo) {
        self.files.insert(url.to_string(), info);
    }

    pub fn file_info(&self, url: &str) -> Option<FileInfo> {
        self.files.get(url).copied()
    }

    pub fn now(&self) -> u64 {
        self.tick
    }

    pub fn advance_tick(&mut self) -> u64 {
        self.tick = self.tick.saturating_add(1);
        self.tick
    }

    pub fn mark_dirty(&mut self, conn: ConnectionId) {
        if self.peers.contains_key(&conn) {
            self.dirty.insert(conn);
        }
    }

    pub fn mark_all_dirty(&mut self) {
        self.dirty.extend(self.peers.keys().copied());
    }

    pub fn take_dirty(&mut self) -> BTreeSet<ConnectionId> {
        std::mem::take(&mut self.dirty)
    }

    pub fn send(&mut self, to: ConnectionId, msg: Message) {
        self.outbox.push(OutboundAction::SendMessage(to, msg));
    }

    pub fn close(&mut self, conn: ConnectionId) {
        self.outbox.push(OutboundAction::Close(conn));
    }

    pub fn take_outbox(&mut self) -> Vec<OutboundAction> {
        std::mem::take(&mut self.outbox)
    }

    /// Create a transfer, mark the chunk transferring for the taker, register it with both
    /// peers and tell the connector to dial. Returns false if it can't start or already runs.
    pub fn begin_transfer(&mut self, pairing: &Pairing) -> bool {
        let (Some(taker), Some(giver)) =
            (self.peers.get(&pairing.taker), self.peers.get(&pairing.giver))
        else {
            return false;
        };
        let Some(info) = self.files.get(&pairing.url) else {
            return false;
        };
        let range = info.chunk_byte_range(pairing.chunk);
        let taker_connects = giver.is_listening() || !taker.is_listening();
        let transfer = Transfer::new(
            (pairing.taker, taker.name()),
            (pairing.giver, giver.name()),
            &pairing.url,
            pairing.chunk,
            range,
            taker_connects,
            self.tick,
        );

        if self.transfers.contains_key(&transfer.id)
            || taker.transfers.contains_key(&transfer.id)
            || giver.transfers.contains_key(&transfer.id)
        {
            tracing::debug!(id = %transfer.id, "transfer already in progress");
            return false;
        }

        let acceptor = &self.peers[&transfer.acceptor()];
        let instruction = Message::Transfer {
            host: acceptor.addr.ip().to_string(),
            port: acceptor.listen_port,
            method: transfer.method(),
            url: transfer.url.clone(),
            range,
            peer_id: acceptor.name().to_string(),
        };

        if let Some(taker) = self.peers.get_mut(&transfer.taker) {
            taker.chunks.transfer(&transfer.url, transfer.chunk);
            taker.transfers.insert(transfer.id.clone(), Role::Taker);
        }
        if let Some(giver) = self.peers.get_mut(&transfer.giver) {
            giver.transfers.insert(transfer.id.clone(), Role::Giver);
        }

        tracing::debug!(
            id = %transfer.id,
            taker = %transfer.taker_id,
            giver = %transfer.giver_id,
            url = %transfer.url,
            chunk = transfer.chunk,
            method = ?transfer.method(),
            "transfer created"
        );
        self.send(transfer.connector, instruction);
        self.transfers.insert(transfer.id.clone(), transfer);
        true
    }

    /// Finalize a transfer exactly once: update the taker's chunk state and trust, drop the
    /// transfer from both peers and mark them dirty. `notify` sends the taker `hash_verify`.
    pub fn finalize(&mut self, id: &str, outcome: Outcome, notify: bool) {
        let Some(transfer) = self.transfers.remove(id) else {
            return;
        };
        for conn in [transfer.taker, transfer.giver] {
            if let Some(peer) = self.peers.get_mut(&conn) {
                peer.transfers.remove(id);
                self.dirty.insert(conn);
            }
        }

        let success = outcome.is_success();
        let range = transfer.chunk..transfer.chunk + 1;
        if let Some(taker) = self.peers.get_mut(&transfer.taker) {
            if success {
                taker.chunks.provide(&transfer.url, range);
                taker.trust.record_success(&transfer.giver_id);
            } else {
                taker.chunks.request(&transfer.url, range);
                taker.trust.record_failure(&transfer.giver_id);
            }
        }

        if success {
            tracing::info!(
                id = %transfer.id,
                taker = %transfer.taker_id,
                giver = %transfer.giver_id,
                url = %transfer.url,
                chunk = transfer.chunk,
                "transfer verified"
            );
        } else {
            tracing::warn!(
                id = %transfer.id,
                taker = %transfer.taker_id,
                giver = %transfer.giver_id,
                url = %transfer.url,
                chunk = transfer.chunk,
                ?outcome,
                "transfer failed"
            );
        }

        if notify && self.peers.contains_key(&transfer.taker) {
            self.send(
                transfer.taker,
                Message::HashVerify {
                    url: transfer.url,
                    range: transfer.range,
                    hash_ok: success,
                },
            );
        }
    }

    /// Fail every transfer older than `timeout_ticks`. Returns how many were swept.
    pub fn sweep_stalled(&mut self, timeout_ticks: u64) -> usize {
        let now = self.tick;
        let stalled: Vec<TransferId> = self
            .transfers
            .values()
            .filter(|t| t.is_stalled(now, timeout_ticks))
            .map(|t| t.id.clone())
            .collect();
        for id in &stalled {
            self.finalize(id, Outcome::Stalled, false);
        }
        stalled.len()
    }

    /// Remove a peer, release its client id and fail every transfer it was part of.
    pub fn remove_peer(&mut self, conn: ConnectionId) -> Option<PeerRecord> {
        let peer = self.peers.remove(&conn)?;
        self.dirty.remove(&conn);
        if let Some(id) = &peer.client_id {
            self.used_client_ids.remove(id);
        }
        for id in peer.transfers.keys() {
            self.finalize(id, Outcome::PeerGone, false);
        }
        Some(peer)
    }
}
