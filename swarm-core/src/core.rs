//! Host-driven API: SwarmCore receives connection events and messages, returns actions.
//! All swarm state lives behind `&mut self`; the host serializes calls (one lock).

use std::net::SocketAddr;
use std::sync::Arc;

use crate::chunk::ChunkState;
use crate::coordinator::Coordinator;
use crate::file::{FileLookup, FileService};
use crate::peer::{ConnectionId, PeerRecord};
use crate::protocol::{ByteRange, Message};
use crate::scheduler::{GiverSelector, Scheduler, SchedulerConfig, UniformSelector};
use crate::status::StatusSnapshot;
use crate::transfer::{transfer_id, Outcome, Phase, Role};

/// Default stall timeout in ticks.
pub const DEFAULT_STALL_TIMEOUT_TICKS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreConfig {
    pub scheduler: SchedulerConfig,
    pub stall_timeout_ticks: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            stall_timeout_ticks: DEFAULT_STALL_TIMEOUT_TICKS,
        }
    }
}

/// Action for host to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundAction {
    SendMessage(ConnectionId, Message),
    /// Drop the connection; the host reports it back through `on_disconnect`.
    Close(ConnectionId),
}

/// Protocol violation by a peer. `Fatal` ends the session; `Warning` is only reported.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("protocol error: {0}")]
    Fatal(String),
    #[error("protocol warning: {0}")]
    Warning(String),
}

impl ProtocolError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::Fatal(_))
    }

    /// Message reporting this error to the peer.
    pub fn to_message(&self) -> Message {
        match self {
            ProtocolError::Fatal(message) => Message::ProtocolError {
                message: message.clone(),
            },
            ProtocolError::Warning(message) => Message::ProtocolWarn {
                message: message.clone(),
            },
        }
    }
}

/// Main coordinator. Host passes events; core returns actions.
pub struct SwarmCore {
    coord: Coordinator,
    scheduler: Scheduler,
    files: Arc<dyn FileService>,
    stall_timeout_ticks: u64,
}

impl SwarmCore {
    pub fn new(files: Arc<dyn FileService>, config: CoreConfig) -> Self {
        Self::with_selector(files, config, Box::new(UniformSelector::new()))
    }

    pub fn with_selector(
        files: Arc<dyn FileService>,
        config: CoreConfig,
        selector: Box<dyn GiverSelector>,
    ) -> Self {
        Self {
            coord: Coordinator::new(),
            scheduler: Scheduler::new(config.scheduler, selector),
            files,
            stall_timeout_ticks: config.stall_timeout_ticks,
        }
    }

    /// File service, for lookups the host runs before taking the lock.
    pub fn file_service(&self) -> Arc<dyn FileService> {
        self.files.clone()
    }

    pub fn peer(&self, conn: ConnectionId) -> Option<&PeerRecord> {
        self.coord.peer(conn)
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coord
    }

    pub fn connection_count(&self) -> usize {
        self.coord.peers().len()
    }

    /// New connection: unregistered, empty tables.
    pub fn on_connect(&mut self, addr: SocketAddr) -> ConnectionId {
        let conn = self.coord.add_peer(addr);
        tracing::info!(%conn, %addr, "client connected");
        conn
    }

    /// Connection gone: fail its transfers, then reschedule the peers they freed.
    pub fn on_disconnect(&mut self, conn: ConnectionId) -> Vec<OutboundAction> {
        if let Some(peer) = self.coord.remove_peer(conn) {
            tracing::info!(
                %conn,
                client_id = peer.name(),
                failed_transfers = peer.transfers.len(),
                "client disconnected"
            );
        }
        self.scheduler.drain(&mut self.coord);
        self.coord.take_outbox()
    }

    /// Dispatch a message, running its file lookups inline. Hosts that must keep disk I/O
    /// outside their lock call `FileLookup::resolve` first and use `on_resolved_message`.
    pub fn on_message(
        &mut self,
        conn: ConnectionId,
        msg: Message,
    ) -> Result<Vec<OutboundAction>, ProtocolError> {
        let lookup = FileLookup::resolve(self.files.as_ref(), &msg);
        self.on_resolved_message(conn, msg, lookup)
    }

    /// Dispatch a message whose file lookups are already done, then drain the scheduler.
    pub fn on_resolved_message(
        &mut self,
        conn: ConnectionId,
        msg: Message,
        lookup: FileLookup,
    ) -> Result<Vec<OutboundAction>, ProtocolError> {
        let Some(peer) = self.coord.peer(conn) else {
            return Err(ProtocolError::Fatal("unknown connection".into()));
        };
        if !peer.is_registered() && !matches!(msg, Message::ClientInfo { .. }) {
            return Err(ProtocolError::Fatal(
                "You need to send a 'client_info' message first".into(),
            ));
        }

        let kind = msg.kind();
        match msg {
            Message::ClientInfo {
                client_id,
                listen_port,
            } => self.register(conn, client_id, listen_port)?,
            Message::AskInfo { url } => {
                let info = lookup.info();
                self.coord.send(
                    conn,
                    Message::TellInfo {
                        url,
                        size: info.map(|i| i.file_size),
                        chunk_size: info.map(|i| i.base_chunk_size),
                        streaming: info.map(|i| i.streaming),
                    },
                );
            }
            Message::Request { url, range } => {
                self.request_provide(conn, &url, range, &lookup, Interest::Request)?
            }
            Message::Provide { url, range } => {
                self.request_provide(conn, &url, range, &lookup, Interest::Provide)?
            }
            Message::Unrequest { url, range } | Message::Unprovide { url, range } => {
                self.request_provide(conn, &url, range, &lookup, Interest::Withdraw)?
            }
            Message::AskVerify {
                peer_id,
                url,
                range,
                peer,
            } => self.ask_verify(conn, peer_id, url, range, peer),
            Message::Completed {
                peer_id,
                url,
                range,
                hash,
            } => self.completed(conn, &peer_id, &url, range, hash.as_deref(), &lookup)?,
            Message::ChangePort { port } => {
                if let Some(peer) = self.coord.peer_mut(conn) {
                    tracing::debug!(%conn, port, "client changed listen port");
                    peer.listen_port = port;
                }
            }
            Message::ProtocolError { message } | Message::ProtocolWarn { message } => {
                tracing::debug!(%conn, %message, "peer reported a protocol problem");
            }
            Message::TellInfo { .. }
            | Message::Transfer { .. }
            | Message::TellVerify { .. }
            | Message::HashVerify { .. } => {
                return Err(ProtocolError::Fatal(format!(
                    "Unhandled message type: {kind}"
                )));
            }
        }

        self.scheduler.drain(&mut self.coord);
        Ok(self.coord.take_outbox())
    }

    /// Periodic pass: advance the clock, fail stalled transfers, retry every peer.
    pub fn tick(&mut self) -> Vec<OutboundAction> {
        self.coord.advance_tick();
        let stalled = self.coord.sweep_stalled(self.stall_timeout_ticks);
        if stalled > 0 {
            tracing::warn!(stalled, "cleared stalled transfers");
        }
        self.coord.mark_all_dirty();
        let created = self.scheduler.drain(&mut self.coord);
        if created > 0 {
            tracing::debug!(created, "periodic pass spawned transfers");
        }
        self.coord.take_outbox()
    }

    /// Read-only view for the status page.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot::capture(&self.coord)
    }

    fn register(
        &mut self,
        conn: ConnectionId,
        client_id: String,
        listen_port: u16,
    ) -> Result<(), ProtocolError> {
        if self.coord.peer(conn).is_some_and(|p| p.is_registered()) {
            return Err(ProtocolError::Fatal("You are already registered".into()));
        }
        if client_id.is_empty() {
            return Err(ProtocolError::Fatal("Your client id must not be empty".into()));
        }
        if !self.coord.claim_client_id(&client_id) {
            return Err(ProtocolError::Fatal(format!(
                "Your client id: {client_id} is already in use."
            )));
        }
        tracing::info!(%conn, %client_id, listen_port, "client registered");
        if let Some(peer) = self.coord.peer_mut(conn) {
            peer.client_id = Some(client_id);
            peer.listen_port = listen_port;
        }
        Ok(())
    }

    /// Apply request/provide/unrequest/unprovide to the peer's chunk table.
    fn request_provide(
        &mut self,
        conn: ConnectionId,
        url: &str,
        range: ByteRange,
        lookup: &FileLookup,
        interest: Interest,
    ) -> Result<(), ProtocolError> {
        let Some(info) = lookup.info() else {
            return Err(ProtocolError::Warning(format!(
                "Requested URL: '{url}' not found"
            )));
        };
        self.coord.learn_file(url, info);

        let chunks =
            info.chunk_range_from_byte_range(range, matches!(interest, Interest::Provide));
        let Some(peer) = self.coord.peer_mut(conn) else {
            return Ok(());
        };
        match interest {
            Interest::Request => peer.chunks.request(url, chunks),
            Interest::Provide => peer.chunks.provide(url, chunks),
            Interest::Withdraw => peer.chunks.set_range(url, chunks, ChunkState::None),
        }
        self.coord.mark_dirty(conn);
        Ok(())
    }

    fn ask_verify(
        &mut self,
        conn: ConnectionId,
        peer_id: String,
        url: String,
        range: ByteRange,
        peer: Option<String>,
    ) {
        let my_id = self.coord.peer(conn).map(|p| p.name()).unwrap_or_default();
        let id = transfer_id(my_id, &peer_id, &url, range);
        let authorized = self
            .coord
            .peer(conn)
            .is_some_and(|p| p.transfers.contains_key(&id));

        if let Some(transfer) = self.coord.transfer_mut(&id).filter(|_| authorized) {
            transfer.verification_requested = true;
            transfer.phase = Phase::InFlight;
        } else {
            tracing::debug!(%conn, %id, "ask_verify for unknown transfer");
        }

        self.coord.send(
            conn,
            Message::TellVerify {
                peer_id,
                url,
                range,
                peer,
                is_authorized: authorized,
            },
        );
    }

    /// Finalize a transfer reported complete by its taker, checking the reported digest.
    fn completed(
        &mut self,
        conn: ConnectionId,
        peer_id: &str,
        url: &str,
        range: ByteRange,
        hash: Option<&str>,
        lookup: &FileLookup,
    ) -> Result<(), ProtocolError> {
        let my_id = self.coord.peer(conn).map(|p| p.name()).unwrap_or_default();
        let id = transfer_id(my_id, peer_id, url, range);
        let role = self
            .coord
            .peer(conn)
            .and_then(|p| p.transfers.get(&id).copied());
        let (Some(role), Some(transfer)) = (role, self.coord.transfer(&id)) else {
            return Err(ProtocolError::Warning(format!(
                "You sent me a transfer completed message for unknown transfer: {id}"
            )));
        };

        if role == Role::Giver {
            tracing::debug!(%conn, %id, "giver reported transfer done");
            return Ok(());
        }
        if !transfer.verification_requested {
            // Honored anyway; the acceptor never confirmed this transfer.
            tracing::warn!(%conn, %id, "completed for a transfer that was never ask_verify'd");
        }

        let expected = lookup.chunk_hash(transfer.chunk);
        let ok = matches!((hash, expected), (Some(h), Some(e)) if h.eq_ignore_ascii_case(e));
        let outcome = if ok {
            Outcome::Verified
        } else {
            Outcome::HashMismatch
        };
        self.coord.finalize(&id, outcome, true);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Interest {
    Request,
    Provide,
    Withdraw,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::testing::MemoryFiles;
    use crate::protocol::Method;
    use crate::scheduler::testing::FirstSelector;
    use crate::scheduler::MAX_TRANSFERS_PER_ROLE;

    const URL: &str = "http://files/f";
    const CHUNK: u64 = 4;

    fn files() -> Arc<MemoryFiles> {
        Arc::new(MemoryFiles::new(CHUNK).with_file(URL, b"0123456789".to_vec()))
    }

    fn core_with(files: Arc<MemoryFiles>, config: CoreConfig) -> SwarmCore {
        SwarmCore::with_selector(files, config, Box::new(FirstSelector))
    }

    fn core() -> SwarmCore {
        core_with(files(), CoreConfig::default())
    }

    fn connect(core: &mut SwarmCore, ip: &str) -> ConnectionId {
        core.on_connect(format!("{ip}:40000").parse().unwrap())
    }

    fn register(core: &mut SwarmCore, conn: ConnectionId, id: &str, port: u16) {
        let out = core
            .on_message(
                conn,
                Message::ClientInfo {
                    client_id: id.into(),
                    listen_port: port,
                },
            )
            .unwrap();
        assert!(out.is_empty());
    }

    fn range(start: u64, end: u64) -> ByteRange {
        ByteRange::new(start, end)
    }

    /// A requests chunk 0, B provides it; returns (core, a, b, transfer message sent to a).
    fn paired() -> (SwarmCore, ConnectionId, ConnectionId, Message) {
        let mut core = core();
        let a = connect(&mut core, "10.0.0.1");
        let b = connect(&mut core, "10.0.0.2");
        register(&mut core, a, "a", 7001);
        register(&mut core, b, "b", 7002);
        let out = core
            .on_message(a, Message::Request { url: URL.into(), range: range(0, 4) })
            .unwrap();
        assert!(out.is_empty());
        let out = core
            .on_message(b, Message::Provide { url: URL.into(), range: range(0, 4) })
            .unwrap();
        assert_eq!(out.len(), 1);
        let OutboundAction::SendMessage(to, msg) = out.into_iter().next().unwrap() else {
            panic!("expected a transfer instruction");
        };
        assert_eq!(to, a);
        (core, a, b, msg)
    }

    fn completed(hash: Option<String>) -> Message {
        Message::Completed {
            peer_id: "b".into(),
            url: URL.into(),
            range: range(0, 4),
            hash,
        }
    }

    #[test]
    fn first_message_must_register() {
        let mut core = core();
        let a = connect(&mut core, "10.0.0.1");
        let err = core
            .on_message(a, Message::AskInfo { url: URL.into() })
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err.to_message(), Message::ProtocolError { .. }));
    }

    #[test]
    fn duplicate_client_id_rejected() {
        let mut core = core();
        let a = connect(&mut core, "10.0.0.1");
        let b = connect(&mut core, "10.0.0.2");
        register(&mut core, a, "same", 1);
        let err = core
            .on_message(
                b,
                Message::ClientInfo {
                    client_id: "same".into(),
                    listen_port: 2,
                },
            )
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(!core.peer(b).unwrap().is_registered());
    }

    #[test]
    fn client_id_reusable_after_disconnect() {
        let mut core = core();
        let a = connect(&mut core, "10.0.0.1");
        register(&mut core, a, "a", 1);
        core.on_disconnect(a);
        let a2 = connect(&mut core, "10.0.0.1");
        register(&mut core, a2, "a", 1);
    }

    #[test]
    fn ask_info_known_and_unknown() {
        let mut core = core();
        let a = connect(&mut core, "10.0.0.1");
        register(&mut core, a, "a", 1);
        let out = core.on_message(a, Message::AskInfo { url: URL.into() }).unwrap();
        assert_eq!(
            out,
            vec![OutboundAction::SendMessage(
                a,
                Message::TellInfo {
                    url: URL.into(),
                    size: Some(10),
                    chunk_size: Some(CHUNK),
                    streaming: Some(false),
                }
            )]
        );
        let out = core.on_message(a, Message::AskInfo { url: "nope".into() }).unwrap();
        assert!(matches!(
            &out[0],
            OutboundAction::SendMessage(_, Message::TellInfo { size: None, .. })
        ));
    }

    #[test]
    fn request_for_unknown_url_warns() {
        let mut core = core();
        let a = connect(&mut core, "10.0.0.1");
        register(&mut core, a, "a", 1);
        let err = core
            .on_message(a, Message::Request { url: "nope".into(), range: range(0, 4) })
            .unwrap_err();
        assert!(!err.is_fatal());
        assert!(matches!(err.to_message(), Message::ProtocolWarn { .. }));
    }

    #[test]
    fn server_bound_types_from_peer_are_fatal() {
        let mut core = core();
        let a = connect(&mut core, "10.0.0.1");
        register(&mut core, a, "a", 1);
        let err = core
            .on_message(
                a,
                Message::HashVerify {
                    url: URL.into(),
                    range: range(0, 4),
                    hash_ok: true,
                },
            )
            .unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Fatal("Unhandled message type: hash_verify".into())
        );
    }

    #[test]
    fn unrequest_clears_chunks() {
        let mut core = core();
        let a = connect(&mut core, "10.0.0.1");
        register(&mut core, a, "a", 1);
        core.on_message(a, Message::Request { url: URL.into(), range: range(0, 10) })
            .unwrap();
        assert_eq!(core.peer(a).unwrap().chunks.state(URL, 2), ChunkState::Requested);
        core.on_message(a, Message::Unrequest { url: URL.into(), range: range(4, 10) })
            .unwrap();
        assert_eq!(core.peer(a).unwrap().chunks.state(URL, 0), ChunkState::Requested);
        assert_eq!(core.peer(a).unwrap().chunks.state(URL, 1), ChunkState::None);
        assert_eq!(core.peer(a).unwrap().chunks.state(URL, 2), ChunkState::None);
    }

    #[test]
    fn change_port_updates_listen_port() {
        let mut core = core();
        let a = connect(&mut core, "10.0.0.1");
        register(&mut core, a, "a", 1);
        core.on_message(a, Message::ChangePort { port: 9999 }).unwrap();
        assert_eq!(core.peer(a).unwrap().listen_port, 9999);
    }

    #[test]
    fn pairing_instructs_taker_to_dial_giver() {
        let (core, a, _b, msg) = paired();
        assert_eq!(
            msg,
            Message::Transfer {
                host: "10.0.0.2".into(),
                port: 7002,
                method: Method::Get,
                url: URL.into(),
                range: range(0, 4),
                peer_id: "b".into(),
            }
        );
        assert_eq!(core.peer(a).unwrap().chunks.state(URL, 0), ChunkState::Transferring);
    }

    #[test]
    fn end_to_end_success() {
        let (mut core, a, b, _) = paired();
        assert_eq!(core.peer(a).unwrap().trust.weight("b"), 0.0);

        let hash = files().chunk_hash(URL, 0);
        let out = core.on_message(a, completed(Some(hash))).unwrap();
        assert_eq!(
            out,
            vec![OutboundAction::SendMessage(
                a,
                Message::HashVerify {
                    url: URL.into(),
                    range: range(0, 4),
                    hash_ok: true,
                }
            )]
        );
        let peer_a = core.peer(a).unwrap();
        assert!(peer_a.chunks.is_provided(URL, 0));
        assert!(peer_a.trust.weight("b") > 0.0);
        assert!(peer_a.transfers.is_empty());
        assert!(core.peer(b).unwrap().transfers.is_empty());
        assert!(core.coordinator().transfers().is_empty());
    }

    #[test]
    fn end_to_end_failure_reschedules() {
        let (mut core, a, b, _) = paired();
        let out = core.on_message(a, completed(Some("deadbeef".into()))).unwrap();

        // hash_verify(false), then the freed chunk is paired again right away
        assert_eq!(
            out[0],
            OutboundAction::SendMessage(
                a,
                Message::HashVerify {
                    url: URL.into(),
                    range: range(0, 4),
                    hash_ok: false,
                }
            )
        );
        assert!(matches!(
            &out[1],
            OutboundAction::SendMessage(to, Message::Transfer { .. }) if *to == a
        ));
        assert_eq!(core.peer(a).unwrap().trust.weight("b"), 0.0);
        assert_eq!(core.peer(a).unwrap().chunks.state(URL, 0), ChunkState::Transferring);
        assert_eq!(core.peer(b).unwrap().transfers.len(), 1);
    }

    #[test]
    fn failure_lowers_existing_trust() {
        let (mut core, a, _b, _) = paired();
        // earlier success toward b and toward c
        core.coord.peer_mut(a).unwrap().trust.record_success("b");
        core.coord.peer_mut(a).unwrap().trust.record_success("c");
        let before = core.peer(a).unwrap().trust.weight("b");
        core.on_message(a, completed(None)).unwrap();
        assert!(core.peer(a).unwrap().trust.weight("b") < before);
    }

    #[test]
    fn completed_for_unknown_transfer_warns() {
        let mut core = core();
        let a = connect(&mut core, "10.0.0.1");
        register(&mut core, a, "a", 1);
        let err = core.on_message(a, completed(Some("x".into()))).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn completed_from_giver_leaves_transfer_open() {
        let (mut core, a, b, _) = paired();
        let out = core
            .on_message(
                b,
                Message::Completed {
                    peer_id: "a".into(),
                    url: URL.into(),
                    range: range(0, 4),
                    hash: None,
                },
            )
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(core.coordinator().transfers().len(), 1);
        assert_eq!(core.peer(a).unwrap().chunks.state(URL, 0), ChunkState::Transferring);
    }

    #[test]
    fn ask_verify_flags_transfer() {
        let (mut core, _a, b, _) = paired();
        let ask = |peer_id: &str| Message::AskVerify {
            peer_id: peer_id.into(),
            url: URL.into(),
            range: range(0, 4),
            peer: None,
        };
        let out = core.on_message(b, ask("a")).unwrap();
        assert!(matches!(
            &out[0],
            OutboundAction::SendMessage(_, Message::TellVerify { is_authorized: true, .. })
        ));
        let t = core.coordinator().transfers().values().next().unwrap();
        assert!(t.verification_requested);
        assert_eq!(t.phase, Phase::InFlight);

        let out = core.on_message(b, ask("mallory")).unwrap();
        assert!(matches!(
            &out[0],
            OutboundAction::SendMessage(_, Message::TellVerify { is_authorized: false, .. })
        ));
    }

    #[test]
    fn stall_recovery() {
        let config = CoreConfig {
            stall_timeout_ticks: 2,
            ..CoreConfig::default()
        };
        let mut core = core_with(files(), config);
        let a = connect(&mut core, "10.0.0.1");
        let b = connect(&mut core, "10.0.0.2");
        register(&mut core, a, "a", 1);
        register(&mut core, b, "b", 2);
        core.on_message(a, Message::Request { url: URL.into(), range: range(0, 4) })
            .unwrap();
        core.on_message(b, Message::Provide { url: URL.into(), range: range(0, 4) })
            .unwrap();
        let first_id = core.coordinator().transfers().keys().next().unwrap().clone();
        let first_tick = core.coordinator().transfers()[&first_id].created_tick;

        assert!(core.tick().is_empty());
        assert!(core.tick().is_empty());
        // third tick: stalled, failed silently, then re-paired by the periodic pass
        let out = core.tick();
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], OutboundAction::SendMessage(to, Message::Transfer { .. }) if *to == a));
        let t = &core.coordinator().transfers()[&first_id];
        assert!(t.created_tick > first_tick);
        assert_eq!(core.peer(a).unwrap().transfers.len(), 1);
        assert_eq!(core.peer(b).unwrap().transfers.len(), 1);
    }

    #[test]
    fn stalled_transfer_reverts_to_requested_without_provider() {
        let config = CoreConfig {
            stall_timeout_ticks: 0,
            ..CoreConfig::default()
        };
        let mut core = core_with(files(), config);
        let a = connect(&mut core, "10.0.0.1");
        let b = connect(&mut core, "10.0.0.2");
        register(&mut core, a, "a", 1);
        register(&mut core, b, "b", 2);
        core.on_message(a, Message::Request { url: URL.into(), range: range(0, 4) })
            .unwrap();
        core.on_message(b, Message::Provide { url: URL.into(), range: range(0, 4) })
            .unwrap();
        assert_eq!(core.coordinator().transfers().len(), 1);
        core.on_message(b, Message::Unprovide { url: URL.into(), range: range(0, 4) })
            .unwrap();
        core.tick();
        assert!(core.coordinator().transfers().is_empty());
        assert_eq!(core.peer(a).unwrap().chunks.state(URL, 0), ChunkState::Requested);
        assert!(core.peer(b).unwrap().transfers.is_empty());
    }

    #[test]
    fn disconnect_fails_transfers_and_repairs() {
        let mut core = core();
        let a = connect(&mut core, "10.0.0.1");
        let b = connect(&mut core, "10.0.0.2");
        let c = connect(&mut core, "10.0.0.3");
        for (conn, id) in [(a, "a"), (b, "b"), (c, "c")] {
            register(&mut core, conn, id, 7000);
        }
        core.on_message(a, Message::Request { url: URL.into(), range: range(0, 4) })
            .unwrap();
        core.on_message(b, Message::Provide { url: URL.into(), range: range(0, 4) })
            .unwrap();
        core.on_message(c, Message::Provide { url: URL.into(), range: range(0, 4) })
            .unwrap();
        let giver = core.coordinator().transfers().values().next().unwrap().giver;
        assert_eq!(giver, b);

        let out = core.on_disconnect(b);
        // a's chunk is re-requested and paired with c
        assert_eq!(out.len(), 1);
        let t = core.coordinator().transfers().values().next().unwrap();
        assert_eq!((t.taker, t.giver), (a, c));
        assert_eq!(core.connection_count(), 2);
    }

    #[test]
    fn admission_ceiling_across_many_peers() {
        let data: Vec<u8> = (0..200u8).collect();
        let files = Arc::new(MemoryFiles::new(CHUNK).with_file(URL, data));
        let mut core = core_with(files, CoreConfig::default());
        let mut conns = Vec::new();
        for i in 0..6 {
            let conn = connect(&mut core, &format!("10.0.1.{i}"));
            register(&mut core, conn, &format!("p{i}"), 7000);
            conns.push(conn);
        }
        // p0 seeds everything; the rest want everything
        core.on_message(conns[0], Message::Provide { url: URL.into(), range: range(0, 200) })
            .unwrap();
        for &conn in &conns[1..] {
            core.on_message(conn, Message::Request { url: URL.into(), range: range(0, 200) })
                .unwrap();
        }
        for _ in 0..3 {
            core.tick();
        }
        for &conn in &conns {
            let p = core.peer(conn).unwrap();
            assert!(p.count_role(Role::Taker) <= MAX_TRANSFERS_PER_ROLE);
            assert!(p.count_role(Role::Giver) <= MAX_TRANSFERS_PER_ROLE);
        }
        assert_eq!(
            core.peer(conns[0]).unwrap().count_role(Role::Giver),
            MAX_TRANSFERS_PER_ROLE
        );
    }
}
