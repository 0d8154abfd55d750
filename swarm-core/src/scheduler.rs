//! Matchmaking scheduler: pair peers wanting a chunk with peers offering it, under per-role
//! concurrency ceilings, until no dirty peer is left.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::coordinator::{Coordinator, Pairing};
use crate::peer::{ConnectionId, PeerRecord};

/// Concurrent transfers a peer may have as taker, and separately as giver.
pub const MAX_TRANSFERS_PER_ROLE: usize = 5;

/// Providers collected for one chunk before picking a giver.
pub const MAX_CANDIDATES: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub max_transfers_per_role: usize,
    pub max_candidates: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_transfers_per_role: MAX_TRANSFERS_PER_ROLE,
            max_candidates: MAX_CANDIDATES,
        }
    }
}

/// Picks the giver for a download among peers that provide the chunk.
pub trait GiverSelector: Send {
    /// `candidates` is never empty. Returns an index into it.
    fn select(&mut self, taker: &PeerRecord, candidates: &[(ConnectionId, &PeerRecord)]) -> usize;
}

/// Uniformly random choice among candidates.
pub struct UniformSelector {
    rng: StdRng,
}

impl UniformSelector {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for UniformSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl GiverSelector for UniformSelector {
    fn select(&mut self, _taker: &PeerRecord, candidates: &[(ConnectionId, &PeerRecord)]) -> usize {
        self.rng.gen_range(0..candidates.len())
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    selector: Box<dyn GiverSelector>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, selector: Box<dyn GiverSelector>) -> Self {
        Self { config, selector }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Spawn transfers for dirty peers until a full pass leaves nobody dirty.
    /// Returns the number of transfers created.
    pub fn drain(&mut self, coord: &mut Coordinator) -> usize {
        let mut created = 0;
        loop {
            let batch = coord.take_dirty();
            if batch.is_empty() {
                break;
            }
            for conn in batch {
                created += self.spawn_for_peer(coord, conn);
            }
        }
        created
    }

    /// Fill a peer's free download slots, then its free upload slots.
    fn spawn_for_peer(&mut self, coord: &mut Coordinator, conn: ConnectionId) -> usize {
        let max = self.config.max_transfers_per_role;
        let mut created = 0;

        while coord.peer(conn).is_some_and(|p| p.wants_download(max)) {
            let Some(pairing) = self.find_download(coord.peers(), conn) else {
                break;
            };
            if !coord.begin_transfer(&pairing) {
                break;
            }
            created += 1;
        }

        while coord.peer(conn).is_some_and(|p| p.wants_upload(max)) {
            let Some(pairing) = self.find_upload(coord.peers(), conn) else {
                break;
            };
            if !coord.begin_transfer(&pairing) {
                break;
            }
            created += 1;
        }
        created
    }

    /// Giver for the taker's first requested chunk, chosen among up to `max_candidates`
    /// providers with spare upload slots.
    pub fn find_download(
        &mut self,
        peers: &BTreeMap<ConnectionId, PeerRecord>,
        taker: ConnectionId,
    ) -> Option<Pairing> {
        let me = peers.get(&taker)?;
        let (url, chunk) = me.chunks.high_priority_chunk()?;
        let max = self.config.max_transfers_per_role;

        let candidates: Vec<(ConnectionId, &PeerRecord)> = peers
            .iter()
            .filter(|&(&c, p)| c != taker && p.wants_upload(max) && p.chunks.is_provided(url, chunk))
            .take(self.config.max_candidates)
            .map(|(&c, p)| (c, p))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        // TODO: trust-weighted selector once TrustNode weights feed pairing.
        let pick = self.selector.select(me, &candidates).min(candidates.len() - 1);
        Some(Pairing {
            taker,
            giver: candidates[pick].0,
            url: url.to_string(),
            chunk,
        })
    }

    /// First peer with a free download slot whose first requested chunk the giver provides.
    pub fn find_upload(
        &self,
        peers: &BTreeMap<ConnectionId, PeerRecord>,
        giver: ConnectionId,
    ) -> Option<Pairing> {
        let me = peers.get(&giver)?;
        let max = self.config.max_transfers_per_role;
        peers
            .iter()
            .filter(|&(&c, p)| c != giver && p.wants_download(max))
            .find_map(|(&c, p)| {
                let (url, chunk) = p.chunks.high_priority_chunk()?;
                me.chunks.is_provided(url, chunk).then(|| Pairing {
                    taker: c,
                    giver,
                    url: url.to_string(),
                    chunk,
                })
            })
    }
}
