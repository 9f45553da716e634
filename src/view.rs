//! # Membership View
//!
//! The view is the node's structured picture of the overlay:
//!
//! - **view map** - every peer a valid certificate has ever been observed
//!   for; entries leave only at hard eviction
//! - **live map** - the subset currently believed reachable (has a note, no
//!   outstanding accusation)
//! - **ring set** - K consistent-hash orderings of the live-or-accused ids,
//!   driving neighbor selection and accusation authority
//! - **timeout map** - accused peers awaiting rebuttal or eviction
//!
//! All four are guarded by a single read-write lock: readers (gossip
//! snapshot, neighbor queries) take the read side, mutators (evidence
//! merges, eviction) take the write side. The lock is never held across
//! network I/O, so merges are linearizable without blocking the schedulers.
//!
//! ## Evidence Algebra
//!
//! [`View::apply_note`], [`View::apply_accusation`] and
//! [`View::apply_certificate`] implement the acceptance rules:
//!
//! - a note is accepted if it verifies and strictly advances the stored
//!   epoch; a note newer than an outstanding accusation rebuts it
//! - an accusation is accepted if it verifies, is not dominated by a newer
//!   note, comes from the highest-ranked accuser seen for that (peer, ring),
//!   and its accuser is the accused's immediate ring predecessor in *our*
//!   view (forged accusations from non-authoritative peers drop here)
//! - a certificate admits an unknown peer into the view; liveness waits for
//!   a signed note
//!
//! A rejected record only ever drops itself - the remainder of a gossip
//! batch continues merging.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use ed25519_dalek::VerifyingKey;
use tracing::{debug, info, warn};

use crate::crypto::CertificateInfo;
use crate::identity::{full_mask, Accusation, Note, PeerId};
use crate::peer::Peer;
use crate::rings::{is_higher_rank, RingSet};

/// Why an incoming record was dropped. Logged, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The subject id has no certificate in our view yet.
    UnknownPeer,
    /// The accuser id has no certificate in our view yet.
    UnknownAccuser,
    /// The record concerns the local node and is handled elsewhere.
    OwnRecord,
    /// A stored record already dominates this epoch.
    StaleEpoch,
    /// An accusation from a higher-ranked accuser is already stored.
    LowerRank,
    /// Signature verification failed.
    InvalidSignature,
    /// Ring index out of range for this overlay.
    InvalidRing,
    /// The claimed accuser is not the accused's ring predecessor in our view.
    NotPredecessor,
    /// Identical evidence already stored.
    AlreadyKnown,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::UnknownPeer => write!(f, "no certificate for subject"),
            DropReason::UnknownAccuser => write!(f, "no certificate for accuser"),
            DropReason::OwnRecord => write!(f, "record concerns the local node"),
            DropReason::StaleEpoch => write!(f, "dominated by a stored epoch"),
            DropReason::LowerRank => write!(f, "higher-ranked accuser already stored"),
            DropReason::InvalidSignature => write!(f, "invalid signature"),
            DropReason::InvalidRing => write!(f, "ring index out of range"),
            DropReason::NotPredecessor => write!(f, "accuser is not the ring predecessor"),
            DropReason::AlreadyKnown => write!(f, "already stored"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteOutcome {
    /// Note stored; peer is (or became) live.
    Accepted,
    /// Note stored and it cleared every outstanding accusation.
    Rebuttal,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccusationOutcome {
    /// The accusation names the local node; the caller must bump its epoch
    /// and gossip a rebuttal. Nothing was recorded.
    SelfAccused,
    /// Accusation recorded; the accused left the live set.
    Recorded,
    Dropped(DropReason),
}

/// Pending eviction entry for an accused peer.
#[derive(Debug, Clone)]
pub struct TimeoutEntry {
    pub since: Instant,
    pub last_note: Option<Note>,
    /// Gossip address of the accused, kept for eviction logging.
    pub addr: String,
}

struct ViewInner {
    peers: HashMap<PeerId, Arc<Peer>>,
    live: HashMap<PeerId, Arc<Peer>>,
    rings: RingSet,
    timeouts: HashMap<PeerId, TimeoutEntry>,
}

pub struct View {
    local_id: PeerId,
    /// The local node's own key: it never appears in the peer maps, but its
    /// self-signed accusations must still verify.
    local_key: VerifyingKey,
    num_rings: u32,
    inner: RwLock<ViewInner>,
}

impl View {
    pub fn new(local_id: PeerId, num_rings: u32, local_key: VerifyingKey) -> Self {
        let mut rings = RingSet::new(num_rings);
        rings.apply_mask(&local_id, full_mask(num_rings));
        Self {
            local_id,
            local_key,
            num_rings,
            inner: RwLock::new(ViewInner {
                peers: HashMap::new(),
                live: HashMap::new(),
                rings,
                timeouts: HashMap::new(),
            }),
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn num_rings(&self) -> u32 {
        self.num_rings
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ViewInner> {
        self.inner.read().expect("view lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ViewInner> {
        self.inner.write().expect("view lock poisoned")
    }

    // ========================================================================
    // Evidence algebra
    // ========================================================================

    /// Merge a certificate. Returns true when a previously unknown peer was
    /// admitted into the view (not the live set - liveness awaits a note).
    pub fn apply_certificate(&self, info: &CertificateInfo) -> bool {
        if info.id == self.local_id {
            return false;
        }
        if info.ring_count != self.num_rings {
            warn!(
                peer = %info.id,
                cert_rings = info.ring_count,
                our_rings = self.num_rings,
                "dropping certificate with mismatched ring count"
            );
            return false;
        }

        let mut inner = self.write();
        if inner.peers.contains_key(&info.id) {
            return false;
        }
        debug!(peer = %info.id, addr = %info.gossip_addr, "admitted peer into view");
        inner
            .peers
            .insert(info.id, Arc::new(Peer::from_certificate(info)));
        true
    }

    /// Merge a note per the acceptance rules.
    pub fn apply_note(&self, note: &Note) -> NoteOutcome {
        if note.peer_id == self.local_id {
            return NoteOutcome::Dropped(DropReason::OwnRecord);
        }

        let mut inner = self.write();
        let peer = match inner.peers.get(&note.peer_id) {
            Some(p) => p.clone(),
            None => return NoteOutcome::Dropped(DropReason::UnknownPeer),
        };

        if note.verify(peer.verifying_key()).is_err() {
            debug!(peer = %note.peer_id, "invalid signature on note, ignoring");
            return NoteOutcome::Dropped(DropReason::InvalidSignature);
        }

        if !peer.is_accused() {
            // Not accused: only recency matters.
            match peer.note_epoch() {
                Some(stored) if stored >= note.epoch => {
                    NoteOutcome::Dropped(DropReason::StaleEpoch)
                }
                _ => {
                    peer.set_note(note.clone());
                    Self::mark_live(&mut inner, &peer);
                    NoteOutcome::Accepted
                }
            }
        } else {
            // Accused: a strictly newer note invalidates dominated
            // accusations; clearing the last one is the rebuttal.
            let newer_than_stored = peer.note_epoch().map(|e| e < note.epoch).unwrap_or(true);
            let fully_cleared = peer.clear_dominated_accusations(note.epoch);
            if newer_than_stored {
                peer.set_note(note.clone());
            }
            if fully_cleared {
                info!(peer = %note.peer_id, epoch = note.epoch, "rebuttal received");
                inner.timeouts.remove(&note.peer_id);
                Self::mark_live(&mut inner, &peer);
                NoteOutcome::Rebuttal
            } else if newer_than_stored {
                NoteOutcome::Accepted
            } else {
                NoteOutcome::Dropped(DropReason::StaleEpoch)
            }
        }
    }

    /// Merge an accusation per the acceptance rules.
    pub fn apply_accusation(&self, accusation: &Accusation) -> AccusationOutcome {
        if accusation.accused == self.local_id {
            return AccusationOutcome::SelfAccused;
        }
        if accusation.ring >= self.num_rings {
            return AccusationOutcome::Dropped(DropReason::InvalidRing);
        }

        let mut inner = self.write();
        let accused = match inner.peers.get(&accusation.accused) {
            Some(p) => p.clone(),
            None => return AccusationOutcome::Dropped(DropReason::UnknownPeer),
        };

        // A note newer than the accusation makes it stale on arrival.
        if let Some(epoch) = accused.note_epoch() {
            if epoch > accusation.epoch {
                return AccusationOutcome::Dropped(DropReason::StaleEpoch);
            }
        }

        // The local node holds accusation authority too but never sits in
        // its own peer map; its accusations verify against the local key.
        let accuser_key = if accusation.accuser == self.local_id {
            self.local_key
        } else {
            match inner.peers.get(&accusation.accuser) {
                Some(p) => *p.verifying_key(),
                None => return AccusationOutcome::Dropped(DropReason::UnknownAccuser),
            }
        };

        if let Some(stored) = accused.accusation(accusation.ring) {
            if stored.accuser == accusation.accuser {
                if stored.epoch >= accusation.epoch {
                    return AccusationOutcome::Dropped(DropReason::AlreadyKnown);
                }
            } else if !is_higher_rank(
                &accusation.accuser,
                &stored.accuser,
                &accusation.accused,
                accusation.ring,
            ) {
                debug!(
                    accused = %accusation.accused,
                    ring = accusation.ring,
                    "already have accusation from higher ranked accuser, discarding"
                );
                return AccusationOutcome::Dropped(DropReason::LowerRank);
            }
        }

        if accusation.verify(&accuser_key).is_err() {
            debug!(accused = %accusation.accused, "invalid signature on accusation, ignoring");
            return AccusationOutcome::Dropped(DropReason::InvalidSignature);
        }

        if !inner
            .rings
            .is_predecessor(&accusation.accuser, &accusation.accused, accusation.ring)
        {
            debug!(
                accused = %accusation.accused,
                accuser = %accusation.accuser,
                ring = accusation.ring,
                "accuser is not predecessor of accused, invalid accusation"
            );
            return AccusationOutcome::Dropped(DropReason::NotPredecessor);
        }

        accused.set_accusation(accusation.clone());
        inner.live.remove(&accusation.accused);
        if !inner.timeouts.contains_key(&accusation.accused) {
            debug!(accused = %accusation.accused, ring = accusation.ring, "started eviction timer");
            inner.timeouts.insert(
                accusation.accused,
                TimeoutEntry {
                    since: Instant::now(),
                    last_note: accused.note(),
                    addr: accused.gossip_addr().to_string(),
                },
            );
        }
        AccusationOutcome::Recorded
    }

    fn mark_live(inner: &mut ViewInner, peer: &Arc<Peer>) {
        let mask = peer
            .note()
            .map(|n| n.mask)
            .unwrap_or_else(|| full_mask(inner.rings.num_rings()));
        inner.live.insert(peer.id(), peer.clone());
        inner.rings.apply_mask(&peer.id(), mask);
    }

    // ========================================================================
    // Membership maintenance
    // ========================================================================

    /// Promote an already-admitted peer to the live set. Bootstrap seeds are
    /// trusted live until evidence says otherwise.
    pub fn add_live_peer(&self, id: &PeerId) -> bool {
        let mut inner = self.write();
        match inner.peers.get(id) {
            Some(peer) => {
                let peer = peer.clone();
                Self::mark_live(&mut inner, &peer);
                true
            }
            None => false,
        }
    }

    pub fn remove_live_peer(&self, id: &PeerId) {
        self.write().live.remove(id);
    }

    /// Sweep expired timeout entries: accused peers past `removal_timeout`
    /// are evicted from the rings and the view. Returns the evicted ids.
    pub fn sweep_timeouts(&self, removal_timeout: Duration) -> Vec<PeerId> {
        let mut inner = self.write();
        let expired: Vec<PeerId> = inner
            .timeouts
            .iter()
            .filter(|(_, entry)| entry.since.elapsed() >= removal_timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            let entry = inner.timeouts.remove(id);
            inner.live.remove(id);
            inner.rings.remove_all(id);
            inner.peers.remove(id);
            info!(
                peer = %id,
                addr = entry.map(|e| e.addr).unwrap_or_default(),
                "evicted unresponsive peer"
            );
        }
        expired
    }

    pub fn timeout_exists(&self, id: &PeerId) -> bool {
        self.read().timeouts.contains_key(id)
    }

    /// Reflect a changed local mask on the rings.
    pub fn apply_local_mask(&self, mask: u64) {
        self.write().rings.apply_mask(&self.local_id, mask);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_peer(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.read().peers.get(id).cloned()
    }

    pub fn is_live(&self, id: &PeerId) -> bool {
        self.read().live.contains_key(id)
    }

    pub fn view_count(&self) -> usize {
        self.read().peers.len()
    }

    pub fn live_count(&self) -> usize {
        self.read().live.len()
    }

    pub fn live_peers(&self) -> Vec<Arc<Peer>> {
        self.read().live.values().cloned().collect()
    }

    /// Gossip addresses of the live set.
    pub fn live_gossip_addrs(&self) -> Vec<String> {
        self.read()
            .live
            .values()
            .map(|p| p.gossip_addr().to_string())
            .collect()
    }

    /// The local node's current neighbor set: union over enabled rings of
    /// its predecessor and successor, resolved to live peers.
    pub fn neighbors(&self, local_mask: u64) -> Vec<Arc<Peer>> {
        let inner = self.read();
        let mut out: HashMap<PeerId, Arc<Peer>> = HashMap::new();
        for i in 0..self.num_rings {
            if local_mask & (1u64 << i) == 0 {
                continue;
            }
            let Some(ring) = inner.rings.ring(i) else {
                continue;
            };
            for neighbor in [
                ring.successor(&self.local_id).ok(),
                ring.predecessor(&self.local_id).ok(),
            ]
            .into_iter()
            .flatten()
            {
                if neighbor == self.local_id {
                    continue;
                }
                if let Some(peer) = inner.live.get(&neighbor) {
                    out.insert(neighbor, peer.clone());
                }
            }
        }
        out.into_values().collect()
    }

    /// The local node's monitoring targets: per enabled ring, the immediate
    /// successor (the peer whose predecessor we are, and therefore the peer
    /// we hold accusation authority over), tagged with the ring index.
    pub fn monitor_targets(&self, local_mask: u64) -> Vec<(u32, Arc<Peer>)> {
        let inner = self.read();
        let mut out = Vec::new();
        for i in 0..self.num_rings {
            if local_mask & (1u64 << i) == 0 {
                continue;
            }
            let Some(ring) = inner.rings.ring(i) else {
                continue;
            };
            if let Ok(succ) = ring.successor(&self.local_id) {
                if succ != self.local_id {
                    if let Some(peer) = inner.live.get(&succ) {
                        out.push((i, peer.clone()));
                    }
                }
            }
        }
        out
    }

    /// Admission test for gossip: is `id` a predecessor or successor of the
    /// local node on at least one enabled ring (counting its would-be
    /// position if it is not placed yet)?
    pub fn should_be_neighbor(&self, id: &PeerId, local_mask: u64) -> bool {
        if *id == self.local_id {
            return false;
        }
        let inner = self.read();
        for i in 0..self.num_rings {
            if local_mask & (1u64 << i) == 0 {
                continue;
            }
            if let Some(ring) = inner.rings.ring(i) {
                if ring.would_neighbor(id, &self.local_id) {
                    return true;
                }
            }
        }
        false
    }

    /// For a non-neighbor caller: the live peers our view computes as its
    /// neighbors, so their certificates can be returned to help it converge.
    pub fn find_neighbors(&self, id: &PeerId) -> Vec<Arc<Peer>> {
        let inner = self.read();
        let mut out: HashMap<PeerId, Arc<Peer>> = HashMap::new();
        for i in 0..self.num_rings {
            let Some(ring) = inner.rings.ring(i) else {
                continue;
            };
            let (prev, next) = ring.neighbors_of(id);
            for neighbor in [prev, next].into_iter().flatten() {
                if neighbor == *id {
                    continue;
                }
                if let Some(peer) = inner.live.get(&neighbor) {
                    out.insert(neighbor, peer.clone());
                }
            }
        }
        out.into_values().collect()
    }

    /// Snapshot every peer's (certificate, note, accusations) for gossip.
    pub fn snapshot(&self) -> Vec<(Vec<u8>, Option<Note>, Vec<Accusation>)> {
        self.read()
            .peers
            .values()
            .map(|p| (p.cert_der().to_vec(), p.note(), p.accusations()))
            .collect()
    }

    #[cfg(test)]
    fn ring_contains(&self, ring: u32, id: &PeerId) -> bool {
        self.read()
            .rings
            .ring(ring)
            .map(|r| r.contains(id))
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub(crate) fn is_predecessor(&self, candidate: &PeerId, target: &PeerId, ring: u32) -> bool {
        self.read().rings.is_predecessor(candidate, target, ring)
    }
}
