//! # Consistent-Hash Ring Set
//!
//! The overlay orders every member on `K` independent rings. A member's
//! position on ring `i` is `blake3(peer_id || i)` read as a 256-bit
//! big-endian unsigned integer; each ring is the set of known-live ids
//! sorted by that position, with wraparound.
//!
//! Ring adjacency is load-bearing: the immediate predecessor of a peer on a
//! ring is the only member with the authority to accuse it there, and the
//! local node's ring neighbors are its gossip partners and monitoring
//! targets. Because positions are hashes, the rings give each member K
//! independent, unpredictable neighbor sets.
//!
//! Distances are forward arc lengths: `distance(a, pivot) = pivot - a
//! (mod 2^256)`. Of two accusers, the one with the shorter forward distance
//! to the accused outranks the other.

use crate::identity::PeerId;

/// A member's position on one ring, compared as a 256-bit big-endian integer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RingPosition([u8; 32]);

impl RingPosition {
    /// Position of `id` on ring `ring`: `blake3(id || ring_le)`.
    pub fn of(id: &PeerId, ring: u32) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(id.as_bytes());
        hasher.update(&ring.to_le_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Forward arc length from `self` to `to`: `to - self (mod 2^256)`.
    pub fn forward_distance_to(&self, to: &RingPosition) -> [u8; 32] {
        let mut out = [0u8; 32];
        let mut borrow = 0u16;
        for i in (0..32).rev() {
            let lhs = to.0[i] as i32;
            let rhs = self.0[i] as i32 + borrow as i32;
            if lhs >= rhs {
                out[i] = (lhs - rhs) as u8;
                borrow = 0;
            } else {
                out[i] = (lhs + 256 - rhs) as u8;
                borrow = 1;
            }
        }
        out
    }
}

impl std::fmt::Debug for RingPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RingPosition({})", &hex::encode(self.0)[..16])
    }
}

/// True iff `a` outranks `b` as an accuser of `pivot` on `ring`:
/// shorter forward distance to the pivot wins.
pub fn is_higher_rank(a: &PeerId, b: &PeerId, pivot: &PeerId, ring: u32) -> bool {
    let pivot_pos = RingPosition::of(pivot, ring);
    let dist_a = RingPosition::of(a, ring).forward_distance_to(&pivot_pos);
    let dist_b = RingPosition::of(b, ring).forward_distance_to(&pivot_pos);
    dist_a < dist_b
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// The queried id is not on this ring.
    IdNotFound,
}

impl std::fmt::Display for RingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RingError::IdNotFound => write!(f, "ring id not found"),
        }
    }
}

impl std::error::Error for RingError {}

/// One ring: ids sorted by position, no duplicates.
#[derive(Debug, Clone)]
pub struct Ring {
    ring: u32,
    entries: Vec<(RingPosition, PeerId)>,
}

impl Ring {
    fn new(ring: u32) -> Self {
        Self {
            ring,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.search(id).is_ok()
    }

    pub fn ids(&self) -> impl Iterator<Item = &PeerId> {
        self.entries.iter().map(|(_, id)| id)
    }

    /// Insert `id` at its sorted position. Idempotent; returns the index the
    /// id occupies afterwards.
    pub fn insert(&mut self, id: PeerId) -> usize {
        let pos = RingPosition::of(&id, self.ring);
        match self.entries.binary_search_by(|(p, _)| p.cmp(&pos)) {
            Ok(idx) => idx,
            Err(idx) => {
                self.entries.insert(idx, (pos, id));
                idx
            }
        }
    }

    pub fn remove(&mut self, id: &PeerId) -> Result<(), RingError> {
        let idx = self.search(id)?;
        self.entries.remove(idx);
        Ok(())
    }

    /// Binary-search for `id`; `Err(IdNotFound)` if absent.
    pub fn search(&self, id: &PeerId) -> Result<usize, RingError> {
        let pos = RingPosition::of(id, self.ring);
        self.entries
            .binary_search_by(|(p, _)| p.cmp(&pos))
            .map_err(|_| RingError::IdNotFound)
    }

    /// Next id after `id` in position order, wrapping around. A ring holding
    /// only `id` returns `id` itself.
    pub fn successor(&self, id: &PeerId) -> Result<PeerId, RingError> {
        let idx = self.search(id)?;
        let next = (idx + 1) % self.entries.len();
        Ok(self.entries[next].1)
    }

    /// Previous id before `id` in position order, wrapping around.
    pub fn predecessor(&self, id: &PeerId) -> Result<PeerId, RingError> {
        let idx = self.search(id)?;
        let prev = (idx + self.entries.len() - 1) % self.entries.len();
        Ok(self.entries[prev].1)
    }

    /// True iff `candidate` is the immediate predecessor of `target`.
    pub fn is_predecessor(&self, candidate: &PeerId, target: &PeerId) -> bool {
        matches!(self.predecessor(target), Ok(p) if p == *candidate)
    }

    /// The would-be predecessor and successor of `id`, whether or not `id`
    /// is currently on the ring. `None` entries mean the ring holds nothing
    /// besides (possibly) `id` itself.
    pub fn neighbors_of(&self, id: &PeerId) -> (Option<PeerId>, Option<PeerId>) {
        if let Ok(idx) = self.search(id) {
            if self.entries.len() < 2 {
                return (None, None);
            }
            let prev = (idx + self.entries.len() - 1) % self.entries.len();
            let next = (idx + 1) % self.entries.len();
            return (Some(self.entries[prev].1), Some(self.entries[next].1));
        }

        if self.entries.is_empty() {
            return (None, None);
        }
        let pos = RingPosition::of(id, self.ring);
        let idx = self.entries.partition_point(|(p, _)| *p < pos);
        let prev = (idx + self.entries.len() - 1) % self.entries.len();
        let next = idx % self.entries.len();
        (Some(self.entries[prev].1), Some(self.entries[next].1))
    }

    /// Whether `of` would be adjacent to `candidate` if `candidate` were (or
    /// is) on this ring. Admission test for gossip exchanges.
    pub fn would_neighbor(&self, candidate: &PeerId, of: &PeerId) -> bool {
        let (prev, next) = self.neighbors_of(candidate);
        prev == Some(*of) || next == Some(*of)
    }
}

/// K independent rings over the same id space.
#[derive(Debug, Clone)]
pub struct RingSet {
    rings: Vec<Ring>,
}

impl RingSet {
    pub fn new(num_rings: u32) -> Self {
        Self {
            rings: (0..num_rings).map(Ring::new).collect(),
        }
    }

    pub fn num_rings(&self) -> u32 {
        self.rings.len() as u32
    }

    pub fn ring(&self, idx: u32) -> Option<&Ring> {
        self.rings.get(idx as usize)
    }

    /// Place `id` on every ring its mask enables, removing it from rings the
    /// mask disables. Rings a peer opted out of are simply skipped.
    pub fn apply_mask(&mut self, id: &PeerId, mask: u64) {
        for (i, ring) in self.rings.iter_mut().enumerate() {
            if mask & (1u64 << i) != 0 {
                ring.insert(*id);
            } else {
                let _ = ring.remove(id);
            }
        }
    }

    /// Remove `id` from every ring (hard eviction).
    pub fn remove_all(&mut self, id: &PeerId) {
        for ring in &mut self.rings {
            let _ = ring.remove(id);
        }
    }

    pub fn is_predecessor(&self, candidate: &PeerId, target: &PeerId, ring: u32) -> bool {
        self.ring(ring)
            .map(|r| r.is_predecessor(candidate, target))
            .unwrap_or(false)
    }
}
