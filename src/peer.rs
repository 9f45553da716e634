//! Per-remote-participant record.
//!
//! A [`Peer`] is created when a valid certificate for a previously unknown id
//! is observed, and destroyed only at hard eviction. The membership maps and
//! rings hold `Arc<Peer>` handles keyed by id; evidence (the current best
//! note, at most one accusation per ring) lives behind the peer's own locks
//! so that evidence updates do not contend with view-wide queries.

use std::sync::RwLock;

use ed25519_dalek::VerifyingKey;

use crate::crypto::CertificateInfo;
use crate::identity::{Accusation, Note, PeerId};

pub struct Peer {
    id: PeerId,
    verifying_key: VerifyingKey,
    cert_der: Vec<u8>,
    gossip_addr: String,
    ping_addr: String,
    note: RwLock<Option<Note>>,
    /// Slot per ring; invariant: `accusations[r]` is only ever an accusation
    /// with `ring == r` and `accused == self.id`.
    accusations: RwLock<Vec<Option<Accusation>>>,
}

impl Peer {
    pub fn from_certificate(info: &CertificateInfo) -> Self {
        Self {
            id: info.id,
            verifying_key: info.verifying_key,
            cert_der: info.der.clone(),
            gossip_addr: info.gossip_addr.clone(),
            ping_addr: info.ping_addr.clone(),
            note: RwLock::new(None),
            accusations: RwLock::new(vec![None; info.ring_count as usize]),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    pub fn cert_der(&self) -> &[u8] {
        &self.cert_der
    }

    pub fn gossip_addr(&self) -> &str {
        &self.gossip_addr
    }

    pub fn ping_addr(&self) -> &str {
        &self.ping_addr
    }

    pub fn note(&self) -> Option<Note> {
        self.note.read().expect("peer note lock poisoned").clone()
    }

    pub fn note_epoch(&self) -> Option<u64> {
        self.note
            .read()
            .expect("peer note lock poisoned")
            .as_ref()
            .map(|n| n.epoch)
    }

    pub fn set_note(&self, note: Note) {
        *self.note.write().expect("peer note lock poisoned") = Some(note);
    }

    pub fn accusation(&self, ring: u32) -> Option<Accusation> {
        self.accusations
            .read()
            .expect("peer accusation lock poisoned")
            .get(ring as usize)
            .and_then(|slot| slot.clone())
    }

    /// All outstanding accusations, in ring order.
    pub fn accusations(&self) -> Vec<Accusation> {
        self.accusations
            .read()
            .expect("peer accusation lock poisoned")
            .iter()
            .filter_map(|slot| slot.clone())
            .collect()
    }

    pub fn is_accused(&self) -> bool {
        self.accusations
            .read()
            .expect("peer accusation lock poisoned")
            .iter()
            .any(|slot| slot.is_some())
    }

    pub fn set_accusation(&self, accusation: Accusation) {
        let mut slots = self
            .accusations
            .write()
            .expect("peer accusation lock poisoned");
        let ring = accusation.ring as usize;
        if ring < slots.len() {
            slots[ring] = Some(accusation);
        }
    }

    /// Drop every accusation dominated by a note at `epoch` (strictly newer
    /// note wins). Returns true when no accusation remains.
    pub fn clear_dominated_accusations(&self, epoch: u64) -> bool {
        let mut slots = self
            .accusations
            .write()
            .expect("peer accusation lock poisoned");
        for slot in slots.iter_mut() {
            if matches!(slot, Some(acc) if acc.epoch < epoch) {
                *slot = None;
            }
        }
        slots.iter().all(|slot| slot.is_none())
    }

}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("gossip_addr", &self.gossip_addr)
            .field("accused", &self.is_accused())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;

    fn make_peer(ring_count: u32) -> (Peer, Keypair) {
        let kp = Keypair::generate();
        let info = CertificateInfo {
            id: PeerId::from_bytes([7; 32]),
            verifying_key: kp.verifying_key(),
            gossip_addr: "127.0.0.1:4000".to_string(),
            ping_addr: "127.0.0.1:4001".to_string(),
            ring_count,
            der: vec![0xDE, 0xAD],
        };
        (Peer::from_certificate(&info), kp)
    }

    #[test]
    fn fresh_peer_has_no_evidence() {
        let (peer, _) = make_peer(4);
        assert!(peer.note().is_none());
        assert!(!peer.is_accused());
        assert!(peer.accusations().is_empty());
    }

    #[test]
    fn accusation_slots_are_per_ring() {
        let (peer, kp) = make_peer(4);
        let a1 = Accusation::sign(&kp, peer.id(), PeerId::from_bytes([1; 32]), 5, 1);
        let a3 = Accusation::sign(&kp, peer.id(), PeerId::from_bytes([2; 32]), 5, 3);

        peer.set_accusation(a1);
        peer.set_accusation(a3);

        assert!(peer.accusation(0).is_none());
        assert!(peer.accusation(1).is_some());
        assert!(peer.accusation(3).is_some());
        assert_eq!(peer.accusations().len(), 2);
    }

    #[test]
    fn out_of_range_ring_ignored() {
        let (peer, kp) = make_peer(2);
        peer.set_accusation(Accusation::sign(&kp, peer.id(), peer.id(), 1, 9));
        assert!(!peer.is_accused());
    }

    #[test]
    fn newer_note_epoch_clears_dominated_accusations() {
        let (peer, kp) = make_peer(3);
        peer.set_accusation(Accusation::sign(&kp, peer.id(), peer.id(), 5, 0));
        peer.set_accusation(Accusation::sign(&kp, peer.id(), peer.id(), 8, 2));

        // Epoch 6 dominates the ring-0 accusation only.
        assert!(!peer.clear_dominated_accusations(6));
        assert!(peer.accusation(0).is_none());
        assert!(peer.accusation(2).is_some());

        // Epoch 9 clears the rest.
        assert!(peer.clear_dominated_accusations(9));
        assert!(!peer.is_accused());
    }
}
