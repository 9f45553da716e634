//! # Identity and Membership Evidence
//!
//! This module defines the core identity types used throughout Firemesh:
//!
//! - [`Keypair`]: Ed25519 signing keypair (secret + public key)
//! - [`PeerId`]: 32-byte stable identifier assigned by the CA (the
//!   certificate's SubjectKeyId)
//! - [`Note`]: a signed, epoch-stamped self-assertion of participation
//! - [`Accusation`]: a signed claim by a ring predecessor that a peer is
//!   unreachable
//!
//! ## Identity Model
//!
//! Unlike self-certifying overlays, Firemesh identities are issued: a trusted
//! CA signs each member's certificate and embeds the peer id in its
//! SubjectKeyId. The id is opaque; equality is byte equality. Ring positions
//! are derived from it per ring, never from the public key directly.
//!
//! ## Canonical Signature Payloads
//!
//! Notes and accusations are signed over fixed-width, domain-separated byte
//! layouts so that signing and verification agree across implementations and
//! runs:
//!
//! ```text
//! note       = "firemesh-note-v1:"       || peer_id(32) || epoch(u64 LE) || mask(u64 LE)
//! accusation = "firemesh-accusation-v1:" || accused(32) || accuser(32) || epoch(u64 LE) || ring(u32 LE)
//! ```
//!
//! The domain prefix is added by the crypto layer; `build_signed_payload()`
//! on each record produces the part after the prefix.
//!
//! ## Epoch and Mask
//!
//! The epoch is a per-peer monotone counter establishing note recency; a
//! strictly newer note dominates. The mask is a bitvector over rings (bit i =
//! the peer claims participation on ring i); ring counts above 64 are
//! rejected at certificate issuance.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::crypto::{
    sign_with_domain, verify_with_domain, SignatureError, ACCUSATION_SIGNATURE_DOMAIN,
    NOTE_SIGNATURE_DOMAIN,
};

/// Widest ring set expressible by the u64 participation mask.
pub const MAX_RINGS: u32 = 64;

/// A mask with the low `num_rings` bits set (participation on every ring).
#[inline]
pub fn full_mask(num_rings: u32) -> u64 {
    debug_assert!(num_rings <= MAX_RINGS);
    if num_rings >= MAX_RINGS {
        u64::MAX
    } else {
        (1u64 << num_rings) - 1
    }
}

#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    pub fn from_secret_key_bytes(bytes: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        Self { signing_key }
    }

    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.signing_key
            .verifying_key()
            .verify(message, signature)
            .is_ok()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}

/// Stable peer identifier: the 32-byte SubjectKeyId the CA wrote into the
/// member's certificate. Opaque; compared byte-for-byte.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    #[inline]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", &self.to_hex()[..16])
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for PeerId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A signed self-assertion of participation.
///
/// The freshest note (greatest epoch) wins; a note strictly newer than an
/// outstanding accusation rebuts it. The mask disables rings the peer has
/// self-excluded from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Note {
    pub peer_id: PeerId,
    pub epoch: u64,
    pub mask: u64,
    /// Ed25519 signature over the domain-prefixed canonical payload.
    pub signature: Vec<u8>,
}

impl Note {
    /// Create and sign a note with the peer's own key.
    pub fn sign(keypair: &Keypair, peer_id: PeerId, epoch: u64, mask: u64) -> Self {
        let payload = Self::build_signed_payload(&peer_id, epoch, mask);
        let signature = sign_with_domain(keypair, NOTE_SIGNATURE_DOMAIN, &payload);
        Self {
            peer_id,
            epoch,
            mask,
            signature,
        }
    }

    /// Canonical payload: `peer_id(32) || epoch(u64 LE) || mask(u64 LE)`.
    /// Fixed width, so same inputs produce byte-equal output across runs.
    pub fn build_signed_payload(peer_id: &PeerId, epoch: u64, mask: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(32 + 8 + 8);
        data.extend_from_slice(peer_id.as_bytes());
        data.extend_from_slice(&epoch.to_le_bytes());
        data.extend_from_slice(&mask.to_le_bytes());
        data
    }

    /// Verify the signature against the claimed peer's public key.
    pub fn verify(&self, key: &VerifyingKey) -> Result<(), SignatureError> {
        let payload = Self::build_signed_payload(&self.peer_id, self.epoch, self.mask);
        verify_with_domain(key, NOTE_SIGNATURE_DOMAIN, &payload, &self.signature)
    }

    /// Whether the peer claims participation on `ring`.
    #[inline]
    pub fn enabled_on(&self, ring: u32) -> bool {
        ring < MAX_RINGS && self.mask & (1u64 << ring) != 0
    }
}

/// A signed claim that `accused` is unreachable, made by its immediate
/// predecessor on `ring`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Accusation {
    pub accused: PeerId,
    pub accuser: PeerId,
    pub epoch: u64,
    pub ring: u32,
    /// Ed25519 signature over the domain-prefixed canonical payload.
    pub signature: Vec<u8>,
}

impl Accusation {
    /// Create and sign an accusation with the accuser's key.
    pub fn sign(
        keypair: &Keypair,
        accused: PeerId,
        accuser: PeerId,
        epoch: u64,
        ring: u32,
    ) -> Self {
        let payload = Self::build_signed_payload(&accused, &accuser, epoch, ring);
        let signature = sign_with_domain(keypair, ACCUSATION_SIGNATURE_DOMAIN, &payload);
        Self {
            accused,
            accuser,
            epoch,
            ring,
            signature,
        }
    }

    /// Canonical payload:
    /// `accused(32) || accuser(32) || epoch(u64 LE) || ring(u32 LE)`.
    pub fn build_signed_payload(
        accused: &PeerId,
        accuser: &PeerId,
        epoch: u64,
        ring: u32,
    ) -> Vec<u8> {
        let mut data = Vec::with_capacity(32 + 32 + 8 + 4);
        data.extend_from_slice(accused.as_bytes());
        data.extend_from_slice(accuser.as_bytes());
        data.extend_from_slice(&epoch.to_le_bytes());
        data.extend_from_slice(&ring.to_le_bytes());
        data
    }

    /// Verify the signature against the accuser's public key.
    pub fn verify(&self, accuser_key: &VerifyingKey) -> Result<(), SignatureError> {
        let payload =
            Self::build_signed_payload(&self.accused, &self.accuser, self.epoch, self.ring);
        verify_with_domain(
            accuser_key,
            ACCUSATION_SIGNATURE_DOMAIN,
            &payload,
            &self.signature,
        )
    }
}
