//! # Wire Protocol Messages
//!
//! Serializable types for the reliable (gossip) channel. Messages are
//! bincode-encoded with size limits to prevent memory exhaustion, and
//! framed on QUIC streams with a u32 big-endian length prefix.
//!
//! | Method | Request | Response |
//! |--------|---------|----------|
//! | Spread | [`GossipMsg`] | [`Partners`] |
//! | Dos | [`GossipMsg`] | [`Partners`] |
//! | Monitor | empty ping | empty pong |
//!
//! `Spread` is the normal exchange; `Dos` is the adversarial variant used
//! by the flooding protocol; `Monitor` is a placeholder reachability check
//! over the reliable channel.
//!
//! Certificates travel as raw DER (the receiver re-validates against the
//! CA); notes and accusations carry their own signatures and are
//! re-verified against the already-validated certificate keys.

use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::identity::{Accusation, Note};

/// Maximum size of a single application data payload in a gossip exchange.
/// Oversized entries are dropped individually (the Dos protocol produces
/// them on purpose); the rest of the batch continues merging.
pub const MAX_DATA_SIZE: usize = 64 * 1024;

/// Maximum serialized size of a whole gossip message.
pub const MAX_GOSSIP_MSG_SIZE: usize = 4 * 1024 * 1024;

/// Maximum buffer size for deserialization, slightly above the message cap
/// to allow for framing overhead.
pub const MAX_DESERIALIZE_SIZE: u64 = (MAX_GOSSIP_MSG_SIZE as u64) + 4096;

/// Returns bincode options with size limits enforced.
/// SECURITY: Always use this for deserialization of network input.
fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_DESERIALIZE_SIZE)
        .with_fixint_encoding()
}

/// Deserialize with size bounds enforced.
pub fn deserialize_bounded<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, bincode::Error> {
    bincode_options().deserialize(bytes)
}

pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(value)
}

/// A member certificate as it travels in gossip: raw DER.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireCertificate {
    pub der: Vec<u8>,
}

/// One application data entry: an opaque id and its current bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireData {
    pub id: Vec<u8>,
    pub content: Vec<u8>,
}

/// One gossip exchange payload: everything the sender knows, snapshotted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GossipMsg {
    pub certificates: Vec<WireCertificate>,
    pub notes: Vec<Note>,
    pub accusations: Vec<Accusation>,
    pub own_note: Option<Note>,
    pub data: Vec<WireData>,
}

impl GossipMsg {
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
            && self.notes.is_empty()
            && self.accusations.is_empty()
            && self.own_note.is_none()
            && self.data.is_empty()
    }
}

/// Reply to a gossip exchange: certificates the responder believes the
/// caller should know. Populated when the responder computed the caller as
/// a non-neighbor (bootstrap aid); empty otherwise.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Partners {
    pub certificates: Vec<WireCertificate>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum GossipRequest {
    /// Normal gossip exchange.
    Spread(GossipMsg),
    /// Adversarial flooding variant; merged like Spread, the attack is the
    /// sender's volume.
    Dos(GossipMsg),
    /// Placeholder reachability check; empty payload.
    Monitor,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum GossipResponse {
    Partners(Partners),
    Pong,
    Error { message: String },
}
