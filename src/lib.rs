//! # Firemesh - Byzantine-Tolerant Membership Overlay
//!
//! Firemesh implements a Fireflies-style group-membership and
//! failure-detection service: every participant maintains a probabilistic
//! view of the live set, monitors a small deterministic subset of peers,
//! and exchanges signed membership evidence over mutually authenticated
//! channels.
//!
//! ## Protocol Overview
//!
//! - **Identity**: a trusted CA issues each member a certificate carrying
//!   its Ed25519 key, a stable peer id (SubjectKeyId) and the overlay's
//!   ring count
//! - **Rings**: K independent consistent-hash orderings of the membership;
//!   ring adjacency decides who gossips with, monitors, and may accuse whom
//! - **Notes**: signed, epoch-stamped self-assertions of participation;
//!   the freshest note wins
//! - **Accusations**: signed failure reports, valid only from the accused's
//!   immediate ring predecessor; rebutted by a strictly newer note,
//!   otherwise the accused is evicted after a grace period
//! - **Gossip**: periodic exchange of (certificates, notes, accusations,
//!   application data) with a random sample of ring neighbors over
//!   mutual-TLS QUIC
//! - **Monitoring**: signed-challenge UDP probes of ring successors;
//!   persistent failure produces an accusation
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `node` | High-level API combining all components |
//! | `identity` | Keypairs, peer ids, signed notes and accusations |
//! | `crypto` | Certificate validation, mutual-TLS configs, signing helpers |
//! | `ca` | Certificate authority interface + in-process implementation |
//! | `rings` | K consistent-hash rings, rank and adjacency queries |
//! | `view` | Membership maps, evidence algebra, timeout eviction |
//! | `pinger` | Signed-challenge liveness probes (UDP) |
//! | `messages` | Wire types for the gossip channel |
//! | `rpc` | QUIC request/response, connection cache, gossip server |
//! | `protocol` | Pluggable behavior strategies (correct and adversarial) |
//! | `config` | Deployment configuration |
//!
//! ## Security Model
//!
//! - All gossip connections use mutual TLS; both certificates must chain to
//!   the shared CA
//! - Evidence is signed: notes by their subject, accusations by their
//!   accuser, ping replies by the probed peer
//! - Accusation authority is structural: only the ring predecessor's
//!   accusations are accepted, bounding what a byzantine member can evict
//! - A malformed record in a gossip batch drops alone; processing continues

mod ca;
mod config;
mod crypto;
mod identity;
mod messages;
mod node;
mod peer;
mod pinger;
mod protocol;
mod rings;
mod rpc;
mod view;

pub use ca::{CaBundle, CertificateAuthority, IssuedCertificate, LocalCa};
pub use config::Config;
pub use crypto::{validate_certificate, CertificateError, CertificateInfo, SignatureError};
pub use identity::{full_mask, Accusation, Keypair, Note, PeerId, MAX_RINGS};
pub use messages::{GossipMsg, Partners, WireCertificate, WireData};
pub use node::{CmpGossip, GossipHandler, Node, ResponseHandler};
pub use protocol::{Correct, Dos, Protocol, SpamAccusations};
pub use rings::{is_higher_rank, Ring, RingError, RingPosition, RingSet};
pub use view::{AccusationOutcome, DropReason, NoteOutcome, TimeoutEntry, View};
