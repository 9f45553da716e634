//! # Protocol Dispatch
//!
//! The node's periodic behaviors - what a monitor tick, a gossip tick, a
//! rebuttal and a timeout sweep actually do - are a pluggable strategy.
//! [`Correct`] is the normal Fireflies behavior; [`SpamAccusations`] and
//! [`Dos`] are adversarial variants used to exercise the overlay's
//! defenses. The active strategy sits in a lock-guarded slot on the node
//! and can be swapped at runtime.

use async_trait::async_trait;

use crate::node::Node;

/// Strategy selecting the concrete monitor/gossip/rebuttal/timeout behavior.
#[async_trait]
pub trait Protocol: Send + Sync {
    /// One monitor tick.
    async fn monitor(&self, node: &Node);
    /// One gossip tick.
    async fn gossip(&self, node: &Node);
    /// React to an accusation against the local node.
    async fn rebuttal(&self, node: &Node);
    /// One timeout sweep.
    async fn timeouts(&self, node: &Node);
}

/// The normal protocol: probe ring successors, gossip the view snapshot to
/// sampled neighbors, rebut with an immediate gossip round, evict on sweep.
pub struct Correct;

#[async_trait]
impl Protocol for Correct {
    async fn monitor(&self, node: &Node) {
        node.monitor_round().await;
    }

    async fn gossip(&self, node: &Node) {
        node.gossip_round().await;
    }

    async fn rebuttal(&self, node: &Node) {
        node.gossip_round().await;
    }

    async fn timeouts(&self, node: &Node) {
        node.sweep_round();
    }
}

/// Adversarial variant: every gossip tick carries self-signed accusations
/// against every live peer on every ring. Correct receivers drop all of
/// them except where this node really is the predecessor.
pub struct SpamAccusations;

#[async_trait]
impl Protocol for SpamAccusations {
    async fn monitor(&self, _node: &Node) {}

    async fn gossip(&self, node: &Node) {
        node.spam_accusations_round().await;
    }

    async fn rebuttal(&self, node: &Node) {
        node.gossip_round().await;
    }

    async fn timeouts(&self, node: &Node) {
        node.sweep_round();
    }
}

/// Adversarial variant: floods neighbors through the `Dos` RPC with
/// oversized data payloads.
pub struct Dos;

#[async_trait]
impl Protocol for Dos {
    async fn monitor(&self, _node: &Node) {}

    async fn gossip(&self, node: &Node) {
        node.dos_round().await;
    }

    async fn rebuttal(&self, _node: &Node) {}

    async fn timeouts(&self, node: &Node) {
        node.sweep_round();
    }
}
