//! # Node
//!
//! A [`Node`] assembles the membership engine: the view, the ring set, the
//! gossip client/server, the liveness pinger and the three periodic loops
//! (gossip, monitor, timeout sweep) under one shutdown signal.
//!
//! ## Data Flow
//!
//! ```text
//! inbound RPC -> verify caller certificate -> evidence algebra merges into View
//! scheduler ticks -> outbound gossip + pings
//! failed probes -> self-signed accusations -> propagate via gossip
//! timeout sweep -> eviction
//! ```
//!
//! ## Construction
//!
//! Construction is fatal-or-complete: key generation, socket binds and the
//! CA handshake all happen in [`Node::new`]; no partial instance escapes.
//! The sockets are bound first so the issued certificate embeds the real
//! service addresses.
//!
//! Shared state (view, gossip data map, protocol slot, gossip interval)
//! lives behind read-write locks; none is held across network I/O, and
//! application callbacks are invoked outside all locks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use ed25519_dalek::Signature;
use quinn::Endpoint;
use rand::seq::SliceRandom;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::ca::CertificateAuthority;
use crate::config::Config;
use crate::crypto::{
    create_client_config, create_server_config, private_key_der, validate_certificate,
    CertificateInfo,
};
use crate::identity::{full_mask, Accusation, Keypair, Note, PeerId};
use crate::messages::{GossipMsg, Partners, WireCertificate, WireData, MAX_DATA_SIZE};
use crate::peer::Peer;
use crate::pinger::Pinger;
use crate::protocol::{Correct, Protocol};
use crate::rpc::{self, GossipClient, PeerContact};
use crate::view::{AccusationOutcome, NoteOutcome, View};

/// Decides whether a new same-id data blob replaces the stored one. Must be
/// a strict total order over payloads for gossip to converge.
pub type CmpGossip = Box<dyn Fn(&[u8], &[u8]) -> bool + Send + Sync>;

/// Application callback for received gossip data; its `Ok` response is
/// rebroadcast through the data map and fed to the response handler.
pub type GossipHandler = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// Application callback for gossip handler responses.
pub type ResponseHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

struct LocalNote {
    epoch: u64,
    mask: u64,
    note: Note,
}

pub struct Node {
    config: Config,
    id: PeerId,
    keypair: Keypair,
    cert_der: Vec<u8>,
    ca_der: Vec<u8>,
    num_rings: u32,
    gossip_addr: String,

    view: View,
    pinger: Arc<Pinger>,
    client: Arc<GossipClient>,
    endpoint: Endpoint,

    local_note: RwLock<LocalNote>,
    gossip_interval: RwLock<Duration>,
    protocol: RwLock<Arc<dyn Protocol>>,
    gossip_data: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    cmp_gossip: CmpGossip,
    gossip_handler: RwLock<Option<GossipHandler>>,
    response_handler: RwLock<Option<ResponseHandler>>,

    shutdown_tx: watch::Sender<bool>,
    tasks: RwLock<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Create a node: generate a keypair, bind both channels, obtain a
    /// certificate from the CA, and seed the view with any known
    /// certificates (seed peers are trusted live until evidence arrives).
    pub async fn new(
        config: Config,
        ca: &dyn CertificateAuthority,
        gossip_bind: SocketAddr,
        ping_bind: SocketAddr,
        seed_certs: Vec<Vec<u8>>,
        cmp_gossip: CmpGossip,
    ) -> Result<Arc<Self>> {
        let keypair = Keypair::generate();

        // Bind before the CA handshake so the certificate carries the
        // addresses peers can actually reach.
        let pinger = Arc::new(Pinger::bind(ping_bind, keypair.clone()).await?);
        let gossip_socket = std::net::UdpSocket::bind(gossip_bind)
            .with_context(|| format!("failed to bind gossip socket on {}", gossip_bind))?;
        gossip_socket
            .set_nonblocking(true)
            .context("failed to configure gossip socket")?;
        let gossip_addr = gossip_socket
            .local_addr()
            .context("failed to read gossip socket address")?;

        let issued = ca
            .issue(
                &keypair,
                &gossip_addr.to_string(),
                &pinger.local_addr().to_string(),
            )
            .await
            .context("certificate request failed")?;

        let server_config = create_server_config(
            issued.cert_der.clone(),
            private_key_der(&keypair),
            issued.ca_der.clone(),
            issued.ring_count,
        )?;
        let client_config = create_client_config(
            issued.cert_der.clone(),
            private_key_der(&keypair),
            issued.ca_der.clone(),
        )?;

        let endpoint = Endpoint::new(
            quinn::EndpointConfig::default(),
            Some(server_config),
            gossip_socket,
            Arc::new(quinn::TokioRuntime),
        )
        .context("failed to create gossip endpoint")?;

        let client = Arc::new(GossipClient::new(endpoint.clone(), client_config));
        let view = View::new(issued.id, issued.ring_count, keypair.verifying_key());

        let mask = full_mask(issued.ring_count);
        let note = Note::sign(&keypair, issued.id, 1, mask);
        let initial_gossip_interval = config.gossip_interval();

        let (shutdown_tx, _) = watch::channel(false);

        let node = Arc::new(Self {
            config,
            id: issued.id,
            keypair,
            cert_der: issued.cert_der,
            ca_der: issued.ca_der,
            num_rings: issued.ring_count,
            gossip_addr: gossip_addr.to_string(),
            view,
            pinger,
            client,
            endpoint,
            local_note: RwLock::new(LocalNote {
                epoch: 1,
                mask,
                note,
            }),
            gossip_interval: RwLock::new(initial_gossip_interval),
            protocol: RwLock::new(Arc::new(Correct)),
            gossip_data: RwLock::new(HashMap::new()),
            cmp_gossip,
            gossip_handler: RwLock::new(None),
            response_handler: RwLock::new(None),
            shutdown_tx,
            tasks: RwLock::new(Vec::new()),
        });

        for der in seed_certs {
            match validate_certificate(&der, &node.ca_der) {
                Ok(info) => {
                    if info.id != node.id && node.view.apply_certificate(&info) {
                        node.view.add_live_peer(&info.id);
                    }
                }
                Err(e) => warn!(error = %e, "dropping invalid seed certificate"),
            }
        }

        info!(id = %node.id, gossip = %node.gossip_addr, ping = %node.pinger.local_addr(), "node created");
        Ok(node)
    }

    /// Launch the gossip server, the ping responder and the three periodic
    /// loops. Idempotence is the caller's concern; call once.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.write().expect("task lock poisoned");

        tasks.push(tokio::spawn(rpc::serve(
            self.clone(),
            self.endpoint.clone(),
            self.shutdown_tx.subscribe(),
        )));
        tasks.push(tokio::spawn(
            self.pinger.clone().serve(self.shutdown_tx.subscribe()),
        ));

        let node = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                let interval = node.gossip_interval();
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("exiting gossip loop");
                        return;
                    }
                    _ = tokio::time::sleep(interval) => {
                        let protocol = node.protocol();
                        protocol.gossip(&node).await;
                    }
                }
            }
        }));

        let node = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        let monitor_interval = self.config.monitor_interval();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("stopping monitoring");
                        return;
                    }
                    _ = tokio::time::sleep(monitor_interval) => {
                        let protocol = node.protocol();
                        protocol.monitor(&node).await;
                    }
                }
            }
        }));

        let node = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        let sweep_interval = self.config.view_update_interval();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("stopping view update");
                        return;
                    }
                    _ = tokio::time::sleep(sweep_interval) => {
                        let protocol = node.protocol();
                        protocol.timeouts(&node).await;
                    }
                }
            }
        }));
    }

    /// Broadcast shutdown, wait for the loops to finish their current unit,
    /// then close the transports.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.write().expect("task lock poisoned");
            tasks.drain(..).collect()
        };
        for mut handle in handles {
            if tokio::time::timeout(Duration::from_secs(5), &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }

        self.endpoint.close(0u32.into(), b"shutdown");
        self.endpoint.wait_idle().await;
        info!(id = %self.id, "node stopped");
    }

    // ========================================================================
    // Gossip engine
    // ========================================================================

    /// One normal gossip tick: snapshot the view and exchange with a random
    /// sample of neighbors.
    pub(crate) async fn gossip_round(&self) {
        let msg = self.collect_gossip_content();
        self.send_to_sampled(msg, false).await;
    }

    /// Adversarial tick: the snapshot plus self-signed accusations against
    /// every live peer on every ring.
    pub(crate) async fn spam_accusations_round(&self) {
        let mut msg = self.collect_gossip_content();
        for peer in self.view.live_peers() {
            let epoch = peer.note_epoch().unwrap_or(1);
            for ring in 0..self.num_rings {
                msg.accusations
                    .push(Accusation::sign(&self.keypair, peer.id(), self.id, epoch, ring));
            }
        }
        self.send_to_sampled(msg, false).await;
    }

    /// Adversarial tick: flood the `Dos` RPC with oversized data payloads.
    pub(crate) async fn dos_round(&self) {
        let mut msg = self.collect_gossip_content();
        for i in 0..4u8 {
            msg.data.push(WireData {
                id: format!("dos-{}", i).into_bytes(),
                content: vec![0u8; MAX_DATA_SIZE * 2],
            });
        }
        self.send_to_sampled(msg, true).await;
    }

    async fn send_to_sampled(&self, msg: GossipMsg, dos: bool) {
        let recipients = self.sample_recipients();
        if recipients.is_empty() {
            return;
        }

        let mut sends: JoinSet<(PeerId, Result<Partners>)> = JoinSet::new();
        for contact in recipients {
            let client = self.client.clone();
            let msg = msg.clone();
            sends.spawn(async move {
                let result = if dos {
                    client.dos(&contact, &msg).await
                } else {
                    client.spread(&contact, &msg).await
                };
                (contact.id, result)
            });
        }

        while let Some(joined) = sends.join_next().await {
            let Ok((peer, result)) = joined else {
                continue;
            };
            match result {
                Ok(partners) => self.merge_partner_certificates(partners),
                Err(e) => debug!(peer = %peer, error = %e, "gossip exchange failed"),
            }
        }
    }

    fn sample_recipients(&self) -> Vec<PeerContact> {
        let neighbors = self.view.neighbors(self.local_mask());
        let mut rng = rand::thread_rng();
        neighbors
            .choose_multiple(&mut rng, self.config.max_concurrent_messages)
            .map(|p| PeerContact {
                id: p.id(),
                addr: p.gossip_addr().to_string(),
            })
            .collect()
    }

    /// Snapshot the view for one exchange: every peer's (certificate,
    /// note, accusations), the local note, and the application data map.
    pub(crate) fn collect_gossip_content(&self) -> GossipMsg {
        let mut msg = GossipMsg::default();
        for (der, note, accusations) in self.view.snapshot() {
            msg.certificates.push(WireCertificate { der });
            if let Some(note) = note {
                msg.notes.push(note);
            }
            msg.accusations.extend(accusations);
        }
        msg.own_note = Some(self.local_note());

        let data = self.gossip_data.read().expect("gossip data lock poisoned");
        for (id, content) in data.iter() {
            msg.data.push(WireData {
                id: id.clone(),
                content: content.clone(),
            });
        }
        msg
    }

    /// Server-side gossip handling. Non-neighbors get no merge: they
    /// receive the certificates of their computed neighbors instead, which
    /// is all a bootstrapping caller needs to converge.
    pub(crate) async fn handle_gossip(
        &self,
        caller: &CertificateInfo,
        msg: GossipMsg,
    ) -> Result<Partners> {
        if caller.id == self.id {
            anyhow::bail!("gossip exchange with self");
        }

        if !self.view.should_be_neighbor(&caller.id, self.local_mask()) {
            debug!(
                caller = %caller.id,
                live = self.view.live_count(),
                "invalid gossip partner, not my neighbor"
            );
            // Admit the stranger to the view (not live - that takes a note)
            // and point it at its actual neighbors.
            self.view.apply_certificate(caller);
            let certificates = self
                .view
                .find_neighbors(&caller.id)
                .iter()
                .map(|p| WireCertificate {
                    der: p.cert_der().to_vec(),
                })
                .collect();
            return Ok(Partners { certificates });
        }

        self.view.apply_certificate(caller);
        self.merge(msg).await;
        Ok(Partners::default())
    }

    /// Merge one inbound gossip payload: certificates first (notes need the
    /// keys), then notes, accusations, application data. A bad record drops
    /// alone; the batch continues.
    pub(crate) async fn merge(&self, msg: GossipMsg) {
        for cert in &msg.certificates {
            self.evaluate_certificate(&cert.der);
        }
        for note in &msg.notes {
            self.merge_note(note);
        }
        if let Some(own_note) = &msg.own_note {
            self.merge_note(own_note);
        }
        for accusation in &msg.accusations {
            self.merge_accusation(accusation).await;
        }
        self.merge_data(msg.data);
    }

    fn evaluate_certificate(&self, der: &[u8]) {
        match validate_certificate(der, &self.ca_der) {
            Ok(info) => {
                self.view.apply_certificate(&info);
            }
            Err(e) => debug!(error = %e, "dropping gossiped certificate"),
        }
    }

    fn merge_note(&self, note: &Note) {
        if note.peer_id == self.id {
            return;
        }
        match self.view.apply_note(note) {
            NoteOutcome::Accepted | NoteOutcome::Rebuttal => {}
            NoteOutcome::Dropped(reason) => {
                debug!(peer = %note.peer_id, %reason, "dropped note");
            }
        }
    }

    async fn merge_accusation(&self, accusation: &Accusation) {
        match self.view.apply_accusation(accusation) {
            AccusationOutcome::SelfAccused => self.rebut(accusation.epoch).await,
            AccusationOutcome::Recorded => {
                debug!(
                    accused = %accusation.accused,
                    ring = accusation.ring,
                    "recorded accusation"
                );
            }
            AccusationOutcome::Dropped(reason) => {
                debug!(accused = %accusation.accused, %reason, "dropped accusation");
            }
        }
    }

    fn merge_data(&self, entries: Vec<WireData>) {
        for entry in entries {
            if entry.id.is_empty() || entry.content.len() > MAX_DATA_SIZE {
                warn!(
                    id_len = entry.id.len(),
                    size = entry.content.len(),
                    "dropping malformed gossip data entry"
                );
                continue;
            }
            let stored = {
                let mut map = self.gossip_data.write().expect("gossip data lock poisoned");
                let wins = match map.get(&entry.id) {
                    Some(old) => old != &entry.content && (self.cmp_gossip)(old, &entry.content),
                    None => true,
                };
                if wins {
                    map.insert(entry.id.clone(), entry.content.clone());
                }
                wins
            };
            if stored {
                self.dispatch_gossip_handler(&entry.id, &entry.content);
            }
        }
    }

    /// Run the application gossip handler for a newly stored entry. The
    /// callback runs outside all locks; its non-empty response is
    /// rebroadcast through the data map under the same id.
    fn dispatch_gossip_handler(&self, id: &[u8], content: &[u8]) {
        let handler = self
            .gossip_handler
            .read()
            .expect("handler lock poisoned")
            .clone();
        let Some(handler) = handler else {
            return;
        };

        match handler(content) {
            Ok(response) if !response.is_empty() => {
                {
                    let mut map = self.gossip_data.write().expect("gossip data lock poisoned");
                    let wins = match map.get(id) {
                        Some(old) => old != &response && (self.cmp_gossip)(old, &response),
                        None => true,
                    };
                    if wins {
                        map.insert(id.to_vec(), response.clone());
                    }
                }
                let response_handler = self
                    .response_handler
                    .read()
                    .expect("handler lock poisoned")
                    .clone();
                if let Some(rh) = response_handler {
                    rh(response);
                }
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "gossip handler returned error"),
        }
    }

    fn merge_partner_certificates(&self, partners: Partners) {
        for cert in &partners.certificates {
            match validate_certificate(&cert.der, &self.ca_der) {
                Ok(info) => {
                    if info.id != self.id && self.view.apply_certificate(&info) {
                        // The responder vouched these are its live peers;
                        // trust that until our own evidence says otherwise,
                        // exactly like construction-time seeds.
                        self.view.add_live_peer(&info.id);
                        debug!(peer = %info.id, "learned partner certificate");
                    }
                }
                Err(e) => debug!(error = %e, "dropping partner certificate"),
            }
        }
    }

    // ========================================================================
    // Monitor
    // ========================================================================

    /// One monitor tick: probe the successor on each enabled ring (the
    /// peers whose predecessor we are), up to `pings_per_interval`, and
    /// accuse on `ping_limit` consecutive failures.
    pub(crate) async fn monitor_round(&self) {
        let mut targets = self.view.monitor_targets(self.local_mask());
        targets.truncate(self.config.pings_per_interval as usize);

        for (ring, peer) in targets {
            match self
                .pinger
                .ping(peer.ping_addr(), peer.verifying_key())
                .await
            {
                Ok(()) => self.pinger.record_success(&peer.id()),
                Err(e) => {
                    let failures = self.pinger.record_failure(&peer.id());
                    debug!(
                        peer = %peer.id(),
                        ring,
                        failures,
                        error = %e,
                        "ping failed"
                    );
                    if failures >= self.config.ping_limit {
                        self.accuse(&peer, ring);
                    }
                }
            }
        }
    }

    /// Accuse an unresponsive monitoring target on `ring`, recording the
    /// accusation in our own view so gossip propagates it.
    fn accuse(&self, peer: &Arc<Peer>, ring: u32) {
        let Some(epoch) = peer.note_epoch() else {
            return;
        };
        let accusation = Accusation::sign(&self.keypair, peer.id(), self.id, epoch, ring);
        match self.view.apply_accusation(&accusation) {
            AccusationOutcome::Recorded => {
                info!(accused = %peer.id(), ring, "accused unresponsive peer");
                self.pinger.forget(&peer.id());
            }
            outcome => debug!(accused = %peer.id(), ring, ?outcome, "self accusation not recorded"),
        }
    }

    // ========================================================================
    // Timeouts and rebuttal
    // ========================================================================

    pub(crate) fn sweep_round(&self) {
        for id in self.view.sweep_timeouts(self.config.removal_timeout()) {
            self.pinger.forget(&id);
        }
    }

    /// An accusation named us: dominate its epoch with a fresh note and
    /// gossip it out immediately.
    pub(crate) async fn rebut(&self, accusation_epoch: u64) {
        let epoch = {
            let mut local = self.local_note.write().expect("local note lock poisoned");
            local.epoch = local.epoch.max(accusation_epoch) + 1;
            local.note = Note::sign(&self.keypair, self.id, local.epoch, local.mask);
            local.epoch
        };
        info!(epoch, "accused by a peer, gossiping rebuttal");
        let protocol = self.protocol();
        protocol.rebuttal(self).await;
    }

    // ========================================================================
    // Accessors and application facade
    // ========================================================================

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn gossip_addr(&self) -> &str {
        &self.gossip_addr
    }

    pub fn ping_addr(&self) -> String {
        self.pinger.local_addr().to_string()
    }

    pub fn cert_der(&self) -> &[u8] {
        &self.cert_der
    }

    pub(crate) fn ca_der(&self) -> &[u8] {
        &self.ca_der
    }

    pub fn num_rings(&self) -> u32 {
        self.num_rings
    }

    pub(crate) fn view(&self) -> &View {
        &self.view
    }

    /// Gossip addresses of all peers currently believed live.
    pub fn live_members(&self) -> Vec<String> {
        self.view.live_gossip_addrs()
    }

    pub fn live_count(&self) -> usize {
        self.view.live_count()
    }

    pub fn view_count(&self) -> usize {
        self.view.view_count()
    }

    pub fn local_note(&self) -> Note {
        self.local_note
            .read()
            .expect("local note lock poisoned")
            .note
            .clone()
    }

    pub fn local_epoch(&self) -> u64 {
        self.local_note
            .read()
            .expect("local note lock poisoned")
            .epoch
    }

    fn local_mask(&self) -> u64 {
        self.local_note
            .read()
            .expect("local note lock poisoned")
            .mask
    }

    pub fn verifying_key(&self) -> ed25519_dalek::VerifyingKey {
        self.keypair.verifying_key()
    }

    /// Reachability check against a known peer over the reliable channel
    /// (the `Monitor` RPC; empty payload both ways).
    pub async fn probe(&self, id: &PeerId) -> Result<()> {
        let peer = self.view.get_peer(id).context("unknown peer")?;
        self.client
            .monitor(&PeerContact {
                id: *id,
                addr: peer.gossip_addr().to_string(),
            })
            .await
    }

    /// Sign application content with the node's private key.
    pub fn sign(&self, content: &[u8]) -> Vec<u8> {
        self.keypair.sign(content).to_bytes().to_vec()
    }

    /// Verify application content against the public key of a known peer.
    /// Unknown ids verify as false.
    pub fn verify_signature(&self, id: &PeerId, content: &[u8], signature: &[u8]) -> bool {
        let Some(peer) = self.view.get_peer(id) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
            return false;
        };
        let signature = Signature::from_bytes(&sig_bytes);
        peer.verifying_key()
            .verify_strict(content, &signature)
            .is_ok()
    }

    /// Add (or replace) an application data entry exchanged with neighbors
    /// on every gossip interaction.
    pub fn append_gossip_data(&self, id: Vec<u8>, content: Vec<u8>) -> Result<()> {
        if id.is_empty() {
            anyhow::bail!("gossip data id has zero length");
        }
        if content.is_empty() {
            anyhow::bail!("gossip data has zero length");
        }
        if content.len() > MAX_DATA_SIZE {
            anyhow::bail!(
                "gossip data too large: {} bytes (max {})",
                content.len(),
                MAX_DATA_SIZE
            );
        }
        self.gossip_data
            .write()
            .expect("gossip data lock poisoned")
            .insert(id, content);
        Ok(())
    }

    /// Current bytes stored for a gossip data id, if any.
    pub fn get_gossip_data(&self, id: &[u8]) -> Option<Vec<u8>> {
        self.gossip_data
            .read()
            .expect("gossip data lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn set_gossip_handler(&self, handler: GossipHandler) {
        *self.gossip_handler.write().expect("handler lock poisoned") = Some(handler);
    }

    pub fn set_response_handler(&self, handler: ResponseHandler) {
        *self.response_handler.write().expect("handler lock poisoned") = Some(handler);
    }

    pub fn gossip_interval(&self) -> Duration {
        *self.gossip_interval.read().expect("interval lock poisoned")
    }

    pub fn set_gossip_interval(&self, seconds: u64) {
        *self.gossip_interval.write().expect("interval lock poisoned") =
            Duration::from_secs(seconds);
    }

    pub(crate) fn protocol(&self) -> Arc<dyn Protocol> {
        self.protocol.read().expect("protocol lock poisoned").clone()
    }

    /// Swap the active protocol strategy.
    pub fn set_protocol(&self, protocol: Arc<dyn Protocol>) {
        *self.protocol.write().expect("protocol lock poisoned") = protocol;
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("gossip_addr", &self.gossip_addr)
            .field("rings", &self.num_rings)
            .field("view", &self.view_count())
            .field("live", &self.live_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::LocalCa;

    fn lexicographic_cmp() -> CmpGossip {
        Box::new(|old, new| new > old)
    }

    async fn test_node(ca: &LocalCa, seeds: Vec<Vec<u8>>) -> Arc<Node> {
        Node::new(
            Config::default(),
            ca,
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:0".parse().unwrap(),
            seeds,
            lexicographic_cmp(),
        )
        .await
        .expect("node creation failed")
    }

    #[tokio::test]
    async fn accusation_against_self_triggers_rebuttal() {
        // Local epoch starts at 1; an accusation at epoch 5 must advance the
        // epoch to max(1, 5) + 1 = 6 and leave nothing recorded against us.
        let ca = LocalCa::new(2).unwrap();
        let node = test_node(&ca, vec![]).await;
        assert_eq!(node.local_epoch(), 1);

        let accuser = Keypair::generate();
        let accusation =
            Accusation::sign(&accuser, node.id(), PeerId::from_bytes([2; 32]), 5, 0);
        node.merge(GossipMsg {
            accusations: vec![accusation],
            ..Default::default()
        })
        .await;

        assert_eq!(node.local_epoch(), 6);
        let note = node.local_note();
        assert_eq!(note.epoch, 6);
        assert!(note.verify(&node.verifying_key()).is_ok());
        assert!(!node.view().timeout_exists(&node.id()));
    }

    #[tokio::test]
    async fn rebuttal_epoch_monotone_under_stale_accusations() {
        let ca = LocalCa::new(2).unwrap();
        let node = test_node(&ca, vec![]).await;

        let accuser = Keypair::generate();
        let other = PeerId::from_bytes([2; 32]);

        node.merge(GossipMsg {
            accusations: vec![Accusation::sign(&accuser, node.id(), other, 9, 0)],
            ..Default::default()
        })
        .await;
        assert_eq!(node.local_epoch(), 10);

        // A stale accusation still strictly advances the epoch.
        node.merge(GossipMsg {
            accusations: vec![Accusation::sign(&accuser, node.id(), other, 3, 0)],
            ..Default::default()
        })
        .await;
        assert_eq!(node.local_epoch(), 11);
    }

    #[tokio::test]
    async fn seed_certificates_populate_view_and_live_set() {
        let ca = LocalCa::new(2).unwrap();
        let seed_node = test_node(&ca, vec![]).await;
        let node = test_node(&ca, vec![seed_node.cert_der().to_vec()]).await;

        assert_eq!(node.view_count(), 1);
        assert_eq!(node.live_count(), 1);
        assert!(node.live_members().contains(&seed_node.gossip_addr().to_string()));
    }

    #[tokio::test]
    async fn seed_certificate_from_wrong_ca_dropped() {
        let ca = LocalCa::new(2).unwrap();
        let foreign_ca = LocalCa::new(2).unwrap();
        let foreign_node = test_node(&foreign_ca, vec![]).await;

        let node = test_node(&ca, vec![foreign_node.cert_der().to_vec()]).await;
        assert_eq!(node.view_count(), 0);
    }

    #[tokio::test]
    async fn gossip_content_carries_own_note_and_data() {
        let ca = LocalCa::new(2).unwrap();
        let node = test_node(&ca, vec![]).await;
        node.append_gossip_data(b"app".to_vec(), b"payload".to_vec())
            .unwrap();

        let msg = node.collect_gossip_content();
        assert_eq!(msg.own_note.as_ref().unwrap().peer_id, node.id());
        assert_eq!(msg.data.len(), 1);
        assert_eq!(msg.data[0].content, b"payload");
    }

    #[tokio::test]
    async fn append_gossip_data_validates_input() {
        let ca = LocalCa::new(2).unwrap();
        let node = test_node(&ca, vec![]).await;

        assert!(node.append_gossip_data(vec![], b"x".to_vec()).is_err());
        assert!(node.append_gossip_data(b"id".to_vec(), vec![]).is_err());
        assert!(node
            .append_gossip_data(b"id".to_vec(), vec![0; MAX_DATA_SIZE + 1])
            .is_err());
        assert!(node.append_gossip_data(b"id".to_vec(), b"ok".to_vec()).is_ok());
    }

    #[tokio::test]
    async fn merge_data_applies_total_order_tie_break() {
        let ca = LocalCa::new(2).unwrap();
        let node = test_node(&ca, vec![]).await;

        node.merge(GossipMsg {
            data: vec![WireData {
                id: b"k".to_vec(),
                content: b"bbb".to_vec(),
            }],
            ..Default::default()
        })
        .await;

        // Lexicographically smaller payload loses the tie-break.
        node.merge(GossipMsg {
            data: vec![WireData {
                id: b"k".to_vec(),
                content: b"aaa".to_vec(),
            }],
            ..Default::default()
        })
        .await;
        let msg = node.collect_gossip_content();
        assert_eq!(msg.data[0].content, b"bbb");

        // A larger payload wins.
        node.merge(GossipMsg {
            data: vec![WireData {
                id: b"k".to_vec(),
                content: b"ccc".to_vec(),
            }],
            ..Default::default()
        })
        .await;
        let msg = node.collect_gossip_content();
        assert_eq!(msg.data[0].content, b"ccc");
    }

    #[tokio::test]
    async fn oversized_gossip_data_dropped_without_aborting_batch() {
        let ca = LocalCa::new(2).unwrap();
        let node = test_node(&ca, vec![]).await;

        node.merge(GossipMsg {
            data: vec![
                WireData {
                    id: b"flood".to_vec(),
                    content: vec![0; MAX_DATA_SIZE * 2],
                },
                WireData {
                    id: b"good".to_vec(),
                    content: b"kept".to_vec(),
                },
            ],
            ..Default::default()
        })
        .await;

        let msg = node.collect_gossip_content();
        assert_eq!(msg.data.len(), 1);
        assert_eq!(msg.data[0].id, b"good");
    }

    #[tokio::test]
    async fn gossip_handler_response_is_rebroadcast() {
        let ca = LocalCa::new(2).unwrap();
        let node = test_node(&ca, vec![]).await;

        let seen: Arc<std::sync::Mutex<Vec<Vec<u8>>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        node.set_gossip_handler(Arc::new(|content: &[u8]| {
            let mut out = content.to_vec();
            out.push(b'!');
            Ok(out)
        }));
        let seen_clone = seen.clone();
        node.set_response_handler(Arc::new(move |response| {
            seen_clone.lock().unwrap().push(response);
        }));

        node.merge(GossipMsg {
            data: vec![WireData {
                id: b"k".to_vec(),
                content: b"x".to_vec(),
            }],
            ..Default::default()
        })
        .await;

        assert_eq!(seen.lock().unwrap().clone(), vec![b"x!".to_vec()]);
        // "x!" > "x", so the response replaced the entry.
        let msg = node.collect_gossip_content();
        assert_eq!(msg.data[0].content, b"x!");
    }

    #[tokio::test]
    async fn sign_and_verify_facade() {
        let ca = LocalCa::new(2).unwrap();
        let a = test_node(&ca, vec![]).await;
        let b = test_node(&ca, vec![a.cert_der().to_vec()]).await;

        let content = b"application payload";
        let signature = a.sign(content);

        assert!(b.verify_signature(&a.id(), content, &signature));
        assert!(!b.verify_signature(&a.id(), b"other payload", &signature));
        assert!(!b.verify_signature(&PeerId::from_bytes([9; 32]), content, &signature));
    }

    #[tokio::test]
    async fn gossip_interval_is_runtime_adjustable() {
        let ca = LocalCa::new(2).unwrap();
        let node = test_node(&ca, vec![]).await;
        assert_eq!(node.gossip_interval(), Duration::from_secs(10));
        node.set_gossip_interval(2);
        assert_eq!(node.gossip_interval(), Duration::from_secs(2));
    }
}
