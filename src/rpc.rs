//! # Reliable Channel RPC
//!
//! QUIC-based request/response for gossip exchanges. One bidirectional
//! stream per request; bincode payloads framed with a u32 big-endian length
//! prefix.
//!
//! ## Connection Management
//!
//! - Outbound connections are cached in a bounded LRU, invalidated on
//!   failure and staleness
//! - The SNI of every outbound connection carries the target peer id, which
//!   the TLS verifier binds to the presented certificate
//!
//! ## Server Authentication
//!
//! Every inbound connection must present a CA-issued client certificate;
//! the handshake enforces the chain, and the accept path re-extracts and
//! re-validates the certificate to obtain the caller's id, key and
//! addresses. The three refusal cases ([`AuthError`]) are rejected before
//! any state is touched.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use lru::LruCache;
use quinn::{ClientConfig, Connection, Endpoint, Incoming};
use rustls::pki_types::CertificateDer;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::crypto::{peer_id_to_sni, validate_certificate, CertificateInfo};
use crate::identity::PeerId;
use crate::messages::{
    self, GossipMsg, GossipRequest, GossipResponse, Partners, MAX_GOSSIP_MSG_SIZE,
};
use crate::node::Node;

/// Maximum framed payload size either direction.
const MAX_FRAME_SIZE: usize = MAX_GOSSIP_MSG_SIZE;

/// Timeout for one full request/response stream.
const RPC_STREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for reading a request off an accepted stream.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum number of cached outbound connections.
const MAX_CACHED_CONNECTIONS: usize = 256;

/// Idle period after which a cached connection is considered stale.
const CONNECTION_STALE_TIMEOUT: Duration = Duration::from_secs(60);

/// Refusals raised before any request is processed: the caller failed to
/// present a usable identity on the authenticated channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// No peer information attached to the connection.
    NoPeerInCtx,
    /// Peer information present but not TLS certificate material.
    NoTls,
    /// TLS established but the certificate chain is empty.
    NoCert,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::NoPeerInCtx => write!(f, "no peer information found in connection"),
            AuthError::NoTls => write!(f, "no TLS info provided in peer context"),
            AuthError::NoCert => write!(f, "no certificate present in request"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Where to reach a peer on the reliable channel.
#[derive(Clone, Debug)]
pub struct PeerContact {
    pub id: PeerId,
    pub addr: String,
}

struct CachedConnection {
    connection: Connection,
    last_success: Instant,
}

impl CachedConnection {
    fn new(connection: Connection) -> Self {
        Self {
            connection,
            last_success: Instant::now(),
        }
    }

    fn is_closed(&self) -> bool {
        self.connection.close_reason().is_some()
    }

    fn is_stale(&self) -> bool {
        self.last_success.elapsed() > CONNECTION_STALE_TIMEOUT
    }

    fn mark_success(&mut self) {
        self.last_success = Instant::now();
    }
}

/// Client side of the gossip channel with a bounded connection cache.
pub struct GossipClient {
    endpoint: Endpoint,
    client_config: ClientConfig,
    connections: Mutex<LruCache<PeerId, CachedConnection>>,
}

impl GossipClient {
    pub fn new(endpoint: Endpoint, client_config: ClientConfig) -> Self {
        Self {
            endpoint,
            client_config,
            connections: Mutex::new(LruCache::new(
                NonZeroUsize::new(MAX_CACHED_CONNECTIONS).expect("cache size is non-zero"),
            )),
        }
    }

    /// Normal gossip exchange.
    pub async fn spread(&self, to: &PeerContact, msg: &GossipMsg) -> Result<Partners> {
        match self.request(to, &GossipRequest::Spread(msg.clone())).await? {
            GossipResponse::Partners(partners) => Ok(partners),
            GossipResponse::Error { message } => anyhow::bail!("gossip rejected: {}", message),
            other => anyhow::bail!("unexpected response to Spread: {:?}", other),
        }
    }

    /// Adversarial flooding variant.
    pub async fn dos(&self, to: &PeerContact, msg: &GossipMsg) -> Result<Partners> {
        match self.request(to, &GossipRequest::Dos(msg.clone())).await? {
            GossipResponse::Partners(partners) => Ok(partners),
            GossipResponse::Error { message } => anyhow::bail!("gossip rejected: {}", message),
            other => anyhow::bail!("unexpected response to Dos: {:?}", other),
        }
    }

    /// Placeholder reachability check over the reliable channel.
    pub async fn monitor(&self, to: &PeerContact) -> Result<()> {
        match self.request(to, &GossipRequest::Monitor).await? {
            GossipResponse::Pong => Ok(()),
            GossipResponse::Error { message } => anyhow::bail!("monitor rejected: {}", message),
            other => anyhow::bail!("unexpected response to Monitor: {:?}", other),
        }
    }

    async fn request(&self, to: &PeerContact, request: &GossipRequest) -> Result<GossipResponse> {
        let conn = self.get_or_connect(to).await?;
        let result = self.request_on(&conn, request).await;

        let mut cache = self.connections.lock().await;
        match &result {
            Ok(_) => {
                if let Some(cached) = cache.get_mut(&to.id) {
                    cached.mark_success();
                }
            }
            Err(_) => {
                cache.pop(&to.id);
            }
        }
        result
    }

    async fn request_on(
        &self,
        conn: &Connection,
        request: &GossipRequest,
    ) -> Result<GossipResponse> {
        tokio::time::timeout(RPC_STREAM_TIMEOUT, async {
            let (mut send, mut recv) = conn
                .open_bi()
                .await
                .context("failed to open bidirectional stream")?;

            let request_bytes =
                messages::serialize(request).context("failed to serialize request")?;
            write_frame(&mut send, &request_bytes).await?;
            send.finish()?;

            let response_bytes = read_frame(&mut recv, MAX_FRAME_SIZE).await?;
            let response: GossipResponse = messages::deserialize_bounded(&response_bytes)
                .context("failed to deserialize response")?;
            Ok(response)
        })
        .await
        .context("RPC timed out")?
    }

    async fn get_or_connect(&self, to: &PeerContact) -> Result<Connection> {
        {
            let mut cache = self.connections.lock().await;
            if let Some(cached) = cache.get_mut(&to.id) {
                if cached.is_closed() || cached.is_stale() {
                    cache.pop(&to.id);
                } else {
                    return Ok(cached.connection.clone());
                }
            }
        }

        // Dial outside the cache lock; a racing duplicate dial is harmless
        // and the cache keeps whichever lands last.
        let addr: std::net::SocketAddr = to
            .addr
            .parse()
            .with_context(|| format!("invalid socket address: {}", to.addr))?;
        let sni = peer_id_to_sni(&to.id);
        let conn = self
            .endpoint
            .connect_with(self.client_config.clone(), addr, &sni)
            .with_context(|| format!("failed to initiate connection to {}", addr))?
            .await
            .with_context(|| format!("failed to establish connection to {}", addr))?;

        self.connections
            .lock()
            .await
            .put(to.id, CachedConnection::new(conn.clone()));
        Ok(conn)
    }
}

async fn write_frame(send: &mut quinn::SendStream, bytes: &[u8]) -> Result<()> {
    let len = bytes.len() as u32;
    send.write_all(&len.to_be_bytes()).await?;
    send.write_all(bytes).await?;
    Ok(())
}

async fn read_frame(recv: &mut quinn::RecvStream, max: usize) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    recv.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max {
        anyhow::bail!("frame too large: {} bytes (max {})", len, max);
    }
    let mut bytes = vec![0u8; len];
    recv.read_exact(&mut bytes).await?;
    Ok(bytes)
}

// ============================================================================
// Server side
// ============================================================================

/// Accept gossip connections until shutdown.
pub async fn serve(node: Arc<Node>, endpoint: Endpoint, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("stopping gossip server");
                return;
            }
            incoming = endpoint.accept() => {
                let Some(incoming) = incoming else {
                    debug!("gossip endpoint closed");
                    return;
                };
                let node = node.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(node, incoming).await {
                        debug!(error = ?e, "connection error");
                    }
                });
            }
        }
    }
}

/// The caller's certificate DER from the authenticated channel, or the
/// precise refusal.
fn caller_certificate(connection: &Connection) -> Result<Vec<u8>, AuthError> {
    let identity = connection.peer_identity().ok_or(AuthError::NoPeerInCtx)?;
    let certs: &Vec<CertificateDer> = identity.downcast_ref().ok_or(AuthError::NoTls)?;
    let cert = certs.first().ok_or(AuthError::NoCert)?;
    Ok(cert.as_ref().to_vec())
}

async fn handle_connection(node: Arc<Node>, incoming: Incoming) -> Result<()> {
    let connection = incoming.await.context("failed to accept connection")?;
    let remote = connection.remote_address();

    let cert_der = match caller_certificate(&connection) {
        Ok(der) => der,
        Err(e) => {
            warn!(remote = %remote, error = %e, "refusing unauthenticated connection");
            return Err(e.into());
        }
    };

    // The handshake already chained the certificate to the CA; re-validate
    // to extract the caller's id, key and addresses for the merge path.
    let caller = match validate_certificate(&cert_der, node.ca_der()) {
        Ok(info) => info,
        Err(e) => {
            warn!(remote = %remote, error = %e, "refusing connection with invalid certificate");
            return Err(e.into());
        }
    };

    debug!(peer = %caller.id, remote = %remote, "gossip connection established");

    loop {
        let stream = match connection.accept_bi().await {
            Ok(s) => s,
            Err(quinn::ConnectionError::ApplicationClosed(_)) => {
                debug!(remote = %remote, "connection closed by application");
                break Ok(());
            }
            Err(quinn::ConnectionError::TimedOut) => {
                debug!(remote = %remote, "connection idle timeout");
                break Ok(());
            }
            Err(e) => break Err(e.into()),
        };

        let node = node.clone();
        let caller = caller.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_stream(node, caller, stream).await {
                debug!(error = ?e, "stream error");
            }
        });
    }
}

async fn handle_stream(
    node: Arc<Node>,
    caller: CertificateInfo,
    (mut send, mut recv): (quinn::SendStream, quinn::RecvStream),
) -> Result<()> {
    let request_bytes = tokio::time::timeout(
        REQUEST_READ_TIMEOUT,
        read_frame(&mut recv, MAX_FRAME_SIZE),
    )
    .await
    .map_err(|_| anyhow::anyhow!("request read timed out"))??;

    let request: GossipRequest = messages::deserialize_bounded(&request_bytes)
        .context("failed to deserialize request")?;

    let response = match request {
        GossipRequest::Monitor => GossipResponse::Pong,
        GossipRequest::Spread(msg) | GossipRequest::Dos(msg) => {
            match node.handle_gossip(&caller, msg).await {
                Ok(partners) => GossipResponse::Partners(partners),
                Err(e) => GossipResponse::Error {
                    message: e.to_string(),
                },
            }
        }
    };

    let response_bytes = messages::serialize(&response).context("failed to serialize response")?;
    write_frame(&mut send, &response_bytes).await?;
    send.finish()?;

    Ok(())
}
