//! # Liveness Pinger (unreliable channel)
//!
//! The monitor's probe rides a bare UDP request/response: the challenger
//! sends a fresh 32-byte random nonce, and the target proves liveness (and
//! possession of its private key) by returning an Ed25519 signature over
//! exactly that nonce, domain-prefixed. Datagrams are capped at 256 bytes
//! both ways and the round trip has a 5-second deadline; there are no
//! retries at this layer - persistent failure is the monitor's signal.
//!
//! The pinger also keeps the per-target consecutive-failure counters the
//! monitor consults against `ping_limit`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use ed25519_dalek::VerifyingKey;
use rand::RngCore;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::crypto::{sign_with_domain, verify_with_domain, PING_SIGNATURE_DOMAIN};
use crate::identity::{Keypair, PeerId};

/// Both request and response datagrams are capped at this size.
pub const MAX_DATAGRAM: usize = 256;

/// Challenge nonce length.
pub const NONCE_LEN: usize = 32;

/// Round-trip deadline; no transport-level retry.
const PING_DEADLINE: Duration = Duration::from_secs(5);

pub struct Pinger {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    keypair: Keypair,
    failures: RwLock<HashMap<PeerId, u32>>,
}

impl Pinger {
    /// Bind the serve socket. Fatal on bind failure.
    pub async fn bind(addr: SocketAddr, keypair: Keypair) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind ping socket on {}", addr))?;
        let local_addr = socket
            .local_addr()
            .context("failed to read ping socket address")?;
        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            keypair,
            failures: RwLock::new(HashMap::new()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send one signed-challenge probe and verify the reply.
    ///
    /// The reply must be exactly one Ed25519 signature over the nonce we
    /// sent; short, long or mis-signed replies all fail the probe.
    pub async fn ping(&self, addr: &str, key: &VerifyingKey) -> Result<()> {
        let target: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid ping address: {}", addr))?;

        // Fresh socket per probe so replies cannot be confused across
        // concurrent challenges.
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .context("failed to bind ephemeral ping socket")?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        socket
            .send_to(&nonce, target)
            .await
            .context("failed to send ping")?;

        let mut buf = [0u8; MAX_DATAGRAM];
        let (n, from) = tokio::time::timeout(PING_DEADLINE, socket.recv_from(&mut buf))
            .await
            .context("ping timed out")?
            .context("failed to receive pong")?;

        if from.ip() != target.ip() {
            anyhow::bail!("pong from unexpected source {}", from);
        }
        if n != 64 {
            anyhow::bail!("pong has invalid length {} (expected 64)", n);
        }

        verify_with_domain(key, PING_SIGNATURE_DOMAIN, &nonce, &buf[..n])
            .context("pong signature invalid")?;
        Ok(())
    }

    /// Record a failed probe; returns the consecutive-failure count.
    pub fn record_failure(&self, id: &PeerId) -> u32 {
        let mut failures = self.failures.write().expect("pinger lock poisoned");
        let count = failures.entry(*id).or_insert(0);
        *count += 1;
        *count
    }

    /// A successful probe resets the target's streak.
    pub fn record_success(&self, id: &PeerId) {
        self.failures
            .write()
            .expect("pinger lock poisoned")
            .remove(id);
    }

    /// Forget a target entirely (evicted or accused).
    pub fn forget(&self, id: &PeerId) {
        self.failures
            .write()
            .expect("pinger lock poisoned")
            .remove(id);
    }

    /// Answer challenges until shutdown: sign each received nonce with the
    /// local key and return the signature.
    pub async fn serve(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("stopping ping responder");
                    return;
                }
                recv = self.socket.recv_from(&mut buf) => {
                    let (n, from) = match recv {
                        Ok(r) => r,
                        Err(e) => {
                            warn!(error = %e, "ping receive failed");
                            continue;
                        }
                    };
                    if n == 0 {
                        continue;
                    }
                    let response = sign_with_domain(&self.keypair, PING_SIGNATURE_DOMAIN, &buf[..n]);
                    if let Err(e) = self.socket.send_to(&response, from).await {
                        debug!(peer = %from, error = %e, "pong send failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn spawn_pinger(keypair: Keypair) -> (Arc<Pinger>, watch::Sender<bool>) {
        let pinger = Arc::new(
            Pinger::bind("127.0.0.1:0".parse().unwrap(), keypair)
                .await
                .expect("bind failed"),
        );
        let (tx, rx) = watch::channel(false);
        tokio::spawn(pinger.clone().serve(rx));
        (pinger, tx)
    }

    #[tokio::test]
    async fn signed_challenge_roundtrip() {
        let their_kp = Keypair::generate();
        let their_key = their_kp.verifying_key();
        let (responder, _guard) = spawn_pinger(their_kp).await;

        let our_kp = Keypair::generate();
        let prober = Pinger::bind("127.0.0.1:0".parse().unwrap(), our_kp)
            .await
            .expect("bind failed");

        prober
            .ping(&responder.local_addr().to_string(), &their_key)
            .await
            .expect("ping should succeed");
    }

    #[tokio::test]
    async fn reply_signed_by_wrong_key_fails() {
        let their_kp = Keypair::generate();
        let (responder, _guard) = spawn_pinger(their_kp).await;

        let prober = Pinger::bind("127.0.0.1:0".parse().unwrap(), Keypair::generate())
            .await
            .expect("bind failed");

        // Verify against a key the responder does not hold.
        let wrong_key = Keypair::generate().verifying_key();
        assert!(prober
            .ping(&responder.local_addr().to_string(), &wrong_key)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unreachable_target_times_out() {
        let prober = Pinger::bind("127.0.0.1:0".parse().unwrap(), Keypair::generate())
            .await
            .expect("bind failed");

        // Nothing listens here; expect a timeout error, not a hang.
        // (Bound then dropped so the port is very likely dead.)
        let dead = {
            let s = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            s.local_addr().unwrap()
        };

        let key = Keypair::generate().verifying_key();
        let result = prober.ping(&dead.to_string(), &key).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn failure_counters_accumulate_and_reset() {
        let pinger = Pinger::bind("127.0.0.1:0".parse().unwrap(), Keypair::generate())
            .await
            .expect("bind failed");
        let id = PeerId::from_bytes([1; 32]);

        assert_eq!(pinger.record_failure(&id), 1);
        assert_eq!(pinger.record_failure(&id), 2);
        assert_eq!(pinger.record_failure(&id), 3);

        pinger.record_success(&id);
        assert_eq!(pinger.record_failure(&id), 1);

        pinger.forget(&id);
        assert_eq!(pinger.record_failure(&id), 1);
    }
}
