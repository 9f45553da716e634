//! # Certificate Authority Interface
//!
//! Certificate issuance is external to the membership engine: a trusted
//! party signs each member's certificate, assigns the stable peer id
//! (SubjectKeyId) and fixes the overlay's ring count. This module reduces
//! that collaborator to an interface, [`CertificateAuthority`], plus an
//! in-process implementation, [`LocalCa`], used by the binary and the tests.
//!
//! A deployment talking to a remote CA endpoint implements the same trait
//! over its transport of choice; the engine only ever sees the resulting
//! [`IssuedCertificate`] bundle.
//!
//! ## Issued Certificate Layout
//!
//! - SubjectKeyId: the peer id, `blake3(member public key)`
//! - SubjectPublicKeyInfo: the member's Ed25519 key
//! - extension `2.5.13.37`: ring count (LE u32 in the first 4 bytes)
//!   followed by the gossip and ping addresses, length-prefixed
//! - Subject CN: hex peer id; Subject L: gossip address (debug aid only,
//!   the extension is authoritative)

use anyhow::{Context, Result};
use async_trait::async_trait;
use rustls::pki_types::PrivatePkcs8KeyDer;
use serde::{Deserialize, Serialize};

use crate::crypto::{ed25519_pkcs8, encode_ring_extension, RING_EXTENSION_OID};
use crate::identity::{Keypair, PeerId, MAX_RINGS};

/// Everything a freshly admitted member needs to participate.
#[derive(Clone, Debug)]
pub struct IssuedCertificate {
    pub id: PeerId,
    pub cert_der: Vec<u8>,
    pub ca_der: Vec<u8>,
    pub ring_count: u32,
}

/// The trusted party that admits members into the overlay.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Issue a certificate binding `keypair`'s public key, a stable peer id
    /// and the given service addresses, signed by the CA.
    async fn issue(
        &self,
        keypair: &Keypair,
        gossip_addr: &str,
        ping_addr: &str,
    ) -> Result<IssuedCertificate>;
}

/// In-process certificate authority with an Ed25519 root.
pub struct LocalCa {
    ring_count: u32,
    ca_key: rcgen::KeyPair,
    ca_cert: rcgen::Certificate,
    ca_der: Vec<u8>,
}

impl LocalCa {
    /// Create a fresh CA whose overlay uses `ring_count` rings.
    pub fn new(ring_count: u32) -> Result<Self> {
        let ca_key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519)
            .context("failed to generate CA key")?;
        Self::build(ring_count, ca_key)
    }

    /// Rebuild a CA from a saved bundle. The root key is preserved, so
    /// certificates issued before and after a restart chain to the same key.
    pub fn from_bundle(bundle: &CaBundle) -> Result<Self> {
        let der = PrivatePkcs8KeyDer::from(bundle.key_pkcs8.clone());
        let ca_key = rcgen::KeyPair::try_from(&der).context("failed to load CA key")?;
        Self::build(bundle.ring_count, ca_key)
    }

    fn build(ring_count: u32, ca_key: rcgen::KeyPair) -> Result<Self> {
        if ring_count == 0 || ring_count > MAX_RINGS {
            anyhow::bail!(
                "ring count must be between 1 and {}, got {}",
                MAX_RINGS,
                ring_count
            );
        }

        let mut params = rcgen::CertificateParams::new(Vec::<String>::new())
            .context("failed to create CA certificate params")?;
        params.distinguished_name.push(
            rcgen::DnType::CommonName,
            rcgen::DnValue::Utf8String("firemesh-ca".to_string()),
        );
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);

        let ca_cert = params
            .self_signed(&ca_key)
            .context("failed to self-sign CA certificate")?;
        let ca_der = ca_cert.der().to_vec();

        Ok(Self {
            ring_count,
            ca_key,
            ca_cert,
            ca_der,
        })
    }

    pub fn ca_der(&self) -> &[u8] {
        &self.ca_der
    }

    pub fn ring_count(&self) -> u32 {
        self.ring_count
    }

    /// Serialize the CA root for persistence.
    pub fn to_bundle(&self) -> CaBundle {
        CaBundle {
            key_pkcs8: self.ca_key.serialize_der(),
            ring_count: self.ring_count,
        }
    }
}

#[async_trait]
impl CertificateAuthority for LocalCa {
    async fn issue(
        &self,
        keypair: &Keypair,
        gossip_addr: &str,
        ping_addr: &str,
    ) -> Result<IssuedCertificate> {
        let public_key = keypair.public_key_bytes();
        let id = PeerId::from_bytes(*blake3::hash(&public_key).as_bytes());

        let subject_pkcs8 = PrivatePkcs8KeyDer::from(ed25519_pkcs8(keypair));
        let subject_key = rcgen::KeyPair::try_from(&subject_pkcs8)
            .context("failed to build subject key pair for certificate")?;

        let mut params = rcgen::CertificateParams::new(Vec::<String>::new())
            .context("failed to create certificate params")?;
        params.distinguished_name.push(
            rcgen::DnType::CommonName,
            rcgen::DnValue::Utf8String(id.to_hex()),
        );
        params.distinguished_name.push(
            rcgen::DnType::LocalityName,
            rcgen::DnValue::Utf8String(gossip_addr.to_string()),
        );
        params.key_identifier_method =
            rcgen::KeyIdMethod::PreSpecified(id.as_bytes().to_vec());
        params
            .custom_extensions
            .push(rcgen::CustomExtension::from_oid_content(
                &RING_EXTENSION_OID,
                encode_ring_extension(self.ring_count, gossip_addr, ping_addr),
            ));

        let cert = params
            .signed_by(&subject_key, &self.ca_cert, &self.ca_key)
            .context("failed to sign member certificate")?;

        Ok(IssuedCertificate {
            id,
            cert_der: cert.der().to_vec(),
            ca_der: self.ca_der.clone(),
            ring_count: self.ring_count,
        })
    }
}

/// Persistable CA root: the signing key and the overlay ring count.
/// The self-signed root certificate is rebuilt on load; only the key (and
/// therefore the SubjectPublicKeyInfo members verify against) must survive.
#[derive(Clone, Serialize, Deserialize)]
pub struct CaBundle {
    pub key_pkcs8: Vec<u8>,
    pub ring_count: u32,
}

impl CaBundle {
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let bytes = bincode::serialize(self).context("failed to serialize CA bundle")?;
        std::fs::write(path, bytes)
            .with_context(|| format!("failed to write CA bundle to {}", path.display()))
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read CA bundle from {}", path.display()))?;
        bincode::deserialize(&bytes).context("failed to deserialize CA bundle")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{validate_certificate, CertificateError};

    #[tokio::test]
    async fn issued_certificate_validates_and_roundtrips_fields() {
        let ca = LocalCa::new(4).expect("ca creation failed");
        let kp = Keypair::generate();

        let issued = ca
            .issue(&kp, "127.0.0.1:9000", "127.0.0.1:9001")
            .await
            .expect("issue failed");

        let info =
            validate_certificate(&issued.cert_der, ca.ca_der()).expect("validation failed");

        assert_eq!(info.id, issued.id);
        assert_eq!(info.ring_count, 4);
        assert_eq!(info.gossip_addr, "127.0.0.1:9000");
        assert_eq!(info.ping_addr, "127.0.0.1:9001");
        assert_eq!(info.verifying_key, kp.verifying_key());
    }

    #[tokio::test]
    async fn certificate_from_foreign_ca_rejected() {
        let ca = LocalCa::new(4).expect("ca creation failed");
        let foreign = LocalCa::new(4).expect("ca creation failed");
        let kp = Keypair::generate();

        let issued = ca
            .issue(&kp, "127.0.0.1:9000", "127.0.0.1:9001")
            .await
            .expect("issue failed");

        assert_eq!(
            validate_certificate(&issued.cert_der, foreign.ca_der())
                .err()
                .expect("foreign CA must be rejected"),
            CertificateError::UntrustedIssuer
        );
    }

    #[tokio::test]
    async fn tampered_certificate_rejected() {
        let ca = LocalCa::new(4).expect("ca creation failed");
        let kp = Keypair::generate();

        let issued = ca
            .issue(&kp, "127.0.0.1:9000", "127.0.0.1:9001")
            .await
            .expect("issue failed");

        let mut der = issued.cert_der.clone();
        let mid = der.len() / 2;
        der[mid] ^= 0xFF;

        assert!(validate_certificate(&der, ca.ca_der()).is_err());
    }

    #[tokio::test]
    async fn distinct_keypairs_get_distinct_ids() {
        let ca = LocalCa::new(2).expect("ca creation failed");
        let a = ca
            .issue(&Keypair::generate(), "127.0.0.1:1", "127.0.0.1:2")
            .await
            .unwrap();
        let b = ca
            .issue(&Keypair::generate(), "127.0.0.1:3", "127.0.0.1:4")
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn ring_count_bounds_enforced() {
        assert!(LocalCa::new(0).is_err());
        assert!(LocalCa::new(MAX_RINGS + 1).is_err());
        assert!(LocalCa::new(MAX_RINGS).is_ok());
    }

    #[tokio::test]
    async fn bundle_reload_preserves_chain_of_trust() {
        let ca = LocalCa::new(3).expect("ca creation failed");
        let kp = Keypair::generate();
        let issued_before = ca
            .issue(&kp, "127.0.0.1:9000", "127.0.0.1:9001")
            .await
            .expect("issue failed");

        let reloaded = LocalCa::from_bundle(&ca.to_bundle()).expect("reload failed");

        // Old certificates verify against the rebuilt root (same key).
        assert!(validate_certificate(&issued_before.cert_der, reloaded.ca_der()).is_ok());

        // And new issuance still works with the same ring count.
        let issued_after = reloaded
            .issue(&Keypair::generate(), "127.0.0.1:9002", "127.0.0.1:9003")
            .await
            .expect("issue failed");
        assert_eq!(issued_after.ring_count, 3);
    }
}
