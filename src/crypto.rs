//! # Cryptographic Infrastructure
//!
//! This module provides cryptographic primitives for Firemesh:
//!
//! - **Signatures**: domain-separated Ed25519 signing and verification
//! - **Certificates**: parsing and validation of CA-issued member
//!   certificates, including the Firemesh ring-count extension
//! - **TLS**: mutual-auth configuration for the reliable (QUIC) channel
//!
//! ## Identity Model
//!
//! Every member holds a certificate issued by the same trusted CA. The
//! certificate binds together:
//!
//! - the member's Ed25519 public key (SubjectPublicKeyInfo)
//! - the member's stable id (SubjectKeyId, assigned by the CA)
//! - the ring count and the member's service addresses (extension
//!   [`RING_EXTENSION_OID`]: ring count K as little-endian u32 in the first
//!   4 bytes, then the gossip and ping addresses, each u16-LE
//!   length-prefixed)
//!
//! Both sides of every gossip connection present certificates; the custom
//! verifiers below accept a certificate only if its signature chains to the
//! shared CA. Evidence authenticity (notes, accusations, ping replies) is
//! checked separately against the public key extracted from the already
//! validated certificate.
//!
//! ## SECURITY WARNING
//!
//! The `dangerous()` rustls APIs are used intentionally - the webpki chain
//! model does not fit a single-CA overlay whose certificates carry no DNS
//! names, so chain verification is done directly against the CA key.

use std::sync::Arc;

use anyhow::{Context, Result};
use ed25519_dalek::{Signature, VerifyingKey};
use quinn::ClientConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::identity::{Keypair, PeerId, MAX_RINGS};

// ============================================================================
// Signature Error Types
// ============================================================================

/// Error type for signature verification failures.
/// Used across all Firemesh signature verification (notes, accusations,
/// ping replies).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    /// Signature is missing (empty).
    Missing,
    /// Signature has invalid length (expected 64 bytes for Ed25519).
    InvalidLength,
    /// Cryptographic verification failed.
    VerificationFailed,
}

impl std::fmt::Display for SignatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureError::Missing => write!(f, "signature is missing"),
            SignatureError::InvalidLength => write!(f, "signature has invalid length"),
            SignatureError::VerificationFailed => write!(f, "signature verification failed"),
        }
    }
}

impl std::error::Error for SignatureError {}

// ============================================================================
// Domain Separation Prefixes
// ============================================================================
//
// SECURITY: Domain separation prevents cross-protocol signature replay.
// Each signed data type uses a unique prefix so a signature cannot be
// reinterpreted in a different context.

/// Domain separation prefix for note signatures.
pub const NOTE_SIGNATURE_DOMAIN: &[u8] = b"firemesh-note-v1:";

/// Domain separation prefix for accusation signatures.
pub const ACCUSATION_SIGNATURE_DOMAIN: &[u8] = b"firemesh-accusation-v1:";

/// Domain separation prefix for ping challenge signatures.
pub const PING_SIGNATURE_DOMAIN: &[u8] = b"firemesh-ping-v1:";

/// Sign data with domain separation.
///
/// Prepends the domain prefix to the data before signing.
pub fn sign_with_domain(keypair: &Keypair, domain: &[u8], data: &[u8]) -> Vec<u8> {
    let mut prefixed = Vec::with_capacity(domain.len() + data.len());
    prefixed.extend_from_slice(domain);
    prefixed.extend_from_slice(data);
    keypair.sign(&prefixed).to_bytes().to_vec()
}

/// Verify a signature with domain separation.
pub fn verify_with_domain(
    key: &VerifyingKey,
    domain: &[u8],
    data: &[u8],
    signature: &[u8],
) -> std::result::Result<(), SignatureError> {
    if signature.is_empty() {
        return Err(SignatureError::Missing);
    }
    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| SignatureError::InvalidLength)?;
    let sig = Signature::from_bytes(&sig_bytes);

    let mut prefixed = Vec::with_capacity(domain.len() + data.len());
    prefixed.extend_from_slice(domain);
    prefixed.extend_from_slice(data);

    key.verify_strict(&prefixed, &sig)
        .map_err(|_| SignatureError::VerificationFailed)
}

// ============================================================================
// Certificate Layout
// ============================================================================

/// OID of the Firemesh membership extension (dotted form `2.5.13.37`).
/// The first 4 bytes of its value carry the ring count K as a little-endian
/// u32; the gossip and ping addresses follow, each u16-LE length-prefixed.
pub const RING_EXTENSION_OID: [u64; 4] = [2, 5, 13, 37];

const RING_EXTENSION_OID_STR: &str = "2.5.13.37";

/// Error type for certificate validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateError {
    /// The DER bytes could not be parsed as an X.509 certificate.
    ParseFailed,
    /// The certificate's signature does not chain to the trusted CA.
    UntrustedIssuer,
    /// No 32-byte SubjectKeyId present.
    NoSubjectKeyId,
    /// The membership extension (ring count + addresses) is missing or short.
    NoRingExtension,
    /// The ring count exceeds [`MAX_RINGS`] or is zero.
    BadRingCount,
    /// The embedded service addresses are missing or malformed.
    BadAddresses,
    /// The subject public key is not a valid Ed25519 point.
    BadPublicKey,
}

impl std::fmt::Display for CertificateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CertificateError::ParseFailed => write!(f, "certificate could not be parsed"),
            CertificateError::UntrustedIssuer => {
                write!(f, "certificate does not chain to the trusted CA")
            }
            CertificateError::NoSubjectKeyId => {
                write!(f, "no subject key id present in certificate")
            }
            CertificateError::NoRingExtension => {
                write!(f, "no ring number extension present in certificate")
            }
            CertificateError::BadRingCount => write!(f, "invalid ring count in certificate"),
            CertificateError::BadAddresses => {
                write!(f, "invalid service addresses in certificate")
            }
            CertificateError::BadPublicKey => {
                write!(f, "certificate public key is not a valid Ed25519 key")
            }
        }
    }
}

impl std::error::Error for CertificateError {}

/// The fields Firemesh needs from a validated member certificate.
#[derive(Clone)]
pub struct CertificateInfo {
    pub id: PeerId,
    pub verifying_key: VerifyingKey,
    pub gossip_addr: String,
    pub ping_addr: String,
    pub ring_count: u32,
    pub der: Vec<u8>,
}

impl std::fmt::Debug for CertificateInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateInfo")
            .field("id", &self.id)
            .field("gossip_addr", &self.gossip_addr)
            .field("ping_addr", &self.ping_addr)
            .field("ring_count", &self.ring_count)
            .finish_non_exhaustive()
    }
}

/// Encode the value of the membership extension.
pub fn encode_ring_extension(ring_count: u32, gossip_addr: &str, ping_addr: &str) -> Vec<u8> {
    let mut value = Vec::with_capacity(4 + 2 + gossip_addr.len() + 2 + ping_addr.len());
    value.extend_from_slice(&ring_count.to_le_bytes());
    value.extend_from_slice(&(gossip_addr.len() as u16).to_le_bytes());
    value.extend_from_slice(gossip_addr.as_bytes());
    value.extend_from_slice(&(ping_addr.len() as u16).to_le_bytes());
    value.extend_from_slice(ping_addr.as_bytes());
    value
}

fn decode_ring_extension(value: &[u8]) -> Result<(u32, String, String), CertificateError> {
    if value.len() < 4 {
        return Err(CertificateError::NoRingExtension);
    }
    let ring_count = u32::from_le_bytes([value[0], value[1], value[2], value[3]]);
    if ring_count == 0 || ring_count > MAX_RINGS {
        return Err(CertificateError::BadRingCount);
    }

    let mut rest = &value[4..];
    let mut read_addr = || -> Result<String, CertificateError> {
        if rest.len() < 2 {
            return Err(CertificateError::BadAddresses);
        }
        let len = u16::from_le_bytes([rest[0], rest[1]]) as usize;
        rest = &rest[2..];
        if rest.len() < len {
            return Err(CertificateError::BadAddresses);
        }
        let s = std::str::from_utf8(&rest[..len])
            .map_err(|_| CertificateError::BadAddresses)?
            .to_string();
        rest = &rest[len..];
        if s.is_empty() {
            return Err(CertificateError::BadAddresses);
        }
        Ok(s)
    };

    let gossip_addr = read_addr()?;
    let ping_addr = read_addr()?;
    Ok((ring_count, gossip_addr, ping_addr))
}

/// Validate a member certificate against the CA and extract its fields.
///
/// Checks, in order: DER parse, signature chains to the CA key, presence of
/// a 32-byte SubjectKeyId (the peer id), the membership extension, and that
/// the subject key is a usable Ed25519 point.
pub fn validate_certificate(der: &[u8], ca_der: &[u8]) -> Result<CertificateInfo, CertificateError> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|_| CertificateError::ParseFailed)?;
    let (_, ca_cert) =
        X509Certificate::from_der(ca_der).map_err(|_| CertificateError::ParseFailed)?;

    cert.verify_signature(Some(ca_cert.public_key()))
        .map_err(|_| CertificateError::UntrustedIssuer)?;

    let mut subject_key_id: Option<[u8; 32]> = None;
    let mut ring_ext: Option<&[u8]> = None;
    for ext in cert.extensions() {
        if let x509_parser::extensions::ParsedExtension::SubjectKeyIdentifier(kid) =
            ext.parsed_extension()
        {
            if kid.0.len() == 32 {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(kid.0);
                subject_key_id = Some(arr);
            }
        }
        if ext.oid.to_id_string() == RING_EXTENSION_OID_STR {
            ring_ext = Some(ext.value);
        }
    }

    let id = PeerId::from_bytes(subject_key_id.ok_or(CertificateError::NoSubjectKeyId)?);
    let (ring_count, gossip_addr, ping_addr) =
        decode_ring_extension(ring_ext.ok_or(CertificateError::NoRingExtension)?)?;

    let spki = cert.public_key();
    let key_bytes: &[u8] = &spki.subject_public_key.data;
    let verifying_key =
        VerifyingKey::try_from(key_bytes).map_err(|_| CertificateError::BadPublicKey)?;

    Ok(CertificateInfo {
        id,
        verifying_key,
        gossip_addr,
        ping_addr,
        ring_count,
        der: der.to_vec(),
    })
}

// ============================================================================
// PKCS#8 Encoding for Ed25519 Keys
// ============================================================================

/// Encode an Ed25519 secret key as a PKCS#8 v1 DER document.
/// rcgen and rustls both consume this format.
pub fn ed25519_pkcs8(keypair: &Keypair) -> Vec<u8> {
    let secret_key = keypair.secret_key_bytes();

    const ED25519_OID: [u8; 5] = [0x06, 0x03, 0x2b, 0x65, 0x70];
    const PKCS8_VERSION: [u8; 3] = [0x02, 0x01, 0x00];

    let mut pkcs8 = Vec::with_capacity(48);
    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    pkcs8.extend_from_slice(&PKCS8_VERSION);
    pkcs8.extend_from_slice(&[0x30, 0x05]);
    pkcs8.extend_from_slice(&ED25519_OID);
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(&secret_key);
    pkcs8
}

/// Build the rustls private key for a member from its keypair.
pub fn private_key_der(keypair: &Keypair) -> PrivateKeyDer<'static> {
    PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(ed25519_pkcs8(keypair)))
}

// ============================================================================
// TLS Configuration
// ============================================================================

/// Lazily-initialized crypto provider for rustls.
/// Uses ring as the underlying cryptographic implementation.
static CRYPTO_PROVIDER: std::sync::LazyLock<Arc<rustls::crypto::CryptoProvider>> =
    std::sync::LazyLock::new(|| Arc::new(rustls::crypto::ring::default_provider()));

/// ALPN protocol identifier. All Firemesh connections use this to prevent
/// accidental cross-protocol connections.
pub const ALPN: &[u8] = b"firemesh";

/// Extra concurrent server streams beyond the `2 * ring_count` a correct
/// neighbor set can legitimately need at once.
const STREAM_HEADROOM: u32 = 20;

/// Build the quinn server config for the reliable channel.
///
/// Requires client certificates and verifies them against the CA. The
/// concurrent bidirectional stream cap is `2 * ring_count + 20`.
pub fn create_server_config(
    cert_der: Vec<u8>,
    key: PrivateKeyDer<'static>,
    ca_der: Vec<u8>,
    ring_count: u32,
) -> Result<quinn::ServerConfig> {
    let client_cert_verifier = Arc::new(CaChainedClientVerifier { ca_der });
    let certs = vec![CertificateDer::from(cert_der)];
    let mut server_crypto = rustls::ServerConfig::builder()
        .with_client_cert_verifier(client_cert_verifier)
        .with_single_cert(certs, key)
        .context("failed to create server TLS config")?;
    server_crypto.alpn_protocols = vec![ALPN.to_vec()];

    let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)
            .context("failed to create QUIC server config")?,
    ));

    let max_streams = ring_count
        .saturating_mul(2)
        .saturating_add(STREAM_HEADROOM);
    let transport_config = Arc::get_mut(&mut server_config.transport)
        .expect("transport config is exclusively owned immediately after creation");
    transport_config.max_idle_timeout(Some(
        std::time::Duration::from_secs(60)
            .try_into()
            .expect("60 seconds is a valid VarInt duration"),
    ));
    transport_config.max_concurrent_bidi_streams(max_streams.into());

    Ok(server_config)
}

/// Build the quinn client config for the reliable channel.
///
/// Presents our certificate for mutual auth and verifies the server's
/// certificate against the CA and the expected peer id (carried in SNI).
pub fn create_client_config(
    cert_der: Vec<u8>,
    key: PrivateKeyDer<'static>,
    ca_der: Vec<u8>,
) -> Result<ClientConfig> {
    let verifier = CaChainedServerVerifier { ca_der };
    let certs = vec![CertificateDer::from(cert_der)];

    let mut client_crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_client_auth_cert(certs, key)
        .context("failed to create client TLS config with client auth")?;
    client_crypto.alpn_protocols = vec![ALPN.to_vec()];

    let client_config = ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(client_crypto)
            .context("failed to create QUIC client config")?,
    ));

    Ok(client_config)
}

/// Map a `PeerId` to the SNI string used on outbound connections.
/// 64 hex chars split with a dot to stay within DNS label limits.
pub(crate) fn peer_id_to_sni(id: &PeerId) -> String {
    let hex = id.to_hex();
    format!("{}.{}", &hex[..32], &hex[32..])
}

fn parse_peer_id_from_sni(sni: &str) -> Option<PeerId> {
    let hex_str: String = sni.split('.').collect();
    let bytes = hex::decode(&hex_str).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Some(PeerId::from_bytes(arr))
}

fn chains_to_ca(end_entity: &CertificateDer<'_>, ca_der: &[u8]) -> bool {
    let Ok((_, cert)) = X509Certificate::from_der(end_entity.as_ref()) else {
        return false;
    };
    let Ok((_, ca_cert)) = X509Certificate::from_der(ca_der) else {
        return false;
    };
    cert.verify_signature(Some(ca_cert.public_key())).is_ok()
}

fn subject_key_id_of(end_entity: &CertificateDer<'_>) -> Option<PeerId> {
    let (_, cert) = X509Certificate::from_der(end_entity.as_ref()).ok()?;
    for ext in cert.extensions() {
        if let x509_parser::extensions::ParsedExtension::SubjectKeyIdentifier(kid) =
            ext.parsed_extension()
        {
            if kid.0.len() == 32 {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(kid.0);
                return Some(PeerId::from_bytes(arr));
            }
        }
    }
    None
}

/// Verifies client certificates against the shared CA.
#[derive(Debug)]
struct CaChainedClientVerifier {
    ca_der: Vec<u8>,
}

impl rustls::server::danger::ClientCertVerifier for CaChainedClientVerifier {
    fn root_hint_subjects(&self) -> &[rustls::DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::server::danger::ClientCertVerified, rustls::Error> {
        if !chains_to_ca(end_entity, &self.ca_der) {
            return Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::UnknownIssuer,
            ));
        }
        if subject_key_id_of(end_entity).is_none() {
            return Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::BadEncoding,
            ));
        }
        Ok(rustls::server::danger::ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &CRYPTO_PROVIDER.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &CRYPTO_PROVIDER.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![rustls::SignatureScheme::ED25519]
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }
}

/// Verifies server certificates against the shared CA and binds the
/// connection to the peer id we intended to reach (carried in SNI).
#[derive(Debug)]
struct CaChainedServerVerifier {
    ca_der: Vec<u8>,
}

impl rustls::client::danger::ServerCertVerifier for CaChainedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        let sni = match server_name {
            rustls::pki_types::ServerName::DnsName(name) => name.as_ref(),
            _ => {
                return Err(rustls::Error::InvalidCertificate(
                    rustls::CertificateError::ApplicationVerificationFailure,
                ));
            }
        };

        let expected_id = parse_peer_id_from_sni(sni).ok_or_else(|| {
            rustls::Error::InvalidCertificate(rustls::CertificateError::BadEncoding)
        })?;

        if !chains_to_ca(end_entity, &self.ca_der) {
            return Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::UnknownIssuer,
            ));
        }

        let actual_id = subject_key_id_of(end_entity).ok_or(rustls::Error::InvalidCertificate(
            rustls::CertificateError::BadEncoding,
        ))?;
        if actual_id != expected_id {
            return Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::NotValidForName,
            ));
        }

        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &CRYPTO_PROVIDER.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &CRYPTO_PROVIDER.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![rustls::SignatureScheme::ED25519]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_separated_signature_roundtrip() {
        let kp = Keypair::generate();
        let sig = sign_with_domain(&kp, NOTE_SIGNATURE_DOMAIN, b"payload");

        assert_eq!(sig.len(), 64);
        assert!(
            verify_with_domain(&kp.verifying_key(), NOTE_SIGNATURE_DOMAIN, b"payload", &sig)
                .is_ok()
        );
        assert!(verify_with_domain(
            &kp.verifying_key(),
            ACCUSATION_SIGNATURE_DOMAIN,
            b"payload",
            &sig
        )
        .is_err());
        assert!(
            verify_with_domain(&kp.verifying_key(), NOTE_SIGNATURE_DOMAIN, b"other", &sig)
                .is_err()
        );
    }

    #[test]
    fn signature_length_checks() {
        let kp = Keypair::generate();
        let key = kp.verifying_key();

        assert_eq!(
            verify_with_domain(&key, NOTE_SIGNATURE_DOMAIN, b"x", &[]),
            Err(SignatureError::Missing)
        );
        assert_eq!(
            verify_with_domain(&key, NOTE_SIGNATURE_DOMAIN, b"x", &[0u8; 32]),
            Err(SignatureError::InvalidLength)
        );
    }

    #[test]
    fn ring_extension_roundtrip() {
        let value = encode_ring_extension(8, "10.0.0.1:7000", "10.0.0.1:7001");
        let (rings, gossip, ping) = decode_ring_extension(&value).expect("decode failed");

        assert_eq!(rings, 8);
        assert_eq!(gossip, "10.0.0.1:7000");
        assert_eq!(ping, "10.0.0.1:7001");
    }

    #[test]
    fn ring_extension_rejects_malformed() {
        assert_eq!(
            decode_ring_extension(&[1, 0]),
            Err(CertificateError::NoRingExtension)
        );
        assert_eq!(
            decode_ring_extension(&0u32.to_le_bytes()),
            Err(CertificateError::BadRingCount)
        );
        assert_eq!(
            decode_ring_extension(&200u32.to_le_bytes()),
            Err(CertificateError::BadRingCount)
        );
        // Ring count present but addresses truncated.
        let mut value = 4u32.to_le_bytes().to_vec();
        value.extend_from_slice(&(20u16).to_le_bytes());
        value.extend_from_slice(b"short");
        assert_eq!(
            decode_ring_extension(&value),
            Err(CertificateError::BadAddresses)
        );
    }

    #[test]
    fn pkcs8_encoding_is_parseable_by_rcgen() {
        let kp = Keypair::generate();
        let pkcs8 = ed25519_pkcs8(&kp);
        assert_eq!(pkcs8.len(), 48);

        let der = PrivatePkcs8KeyDer::from(pkcs8);
        assert!(rcgen::KeyPair::try_from(&der).is_ok());
    }

    #[test]
    fn sni_roundtrip() {
        let id = PeerId::from_bytes([0x5A; 32]);
        let sni = peer_id_to_sni(&id);
        assert_eq!(parse_peer_id_from_sni(&sni), Some(id));
        assert!(parse_peer_id_from_sni("not-hex").is_none());
    }
}
