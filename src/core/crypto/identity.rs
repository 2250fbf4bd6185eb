// Copyright (c) 2026 Orbitfs
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! ECDSA P-256 identities: reference owner keys (PEM), DER signatures, the
//! capability-deriving owner-key KDF, and self-signed node certificates.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::crypto::envelope::{hash_bytes, KEY_LEN};

/// Fixed input to the owner-key KDF. Must stay stable across versions:
/// changing it re-keys every existing reference value.
const OWNER_KEY_BODY: &[u8] = b"orbitfs reference owner key derivation v1";

/// Certificate validity window.
const CERT_VALID_DAYS: i64 = 10 * 365;

/// Identity errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No parseable PEM block.
    #[error("no PEM block found in key")]
    Pem,
    /// Key bytes did not parse.
    #[error("invalid key encoding")]
    InvalidKey,
    /// Signature bytes did not parse or did not verify.
    #[error("bad signature")]
    BadSignature,
    /// Certificate generation or parsing failed.
    #[error("certificate")]
    Cert,
}

/// Generate a fresh reference owner key.
pub fn generate_private() -> SigningKey {
    SigningKey::random(&mut rand::thread_rng())
}

/// Serialize a private key to PKCS#8 PEM.
pub fn marshal_private(key: &SigningKey) -> Result<String, IdentityError> {
    key.to_pkcs8_pem(LineEnding::LF)
        .map(|pem| pem.to_string())
        .map_err(|_| IdentityError::InvalidKey)
}

/// Parse a PEM-encoded ECDSA private key (PKCS#8, with SEC1 fallback).
pub fn load_private_pem(pem: &str) -> Result<SigningKey, IdentityError> {
    if !pem.contains("-----BEGIN") {
        return Err(IdentityError::Pem);
    }
    if let Ok(key) = SigningKey::from_pkcs8_pem(pem) {
        return Ok(key);
    }
    p256::SecretKey::from_sec1_pem(pem)
        .map(SigningKey::from)
        .map_err(|_| IdentityError::InvalidKey)
}

/// Serialize a public key to SPKI PEM.
pub fn marshal_public(key: &VerifyingKey) -> Result<String, IdentityError> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|_| IdentityError::InvalidKey)
}

/// Parse a PEM-encoded ECDSA public key.
pub fn load_public_pem(pem: &str) -> Result<VerifyingKey, IdentityError> {
    if !pem.contains("-----BEGIN") {
        return Err(IdentityError::Pem);
    }
    VerifyingKey::from_public_key_pem(pem).map_err(|_| IdentityError::InvalidKey)
}

/// Sign `msg` (ECDSA P-256 over SHA-256), returning a base64url DER signature.
pub fn sign(key: &SigningKey, msg: &[u8]) -> String {
    let signature: Signature = key.sign(msg);
    URL_SAFE.encode(signature.to_der().as_bytes())
}

/// Verify a base64url DER signature over `msg` under a PEM public key.
pub fn verify(public_key_pem: &str, msg: &[u8], signature: &str) -> Result<(), IdentityError> {
    let key = load_public_pem(public_key_pem)?;
    let der = URL_SAFE
        .decode(signature)
        .map_err(|_| IdentityError::BadSignature)?;
    let signature = Signature::from_der(&der).map_err(|_| IdentityError::BadSignature)?;
    key.verify(msg, &signature)
        .map_err(|_| IdentityError::BadSignature)
}

/// Derive the owner's reference-value key from their private key.
///
/// Capability-deriving KDF: a deterministic (RFC 6979) signature over a
/// fixed body, DER encoded, hashed together with the body. The same owner
/// always re-derives the same key, so reference values can be re-opened
/// without storing the key anywhere.
pub fn derive_owner_key(key: &SigningKey) -> [u8; KEY_LEN] {
    let signature: Signature = key.sign(OWNER_KEY_BODY);
    let der = signature.to_der();
    let mut hasher = Sha256::new();
    hasher.update(OWNER_KEY_BODY);
    hasher.update(der.as_bytes());
    hasher.finalize().into()
}

/// TLS key material for one node: a self-signed certificate and its key,
/// both PEM encoded and persisted under the config keyspace.
#[derive(Clone, Debug)]
pub struct TlsIdentity {
    /// Certificate, PEM encoded. Hashing this yields the node id.
    pub cert_pem: String,
    /// Private key, PKCS#8 PEM.
    pub key_pem: String,
}

impl TlsIdentity {
    /// Generate a fresh self-signed P-256 identity: 10-year validity,
    /// random 128-bit serial, outbound IP and loopback as SANs.
    pub fn generate() -> Result<Self, IdentityError> {
        let mut params = rcgen::CertificateParams::default();
        params.distinguished_name = rcgen::DistinguishedName::new();
        params
            .distinguished_name
            .push(rcgen::DnType::OrganizationName, "orbitfs");

        let now = time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + time::Duration::days(CERT_VALID_DAYS);

        let mut serial = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut serial);
        params.serial_number = Some(rcgen::SerialNumber::from_slice(&serial));

        params
            .key_usages
            .push(rcgen::KeyUsagePurpose::DigitalSignature);
        params
            .extended_key_usages
            .push(rcgen::ExtendedKeyUsagePurpose::ServerAuth);

        if let Ok(ip) = local_ip_address::local_ip() {
            params.subject_alt_names.push(rcgen::SanType::IpAddress(ip));
        }
        params.subject_alt_names.push(rcgen::SanType::IpAddress(
            std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
        ));

        let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|_| IdentityError::Cert)?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|_| IdentityError::Cert)?;

        Ok(Self {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    /// The node id bound to this identity.
    pub fn node_id(&self) -> String {
        node_id_from_cert(&self.cert_pem)
    }
}

/// Node id for a PEM certificate: the content hash of the PEM bytes. The
/// id doubles as the pinning token carried in `NodeMeta`.
pub fn node_id_from_cert(cert_pem: &str) -> String {
    hash_bytes(cert_pem.as_bytes())
}

/// Decode the first certificate in a PEM bundle to DER.
pub fn cert_pem_to_der(cert_pem: &str) -> Result<Vec<u8>, IdentityError> {
    let mut reader = cert_pem.as_bytes();
    let result = rustls_pemfile::certs(&mut reader)
        .next()
        .and_then(|c| c.ok())
        .map(|c| c.to_vec())
        .ok_or(IdentityError::Cert);
    result
}

/// Check that a PEM certificate parses as X.509.
pub fn validate_cert_pem(cert_pem: &str) -> Result<(), IdentityError> {
    let der = cert_pem_to_der(cert_pem)?;
    x509_parser::parse_x509_certificate(&der)
        .map(|_| ())
        .map_err(|_| IdentityError::Cert)
}
