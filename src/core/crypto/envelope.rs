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

//! Symmetric sealing (AES-256-CFB) and content hashing.
//!
//! Identifiers are base64url SHA-1 digests. SHA-1 here is an addressing
//! scheme, not an adversarial collision-resistance boundary: a forged
//! payload still fails the envelope decrypt or the reference signature.

use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::RngCore;
use serde::Serialize;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use thiserror::Error;

use crate::core::types::{marshal_record, unmarshal_record, Document};

type Aes256CfbEnc = cfb_mode::Encryptor<aes::Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<aes::Aes256>;

/// Symmetric key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// AES block / IV length in bytes.
const IV_LEN: usize = 16;

/// Decode cap for opened documents.
const MAX_DOCUMENT_BYTES: usize = 64 * 1024 * 1024;

/// Envelope errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key is not `KEY_LEN` bytes.
    #[error("invalid key length")]
    KeyLength,
    /// Ciphertext shorter than the prepended IV.
    #[error("ciphertext too short")]
    CiphertextTooShort,
    /// Canonical encoding failed.
    #[error("encoding")]
    Encoding,
    /// Plaintext did not decode as a document.
    #[error("document decoding")]
    DocumentDecoding,
    /// JSON encoding for hashing failed.
    #[error("json encoding")]
    JsonEncoding,
}

/// Generate a fresh random symmetric key.
pub fn generate_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Seal `body` under `key`: AES-256-CFB with a random 16-byte IV prepended
/// to the ciphertext.
pub fn seal_bytes(key: &[u8], body: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::KeyLength);
    }
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let mut out = Vec::with_capacity(IV_LEN + body.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(body);

    let enc =
        Aes256CfbEnc::new_from_slices(key, &iv).map_err(|_| CryptoError::KeyLength)?;
    enc.encrypt(&mut out[IV_LEN..]);
    Ok(out)
}

/// Inverse of [`seal_bytes`]. Fails when `body` is shorter than the IV.
pub fn open_bytes(key: &[u8], body: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::KeyLength);
    }
    if body.len() < IV_LEN {
        return Err(CryptoError::CiphertextTooShort);
    }
    let (iv, ciphertext) = body.split_at(IV_LEN);
    let mut out = ciphertext.to_vec();
    let dec =
        Aes256CfbDec::new_from_slices(key, iv).map_err(|_| CryptoError::KeyLength)?;
    dec.decrypt(&mut out);
    Ok(out)
}

/// Seal a document: the key is the SHA-256 of the canonical document bytes,
/// so identical documents seal to identical keys.
pub fn seal_document(doc: &Document) -> Result<(Vec<u8>, [u8; KEY_LEN]), CryptoError> {
    let marshaled = marshal_record(doc).map_err(|_| CryptoError::Encoding)?;
    let key: [u8; KEY_LEN] = Sha256::digest(&marshaled).into();
    let ciphertext = seal_bytes(&key, &marshaled)?;
    Ok((ciphertext, key))
}

/// Open a sealed document.
pub fn open_document(key: &[u8], ciphertext: &[u8]) -> Result<Document, CryptoError> {
    let plaintext = open_bytes(key, ciphertext)?;
    unmarshal_record(&plaintext, MAX_DOCUMENT_BYTES)
        .map_err(|_| CryptoError::DocumentDecoding)
}

/// Content hash of raw bytes: base64url SHA-1. Used for document ids and
/// node ids.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let digest = Sha1::digest(bytes);
    URL_SAFE.encode(digest)
}

/// Content hash of a JSON-encodable value: base64url SHA-1 over the JSON
/// encoding plus a trailing newline. Used for reference and channel ids
/// over public key PEMs.
pub fn hash_json<T: Serialize>(value: &T) -> Result<String, CryptoError> {
    let mut json = serde_json::to_vec(value).map_err(|_| CryptoError::JsonEncoding)?;
    json.push(b'\n');
    Ok(hash_bytes(&json))
}
