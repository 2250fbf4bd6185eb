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

//! Deterministic record types and canonical encoding helpers.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Record marshaling error.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The record did not serialize.
    #[error("record encoding failed")]
    Encode,
    /// The bytes did not decode as the expected record.
    #[error("record decoding failed")]
    Decode,
    /// The payload exceeds the caller's byte cap.
    #[error("record larger than {limit} bytes")]
    Oversize {
        /// The cap that was exceeded.
        limit: usize,
    },
}

/// One marshaled form everywhere: documents seal and hash over these
/// bytes, references and messages sign them, the store and the wire carry
/// them. Fixed-width integers keep that form byte-stable across versions;
/// trailing garbage is rejected so two encodings of the same record can
/// never differ.
fn record_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Marshal a record to its canonical byte form. Container fields must
/// iterate deterministically (`BTreeMap`): these bytes feed content
/// hashes and signatures.
pub fn marshal_record<T: Serialize>(record: &T) -> Result<Vec<u8>, RecordError> {
    record_options()
        .serialize(record)
        .map_err(|_| RecordError::Encode)
}

/// Unmarshal a record from untrusted bytes under a byte cap. The cap is
/// checked against the raw payload and also handed to the deserializer,
/// which otherwise trusts claimed container lengths when allocating.
pub fn unmarshal_record<T: DeserializeOwned>(
    bytes: &[u8],
    limit: usize,
) -> Result<T, RecordError> {
    if bytes.len() > limit {
        return Err(RecordError::Oversize { limit });
    }
    record_options()
        .with_limit(limit as u64)
        .deserialize(bytes)
        .map_err(|_| RecordError::Decode)
}

/// Content type marking a directory document.
pub const DIRECTORY_CONTENT_TYPE: &str = "directory";

/// A stored document. Immutable once added: its identifier is the content
/// hash of its encrypted encoding.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Opaque payload bytes.
    pub data: Vec<u8>,
    /// MIME-ish content type; `directory` marks a directory document.
    pub content_type: String,
    /// Child name to child access id, for directory documents.
    #[serde(default)]
    pub children: BTreeMap<String, String>,
}

/// A mutable named pointer signed by its owner. `reference_id` is the hash
/// of `public_key`; the signature covers the canonical encoding with
/// `signature` cleared.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Sealed value bytes (AES-CFB under the owner-derived key).
    pub value: Vec<u8>,
    /// Owner public key, PEM encoded.
    pub public_key: String,
    /// Unix seconds at creation.
    pub timestamp: i64,
    /// base64url DER ECDSA signature.
    pub signature: String,
}

impl Reference {
    /// Canonical bytes covered by the signature.
    pub fn signed_bytes(&self) -> Result<Vec<u8>, RecordError> {
        let mut cleared = self.clone();
        cleared.signature = String::new();
        marshal_record(&cleared)
    }
}

/// A message published on the channel `hash(public_key)`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message text.
    pub message: String,
    /// Publisher public key, PEM encoded.
    pub public_key: String,
    /// Unix seconds at publish time.
    pub timestamp: i64,
    /// base64url DER ECDSA signature.
    pub signature: String,
}

impl Message {
    /// Canonical bytes covered by the signature.
    pub fn signed_bytes(&self) -> Result<Vec<u8>, RecordError> {
        let mut cleared = self.clone();
        cleared.signature = String::new();
        marshal_record(&cleared)
    }
}

/// Node identity and dialing information. `id` is the hash of `cert`, which
/// doubles as the certificate pinning token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    /// Stable node id, `hash(cert)`.
    pub id: String,
    /// Dialable `host:port` addresses, in preference order.
    pub addrs: Vec<String>,
    /// Self-signed certificate, PEM encoded.
    pub cert: String,
}

/// Bookkeeping for one `/cache/<id>` entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    /// Stored ciphertext size in bytes.
    pub size_bytes: u64,
    /// Last access time, unix nanoseconds.
    pub last_accessed_unix_nanos: i64,
}

/// Access identifier errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessIdError {
    /// The id does not contain exactly one `:` separator.
    #[error("access id must be of the form id:key")]
    MissingSeparator,
    /// The key part does not decode.
    #[error("access key does not decode")]
    BadKey,
}

/// Join an id and a symmetric key into an access identifier.
pub fn join_access_id(id: &str, key: &[u8]) -> String {
    format!("{}:{}", id, URL_SAFE.encode(key))
}

/// Split an access identifier into its id and decoded key parts.
pub fn split_access_id(access_id: &str) -> Result<(String, Vec<u8>), AccessIdError> {
    let mut parts = access_id.split(':');
    let (id, key) = match (parts.next(), parts.next(), parts.next()) {
        (Some(id), Some(key), None) => (id, key),
        _ => return Err(AccessIdError::MissingSeparator),
    };
    let key = URL_SAFE.decode(key).map_err(|_| AccessIdError::BadKey)?;
    Ok((id.to_string(), key))
}

/// Node configuration root. Loadable from TOML; every timer and tunable
/// lives here rather than in process-wide globals.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Data directory (KV store + key material).
    pub path: String,
    /// Listen address, e.g. `0.0.0.0:8045`. Port 0 picks a free port.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Peer addresses to bootstrap from at startup.
    #[serde(default)]
    pub bootstrap: Vec<String>,
    /// Maximum unforced peer connections. Forced adds (bootstrap, inbound
    /// Hello) may exceed this; 0 disables unforced connections entirely.
    #[serde(default = "default_max_peers")]
    pub max_peers: u32,
    /// Maximum routing table width in filters. 0 means uncapped.
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    /// Store size threshold in bytes that triggers cache eviction.
    #[serde(default = "default_cache_size")]
    pub cache_size: u64,
    /// Entries sampled per eviction round.
    #[serde(default = "default_cache_sample")]
    pub cache_sample: u32,
    /// Maximum wire frame size in bytes.
    #[serde(default = "default_msg_size")]
    pub msg_size: u32,
    /// Dial and heartbeat-ping timeout, milliseconds.
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    /// Heartbeat interval, milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Routing gossip interval, milliseconds.
    #[serde(default = "default_routing_interval_ms")]
    pub routing_table_interval_ms: u64,
    /// Per-peer routing table fetch deadline, milliseconds.
    #[serde(default = "default_routing_fetch_ms")]
    pub routing_fetch_timeout_ms: u64,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8045".to_string()
}
fn default_max_peers() -> u32 {
    8
}
fn default_max_width() -> u32 {
    10
}
fn default_cache_size() -> u64 {
    64 * 1024 * 1024
}
fn default_cache_sample() -> u32 {
    10
}
fn default_msg_size() -> u32 {
    16 * 1024 * 1024
}
fn default_dial_timeout_ms() -> u64 {
    2_000
}
fn default_heartbeat_interval_ms() -> u64 {
    2_000
}
fn default_routing_interval_ms() -> u64 {
    2_000
}
fn default_routing_fetch_ms() -> u64 {
    10_000
}

impl NodeConfig {
    /// Config with defaults for the given data directory.
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            listen_addr: default_listen_addr(),
            bootstrap: Vec::new(),
            max_peers: default_max_peers(),
            max_width: default_max_width(),
            cache_size: default_cache_size(),
            cache_sample: default_cache_sample(),
            msg_size: default_msg_size(),
            dial_timeout_ms: default_dial_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            routing_table_interval_ms: default_routing_interval_ms(),
            routing_fetch_timeout_ms: default_routing_fetch_ms(),
        }
    }

    /// Dial / heartbeat-ping timeout.
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    /// Heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Routing gossip interval.
    pub fn routing_table_interval(&self) -> Duration {
        Duration::from_millis(self.routing_table_interval_ms)
    }

    /// Per-peer routing table fetch deadline.
    pub fn routing_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.routing_fetch_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_id_round_trip() {
        let key = vec![7u8; 32];
        let joined = join_access_id("abc", &key);
        let (id, got) = split_access_id(&joined).unwrap();
        assert_eq!(id, "abc");
        assert_eq!(got, key);
    }

    #[test]
    fn access_id_requires_separator() {
        assert_eq!(
            split_access_id("abc").unwrap_err(),
            AccessIdError::MissingSeparator
        );
        assert_eq!(
            split_access_id("a:b:c").unwrap_err(),
            AccessIdError::MissingSeparator
        );
    }

    #[test]
    fn access_id_rejects_bad_key() {
        assert_eq!(
            split_access_id("abc:!!!").unwrap_err(),
            AccessIdError::BadKey
        );
    }

    #[test]
    fn marshaled_records_reject_trailing_garbage() {
        let doc = Document {
            data: b"hello".to_vec(),
            content_type: "text/plain".to_string(),
            children: BTreeMap::new(),
        };
        let mut bytes = marshal_record(&doc).unwrap();
        let decoded: Document = unmarshal_record(&bytes, 1 << 20).unwrap();
        assert_eq!(decoded, doc);

        bytes.push(0);
        assert!(unmarshal_record::<Document>(&bytes, 1 << 20).is_err());
    }

    #[test]
    fn unmarshal_refuses_payloads_past_the_cap() {
        let doc = Document {
            data: vec![0u8; 1024],
            content_type: "application/octet-stream".to_string(),
            children: BTreeMap::new(),
        };
        let bytes = marshal_record(&doc).unwrap();
        assert!(matches!(
            unmarshal_record::<Document>(&bytes, 16),
            Err(RecordError::Oversize { limit: 16 })
        ));
    }

    #[test]
    fn signed_bytes_clears_signature() {
        let mut reference = Reference {
            value: b"document@abc:key".to_vec(),
            public_key: "pem".to_string(),
            timestamp: 42,
            signature: "sig".to_string(),
        };
        let a = reference.signed_bytes().unwrap();
        reference.signature = "other".to_string();
        let b = reference.signed_bytes().unwrap();
        assert_eq!(a, b);
    }
}
