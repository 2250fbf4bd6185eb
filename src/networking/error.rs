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

//! Node-surface error taxonomy. These cross the wire, so variants carry
//! plain strings rather than source errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::cache::CacheError;
use crate::core::crypto::CryptoError;
use crate::core::store::StoreError;
use crate::core::types::{AccessIdError, RecordError};

/// Errors surfaced by node operations.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeError {
    /// Not in the local store; transient for the resolver, which falls
    /// through to a network lookup.
    #[error("not found locally: {0}")]
    NotFoundLocal(String),
    /// The hop budget reached zero with the item still remote. Terminal.
    #[error("max number of hops reached: {0}")]
    HopsExhausted(String),
    /// No peer's routing table matches.
    #[error("no routes to {0}")]
    NoRoute(String),
    /// Hash mismatch or invalid signature. Never recovered by trusting the
    /// payload; the resolver moves to the next candidate.
    #[error("verification failure: {0}")]
    VerificationFailure(String),
    /// Dial, heartbeat or routing-fetch failure.
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),
    /// Malformed access id, missing document, malformed PEM key.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// KV or crypto failure surfaced to the caller.
    #[error("internal: {0}")]
    Internal(String),
}

impl From<StoreError> for NodeError {
    fn from(e: StoreError) -> Self {
        NodeError::Internal(e.to_string())
    }
}

impl From<RecordError> for NodeError {
    fn from(e: RecordError) -> Self {
        NodeError::Internal(e.to_string())
    }
}

impl From<CryptoError> for NodeError {
    fn from(e: CryptoError) -> Self {
        NodeError::Internal(e.to_string())
    }
}

impl From<CacheError> for NodeError {
    fn from(e: CacheError) -> Self {
        NodeError::Internal(e.to_string())
    }
}

impl From<AccessIdError> for NodeError {
    fn from(e: AccessIdError) -> Self {
        NodeError::InvalidInput(e.to_string())
    }
}
