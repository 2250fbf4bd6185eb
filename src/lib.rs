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

//! Orbitfs - a peer-to-peer content-addressed file sharing node.
//!
//! This crate provides:
//! - Content-addressed encrypted document storage over an embedded KV store
//! - Signed mutable references (ECDSA P-256) resolvable by key hash
//! - A peer fabric over pinned-certificate TLS with heartbeat liveness
//! - Layered bloom-filter routing tables gossiped between peers
//! - Hop-limited remote resolution with verification and route fallback
//! - Best-effort publish/subscribe on reference channels
//! - Monitoring via Prometheus metrics and structured logging

/// Core primitives (types, crypto envelope, store, cache, routing).
pub mod core;
/// Observability (metrics).
pub mod monitoring;
/// Networking stack (TLS transport, peer fabric, gossip, resolver, pub/sub).
pub mod networking;
