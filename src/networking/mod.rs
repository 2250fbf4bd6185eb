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
#![allow(missing_docs)]

//! Networking: pinned-certificate TLS transport, peer fabric, routing
//! gossip, remote resolution, pub/sub and the read-only HTTP viewer.

pub mod client;
pub mod error;
pub mod gossip;
pub mod http;
pub mod node;
pub mod peers;
pub mod pubsub;
pub mod resolver;
pub mod rpc;
pub mod tls;
