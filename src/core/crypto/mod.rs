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

//! Crypto envelope: symmetric sealing, content hashing, ECDSA identities
//! and self-signed certificates.

pub mod envelope;
pub mod identity;

pub use envelope::{
    generate_key, hash_bytes, hash_json, open_bytes, open_document, seal_bytes, seal_document,
    CryptoError, KEY_LEN,
};
pub use identity::{
    derive_owner_key, load_private_pem, load_public_pem, marshal_public, node_id_from_cert, sign,
    verify, IdentityError, TlsIdentity,
};
