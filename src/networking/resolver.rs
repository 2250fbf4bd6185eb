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

//! Remote resolver: local store first, then hop-limited fetches across
//! candidate routes with verification and fallback.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::crypto::{hash_bytes, hash_json, identity};
use crate::core::store::{document_key, reference_key};
use crate::core::types::{unmarshal_record, Reference};
use crate::networking::error::NodeError;
use crate::networking::node::{short_id, Node};
use crate::networking::rpc::NodeRpc;

/// One candidate path to an id: a peer whose cached routing table tests
/// positive at some layer, with the implied hop estimate.
pub(crate) struct Route {
    pub(crate) peer_id: String,
    pub(crate) client: Arc<dyn NodeRpc>,
    pub(crate) num_hops: i32,
}

impl Node {
    /// Candidate routes for `id`, sorted by ascending hop estimate. A hit
    /// at layer i of a peer's table means the item is roughly i hops from
    /// that peer, so i+1 from here.
    pub(crate) fn routes_for(&self, id: &str) -> Vec<Route> {
        let state = self.state();
        let mut routes = Vec::new();
        for (peer_id, peer) in &state.peers {
            let Some(table) = state.routing_tables.get(peer_id) else {
                continue;
            };
            if let Some(layer) = table.hops_to(id) {
                routes.push(Route {
                    peer_id: peer_id.clone(),
                    client: peer.client.clone(),
                    num_hops: layer as i32 + 1,
                });
            }
        }
        routes.sort_by_key(|r| r.num_hops);
        routes
    }

    /// Fetch a document body, locally or across the network. A negative
    /// budget means "infer from the route": it is rewritten to the
    /// selected route's hop estimate at this first forwarding hop.
    /// Verified fetches are cached as imported copies.
    pub async fn get_remote_document(
        &self,
        document_id: &str,
        num_hops: i32,
    ) -> Result<Vec<u8>, NodeError> {
        if let Some(body) = self.store.get(&document_key(document_id))? {
            let _ = self.lru.touch(document_id);
            return Ok(body);
        }
        if num_hops == 0 {
            return Err(NodeError::HopsExhausted(document_id.to_string()));
        }

        self.metrics.remote_fetch_total.inc();
        let routes = self.routes_for(document_id);
        if routes.is_empty() {
            return Err(NodeError::NoRoute(document_id.to_string()));
        }

        let mut last = NodeError::Internal(format!("failed to find document {document_id}"));
        for route in routes {
            let forward = if num_hops < 0 { route.num_hops } else { num_hops };
            match route.client.get_remote_document(document_id, forward).await {
                Ok(body) => {
                    if hash_bytes(&body) != document_id {
                        warn!(
                            peer = %short_id(&route.peer_id),
                            document = document_id,
                            "fetched body hashes differently; trying next route"
                        );
                        self.metrics.verification_failed_total.inc();
                        last = NodeError::VerificationFailure(format!(
                            "document {document_id}: body hash mismatch"
                        ));
                        continue;
                    }
                    match self.lru.store_fetched(document_id, &body) {
                        Ok(evictions) => {
                            self.metrics.cache_evictions_total.inc_by(evictions);
                            self.add_to_local_filter(document_id);
                        }
                        Err(e) => warn!(err = %e, "failed to cache fetched document"),
                    }
                    self.metrics.remote_fetch_ok_total.inc();
                    return Ok(body);
                }
                Err(e) => {
                    debug!(
                        peer = %short_id(&route.peer_id),
                        document = document_id,
                        err = %e,
                        "remote fetch failed"
                    );
                    last = e;
                }
            }
        }
        Err(last)
    }

    /// Fetch a signed reference, locally or across the network. Remote
    /// candidates must verify against their own public key, whose hash
    /// must equal the reference id.
    pub async fn get_remote_reference(
        &self,
        reference_id: &str,
        num_hops: i32,
    ) -> Result<Reference, NodeError> {
        if let Some(raw) = self.store.get(&reference_key(reference_id))? {
            let reference =
                unmarshal_record(&raw, self.config.msg_size as usize)?;
            return Ok(reference);
        }
        if num_hops == 0 {
            return Err(NodeError::HopsExhausted(reference_id.to_string()));
        }

        self.metrics.remote_fetch_total.inc();
        let routes = self.routes_for(reference_id);
        if routes.is_empty() {
            return Err(NodeError::NoRoute(reference_id.to_string()));
        }

        let mut last = NodeError::Internal(format!("failed to find reference {reference_id}"));
        for route in routes {
            let forward = if num_hops < 0 { route.num_hops } else { num_hops };
            match route.client.get_remote_reference(reference_id, forward).await {
                Ok(reference) => match verify_reference(&reference, reference_id) {
                    Ok(()) => {
                        self.metrics.remote_fetch_ok_total.inc();
                        return Ok(reference);
                    }
                    Err(e) => {
                        warn!(
                            peer = %short_id(&route.peer_id),
                            reference = reference_id,
                            err = %e,
                            "fetched reference failed verification; trying next route"
                        );
                        self.metrics.verification_failed_total.inc();
                        last = e;
                    }
                },
                Err(e) => {
                    debug!(
                        peer = %short_id(&route.peer_id),
                        reference = reference_id,
                        err = %e,
                        "remote fetch failed"
                    );
                    last = e;
                }
            }
        }
        Err(last)
    }
}

/// Verify a fetched reference: the signature must hold under its own
/// public key and the key hash must equal the reference id. Never
/// recovered by trusting the payload.
pub(crate) fn verify_reference(reference: &Reference, reference_id: &str) -> Result<(), NodeError> {
    let signed = reference.signed_bytes()?;
    identity::verify(&reference.public_key, &signed, &reference.signature).map_err(|_| {
        NodeError::VerificationFailure(format!("reference {reference_id}: bad signature"))
    })?;
    let id = hash_json(&reference.public_key)?;
    if id != reference_id {
        return Err(NodeError::VerificationFailure(format!(
            "reference {reference_id}: public key hashes to {id}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::routing::{BloomFilter, RoutingTable};
    use crate::core::store::cache_key;
    use crate::core::types::{Message, NodeConfig, NodeMeta};
    use crate::networking::node::Peer;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    /// Fake peer serving a fixed document body and recording hop budgets.
    struct FakePeer {
        body: Vec<u8>,
        seen_hops: Mutex<Vec<i32>>,
    }

    #[async_trait]
    impl NodeRpc for FakePeer {
        async fn hello(
            &self,
            _meta: NodeMeta,
        ) -> Result<(NodeMeta, Vec<NodeMeta>, Vec<NodeMeta>), NodeError> {
            unimplemented!()
        }
        async fn meta(&self) -> Result<NodeMeta, NodeError> {
            unimplemented!()
        }
        async fn heart_beat(&self) -> Result<(), NodeError> {
            Ok(())
        }
        async fn get_routing_table(&self) -> Result<RoutingTable, NodeError> {
            unimplemented!()
        }
        async fn get_remote_document(
            &self,
            _document_id: &str,
            num_hops: i32,
        ) -> Result<Vec<u8>, NodeError> {
            self.seen_hops.lock().unwrap().push(num_hops);
            Ok(self.body.clone())
        }
        async fn get_remote_reference(
            &self,
            _reference_id: &str,
            _num_hops: i32,
        ) -> Result<Reference, NodeError> {
            Err(NodeError::NoRoute("none".to_string()))
        }
        async fn subscribe(
            &self,
            _channel_id: &str,
            _starting: i64,
            _num_hops: i32,
        ) -> Result<mpsc::Receiver<Message>, NodeError> {
            unimplemented!()
        }
    }

    fn temp_node() -> (tempfile::TempDir, Arc<Node>) {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(NodeConfig::with_path(dir.path().to_string_lossy())).unwrap();
        (dir, node)
    }

    fn register_fake(
        node: &Arc<Node>,
        peer_id: &str,
        fake: Arc<FakePeer>,
        advertises: &str,
        layer: usize,
    ) {
        let mut filters = vec![BloomFilter::new(); layer + 1];
        filters[layer].add(advertises);
        let mut state = node.state();
        state.peers.insert(
            peer_id.to_string(),
            Peer {
                meta: NodeMeta {
                    id: peer_id.to_string(),
                    addrs: vec!["127.0.0.1:1".to_string()],
                    cert: String::new(),
                },
                client: fake,
                cancel: CancellationToken::new(),
            },
        );
        state
            .routing_tables
            .insert(peer_id.to_string(), RoutingTable::from_filters(filters));
    }

    #[tokio::test]
    async fn local_document_returns_without_network() {
        let (_dir, node) = temp_node();
        node.store.put(&document_key("abc"), b"body").unwrap();
        let body = node.get_remote_document("abc", 0).await.unwrap();
        assert_eq!(body, b"body");
        node.close();
    }

    #[tokio::test]
    async fn zero_budget_without_local_copy_exhausts() {
        let (_dir, node) = temp_node();
        let err = node.get_remote_document("missing", 0).await.unwrap_err();
        assert!(matches!(err, NodeError::HopsExhausted(_)));
        node.close();
    }

    #[tokio::test]
    async fn no_matching_peer_is_no_route() {
        let (_dir, node) = temp_node();
        let err = node.get_remote_document("missing", -1).await.unwrap_err();
        assert!(matches!(err, NodeError::NoRoute(_)));
        node.close();
    }

    #[tokio::test]
    async fn sentinel_budget_is_rewritten_to_route_estimate() {
        let (_dir, node) = temp_node();
        let body = b"the payload".to_vec();
        let id = hash_bytes(&body);
        let fake = Arc::new(FakePeer {
            body,
            seen_hops: Mutex::new(Vec::new()),
        });
        register_fake(&node, "peer-1", fake.clone(), &id, 0);

        let got = node.get_remote_document(&id, -1).await.unwrap();
        assert_eq!(hash_bytes(&got), id);
        // Layer 0 hit on the peer's table implies a 1-hop route.
        assert_eq!(*fake.seen_hops.lock().unwrap(), vec![1]);
        node.close();
    }

    #[tokio::test]
    async fn verified_fetch_is_cached_as_import() {
        let (_dir, node) = temp_node();
        let body = b"cache me".to_vec();
        let id = hash_bytes(&body);
        let fake = Arc::new(FakePeer {
            body: body.clone(),
            seen_hops: Mutex::new(Vec::new()),
        });
        register_fake(&node, "peer-1", fake, &id, 0);

        node.get_remote_document(&id, -1).await.unwrap();
        assert_eq!(node.store.get(&document_key(&id)).unwrap(), Some(body));
        assert!(node.store.contains(&cache_key(&id)).unwrap());
        // The imported copy now shows in the inventory filter.
        assert_eq!(node.get_routing_table().hops_to(&id), Some(0));
        node.close();
    }

    #[tokio::test]
    async fn hash_mismatch_falls_back_to_next_route() {
        let (_dir, node) = temp_node();
        let body = b"the real body".to_vec();
        let id = hash_bytes(&body);

        let liar = Arc::new(FakePeer {
            body: b"forged".to_vec(),
            seen_hops: Mutex::new(Vec::new()),
        });
        let honest = Arc::new(FakePeer {
            body: body.clone(),
            seen_hops: Mutex::new(Vec::new()),
        });
        // The liar advertises a shorter route so it is tried first.
        register_fake(&node, "liar", liar.clone(), &id, 0);
        register_fake(&node, "honest", honest, &id, 1);

        let got = node.get_remote_document(&id, -1).await.unwrap();
        assert_eq!(got, body);
        assert_eq!(liar.seen_hops.lock().unwrap().len(), 1);
        node.close();
    }

    #[test]
    fn reference_verification_rejects_tampering() {
        use crate::core::crypto::identity::{generate_private, marshal_public, sign};

        let key = generate_private();
        let public_pem = marshal_public(key.verifying_key()).unwrap();
        let mut reference = Reference {
            value: b"document@abc:key".to_vec(),
            public_key: public_pem.clone(),
            timestamp: 1,
            signature: String::new(),
        };
        reference.signature = sign(&key, &reference.signed_bytes().unwrap());
        let reference_id = hash_json(&public_pem).unwrap();

        verify_reference(&reference, &reference_id).unwrap();

        let mut tampered = reference.clone();
        tampered.value = b"document@evil:key".to_vec();
        assert!(matches!(
            verify_reference(&tampered, &reference_id).unwrap_err(),
            NodeError::VerificationFailure(_)
        ));

        // A valid reference under the wrong id is also rejected.
        assert!(verify_reference(&reference, "some-other-id").is_err());
    }
}
