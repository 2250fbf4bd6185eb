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

//! Routing gossip: a periodic pull of every peer's routing table, merged
//! into the local view at +1 hop.

use std::sync::Arc;
use tokio::time::timeout;
use tracing::debug;

use crate::core::routing::RoutingTable;
use crate::networking::node::{short_id, Node};
use crate::networking::rpc::NodeRpc;

impl Node {
    /// Record a locally stored id in the index-0 inventory filter.
    pub(crate) fn add_to_local_filter(&self, id: &str) {
        self.state().local_filter.add(id);
    }

    /// Compute the node's routing table view lazily: the local inventory
    /// folded with every connected peer's cached table, each shifted by
    /// one hop. Side-effect free, so the response is idempotent.
    pub fn get_routing_table(&self) -> RoutingTable {
        let max_width = self.config.max_width as usize;
        let state = self.state();
        let mut table = RoutingTable::local(state.local_filter.clone());
        for peer_id in state.peers.keys() {
            if let Some(peer_table) = state.routing_tables.get(peer_id) {
                table = RoutingTable::merge(&table, peer_table, max_width);
            }
        }
        // A contentless node with no peer tables would otherwise report a
        // single all-empty layer; returned tables end non-empty or empty.
        RoutingTable::from_filters(table.into_filters())
    }

    /// Background tick: snapshot the peer set, then pull each peer's table
    /// under a per-peer deadline. A failed pull clears that peer's cached
    /// table but never drops the peer; heartbeat owns liveness.
    pub(crate) async fn gossip_loop(self: Arc<Self>) {
        let period = self.config.routing_table_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = self.stopper.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let peers: Vec<(String, Arc<dyn NodeRpc>)> = self
                .state()
                .peers
                .iter()
                .map(|(id, peer)| (id.clone(), peer.client.clone()))
                .collect();

            let (tables_held, max_depth) = {
                let state = self.state();
                let depth = state
                    .routing_tables
                    .values()
                    .map(|t| t.len())
                    .max()
                    .unwrap_or(0);
                (state.routing_tables.len(), depth)
            };
            self.metrics.routing_tables_held.set(tables_held as i64);
            self.metrics.routing_table_depth.set(max_depth as i64);
            debug!(tables_held, layers = max_depth + 1, "gossip tick");

            for (peer_id, client) in peers {
                match timeout(
                    self.config.routing_fetch_timeout(),
                    client.get_routing_table(),
                )
                .await
                {
                    Ok(Ok(table)) => {
                        self.state().routing_tables.insert(peer_id, table);
                    }
                    Ok(Err(e)) => {
                        debug!(peer = %short_id(&peer_id), err = %e, "routing table fetch failed");
                        self.state().routing_tables.remove(&peer_id);
                    }
                    Err(_) => {
                        debug!(peer = %short_id(&peer_id), "routing table fetch timed out");
                        self.state().routing_tables.remove(&peer_id);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::routing::BloomFilter;
    use crate::core::types::{Message, NodeConfig, NodeMeta, Reference};
    use crate::networking::error::NodeError;
    use crate::networking::node::Peer;
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct StubRpc;

    #[async_trait]
    impl NodeRpc for StubRpc {
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
            _num_hops: i32,
        ) -> Result<Vec<u8>, NodeError> {
            unimplemented!()
        }
        async fn get_remote_reference(
            &self,
            _reference_id: &str,
            _num_hops: i32,
        ) -> Result<Reference, NodeError> {
            unimplemented!()
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

    fn insert_stub_peer(node: &Arc<Node>, peer_id: &str, table: RoutingTable) {
        let mut state = node.state();
        state.peers.insert(
            peer_id.to_string(),
            Peer {
                meta: NodeMeta {
                    id: peer_id.to_string(),
                    addrs: vec!["127.0.0.1:1".to_string()],
                    cert: String::new(),
                },
                client: Arc::new(StubRpc),
                cancel: CancellationToken::new(),
            },
        );
        state.routing_tables.insert(peer_id.to_string(), table);
    }

    #[test]
    fn routing_table_folds_in_peer_tables_at_one_hop() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(NodeConfig::with_path(dir.path().to_string_lossy())).unwrap();
        node.add_to_local_filter("local-doc");

        let mut peer_filter = BloomFilter::new();
        peer_filter.add("peer-doc");
        insert_stub_peer(&node, "peer-1", RoutingTable::local(peer_filter));

        let table = node.get_routing_table();
        assert_eq!(table.hops_to("local-doc"), Some(0));
        assert_eq!(table.hops_to("peer-doc"), Some(1));
        node.close();
    }

    #[test]
    fn routing_table_ignores_peers_without_cached_tables() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(NodeConfig::with_path(dir.path().to_string_lossy())).unwrap();
        node.add_to_local_filter("local-doc");

        insert_stub_peer(&node, "peer-1", RoutingTable::new());
        node.state().routing_tables.remove("peer-1");

        let table = node.get_routing_table();
        assert_eq!(table.len(), 1);
        assert_eq!(table.hops_to("local-doc"), Some(0));
        node.close();
    }

    #[test]
    fn routing_table_respects_width_cap() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NodeConfig::with_path(dir.path().to_string_lossy());
        config.max_width = 2;
        let node = Node::new(config).unwrap();
        node.add_to_local_filter("local-doc");

        let mut deep_filters = Vec::new();
        for i in 0..5 {
            let mut f = BloomFilter::new();
            f.add(&format!("deep-{i}"));
            deep_filters.push(f);
        }
        insert_stub_peer(&node, "peer-1", RoutingTable::from_filters(deep_filters));

        let table = node.get_routing_table();
        assert!(table.len() <= 2);
        node.close();
    }
}
