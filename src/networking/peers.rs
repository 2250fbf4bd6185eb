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

//! Peer fabric: bootstrap, the AddNode state machine, the Hello handshake
//! and per-peer heartbeat liveness.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::crypto::identity::validate_cert_pem;
use crate::core::store::node_meta_key;
use crate::core::types::{marshal_record, NodeMeta};
use crate::networking::error::NodeError;
use crate::networking::node::{short_id, Node, Peer};
use crate::networking::rpc::{NodeRpc, RpcClient};
use crate::networking::tls;

/// Ceiling on the Hello exchange; the dial itself is bounded separately
/// by `dial_timeout`.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Clears the connecting marker on every exit path of `add_node`.
struct ConnectingGuard {
    node: Arc<Node>,
    id: String,
}

impl Drop for ConnectingGuard {
    fn drop(&mut self) {
        self.node.state().connecting.remove(&self.id);
    }
}

/// Check id, addresses and certificate of a peer meta.
pub(crate) fn validate_node_meta(meta: &NodeMeta) -> Result<(), NodeError> {
    if meta.id.is_empty() {
        return Err(NodeError::InvalidInput("peer meta: empty id".to_string()));
    }
    if !meta
        .addrs
        .iter()
        .any(|addr| tls::split_host_port(addr).is_ok())
    {
        return Err(NodeError::InvalidInput(format!(
            "peer meta {}: no well-formed address",
            short_id(&meta.id)
        )));
    }
    validate_cert_pem(&meta.cert).map_err(|_| {
        NodeError::InvalidInput(format!(
            "peer meta {}: unparseable certificate",
            short_id(&meta.id)
        ))
    })
}

impl Node {
    /// Bootstrap from a bare address: open a transient accept-any TLS
    /// channel, fetch the peer's meta, close, then reconnect with the
    /// certificate pinned via a forced `add_node`.
    pub async fn bootstrap_add_node(&self, addr: &str) -> Result<(), NodeError> {
        tls::split_host_port(addr)
            .map_err(|e| NodeError::InvalidInput(e.to_string()))?;

        let transient = self.stopper.child_token();
        let config = tls::accept_any_client_config()
            .map_err(|e| NodeError::Internal(format!("tls: {e}")))?;
        let client = self.dial_rpc(addr, config, transient.clone()).await?;
        let meta = match timeout(self.config.dial_timeout(), client.meta()).await {
            Ok(result) => result,
            Err(_) => Err(NodeError::PeerUnreachable(format!("meta timeout: {addr}"))),
        };
        transient.cancel();
        let meta = meta?;

        self.add_node(meta, true).await
    }

    /// Dial one address and drive an RPC client over the stream.
    pub(crate) async fn dial_rpc(
        &self,
        addr: &str,
        config: Arc<rustls::ClientConfig>,
        cancel: CancellationToken,
    ) -> Result<RpcClient, NodeError> {
        let stream = tls::connect(addr, config, self.config.dial_timeout())
            .await
            .map_err(|e| NodeError::PeerUnreachable(format!("{addr}: {e}")))?;
        Ok(RpcClient::start(
            stream,
            self.config.msg_size as usize,
            cancel,
        ))
    }

    /// Register a node and connect to it. `force` bypasses the max-peers
    /// and already-known checks; bootstrap and inbound Hello use it so the
    /// graph stays reachable.
    pub fn add_node(
        &self,
        meta: NodeMeta,
        force: bool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), NodeError>> + Send + '_>> {
        Box::pin(async move {
        if meta.id == self.id() {
            return Ok(());
        }
        validate_node_meta(&meta)?;
        debug!(peer = %short_id(&meta.id), force, "add node");

        let (is_new, already_peer, at_capacity) = {
            let mut state = self.state();
            let is_new = !state.peer_meta.contains_key(&meta.id);
            state.peer_meta.insert(meta.id.clone(), meta.clone());
            let already_peer = state.peers.contains_key(&meta.id);
            let at_capacity = state.peers.len() >= self.config.max_peers as usize;
            (is_new, already_peer, at_capacity)
        };
        self.persist_node_meta(&meta)?;

        if ((!is_new || at_capacity) && !force) || already_peer {
            return Ok(());
        }

        // One dial per peer id at a time.
        if !self.state().connecting.insert(meta.id.clone()) {
            return Ok(());
        }
        let _guard = ConnectingGuard {
            node: self.arc(),
            id: meta.id.clone(),
        };

        let cancel = self.stopper.child_token();
        let client = match self.connect_node(&meta, cancel.clone()).await {
            Ok(client) => client,
            Err(e) => {
                cancel.cancel();
                return Err(e);
            }
        };

        let hello = match timeout(HELLO_TIMEOUT, client.hello(self.meta())).await {
            Ok(Ok(hello)) => hello,
            Ok(Err(e)) => {
                cancel.cancel();
                return Err(e);
            }
            Err(_) => {
                cancel.cancel();
                return Err(NodeError::PeerUnreachable(format!(
                    "hello timeout: {}",
                    short_id(&meta.id)
                )));
            }
        };
        let (remote_meta, connected, known) = hello;
        if remote_meta.id != meta.id {
            cancel.cancel();
            return Err(NodeError::VerificationFailure(format!(
                "expected node {}; got {}",
                short_id(&meta.id),
                short_id(&remote_meta.id)
            )));
        }

        let peer = Peer {
            meta: meta.clone(),
            client: Arc::new(client.clone()),
            cancel: cancel.clone(),
        };
        let duplicate = {
            let mut state = self.state();
            if state.peers.contains_key(&meta.id) {
                true
            } else {
                state.peers.insert(meta.id.clone(), peer);
                self.metrics.peers.set(state.peers.len() as i64);
                false
            }
        };
        if duplicate {
            // Lost a dial race; prefer the connection that registered first.
            debug!(peer = %short_id(&meta.id), "duplicate connection; closing ours");
            cancel.cancel();
            return Ok(());
        }

        let hb_node = self.arc();
        let hb_id = meta.id.clone();
        let hb_client = client;
        tokio::spawn(async move { hb_node.heartbeat(hb_id, hb_client, cancel).await });

        // Fan out over the peer lists from the response. Known peers go
        // first: connecting to them maximizes the cross section of the
        // graph.
        let fan_node = self.arc();
        tokio::spawn(async move { fan_node.add_nodes(connected, known).await });

        Ok(())
    }

    /// Add peer lists learned from a Hello response.
    pub(crate) async fn add_nodes(&self, connected: Vec<NodeMeta>, known: Vec<NodeMeta>) {
        for meta in known.into_iter().chain(connected) {
            if let Err(e) = self.add_node(meta, false).await {
                debug!(err = %e, "add node from peer list failed");
            }
        }
    }

    /// Dial each advertised address in order, trusting only the pinned
    /// certificate.
    async fn connect_node(
        &self,
        meta: &NodeMeta,
        cancel: CancellationToken,
    ) -> Result<RpcClient, NodeError> {
        let config = tls::pinned_client_config(&meta.cert)
            .map_err(|e| NodeError::InvalidInput(format!("peer certificate: {e}")))?;

        let mut last = NodeError::PeerUnreachable(format!("no address for {}", short_id(&meta.id)));
        for addr in &meta.addrs {
            if tls::split_host_port(addr).is_err() {
                last = NodeError::InvalidInput(format!("malformed address {addr:?}"));
                continue;
            }
            match tls::connect(addr, config.clone(), self.config.dial_timeout()).await {
                Ok(stream) => {
                    return Ok(RpcClient::start(
                        stream,
                        self.config.msg_size as usize,
                        cancel,
                    ));
                }
                Err(e) => {
                    debug!(peer = %short_id(&meta.id), %addr, err = %e, "dial failed");
                    last = NodeError::PeerUnreachable(format!("{addr}: {e}"));
                }
            }
        }
        Err(last)
    }

    /// Per-peer liveness probe. The first failure closes the peer; gossip
    /// replaces it later.
    async fn heartbeat(self: Arc<Self>, peer_id: String, client: RpcClient, cancel: CancellationToken) {
        let period = self.config.heartbeat_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            match timeout(self.config.dial_timeout(), client.heart_beat()).await {
                Ok(Ok(())) => {}
                _ => {
                    warn!(peer = %short_id(&peer_id), "heartbeat failed; closing peer");
                    self.metrics.heartbeat_failed_total.inc();
                    self.close_peer(&peer_id);
                    return;
                }
            }
        }
    }

    /// Drop a peer and its cached routing table, cancelling its tasks.
    pub(crate) fn close_peer(&self, peer_id: &str) {
        let peer = {
            let mut state = self.state();
            state.routing_tables.remove(peer_id);
            let peer = state.peers.remove(peer_id);
            self.metrics.peers.set(state.peers.len() as i64);
            peer
        };
        if let Some(peer) = peer {
            peer.cancel.cancel();
        }
    }

    fn persist_node_meta(&self, meta: &NodeMeta) -> Result<(), NodeError> {
        let bytes = marshal_record(meta)?;
        self.store.put(&node_meta_key(&meta.id), &bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::TlsIdentity;

    fn valid_meta() -> NodeMeta {
        let identity = TlsIdentity::generate().unwrap();
        NodeMeta {
            id: identity.node_id(),
            addrs: vec!["127.0.0.1:4242".to_string()],
            cert: identity.cert_pem,
        }
    }

    #[test]
    fn validate_accepts_well_formed_meta() {
        validate_node_meta(&valid_meta()).unwrap();
    }

    #[test]
    fn validate_rejects_empty_id() {
        let mut meta = valid_meta();
        meta.id = String::new();
        assert!(validate_node_meta(&meta).is_err());
    }

    #[test]
    fn validate_rejects_bad_addresses() {
        let mut meta = valid_meta();
        meta.addrs = vec!["nonsense".to_string()];
        assert!(validate_node_meta(&meta).is_err());

        meta.addrs = vec![];
        assert!(validate_node_meta(&meta).is_err());
    }

    #[test]
    fn validate_accepts_one_good_address_among_bad() {
        let mut meta = valid_meta();
        meta.addrs = vec!["nonsense".to_string(), "127.0.0.1:1".to_string()];
        validate_node_meta(&meta).unwrap();
    }

    #[test]
    fn validate_rejects_garbage_cert() {
        let mut meta = valid_meta();
        meta.cert = "not a certificate".to_string();
        assert!(validate_node_meta(&meta).is_err());
    }
}
