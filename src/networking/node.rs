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

//! Node lifecycle: state, startup, the multiplexed TLS listener and
//! shutdown sequencing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::cache::Lru;
use crate::core::crypto::identity::TlsIdentity;
use crate::core::routing::{BloomFilter, RoutingTable};
use crate::core::store::{
    Store, DOCUMENT_PREFIX, NODE_META_PREFIX, REFERENCE_PREFIX, TLS_CERT_KEY, TLS_KEY_KEY,
    TLS_PRIVATE_KEY_KEY,
};
use crate::core::types::{unmarshal_record, Message, NodeConfig, NodeMeta};
use crate::monitoring::metrics::Metrics;
use crate::networking::error::NodeError;
use crate::networking::http;
use crate::networking::pubsub::Channel;
use crate::networking::rpc::{self, NodeRpc, Request, Response, RpcHandler, RPC_MAGIC};
use crate::networking::tls;

const NODE_META_MAX_BYTES: usize = 64 * 1024;

/// A connected peer: pinned metadata, its RPC stub and the cancellation
/// token owning its background tasks. The stub is behind a trait so tests
/// can substitute an in-memory fake.
#[derive(Clone)]
pub struct Peer {
    /// Pinned peer metadata.
    pub meta: NodeMeta,
    /// RPC stub over the long-lived connection.
    pub client: Arc<dyn NodeRpc>,
    pub(crate) cancel: CancellationToken,
}

/// State behind the node's single coarse mutex. The lock is never held
/// across network I/O: callers snapshot what they need and release.
pub(crate) struct Shared {
    pub(crate) listen_addr: Option<SocketAddr>,
    pub(crate) peer_meta: HashMap<String, NodeMeta>,
    pub(crate) peers: HashMap<String, Peer>,
    pub(crate) connecting: HashSet<String>,
    pub(crate) routing_tables: HashMap<String, RoutingTable>,
    pub(crate) local_filter: BloomFilter,
    pub(crate) channels: HashMap<String, Channel>,
    pub(crate) next_listener_id: u64,
}

/// One file-sharing node.
pub struct Node {
    pub(crate) config: NodeConfig,
    pub(crate) store: Store,
    pub(crate) lru: Lru,
    pub(crate) identity: TlsIdentity,
    node_id: String,
    server_tls: Arc<rustls::ServerConfig>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) stopper: CancellationToken,
    shared: Mutex<Shared>,
    weak: std::sync::Weak<Node>,
}

impl Node {
    /// Open the store, load or generate the TLS identity, rebuild the
    /// local inventory filter and load persisted peer metadata.
    pub fn new(config: NodeConfig) -> Result<Arc<Self>, NodeError> {
        if config.path.is_empty() {
            return Err(NodeError::InvalidInput(
                "config: path must not be empty".to_string(),
            ));
        }
        std::fs::create_dir_all(&config.path)
            .map_err(|e| NodeError::Internal(format!("data dir: {e}")))?;
        let kv_path = Path::new(&config.path).join("kv");
        let store = Store::open(&kv_path.to_string_lossy())?;

        let identity = load_or_generate_identity(&store)?;
        let node_id = identity.node_id();
        let server_tls = tls::server_config(&identity.cert_pem, &identity.key_pem)
            .map_err(|e| NodeError::Internal(format!("tls: {e}")))?;

        let mut local_filter = BloomFilter::new();
        for prefix in [DOCUMENT_PREFIX, REFERENCE_PREFIX] {
            for (key, _) in store.scan_prefix(prefix)? {
                local_filter.add(key.trim_start_matches(prefix));
            }
        }

        let mut peer_meta = HashMap::new();
        for (_, raw) in store.scan_prefix(NODE_META_PREFIX)? {
            match unmarshal_record::<NodeMeta>(&raw, NODE_META_MAX_BYTES) {
                Ok(meta) => {
                    peer_meta.insert(meta.id.clone(), meta);
                }
                Err(_) => warn!("dropping undecodable persisted peer meta"),
            }
        }

        let metrics = Arc::new(
            Metrics::new().map_err(|e| NodeError::Internal(format!("metrics: {e}")))?,
        );
        let lru = Lru::new(
            store.clone(),
            config.cache_size,
            config.cache_sample as usize,
        );

        Ok(Arc::new_cyclic(|weak| Self {
            config,
            store,
            lru,
            identity,
            node_id,
            server_tls,
            metrics,
            stopper: CancellationToken::new(),
            shared: Mutex::new(Shared {
                listen_addr: None,
                peer_meta,
                peers: HashMap::new(),
                connecting: HashSet::new(),
                routing_tables: HashMap::new(),
                local_filter,
                channels: HashMap::new(),
                next_listener_id: 0,
            }),
            weak: weak.clone(),
        }))
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A strong handle to this node for spawned tasks and guards. Always
    /// resolvable while a caller holds `&self` through an `Arc`.
    pub(crate) fn arc(&self) -> Arc<Node> {
        self.weak.upgrade().expect("node still referenced")
    }

    /// Stable node id.
    pub fn id(&self) -> &str {
        &self.node_id
    }

    /// The underlying content store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Metrics registry and instruments.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Number of live peer connections.
    pub fn num_connections(&self) -> usize {
        self.state().peers.len()
    }

    /// This node's metadata: id, advertised addresses and pinned cert.
    pub fn meta(&self) -> NodeMeta {
        let listen_addr = self.state().listen_addr;
        let mut addrs = Vec::new();
        if let Some(addr) = listen_addr {
            let host = if addr.ip().is_unspecified() {
                local_ip_address::local_ip()
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|_| "127.0.0.1".to_string())
            } else {
                addr.ip().to_string()
            };
            addrs.push(format!("{}:{}", host, addr.port()));
        }
        NodeMeta {
            id: self.node_id.clone(),
            addrs,
            cert: self.identity.cert_pem.clone(),
        }
    }

    /// Hello handler: force a connection back to the caller so links never
    /// stay one-way, then report our meta, connected peers and other known
    /// peers.
    pub async fn hello(
        &self,
        caller: NodeMeta,
    ) -> Result<(NodeMeta, Vec<NodeMeta>, Vec<NodeMeta>), NodeError> {
        let meta = self.meta();
        self.add_node(caller, true).await?;

        let state = self.state();
        let connected: Vec<NodeMeta> = state.peers.values().map(|p| p.meta.clone()).collect();
        let known: Vec<NodeMeta> = state
            .peer_meta
            .values()
            .filter(|m| !state.peers.contains_key(&m.id))
            .cloned()
            .collect();
        Ok((meta, connected, known))
    }

    /// Bind the listener, then serve RPC and HTTP viewer traffic on it and
    /// start the routing gossip loop. Returns the bound address.
    pub async fn listen(&self) -> Result<SocketAddr, NodeError> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|e| NodeError::Internal(format!("listen: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| NodeError::Internal(format!("listen: {e}")))?;
        self.state().listen_addr = Some(addr);
        info!(node = %short_id(&self.node_id), %addr, "listening");

        let gossip_node = self.arc();
        tokio::spawn(async move { gossip_node.gossip_loop().await });

        let accept_node = self.arc();
        let acceptor = TlsAcceptor::from(self.server_tls.clone());
        let stopper = self.stopper.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = stopper.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                let Ok((tcp, _)) = accepted else { continue };
                let node = accept_node.clone();
                let acceptor = acceptor.clone();
                tokio::spawn(async move { node.handle_connection(tcp, acceptor).await });
            }
        });

        Ok(addr)
    }

    /// Accept one connection: TLS handshake, then protocol sniff. RPC
    /// dialers announce themselves with a magic; anything else is served
    /// as HTTP by the read-only viewer.
    async fn handle_connection(self: Arc<Self>, tcp: TcpStream, acceptor: TlsAcceptor) {
        let _ = tcp.set_nodelay(true);
        let mut stream = match acceptor.accept(tcp).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(err = %e, "tls accept failed");
                return;
            }
        };

        let mut first = [0u8; 4];
        if stream.read_exact(&mut first).await.is_err() {
            return;
        }
        if first == RPC_MAGIC {
            rpc::serve_connection(
                stream,
                self.clone(),
                self.config.msg_size as usize,
                self.stopper.child_token(),
            )
            .await;
        } else {
            http::serve_http(self.clone(), first.to_vec(), stream).await;
        }
    }

    /// Close the node: cancel every task through the stopper, tear down
    /// peers, and flush the store last.
    pub fn close(&self) {
        info!(node = %short_id(&self.node_id), "shutting down");
        self.stopper.cancel();
        let peers: Vec<Peer> = {
            let mut state = self.state();
            state.routing_tables.clear();
            state.peers.drain().map(|(_, p)| p).collect()
        };
        for peer in peers {
            peer.cancel.cancel();
        }
        self.metrics.peers.set(0);
        self.store.close();
    }
}

/// Shorten a node id for log lines.
pub(crate) fn short_id(id: &str) -> &str {
    &id[..id.len().min(8)]
}

/// Unix seconds, for reference and message timestamps.
pub(crate) fn unix_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Consume one hop of budget on arrival at a forwarding node. The -1
/// sentinel stays -1: it is rewritten to a concrete hop count at the
/// first forwarding hop by route selection, not here.
fn consume_hop(num_hops: i32) -> i32 {
    if num_hops < 0 {
        -1
    } else {
        (num_hops - 1).max(0)
    }
}

fn load_or_generate_identity(store: &Store) -> Result<TlsIdentity, NodeError> {
    let cert = store.get(TLS_CERT_KEY)?;
    let key = store.get(TLS_KEY_KEY)?;
    if let (Some(cert), Some(key)) = (cert, key) {
        let cert_pem = String::from_utf8(cert)
            .map_err(|_| NodeError::Internal("stored cert is not utf-8".to_string()))?;
        let key_pem = String::from_utf8(key)
            .map_err(|_| NodeError::Internal("stored key is not utf-8".to_string()))?;
        return Ok(TlsIdentity { cert_pem, key_pem });
    }

    let identity = TlsIdentity::generate()
        .map_err(|e| NodeError::Internal(format!("generate identity: {e}")))?;
    store.put(TLS_CERT_KEY, identity.cert_pem.as_bytes())?;
    store.put(TLS_KEY_KEY, identity.key_pem.as_bytes())?;
    store.put(TLS_PRIVATE_KEY_KEY, identity.key_pem.as_bytes())?;
    Ok(identity)
}

#[async_trait]
impl RpcHandler for Node {
    async fn call(self: Arc<Self>, request: Request) -> Result<Response, NodeError> {
        match request {
            Request::Hello { meta } => {
                let (meta, connected, known) = self.hello(meta).await?;
                Ok(Response::Hello {
                    meta,
                    connected,
                    known,
                })
            }
            Request::Meta => Ok(Response::Meta { meta: self.meta() }),
            Request::HeartBeat => Ok(Response::HeartBeat),
            Request::GetRoutingTable => Ok(Response::RoutingTable {
                table: self.get_routing_table(),
            }),
            Request::GetRemoteDocument {
                document_id,
                num_hops,
            } => {
                let body = self
                    .get_remote_document(&document_id, consume_hop(num_hops))
                    .await?;
                Ok(Response::RemoteDocument { body })
            }
            Request::GetRemoteReference {
                reference_id,
                num_hops,
            } => {
                let reference = self
                    .get_remote_reference(&reference_id, consume_hop(num_hops))
                    .await?;
                Ok(Response::RemoteReference { reference })
            }
            Request::Get { access_id } => {
                let document = self.get(&access_id).await?;
                Ok(Response::Document { document })
            }
            Request::Add { document } => {
                let access_id = self.add(document)?;
                Ok(Response::Added { access_id })
            }
            Request::GetPeers => Ok(Response::Peers {
                peers: self.get_peers(),
            }),
            Request::AddPeer { addr } => {
                self.bootstrap_add_node(&addr).await?;
                Ok(Response::PeerAdded)
            }
            Request::GetReference { reference_id } => {
                let reference = self.get_reference(&reference_id).await?;
                Ok(Response::Reference { reference })
            }
            Request::AddReference {
                private_key_pem,
                record,
            } => {
                let reference_id = self.add_reference(&private_key_pem, &record)?;
                Ok(Response::ReferenceAdded { reference_id })
            }
            Request::Publish {
                private_key_pem,
                message,
            } => {
                let listeners = self.publish(&private_key_pem, &message)?;
                Ok(Response::Published { listeners })
            }
            Request::Subscribe { .. } | Request::SubscribeClient { .. } => Err(
                NodeError::Internal("subscription on unary path".to_string()),
            ),
        }
    }

    async fn subscribe(
        self: Arc<Self>,
        request: Request,
    ) -> Result<mpsc::Receiver<Message>, NodeError> {
        match request {
            Request::Subscribe {
                channel_id,
                starting,
                num_hops,
            } => {
                self.subscribe_stream(&channel_id, starting, consume_hop(num_hops))
                    .await
            }
            Request::SubscribeClient { channel_id } => {
                self.subscribe_stream(&channel_id, 0, -1).await
            }
            _ => Err(NodeError::Internal(
                "unary request on subscription path".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::NodeConfig;

    fn temp_node() -> (tempfile::TempDir, Arc<Node>) {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig::with_path(dir.path().to_string_lossy());
        let node = Node::new(config).unwrap();
        (dir, node)
    }

    #[test]
    fn identity_persists_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig::with_path(dir.path().to_string_lossy());
        let id = {
            let node = Node::new(config.clone()).unwrap();
            let id = node.id().to_string();
            node.close();
            id
        };
        let node = Node::new(config).unwrap();
        assert_eq!(node.id(), id);
        node.close();
    }

    #[test]
    fn consume_hop_keeps_sentinel_and_bottoms_out() {
        assert_eq!(consume_hop(-1), -1);
        assert_eq!(consume_hop(-7), -1);
        assert_eq!(consume_hop(0), 0);
        assert_eq!(consume_hop(1), 0);
        assert_eq!(consume_hop(3), 2);
    }

    #[test]
    fn meta_is_empty_until_listening() {
        let (_dir, node) = temp_node();
        let meta = node.meta();
        assert_eq!(meta.id, node.id());
        assert!(meta.addrs.is_empty());
        assert!(!meta.cert.is_empty());
        node.close();
    }
}
