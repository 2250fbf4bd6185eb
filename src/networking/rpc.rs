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

//! Frame protocol carrying both node services over one long-lived stream.
//!
//! Frames are length-prefixed canonical bincode, tagged with a
//! connection-scoped id so calls multiplex: a request gets one response
//! frame, a subscription gets a response frame followed by message frames
//! until an end frame. The dialer writes a 4-byte magic first so the
//! listener can tell RPC streams apart from HTTP viewer traffic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::routing::RoutingTable;
use crate::core::types::{
    marshal_record, unmarshal_record, Document, Message, NodeMeta, Reference,
};
use crate::networking::error::NodeError;

/// First bytes written by an RPC dialer after the TLS handshake.
pub const RPC_MAGIC: [u8; 4] = *b"ORB1";

/// Listener queue depth for subscription forwarding.
pub const SUBSCRIBE_QUEUE_DEPTH: usize = 10;

/// Wire requests for both services.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Request {
    // Node service (peer-facing).
    /// Introduce ourselves; the receiver forces a connection back.
    Hello {
        /// Caller metadata.
        meta: NodeMeta,
    },
    /// Fetch the receiver's metadata.
    Meta,
    /// Liveness probe.
    HeartBeat,
    /// Fetch the receiver's current routing table view.
    GetRoutingTable,
    /// Hop-limited document fetch. `num_hops == -1` means "infer from the
    /// route at the first forwarding hop".
    GetRemoteDocument {
        /// Content hash of the wanted ciphertext.
        document_id: String,
        /// Remaining hop budget, or -1.
        num_hops: i32,
    },
    /// Hop-limited reference fetch.
    GetRemoteReference {
        /// Hash of the owning public key.
        reference_id: String,
        /// Remaining hop budget, or -1.
        num_hops: i32,
    },
    /// Hop-limited subscription. `starting` is carried for compatibility
    /// but there is no persistent replay.
    Subscribe {
        /// Channel (reference) id.
        channel_id: String,
        /// Requested starting offset; unused.
        starting: i64,
        /// Remaining hop budget, or -1.
        num_hops: i32,
    },

    // Client service (local-facing).
    /// Fetch and decrypt a document by access id.
    Get {
        /// `<document-id>:<key>` capability string.
        access_id: String,
    },
    /// Add a document, returning its access id.
    Add {
        /// Document to seal and store.
        document: Document,
    },
    /// List known peers.
    GetPeers,
    /// Bootstrap a peer by address.
    AddPeer {
        /// `host:port` to bootstrap from.
        addr: String,
    },
    /// Fetch a reference, decrypting its value when a key is attached.
    GetReference {
        /// `reference-id` or `reference-id:key`.
        reference_id: String,
    },
    /// Create or update a reference signed by the given key.
    AddReference {
        /// Owner ECDSA private key, PEM.
        private_key_pem: String,
        /// Record to seal into the reference value.
        record: String,
    },
    /// Publish a signed message on the key's channel.
    Publish {
        /// Publisher ECDSA private key, PEM.
        private_key_pem: String,
        /// Message text.
        message: String,
    },
    /// Subscribe to a channel from a local client.
    SubscribeClient {
        /// Channel (reference) id.
        channel_id: String,
    },
}

/// Wire responses, one variant per request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Response {
    /// Hello reply: receiver meta plus peer lists.
    Hello {
        /// Receiver metadata.
        meta: NodeMeta,
        /// Peers the receiver is connected to.
        connected: Vec<NodeMeta>,
        /// Peers the receiver merely knows about.
        known: Vec<NodeMeta>,
    },
    /// Meta reply.
    Meta {
        /// Receiver metadata.
        meta: NodeMeta,
    },
    /// Heartbeat acknowledgement.
    HeartBeat,
    /// Routing table reply.
    RoutingTable {
        /// The receiver's merged view.
        table: RoutingTable,
    },
    /// Raw stored ciphertext for a document fetch.
    RemoteDocument {
        /// Ciphertext body as stored.
        body: Vec<u8>,
    },
    /// Signed reference for a reference fetch.
    RemoteReference {
        /// The stored reference.
        reference: Reference,
    },
    /// Subscription accepted; message frames follow.
    Subscribed,
    /// Decrypted document.
    Document {
        /// The plaintext document.
        document: Document,
    },
    /// Access id for a newly added document.
    Added {
        /// `<document-id>:<key>` capability string.
        access_id: String,
    },
    /// Known peer list.
    Peers {
        /// Peer metadata records.
        peers: Vec<NodeMeta>,
    },
    /// Peer bootstrap acknowledgement.
    PeerAdded,
    /// Reference reply.
    Reference {
        /// The reference, value decrypted when a key was attached.
        reference: Reference,
    },
    /// Access id for a newly added reference.
    ReferenceAdded {
        /// `<reference-id>:<key>` capability string.
        reference_id: String,
    },
    /// Publish fanout count.
    Published {
        /// Listeners that received the message.
        listeners: u32,
    },
}

/// One frame on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Frame {
    /// A request, answered by a response frame with the same id.
    Request {
        /// Connection-scoped id.
        id: u64,
        /// The request.
        request: Request,
    },
    /// The answer to a request.
    Response {
        /// Id of the request being answered.
        id: u64,
        /// Outcome.
        response: Result<Response, NodeError>,
    },
    /// A pushed subscription message.
    Message {
        /// Id of the owning subscription.
        id: u64,
        /// The message.
        message: Message,
    },
    /// End of a subscription stream.
    End {
        /// Id of the owning subscription.
        id: u64,
        /// Failure that ended the stream, if any.
        error: Option<NodeError>,
    },
}

/// Transport-level RPC errors.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("io: {0}")]
    Io(String),
    #[error("frame encoding")]
    Codec,
    #[error("frame too large")]
    TooLarge,
    #[error("connection closed")]
    Closed,
}

impl From<RpcError> for NodeError {
    fn from(e: RpcError) -> Self {
        NodeError::PeerUnreachable(e.to_string())
    }
}

/// Write one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
    max_bytes: usize,
) -> Result<(), RpcError> {
    let bytes = marshal_record(frame).map_err(|_| RpcError::Codec)?;
    if bytes.len() > max_bytes {
        return Err(RpcError::TooLarge);
    }
    writer
        .write_all(&(bytes.len() as u32).to_be_bytes())
        .await
        .map_err(|e| RpcError::Io(e.to_string()))?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| RpcError::Io(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| RpcError::Io(e.to_string()))?;
    Ok(())
}

/// Read one length-prefixed frame, enforcing the size cap before
/// allocating.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_bytes: usize,
) -> Result<Frame, RpcError> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| RpcError::Io(e.to_string()))?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_bytes {
        return Err(RpcError::TooLarge);
    }
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| RpcError::Io(e.to_string()))?;
    unmarshal_record(&buf, max_bytes).map_err(|_| RpcError::Codec)
}

/// The peer capability surface. Tests substitute in-memory fakes.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// `Hello(meta) -> (meta, connected, known)`.
    async fn hello(
        &self,
        meta: NodeMeta,
    ) -> Result<(NodeMeta, Vec<NodeMeta>, Vec<NodeMeta>), NodeError>;
    /// Fetch the peer's metadata.
    async fn meta(&self) -> Result<NodeMeta, NodeError>;
    /// Liveness probe.
    async fn heart_beat(&self) -> Result<(), NodeError>;
    /// Fetch the peer's routing table view.
    async fn get_routing_table(&self) -> Result<RoutingTable, NodeError>;
    /// Hop-limited document fetch.
    async fn get_remote_document(
        &self,
        document_id: &str,
        num_hops: i32,
    ) -> Result<Vec<u8>, NodeError>;
    /// Hop-limited reference fetch.
    async fn get_remote_reference(
        &self,
        reference_id: &str,
        num_hops: i32,
    ) -> Result<Reference, NodeError>;
    /// Hop-limited subscription; messages arrive on the returned channel
    /// until the upstream ends it.
    async fn subscribe(
        &self,
        channel_id: &str,
        starting: i64,
        num_hops: i32,
    ) -> Result<mpsc::Receiver<Message>, NodeError>;
}

enum Pending {
    Call(oneshot::Sender<Result<Response, NodeError>>),
    Stream {
        started: Option<oneshot::Sender<Result<(), NodeError>>>,
        sink: mpsc::Sender<Message>,
    },
}

struct ClientShared {
    writer_tx: mpsc::Sender<Frame>,
    pending: Mutex<HashMap<u64, Pending>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
}

impl ClientShared {
    fn fail_all(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        for (_, entry) in pending.drain() {
            match entry {
                Pending::Call(tx) => {
                    let _ = tx.send(Err(NodeError::PeerUnreachable(
                        "connection closed".to_string(),
                    )));
                }
                Pending::Stream { started, .. } => {
                    if let Some(tx) = started {
                        let _ = tx.send(Err(NodeError::PeerUnreachable(
                            "connection closed".to_string(),
                        )));
                    }
                }
            }
        }
    }
}

/// Typed client over one multiplexed RPC stream. Cloning shares the
/// underlying connection.
#[derive(Clone)]
pub struct RpcClient {
    shared: Arc<ClientShared>,
}

impl RpcClient {
    /// Drive `stream` as the dialing side: the magic goes out first, then
    /// frames. Reader and writer tasks stop when `cancel` fires or the
    /// stream fails, failing every in-flight call.
    pub fn start<S>(stream: S, max_bytes: usize, cancel: CancellationToken) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut read_half, mut write_half) = tokio::io::split(stream);
        let (writer_tx, mut writer_rx) = mpsc::channel::<Frame>(64);
        let shared = Arc::new(ClientShared {
            writer_tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            cancel: cancel.clone(),
        });

        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            if write_half.write_all(&RPC_MAGIC).await.is_err() {
                writer_cancel.cancel();
                return;
            }
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    frame = writer_rx.recv() => {
                        let Some(frame) = frame else { break };
                        if write_frame(&mut write_half, &frame, max_bytes).await.is_err() {
                            writer_cancel.cancel();
                            break;
                        }
                    }
                }
            }
        });

        let reader_shared = shared.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = reader_shared.cancel.cancelled() => break,
                    frame = read_frame(&mut read_half, max_bytes) => frame,
                };
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(err = %e, "rpc read failed");
                        break;
                    }
                };
                reader_shared.dispatch(frame);
            }
            reader_shared.cancel.cancel();
            reader_shared.fail_all();
        });

        Self { shared }
    }

    fn register_call(&self) -> (u64, oneshot::Receiver<Result<Response, NodeError>>) {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Pending::Call(tx));
        (id, rx)
    }

    /// One request, one response.
    pub async fn call(&self, request: Request) -> Result<Response, NodeError> {
        let (id, rx) = self.register_call();
        self.shared
            .writer_tx
            .send(Frame::Request { id, request })
            .await
            .map_err(|_| NodeError::PeerUnreachable("connection closed".to_string()))?;
        rx.await
            .map_err(|_| NodeError::PeerUnreachable("connection closed".to_string()))?
    }

    /// Issue a subscription request; resolves once the remote accepts,
    /// returning the message channel.
    pub async fn subscribe_request(
        &self,
        request: Request,
    ) -> Result<mpsc::Receiver<Message>, NodeError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (started_tx, started_rx) = oneshot::channel();
        let (sink, rx) = mpsc::channel(SUBSCRIBE_QUEUE_DEPTH);
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                id,
                Pending::Stream {
                    started: Some(started_tx),
                    sink,
                },
            );
        self.shared
            .writer_tx
            .send(Frame::Request { id, request })
            .await
            .map_err(|_| NodeError::PeerUnreachable("connection closed".to_string()))?;
        started_rx
            .await
            .map_err(|_| NodeError::PeerUnreachable("connection closed".to_string()))??;
        Ok(rx)
    }

    /// Stop the connection tasks.
    pub fn close(&self) {
        self.shared.cancel.cancel();
    }
}

impl ClientShared {
    fn dispatch(&self, frame: Frame) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        match frame {
            Frame::Response { id, response } => match pending.remove(&id) {
                Some(Pending::Call(tx)) => {
                    let _ = tx.send(response);
                }
                Some(Pending::Stream { mut started, sink }) => match response {
                    Ok(_) => {
                        if let Some(tx) = started.take() {
                            let _ = tx.send(Ok(()));
                        }
                        // Accepted: message frames follow under this id.
                        pending.insert(id, Pending::Stream { started, sink });
                    }
                    Err(e) => {
                        if let Some(tx) = started.take() {
                            let _ = tx.send(Err(e));
                        }
                    }
                },
                None => {}
            },
            Frame::Message { id, message } => {
                if let Some(Pending::Stream { sink, .. }) = pending.get(&id) {
                    // Best-effort: a slow consumer drops messages rather
                    // than stalling the connection reader.
                    let _ = sink.try_send(message);
                }
            }
            Frame::End { id, .. } => {
                pending.remove(&id);
            }
            Frame::Request { .. } => {}
        }
    }
}

fn unexpected() -> NodeError {
    NodeError::Internal("unexpected response variant".to_string())
}

#[async_trait]
impl NodeRpc for RpcClient {
    async fn hello(
        &self,
        meta: NodeMeta,
    ) -> Result<(NodeMeta, Vec<NodeMeta>, Vec<NodeMeta>), NodeError> {
        match self.call(Request::Hello { meta }).await? {
            Response::Hello {
                meta,
                connected,
                known,
            } => Ok((meta, connected, known)),
            _ => Err(unexpected()),
        }
    }

    async fn meta(&self) -> Result<NodeMeta, NodeError> {
        match self.call(Request::Meta).await? {
            Response::Meta { meta } => Ok(meta),
            _ => Err(unexpected()),
        }
    }

    async fn heart_beat(&self) -> Result<(), NodeError> {
        match self.call(Request::HeartBeat).await? {
            Response::HeartBeat => Ok(()),
            _ => Err(unexpected()),
        }
    }

    async fn get_routing_table(&self) -> Result<RoutingTable, NodeError> {
        match self.call(Request::GetRoutingTable).await? {
            Response::RoutingTable { table } => Ok(table),
            _ => Err(unexpected()),
        }
    }

    async fn get_remote_document(
        &self,
        document_id: &str,
        num_hops: i32,
    ) -> Result<Vec<u8>, NodeError> {
        match self
            .call(Request::GetRemoteDocument {
                document_id: document_id.to_string(),
                num_hops,
            })
            .await?
        {
            Response::RemoteDocument { body } => Ok(body),
            _ => Err(unexpected()),
        }
    }

    async fn get_remote_reference(
        &self,
        reference_id: &str,
        num_hops: i32,
    ) -> Result<Reference, NodeError> {
        match self
            .call(Request::GetRemoteReference {
                reference_id: reference_id.to_string(),
                num_hops,
            })
            .await?
        {
            Response::RemoteReference { reference } => Ok(reference),
            _ => Err(unexpected()),
        }
    }

    async fn subscribe(
        &self,
        channel_id: &str,
        starting: i64,
        num_hops: i32,
    ) -> Result<mpsc::Receiver<Message>, NodeError> {
        self.subscribe_request(Request::Subscribe {
            channel_id: channel_id.to_string(),
            starting,
            num_hops,
        })
        .await
    }
}

/// Server-side dispatch surface for one connection.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    /// Handle a unary request.
    async fn call(self: Arc<Self>, request: Request) -> Result<Response, NodeError>;
    /// Open a subscription stream for a `Subscribe`/`SubscribeClient`
    /// request.
    async fn subscribe(
        self: Arc<Self>,
        request: Request,
    ) -> Result<mpsc::Receiver<Message>, NodeError>;
}

/// Serve one accepted RPC stream (magic already consumed). Each request
/// runs on its own task; responses interleave on the shared writer.
pub async fn serve_connection<S, H>(
    stream: S,
    handler: Arc<H>,
    max_bytes: usize,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
    H: RpcHandler,
{
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let (writer_tx, mut writer_rx) = mpsc::channel::<Frame>(64);

    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                frame = writer_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if write_frame(&mut write_half, &frame, max_bytes).await.is_err() {
                        writer_cancel.cancel();
                        break;
                    }
                }
            }
        }
    });

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = read_frame(&mut read_half, max_bytes) => frame,
        };
        let Ok(frame) = frame else { break };
        let Frame::Request { id, request } = frame else {
            continue;
        };

        let handler = handler.clone();
        let writer_tx = writer_tx.clone();
        let task_cancel = cancel.clone();
        match request {
            Request::Subscribe { .. } | Request::SubscribeClient { .. } => {
                tokio::spawn(async move {
                    match handler.subscribe(request).await {
                        Ok(mut rx) => {
                            if writer_tx
                                .send(Frame::Response {
                                    id,
                                    response: Ok(Response::Subscribed),
                                })
                                .await
                                .is_err()
                            {
                                return;
                            }
                            loop {
                                let message = tokio::select! {
                                    _ = task_cancel.cancelled() => break,
                                    message = rx.recv() => message,
                                };
                                let Some(message) = message else { break };
                                if writer_tx
                                    .send(Frame::Message { id, message })
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                            }
                            let _ = writer_tx.send(Frame::End { id, error: None }).await;
                        }
                        Err(e) => {
                            let _ = writer_tx
                                .send(Frame::Response {
                                    id,
                                    response: Err(e),
                                })
                                .await;
                        }
                    }
                });
            }
            _ => {
                tokio::spawn(async move {
                    let response = handler.call(request).await;
                    let _ = writer_tx.send(Frame::Response { id, response }).await;
                });
            }
        }
    }

    cancel.cancel();
    writer.abort();
}
