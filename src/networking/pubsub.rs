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

//! Publish/subscribe on reference channels: at-most-once, best-effort
//! fanout with bounded per-listener queues. Slow subscribers drop
//! messages; they never stall publishers or starve fast subscribers.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::crypto::identity::{load_private_pem, marshal_public, sign};
use crate::core::crypto::hash_json;
use crate::core::store::reference_key;
use crate::core::types::Message;
use crate::networking::error::NodeError;
use crate::networking::node::{unix_seconds, Node};
use crate::networking::rpc::{NodeRpc, SUBSCRIBE_QUEUE_DEPTH};

/// Listener registry for one channel. The entry exists exactly while it
/// has listeners.
pub(crate) struct Channel {
    pub(crate) listeners: HashMap<u64, mpsc::Sender<Message>>,
}

/// Deregisters a listener on drop; dropping the last listener removes the
/// channel entry.
pub(crate) struct ListenerGuard {
    node: Arc<Node>,
    channel_id: String,
    listener_id: u64,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        let mut state = self.node.state();
        if let Some(channel) = state.channels.get_mut(&self.channel_id) {
            channel.listeners.remove(&self.listener_id);
            if channel.listeners.is_empty() {
                state.channels.remove(&self.channel_id);
            }
        }
    }
}

impl Node {
    /// Register a listener on a channel: a bounded queue plus its
    /// deregistration guard.
    pub(crate) fn listen_channel(
        &self,
        channel_id: &str,
    ) -> (mpsc::Receiver<Message>, ListenerGuard) {
        let (tx, rx) = mpsc::channel(SUBSCRIBE_QUEUE_DEPTH);
        let mut state = self.state();
        let listener_id = state.next_listener_id;
        state.next_listener_id += 1;
        state
            .channels
            .entry(channel_id.to_string())
            .or_insert_with(|| Channel {
                listeners: HashMap::new(),
            })
            .listeners
            .insert(listener_id, tx);
        (
            rx,
            ListenerGuard {
                node: self.arc(),
                channel_id: channel_id.to_string(),
                listener_id,
            },
        )
    }

    /// Sign and fan out a message on the key's channel. Sends that would
    /// block are dropped; the returned count is the number of listeners
    /// actually reached.
    pub fn publish(&self, private_key_pem: &str, message: &str) -> Result<u32, NodeError> {
        let key = load_private_pem(private_key_pem)
            .map_err(|e| NodeError::InvalidInput(format!("private key: {e}")))?;
        let public_pem = marshal_public(key.verifying_key())
            .map_err(|e| NodeError::InvalidInput(format!("public key: {e}")))?;

        let mut msg = Message {
            message: message.to_string(),
            public_key: public_pem.clone(),
            timestamp: unix_seconds(),
            signature: String::new(),
        };
        msg.signature = sign(&key, &msg.signed_bytes()?);
        let channel_id = hash_json(&public_pem)?;

        let senders: Vec<mpsc::Sender<Message>> = self
            .state()
            .channels
            .get(&channel_id)
            .map(|c| c.listeners.values().cloned().collect())
            .unwrap_or_default();

        let mut delivered = 0u32;
        for tx in senders {
            match tx.try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => self.metrics.publish_dropped_total.inc(),
            }
        }
        self.metrics.publish_total.inc();
        Ok(delivered)
    }

    /// Open a subscription stream. With the reference local, this
    /// registers a listener and forwards until the caller disconnects;
    /// otherwise it behaves like remote resolve, forwarding the
    /// subscription along the first reachable route.
    pub async fn subscribe_stream(
        &self,
        channel_id: &str,
        starting: i64,
        num_hops: i32,
    ) -> Result<mpsc::Receiver<Message>, NodeError> {
        if self.store.contains(&reference_key(channel_id))? {
            let (mut rx_in, guard) = self.listen_channel(channel_id);
            let (tx_out, rx_out) = mpsc::channel(SUBSCRIBE_QUEUE_DEPTH);
            let cancel = self.stopper.child_token();
            tokio::spawn(async move {
                let _guard = guard;
                loop {
                    let msg = tokio::select! {
                        _ = cancel.cancelled() => break,
                        msg = rx_in.recv() => msg,
                    };
                    let Some(msg) = msg else { break };
                    if tx_out.send(msg).await.is_err() {
                        break;
                    }
                }
            });
            return Ok(rx_out);
        }

        if num_hops == 0 {
            return Err(NodeError::HopsExhausted(channel_id.to_string()));
        }
        let routes = self.routes_for(channel_id);
        if routes.is_empty() {
            return Err(NodeError::NoRoute(channel_id.to_string()));
        }

        let mut last = NodeError::Internal(format!("failed to reach channel {channel_id}"));
        for route in routes {
            let forward = if num_hops < 0 { route.num_hops } else { num_hops };
            match route.client.subscribe(channel_id, starting, forward).await {
                Ok(rx) => return Ok(rx),
                Err(e) => {
                    debug!(channel = channel_id, err = %e, "subscription forward failed");
                    last = e;
                }
            }
        }
        Err(last)
    }
}
