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
#![allow(dead_code)]

//! Multi-node test harness: local clusters on loopback with pluggable
//! topologies and a retry helper for eventually-consistent assertions.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use orbitfs::core::types::NodeConfig;
use orbitfs::networking::node::Node;

/// Retry `f` until it returns `Ok` or the deadline passes.
pub async fn succeeds_soon<F, Fut>(mut f: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    let deadline = Instant::now() + Duration::from_secs(30);
    let mut last = String::from("never ran");
    loop {
        match f().await {
            Ok(()) => return,
            Err(e) => last = e,
        }
        if Instant::now() > deadline {
            panic!("condition not met in time: {last}");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// A cluster of live nodes listening on loopback.
pub struct TestCluster {
    pub nodes: Vec<Arc<Node>>,
    pub addrs: Vec<SocketAddr>,
    dirs: Vec<tempfile::TempDir>,
}

impl TestCluster {
    /// Start `n` nodes with test-friendly timers. `tweak` adjusts each
    /// node's config before start.
    pub async fn start(n: usize, tweak: impl Fn(&mut NodeConfig)) -> Self {
        let mut nodes = Vec::new();
        let mut addrs = Vec::new();
        let mut dirs = Vec::new();
        for _ in 0..n {
            let dir = tempfile::tempdir().expect("tempdir");
            let mut config = NodeConfig::with_path(dir.path().to_string_lossy());
            config.listen_addr = "127.0.0.1:0".to_string();
            config.heartbeat_interval_ms = 500;
            config.routing_table_interval_ms = 250;
            tweak(&mut config);
            let node = Node::new(config).expect("node");
            let addr = node.listen().await.expect("listen");
            nodes.push(node);
            addrs.push(addr);
            dirs.push(dir);
        }
        Self { nodes, addrs, dirs }
    }

    /// Bootstrap every pair, yielding a fully connected mesh.
    pub async fn connect_fully(&self) {
        for i in 0..self.nodes.len() {
            for j in (i + 1)..self.nodes.len() {
                self.nodes[i]
                    .bootstrap_add_node(&self.addrs[j].to_string())
                    .await
                    .expect("bootstrap");
            }
        }
    }

    /// Bootstrap each node to its predecessor only. With unforced
    /// connections disabled this stays a line.
    pub async fn connect_line(&self) {
        for i in 1..self.nodes.len() {
            self.nodes[i]
                .bootstrap_add_node(&self.addrs[i - 1].to_string())
                .await
                .expect("bootstrap");
        }
    }

    /// Bootstrap every non-hub node to node 0.
    pub async fn connect_star(&self) {
        for i in 1..self.nodes.len() {
            self.nodes[i]
                .bootstrap_add_node(&self.addrs[0].to_string())
                .await
                .expect("bootstrap");
        }
    }

    pub fn close(&self) {
        for node in &self.nodes {
            node.close();
        }
    }
}
