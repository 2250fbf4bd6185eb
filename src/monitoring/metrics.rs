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

use prometheus::{IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
}

/// Metrics container.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Connected peers gauge.
    pub peers: IntGauge,
    /// Peer routing tables currently cached.
    pub routing_tables_held: IntGauge,
    /// Widest routing table depth seen.
    pub routing_table_depth: IntGauge,

    /// Remote fetches attempted.
    pub remote_fetch_total: IntCounter,
    /// Remote fetches that verified and returned.
    pub remote_fetch_ok_total: IntCounter,
    /// Candidate responses rejected by hash or signature verification.
    pub verification_failed_total: IntCounter,
    /// Cache evictions.
    pub cache_evictions_total: IntCounter,
    /// Heartbeat failures that closed a peer.
    pub heartbeat_failed_total: IntCounter,
    /// Messages published.
    pub publish_total: IntCounter,
    /// Listener queue sends dropped because the queue was full.
    pub publish_dropped_total: IntCounter,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let peers =
            IntGauge::new("orbitfs_peers", "Connected peers").map_err(|_| MetricsError::Prom)?;
        let routing_tables_held = IntGauge::new(
            "orbitfs_routing_tables_held",
            "Peer routing tables currently cached",
        )
        .map_err(|_| MetricsError::Prom)?;
        let routing_table_depth = IntGauge::new(
            "orbitfs_routing_table_depth",
            "Widest cached routing table depth",
        )
        .map_err(|_| MetricsError::Prom)?;

        let remote_fetch_total =
            IntCounter::new("orbitfs_remote_fetch_total", "Remote fetches attempted")
                .map_err(|_| MetricsError::Prom)?;
        let remote_fetch_ok_total = IntCounter::new(
            "orbitfs_remote_fetch_ok_total",
            "Remote fetches that verified and returned",
        )
        .map_err(|_| MetricsError::Prom)?;
        let verification_failed_total = IntCounter::new(
            "orbitfs_verification_failed_total",
            "Responses rejected by hash or signature verification",
        )
        .map_err(|_| MetricsError::Prom)?;
        let cache_evictions_total =
            IntCounter::new("orbitfs_cache_evictions_total", "Cache evictions")
                .map_err(|_| MetricsError::Prom)?;
        let heartbeat_failed_total = IntCounter::new(
            "orbitfs_heartbeat_failed_total",
            "Heartbeat failures that closed a peer",
        )
        .map_err(|_| MetricsError::Prom)?;
        let publish_total = IntCounter::new("orbitfs_publish_total", "Messages published")
            .map_err(|_| MetricsError::Prom)?;
        let publish_dropped_total = IntCounter::new(
            "orbitfs_publish_dropped_total",
            "Listener sends dropped on full queues",
        )
        .map_err(|_| MetricsError::Prom)?;

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(peers.clone()),
            Box::new(routing_tables_held.clone()),
            Box::new(routing_table_depth.clone()),
            Box::new(remote_fetch_total.clone()),
            Box::new(remote_fetch_ok_total.clone()),
            Box::new(verification_failed_total.clone()),
            Box::new(cache_evictions_total.clone()),
            Box::new(heartbeat_failed_total.clone()),
            Box::new(publish_total.clone()),
            Box::new(publish_dropped_total.clone()),
        ];
        for collector in collectors {
            registry.register(collector).map_err(|_| MetricsError::Prom)?;
        }

        Ok(Self {
            registry,
            peers,
            routing_tables_held,
            routing_table_depth,
            remote_fetch_total,
            remote_fetch_ok_total,
            verification_failed_total,
            cache_evictions_total,
            heartbeat_failed_total,
            publish_total,
            publish_dropped_total,
        })
    }
}
