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

mod common;

use common::{succeeds_soon, TestCluster};
use orbitfs::core::store::{cache_key, document_key};
use orbitfs::core::types::{split_access_id, Document};
use orbitfs::networking::error::NodeError;
use std::time::Duration;

fn doc(text: &str) -> Document {
    Document {
        data: text.as_bytes().to_vec(),
        content_type: "text/plain".to_string(),
        ..Document::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn line_topology_fetch_caches_on_intermediate_nodes() {
    const NODES: usize = 5;
    // Unforced connections disabled so the line stays a line.
    let ts = TestCluster::start(NODES, |c| c.max_peers = 0).await;
    ts.connect_line().await;

    let document = doc("document from node 0");
    let access_id = ts.nodes[0].add(document.clone()).unwrap();
    let (document_id, _) = split_access_id(&access_id).unwrap();

    // The far end fetches once gossip has propagated hop by hop.
    {
        let node = ts.nodes[NODES - 1].clone();
        let access_id = access_id.clone();
        let document = document.clone();
        succeeds_soon(move || {
            let node = node.clone();
            let access_id = access_id.clone();
            let document = document.clone();
            async move {
                let got = node
                    .get(&access_id)
                    .await
                    .map_err(|e| format!("end-of-line fetch: {e}"))?;
                if got == document {
                    Ok(())
                } else {
                    Err("wrong document at end of line".to_string())
                }
            }
        })
        .await;
    }

    // Pass-through nodes now hold the ciphertext as an evictable import.
    let middle = &ts.nodes[2];
    assert!(middle.store().contains(&document_key(&document_id)).unwrap());
    assert!(middle.store().contains(&cache_key(&document_id)).unwrap());

    // The producer keeps its original without a cache record.
    assert!(ts.nodes[0].store().contains(&document_key(&document_id)).unwrap());
    assert!(!ts.nodes[0].store().contains(&cache_key(&document_id)).unwrap());
    ts.close();
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_document_fails_fast_without_hanging() {
    const NODES: usize = 3;
    let ts = TestCluster::start(NODES, |c| c.max_peers = 0).await;
    ts.connect_line().await;

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        ts.nodes[0].get_remote_document("id-unknown-to-everyone", 2),
    )
    .await
    .expect("lookup must not hang");

    match result {
        Err(NodeError::NoRoute(_)) | Err(NodeError::HopsExhausted(_)) => {}
        other => panic!("expected NoRoute or HopsExhausted; got {other:?}"),
    }
    ts.close();
}

#[tokio::test(flavor = "multi_thread")]
async fn hop_budget_expires_before_reaching_distant_content() {
    const NODES: usize = 4;
    let ts = TestCluster::start(NODES, |c| c.max_peers = 0).await;
    ts.connect_line().await;

    let document = doc("too far away");
    let access_id = ts.nodes[0].add(document).unwrap();
    let (document_id, _) = split_access_id(&access_id).unwrap();

    // Wait until the end of the line can see a route at all.
    {
        let node = ts.nodes[NODES - 1].clone();
        let document_id = document_id.clone();
        succeeds_soon(move || {
            let node = node.clone();
            let document_id = document_id.clone();
            async move {
                match node.get_remote_document(&document_id, -1).await {
                    Ok(_) => Ok(()),
                    Err(e) => Err(format!("unrestricted fetch: {e}")),
                }
            }
        })
        .await;
    }

    // A one-hop budget from a fresh node three hops out cannot succeed.
    let fresh = TestCluster::start(1, |c| c.max_peers = 0).await;
    fresh.nodes[0]
        .bootstrap_add_node(&ts.addrs[NODES - 1].to_string())
        .await
        .unwrap();
    let far_doc = doc("only on the fresh node");
    let far_access = fresh.nodes[0].add(far_doc).unwrap();
    let (far_id, _) = split_access_id(&far_access).unwrap();

    // node 0 is three hops from the fresh node's content; with the direct
    // route gossiped but a budget of 1 the chain bottoms out en route.
    {
        let node = ts.nodes[0].clone();
        let far_id = far_id.clone();
        succeeds_soon(move || {
            let node = node.clone();
            let far_id = far_id.clone();
            async move {
                match node.get_remote_document(&far_id, 1).await {
                    Err(NodeError::HopsExhausted(_)) => Ok(()),
                    Err(NodeError::NoRoute(_)) => Err("route not gossiped yet".to_string()),
                    Ok(_) => Err("fetch unexpectedly succeeded".to_string()),
                    Err(e) => Err(format!("unexpected error: {e}")),
                }
            }
        })
        .await;
    }
    fresh.close();
    ts.close();
}
