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

//! Client-facing operations: add/get documents, create and look up signed
//! references, list peers.

use zeroize::Zeroize;

use crate::core::crypto::envelope::{open_bytes, open_document, seal_bytes, seal_document};
use crate::core::crypto::identity::{derive_owner_key, load_private_pem, marshal_public, sign};
use crate::core::crypto::{hash_bytes, hash_json};
use crate::core::store::{document_key, reference_key};
use crate::core::types::{
    join_access_id, marshal_record, split_access_id, AccessIdError, Document, NodeMeta,
    Reference,
};
use crate::networking::error::NodeError;
use crate::networking::node::{unix_seconds, Node};

impl Node {
    /// Fetch a document by access id, resolving remotely when needed, and
    /// decrypt it with the embedded key.
    pub async fn get(&self, access_id: &str) -> Result<Document, NodeError> {
        let (document_id, mut key) = split_access_id(access_id)?;
        let body = self.get_remote_document(&document_id, -1).await?;
        let document = open_document(&key, &body)
            .map_err(|e| NodeError::InvalidInput(format!("cannot decrypt document: {e}")));
        key.zeroize();
        document
    }

    /// Seal and store a document locally. The returned access id is the
    /// capability: content hash of the ciphertext, colon, symmetric key.
    /// Locally added documents get no cache record, so they are never
    /// evicted.
    pub fn add(&self, document: Document) -> Result<String, NodeError> {
        let (ciphertext, key) = seal_document(&document)?;
        let document_id = hash_bytes(&ciphertext);
        self.store.put(&document_key(&document_id), &ciphertext)?;
        self.add_to_local_filter(&document_id);
        Ok(join_access_id(&document_id, &key))
    }

    /// Every known peer's metadata, connected or not.
    pub fn get_peers(&self) -> Vec<NodeMeta> {
        self.state().peer_meta.values().cloned().collect()
    }

    /// Fetch a reference by `reference_id` or `reference_id:key`. With a
    /// key attached the value comes back decrypted.
    pub async fn get_reference(&self, reference_id: &str) -> Result<Reference, NodeError> {
        let (id, key) = match split_access_id(reference_id) {
            Ok((id, key)) => (id, Some(key)),
            Err(AccessIdError::MissingSeparator) => (reference_id.to_string(), None),
            Err(e) => return Err(e.into()),
        };

        let mut reference = self.get_remote_reference(&id, -1).await?;
        if let Some(mut key) = key {
            let value = open_bytes(&key, &reference.value)
                .map_err(|e| NodeError::InvalidInput(format!("cannot decrypt value: {e}")));
            key.zeroize();
            reference.value = value?;
        }
        Ok(reference)
    }

    /// Create or update the reference owned by the given key. The value is
    /// sealed under the owner-derived key, so the returned
    /// `reference_id:key` capability conveys read access and the owner can
    /// always re-derive it.
    pub fn add_reference(&self, private_key_pem: &str, record: &str) -> Result<String, NodeError> {
        let key = load_private_pem(private_key_pem)
            .map_err(|e| NodeError::InvalidInput(format!("private key: {e}")))?;
        let public_pem = marshal_public(key.verifying_key())
            .map_err(|e| NodeError::InvalidInput(format!("public key: {e}")))?;

        let mut owner_key = derive_owner_key(&key);
        let value = seal_bytes(&owner_key, record.as_bytes())?;

        let mut reference = Reference {
            value,
            public_key: public_pem.clone(),
            timestamp: unix_seconds(),
            signature: String::new(),
        };
        reference.signature = sign(&key, &reference.signed_bytes()?);

        let reference_id = hash_json(&public_pem)?;
        let bytes = marshal_record(&reference)?;
        self.store.put(&reference_key(&reference_id), &bytes)?;
        self.add_to_local_filter(&reference_id);

        let access_id = join_access_id(&reference_id, &owner_key);
        owner_key.zeroize();
        Ok(access_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::identity::{generate_private, marshal_private};
    use crate::core::types::NodeConfig;
    use std::sync::Arc;

    fn temp_node() -> (tempfile::TempDir, Arc<Node>) {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(NodeConfig::with_path(dir.path().to_string_lossy())).unwrap();
        (dir, node)
    }

    #[tokio::test]
    async fn add_get_round_trip() {
        let (_dir, node) = temp_node();
        let doc = Document {
            data: b"hello".to_vec(),
            content_type: "text/plain".to_string(),
            ..Document::default()
        };
        let access_id = node.add(doc.clone()).unwrap();

        let (id, key) = split_access_id(&access_id).unwrap();
        assert!(!id.is_empty());
        assert!(!key.is_empty());

        let got = node.get(&access_id).await.unwrap();
        assert_eq!(got, doc);
        node.close();
    }

    #[tokio::test]
    async fn get_rejects_malformed_access_id() {
        let (_dir, node) = temp_node();
        let err = node.get("no-separator").await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidInput(_)));
        node.close();
    }

    #[tokio::test]
    async fn added_documents_show_in_the_local_inventory() {
        let (_dir, node) = temp_node();
        let access_id = node
            .add(Document {
                data: b"indexed".to_vec(),
                content_type: "text/plain".to_string(),
                ..Document::default()
            })
            .unwrap();
        let (id, _) = split_access_id(&access_id).unwrap();
        assert_eq!(node.get_routing_table().hops_to(&id), Some(0));
        node.close();
    }

    #[tokio::test]
    async fn reference_round_trip_decrypts_with_returned_key() {
        let (_dir, node) = temp_node();
        let owner = generate_private();
        let private_pem = marshal_private(&owner).unwrap();

        let access_id = node
            .add_reference(&private_pem, "document@abc:key")
            .unwrap();
        let reference = node.get_reference(&access_id).await.unwrap();
        assert_eq!(reference.value, b"document@abc:key");
        node.close();
    }

    #[tokio::test]
    async fn reference_without_key_stays_sealed() {
        let (_dir, node) = temp_node();
        let owner = generate_private();
        let private_pem = marshal_private(&owner).unwrap();

        let access_id = node.add_reference(&private_pem, "secret record").unwrap();
        let (reference_id, _) = split_access_id(&access_id).unwrap();

        let sealed = node.get_reference(&reference_id).await.unwrap();
        assert_ne!(sealed.value, b"secret record");

        // Same owner, same derived key: updating reuses the capability.
        let again = node.add_reference(&private_pem, "secret record 2").unwrap();
        let (id_again, _) = split_access_id(&again).unwrap();
        assert_eq!(reference_id, id_again);
        node.close();
    }

    #[tokio::test]
    async fn add_reference_rejects_bad_pem() {
        let (_dir, node) = temp_node();
        let err = node.add_reference("not a pem", "record").unwrap_err();
        assert!(matches!(err, NodeError::InvalidInput(_)));
        node.close();
    }
}
