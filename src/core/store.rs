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

//! Content store: a prefix-keyed wrapper over sled exposing the
//! `/config/`, `/document/`, `/reference/` and `/cache/` keyspaces.

use sled::transaction::ConflictableTransactionError;
use thiserror::Error;

/// Config keyspace prefix.
pub const CONFIG_PREFIX: &str = "/config/";
/// Document keyspace prefix (ciphertext bodies).
pub const DOCUMENT_PREFIX: &str = "/document/";
/// Reference keyspace prefix (marshaled signed references).
pub const REFERENCE_PREFIX: &str = "/reference/";
/// Cache bookkeeping keyspace prefix.
pub const CACHE_PREFIX: &str = "/cache/";
/// Known peer metadata keyspace prefix.
pub const NODE_META_PREFIX: &str = "/config/node/";

/// TLS certificate chain key (PEM).
pub const TLS_CERT_KEY: &str = "/config/cert";
/// TLS key PEM key.
pub const TLS_KEY_KEY: &str = "/config/key";
/// Node ECDSA private key key (PEM).
pub const TLS_PRIVATE_KEY_KEY: &str = "/config/privateKey";

/// Store key for a document id.
pub fn document_key(id: &str) -> String {
    format!("{}{}", DOCUMENT_PREFIX, id)
}

/// Store key for a reference id.
pub fn reference_key(id: &str) -> String {
    format!("{}{}", REFERENCE_PREFIX, id)
}

/// Store key for a cache entry.
pub fn cache_key(id: &str) -> String {
    format!("{}{}", CACHE_PREFIX, id)
}

/// Store key for a persisted peer meta.
pub fn node_meta_key(id: &str) -> String {
    format!("{}{}", NODE_META_PREFIX, id)
}

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("db open")]
    DbOpen,
    #[error("db io")]
    DbIo,
    #[error("tx conflict")]
    TxConflict,
}

/// Store operation for atomic commits.
#[derive(Clone, Debug)]
pub enum KvOp {
    /// Put key/value.
    Put {
        /// Full store key.
        key: String,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Delete key.
    Del {
        /// Full store key.
        key: String,
    },
}

/// Prefix-keyed KV wrapper.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
}

impl Store {
    /// Open the store at `path` (directory).
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|_| StoreError::DbOpen)?;
        Ok(Self { db })
    }

    /// Get a value.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let v = self.db.get(key).map_err(|_| StoreError::DbIo)?;
        Ok(v.map(|iv| iv.to_vec()))
    }

    /// Put a single key.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.db.insert(key, value).map_err(|_| StoreError::DbIo)?;
        Ok(())
    }

    /// Delete a single key.
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.db.remove(key).map_err(|_| StoreError::DbIo)?;
        Ok(())
    }

    /// Whether a key exists.
    pub fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Atomic multi-op commit.
    pub fn commit_atomic(&self, ops: Vec<KvOp>) -> Result<(), StoreError> {
        let res = self.db.transaction(|t| {
            for op in ops.iter() {
                match op {
                    KvOp::Put { key, value } => {
                        t.insert(key.as_bytes(), value.as_slice())
                            .map_err(|_| ConflictableTransactionError::Abort(StoreError::DbIo))?;
                    }
                    KvOp::Del { key } => {
                        t.remove(key.as_bytes())
                            .map_err(|_| ConflictableTransactionError::Abort(StoreError::DbIo))?;
                    }
                }
            }
            Ok(())
        });

        match res {
            Ok(()) => Ok(()),
            Err(sled::transaction::TransactionError::Abort(e)) => Err(e),
            Err(sled::transaction::TransactionError::Storage(_)) => Err(StoreError::DbIo),
        }
    }

    /// Forward scan of every key/value under `prefix`.
    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (k, v) = item.map_err(|_| StoreError::DbIo)?;
            out.push((String::from_utf8_lossy(&k).into_owned(), v.to_vec()));
        }
        Ok(out)
    }

    /// Seek to `start` and scan forward up to `limit` entries still under
    /// `prefix`. `start` must itself begin with `prefix`.
    pub fn scan_from(
        &self,
        prefix: &str,
        start: &[u8],
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut out = Vec::new();
        for item in self.db.range(start.to_vec()..) {
            let (k, v) = item.map_err(|_| StoreError::DbIo)?;
            if !k.starts_with(prefix.as_bytes()) {
                break;
            }
            out.push((String::from_utf8_lossy(&k).into_owned(), v.to_vec()));
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Every key in the store, in order.
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::new();
        for item in self.db.iter() {
            let (k, _) = item.map_err(|_| StoreError::DbIo)?;
            out.push(String::from_utf8_lossy(&k).into_owned());
        }
        Ok(out)
    }

    /// Current on-disk size estimate in bytes.
    pub fn size_on_disk(&self) -> Result<u64, StoreError> {
        self.db.size_on_disk().map_err(|_| StoreError::DbIo)
    }

    /// Best-effort space sweep after eviction bursts.
    pub fn sweep(&self) {
        let _ = self.db.flush();
    }

    /// Flush on shutdown.
    pub fn close(&self) {
        let _ = self.db.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).unwrap();
        (dir, store)
    }

    #[test]
    fn put_get_delete() {
        let (_dir, store) = temp_store();
        let key = document_key("abc");
        assert_eq!(store.get(&key).unwrap(), None);
        store.put(&key, b"body").unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(b"body".to_vec()));
        store.delete(&key).unwrap();
        assert_eq!(store.get(&key).unwrap(), None);
    }

    #[test]
    fn prefix_scan_is_isolated() {
        let (_dir, store) = temp_store();
        store.put(&document_key("a"), b"1").unwrap();
        store.put(&document_key("b"), b"2").unwrap();
        store.put(&reference_key("a"), b"3").unwrap();

        let docs = store.scan_prefix(DOCUMENT_PREFIX).unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|(k, _)| k.starts_with(DOCUMENT_PREFIX)));
    }

    #[test]
    fn scan_from_seeks_and_stops_at_prefix_end() {
        let (_dir, store) = temp_store();
        for id in ["a", "b", "c", "d"] {
            store.put(&cache_key(id), id.as_bytes()).unwrap();
        }
        // Also a key after the prefix range.
        store.put(&document_key("zzz"), b"x").unwrap();

        let start = cache_key("b");
        let got = store.scan_from(CACHE_PREFIX, start.as_bytes(), 10).unwrap();
        let keys: Vec<&str> = got.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec![cache_key("b"), cache_key("c"), cache_key("d")]);
    }

    #[test]
    fn commit_atomic_applies_all_ops() {
        let (_dir, store) = temp_store();
        store.put(&cache_key("x"), b"meta").unwrap();
        store.put(&document_key("x"), b"body").unwrap();

        store
            .commit_atomic(vec![
                KvOp::Del { key: cache_key("x") },
                KvOp::Del { key: document_key("x") },
                KvOp::Put { key: document_key("y"), value: b"other".to_vec() },
            ])
            .unwrap();

        assert_eq!(store.get(&cache_key("x")).unwrap(), None);
        assert_eq!(store.get(&document_key("x")).unwrap(), None);
        assert_eq!(store.get(&document_key("y")).unwrap(), Some(b"other".to_vec()));
    }
}
