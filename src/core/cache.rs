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

//! Sampled approximate-LRU eviction for remotely fetched documents.
//!
//! A full sort of candidates would cost O(N log N) per eviction; sampling
//! a window at a pseudo-uniform seek point gives expected approximate-LRU
//! at O(sample) per eviction with O(1) memory.
//!
//! Locally added documents carry no `/cache/` record and are therefore
//! never evicted: producers keep their originals, the cache holds imported
//! copies only.

use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::core::store::{cache_key, document_key, KvOp, Store, StoreError, CACHE_PREFIX};
use crate::core::types::{marshal_record, unmarshal_record, CacheMeta};

const CACHE_META_MAX_BYTES: usize = 256;

/// Cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Underlying store failure.
    #[error("store")]
    Store(#[from] StoreError),
    /// Cache metadata failed to encode.
    #[error("encoding")]
    Encoding,
}

/// Sampled-LRU cache over the store's `/cache/` keyspace.
#[derive(Clone)]
pub struct Lru {
    store: Store,
    /// Store size threshold that triggers eviction.
    cache_size: u64,
    /// Entries sampled per eviction round.
    sample: usize,
}

fn now_unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

impl Lru {
    /// New cache over `store`.
    pub fn new(store: Store, cache_size: u64, sample: usize) -> Self {
        Self {
            store,
            cache_size,
            sample: sample.max(1),
        }
    }

    /// Record a remotely fetched ciphertext: evict while the store exceeds
    /// the size threshold (stopping as soon as no `/cache/` entries
    /// remain), run one sweep pass, then write the cache entry and the
    /// document body atomically. Returns the number of evictions.
    pub fn store_fetched(&self, document_id: &str, ciphertext: &[u8]) -> Result<u64, CacheError> {
        let mut size = self.store.size_on_disk()?;
        let mut evictions = 0u64;
        while size > self.cache_size {
            match self.evict_once()? {
                None => break,
                Some(freed) => {
                    evictions += 1;
                    size = size.saturating_sub(freed);
                }
            }
        }
        self.store.sweep();

        let meta = CacheMeta {
            size_bytes: ciphertext.len() as u64,
            last_accessed_unix_nanos: now_unix_nanos(),
        };
        let meta_bytes = marshal_record(&meta).map_err(|_| CacheError::Encoding)?;
        self.store.commit_atomic(vec![
            KvOp::Put {
                key: cache_key(document_id),
                value: meta_bytes,
            },
            KvOp::Put {
                key: document_key(document_id),
                value: ciphertext.to_vec(),
            },
        ])?;
        Ok(evictions)
    }

    /// Refresh the access time of a cached document. No-op for documents
    /// without a `/cache/` record (locally added originals).
    pub fn touch(&self, document_id: &str) -> Result<(), CacheError> {
        let key = cache_key(document_id);
        let Some(raw) = self.store.get(&key)? else {
            return Ok(());
        };
        let mut meta: CacheMeta =
            unmarshal_record(&raw, CACHE_META_MAX_BYTES).unwrap_or_default();
        meta.last_accessed_unix_nanos = now_unix_nanos();
        let bytes = marshal_record(&meta).map_err(|_| CacheError::Encoding)?;
        self.store.put(&key, &bytes)?;
        Ok(())
    }

    /// Evict one entry chosen by sampling: seek to a random point inside
    /// `/cache/` (seeded with a random symmetric-key-sized string so the
    /// landing point is pseudo-uniform, wrapping to the prefix start when
    /// the seek lands past the end), scan the next `sample` entries, and
    /// delete the one with the smallest access time together with its
    /// document body. Returns the freed `size_bytes`, or `None` when the
    /// cache is empty.
    pub fn evict_once(&self) -> Result<Option<u64>, CacheError> {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        let mut start = CACHE_PREFIX.as_bytes().to_vec();
        start.extend_from_slice(&seed);

        let mut candidates = self.store.scan_from(CACHE_PREFIX, &start, self.sample)?;
        if candidates.is_empty() {
            candidates =
                self.store
                    .scan_from(CACHE_PREFIX, CACHE_PREFIX.as_bytes(), self.sample)?;
        }
        if candidates.is_empty() {
            return Ok(None);
        }

        let victim = pick_oldest(&candidates);
        let (key, raw) = &candidates[victim];
        let meta: CacheMeta =
            unmarshal_record(raw, CACHE_META_MAX_BYTES).unwrap_or_default();
        let id = key.trim_start_matches(CACHE_PREFIX).to_string();

        self.store.commit_atomic(vec![
            KvOp::Del { key: key.clone() },
            KvOp::Del {
                key: document_key(&id),
            },
        ])?;
        Ok(Some(meta.size_bytes))
    }
}

/// Index of the sampled entry with the smallest access time. Entries whose
/// metadata no longer decodes sort first so garbage drains out ahead of
/// live entries.
fn pick_oldest(candidates: &[(String, Vec<u8>)]) -> usize {
    let mut best = 0;
    let mut best_time = i64::MAX;
    for (i, (_, raw)) in candidates.iter().enumerate() {
        let time = match unmarshal_record::<CacheMeta>(raw, CACHE_META_MAX_BYTES) {
            Ok(meta) => meta.last_accessed_unix_nanos,
            Err(_) => i64::MIN,
        };
        if time < best_time {
            best_time = time;
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_lru(cache_size: u64) -> (tempfile::TempDir, Store, Lru) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).unwrap();
        let lru = Lru::new(store.clone(), cache_size, 10);
        (dir, store, lru)
    }

    #[test]
    fn store_fetched_writes_entry_and_body() {
        let (_dir, store, lru) = temp_lru(u64::MAX);
        lru.store_fetched("doc1", b"ciphertext").unwrap();

        assert!(store.contains(&document_key("doc1")).unwrap());
        let raw = store.get(&cache_key("doc1")).unwrap().unwrap();
        let meta: CacheMeta = unmarshal_record(&raw, 256).unwrap();
        assert_eq!(meta.size_bytes, b"ciphertext".len() as u64);
        assert!(meta.last_accessed_unix_nanos > 0);
    }

    #[test]
    fn evict_drains_cache_and_reports_empty() {
        let (_dir, store, lru) = temp_lru(u64::MAX);
        for id in ["a", "b", "c"] {
            lru.store_fetched(id, b"body").unwrap();
        }

        let mut freed = 0;
        while let Some(bytes) = lru.evict_once().unwrap() {
            freed += bytes;
        }
        assert_eq!(freed, 3 * b"body".len() as u64);
        assert!(store.scan_prefix(CACHE_PREFIX).unwrap().is_empty());
        assert!(!store.contains(&document_key("a")).unwrap());
        assert!(!store.contains(&document_key("b")).unwrap());
        assert!(!store.contains(&document_key("c")).unwrap());
        assert_eq!(lru.evict_once().unwrap(), None);
    }

    #[test]
    fn zero_threshold_keeps_only_newest_entry() {
        let (_dir, store, lru) = temp_lru(0);
        lru.store_fetched("first", b"one").unwrap();
        lru.store_fetched("second", b"two").unwrap();

        // The second call evicts everything cached before it, then writes.
        let cached = store.scan_prefix(CACHE_PREFIX).unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].0, cache_key("second"));
        assert!(!store.contains(&document_key("first")).unwrap());
        assert!(store.contains(&document_key("second")).unwrap());
    }

    #[test]
    fn locally_added_documents_survive_eviction() {
        let (_dir, store, lru) = temp_lru(0);
        // A local Add writes the document body without a /cache/ record.
        store.put(&document_key("local"), b"original").unwrap();

        lru.store_fetched("remote", b"imported").unwrap();
        while lru.evict_once().unwrap().is_some() {}

        assert!(store.contains(&document_key("local")).unwrap());
        assert!(!store.contains(&document_key("remote")).unwrap());
    }

    #[test]
    fn pick_oldest_prefers_smallest_access_time() {
        let mk = |t: i64| {
            marshal_record(&CacheMeta {
                size_bytes: 1,
                last_accessed_unix_nanos: t,
            })
            .unwrap()
        };
        let candidates = vec![
            (cache_key("a"), mk(30)),
            (cache_key("b"), mk(10)),
            (cache_key("c"), mk(20)),
        ];
        assert_eq!(pick_oldest(&candidates), 1);
    }

    #[test]
    fn touch_refreshes_access_time() {
        let (_dir, store, lru) = temp_lru(u64::MAX);
        lru.store_fetched("doc", b"body").unwrap();
        let before: CacheMeta = unmarshal_record(
            &store.get(&cache_key("doc")).unwrap().unwrap(),
            256,
        )
        .unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        lru.touch("doc").unwrap();

        let after: CacheMeta = unmarshal_record(
            &store.get(&cache_key("doc")).unwrap().unwrap(),
            256,
        )
        .unwrap();
        assert!(after.last_accessed_unix_nanos > before.last_accessed_unix_nanos);
        assert_eq!(after.size_bytes, before.size_bytes);
    }
}
