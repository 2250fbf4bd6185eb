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

//! Fixed-parameter bloom filter.
//!
//! Every filter in the system shares the same parameters so that two
//! filters can be merged with a plain bitwise OR and compared for equality
//! by their encodings.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Filter size in bits, sized for roughly 1000 keys at a 1% target
/// false-positive rate.
pub const FILTER_BITS: usize = 9_592;

/// Filter size in bytes.
pub const FILTER_BYTES: usize = FILTER_BITS / 8;

/// Number of index functions.
pub const FILTER_HASHES: u64 = 7;

/// Filter decoding errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    /// Encoded filter has the wrong length.
    #[error("filter length mismatch")]
    Length,
}

/// A fixed-parameter probabilistic set. The all-zero filter is "empty".
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomFilter {
    bits: Vec<u8>,
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("ones", &self.bits.iter().map(|b| b.count_ones()).sum::<u32>())
            .finish()
    }
}

/// Two independent 64-bit index seeds from one digest; bit positions are
/// `h1 + i*h2` (double hashing).
fn index_seeds(item: &[u8]) -> (u64, u64) {
    let digest = Sha256::digest(item);
    let mut a = [0u8; 8];
    let mut b = [0u8; 8];
    a.copy_from_slice(&digest[0..8]);
    b.copy_from_slice(&digest[8..16]);
    (u64::from_be_bytes(a), u64::from_be_bytes(b))
}

impl BloomFilter {
    /// A new, empty filter.
    pub fn new() -> Self {
        Self {
            bits: vec![0u8; FILTER_BYTES],
        }
    }

    /// Insert an item.
    pub fn add(&mut self, item: &str) {
        let (h1, h2) = index_seeds(item.as_bytes());
        for i in 0..FILTER_HASHES {
            let pos = (h1.wrapping_add(i.wrapping_mul(h2)) % FILTER_BITS as u64) as usize;
            self.bits[pos / 8] |= 1 << (pos % 8);
        }
    }

    /// Whether an item may be present. False positives are possible, false
    /// negatives are not.
    pub fn test(&self, item: &str) -> bool {
        let (h1, h2) = index_seeds(item.as_bytes());
        for i in 0..FILTER_HASHES {
            let pos = (h1.wrapping_add(i.wrapping_mul(h2)) % FILTER_BITS as u64) as usize;
            if self.bits[pos / 8] & (1 << (pos % 8)) == 0 {
                return false;
            }
        }
        true
    }

    /// Bitwise-OR union of two identically parameterized filters.
    pub fn union(a: &BloomFilter, b: &BloomFilter) -> BloomFilter {
        let mut bits = a.bits.clone();
        for (dst, src) in bits.iter_mut().zip(b.bits.iter()) {
            *dst |= src;
        }
        BloomFilter { bits }
    }

    /// Whether no item was ever inserted.
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|b| *b == 0)
    }

    /// Opaque byte encoding.
    pub fn encode(&self) -> Vec<u8> {
        self.bits.clone()
    }

    /// Decode an opaque byte encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self, FilterError> {
        if bytes.len() != FILTER_BYTES {
            return Err(FilterError::Length);
        }
        Ok(Self {
            bits: bytes.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn added_items_always_test_positive() {
        let mut filter = BloomFilter::new();
        for i in 0..200 {
            filter.add(&format!("item-{i}"));
        }
        for i in 0..200 {
            assert!(filter.test(&format!("item-{i}")));
        }
    }

    #[test]
    fn fresh_filter_is_empty_and_tests_negative() {
        let filter = BloomFilter::new();
        assert!(filter.is_empty());
        assert!(!filter.test("anything"));
    }

    #[test]
    fn union_contains_both_sides() {
        let mut a = BloomFilter::new();
        let mut b = BloomFilter::new();
        a.add("left");
        b.add("right");
        let u = BloomFilter::union(&a, &b);
        assert!(u.test("left"));
        assert!(u.test("right"));
    }

    #[test]
    fn union_with_empty_is_identity() {
        let mut a = BloomFilter::new();
        a.add("x");
        let u = BloomFilter::union(&a, &BloomFilter::new());
        assert_eq!(u, a);
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut filter = BloomFilter::new();
        filter.add("some id");
        let decoded = BloomFilter::decode(&filter.encode()).unwrap();
        assert_eq!(decoded, filter);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert_eq!(BloomFilter::decode(&[0u8; 3]), Err(FilterError::Length));
    }
}
