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

//! Layered routing tables: an ordered sequence of bloom filters indexed by
//! hop distance. Index 0 is the local inventory; index i summarizes what is
//! reachable at roughly i hops.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core::routing::bloom::BloomFilter;

/// An ordered sequence of bloom filters indexed by hop distance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    filters: Vec<BloomFilter>,
}

impl RoutingTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A one-layer table holding the local inventory filter.
    pub fn local(inventory: BloomFilter) -> Self {
        Self {
            filters: vec![inventory],
        }
    }

    /// Build a table from raw layers, normalized: duplicates collapse the
    /// tail and trailing empty layers are trimmed.
    pub fn from_filters(filters: Vec<BloomFilter>) -> Self {
        Self {
            filters: trim_trailing_empty(dedup(&filters)),
        }
    }

    /// The layered filters, hop order.
    pub fn filters(&self) -> &[BloomFilter] {
        &self.filters
    }

    /// Consume the table into its raw layers.
    pub fn into_filters(self) -> Vec<BloomFilter> {
        self.filters
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether the table has no layers.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// The lowest layer whose filter tests positive for `id`, if any.
    /// Empty layers never match.
    pub fn hops_to(&self, id: &str) -> Option<usize> {
        self.filters
            .iter()
            .enumerate()
            .find(|(_, f)| !f.is_empty() && f.test(id))
            .map(|(i, _)| i)
    }

    /// Merge a peer's table into the local one, shifting the peer's layers
    /// by one hop: what the peer can reach at i hops is reachable here at
    /// i+1. Index 0 stays the local inventory; overlapping layers union;
    /// remaining layers come from whichever side still has filters. The
    /// result is deduplicated, trimmed of trailing empty layers, and capped
    /// at `max_width` (0 means uncapped).
    pub fn merge(rt0: &Self, rt1: &Self, max_width: usize) -> Self {
        let len0 = rt0.filters.len();
        let len1 = rt1.filters.len();
        let mut merged = vec![BloomFilter::new(); len0.max(len1) + 1];

        if len0 > 0 {
            merged[0] = rt0.filters[0].clone();
        }
        let mut i = 1;
        while i < len0 && i <= len1 {
            merged[i] = BloomFilter::union(&rt0.filters[i], &rt1.filters[i - 1]);
            i += 1;
        }
        while i <= len1 {
            merged[i] = rt1.filters[i - 1].clone();
            i += 1;
        }
        while i < len0 {
            merged[i] = rt0.filters[i].clone();
            i += 1;
        }

        let mut filters = dedup(&merged);
        if max_width > 0 && filters.len() > max_width {
            filters.truncate(max_width);
        }
        // Trim after the cap so a truncated table still ends on a
        // non-empty layer.
        let filters = trim_trailing_empty(filters);
        Self { filters }
    }
}

/// Cut the layer sequence at the first non-empty filter equal to one seen
/// at a lower index. Duplication means gossip has saturated: further hop
/// layers add no information. Empty filters are kept in place and never
/// count as seen.
pub fn dedup(filters: &[BloomFilter]) -> Vec<BloomFilter> {
    let mut seen: HashSet<Vec<u8>> = HashSet::new();
    let mut out = Vec::with_capacity(filters.len());
    for filter in filters {
        if !filter.is_empty() {
            let encoded = filter.encode();
            if seen.contains(&encoded) {
                break;
            }
            seen.insert(encoded);
        }
        out.push(filter.clone());
    }
    out
}

/// Drop trailing empty layers so an all-empty tail does not inflate the
/// table.
pub fn trim_trailing_empty(mut filters: Vec<BloomFilter>) -> Vec<BloomFilter> {
    while filters.last().is_some_and(|f| f.is_empty()) {
        filters.pop();
    }
    filters
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_with(items: &[&str]) -> BloomFilter {
        let mut f = BloomFilter::new();
        for item in items {
            f.add(item);
        }
        f
    }

    #[test]
    fn merge_shifts_peer_layers_by_one_hop() {
        let local = RoutingTable::local(filter_with(&["mine"]));
        let peer = RoutingTable::local(filter_with(&["theirs"]));

        let merged = RoutingTable::merge(&local, &peer, 0);
        assert_eq!(merged.hops_to("mine"), Some(0));
        assert_eq!(merged.hops_to("theirs"), Some(1));
    }

    #[test]
    fn merge_keeps_local_inventory_at_index_zero() {
        let local = RoutingTable::local(filter_with(&["mine"]));
        let peer = RoutingTable::local(filter_with(&["theirs"]));

        let merged = RoutingTable::merge(&local, &peer, 0);
        assert_eq!(merged.filters()[0], filter_with(&["mine"]));
    }

    #[test]
    fn merge_unions_overlapping_layers() {
        // Local already knows a second layer; the peer's first layer lands
        // on top of it.
        let local = RoutingTable {
            filters: vec![filter_with(&["mine"]), filter_with(&["far"])],
        };
        let peer = RoutingTable::local(filter_with(&["theirs"]));

        let merged = RoutingTable::merge(&local, &peer, 0);
        assert_eq!(merged.hops_to("far"), Some(1));
        assert!(merged.filters()[1].test("theirs"));
    }

    #[test]
    fn merge_collapses_saturated_tail() {
        // The peer mirrors the local inventory, so the shifted copy
        // duplicates layer 0 and the table stays one layer wide.
        let inventory = filter_with(&["mine"]);
        let local = RoutingTable::local(inventory.clone());
        let peer = RoutingTable::local(inventory);

        let merged = RoutingTable::merge(&local, &peer, 0);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn merge_honors_width_cap() {
        let mut peer_filters = Vec::new();
        for i in 0..6 {
            peer_filters.push(filter_with(&[&format!("layer-{i}")]));
        }
        let local = RoutingTable::local(filter_with(&["mine"]));
        let peer = RoutingTable {
            filters: peer_filters,
        };

        let merged = RoutingTable::merge(&local, &peer, 3);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.hops_to("mine"), Some(0));
        assert_eq!(merged.hops_to("layer-0"), Some(1));
        assert_eq!(merged.hops_to("layer-5"), None);
    }

    #[test]
    fn merged_tables_end_on_a_non_empty_layer() {
        let local = RoutingTable::local(filter_with(&["mine"]));
        let peer = RoutingTable {
            filters: vec![filter_with(&["theirs"]), BloomFilter::new(), BloomFilter::new()],
        };
        let merged = RoutingTable::merge(&local, &peer, 0);
        assert!(!merged.is_empty());
        assert!(!merged.filters().last().unwrap().is_empty());
    }

    #[test]
    fn dedup_is_idempotent() {
        let filters = vec![
            filter_with(&["a"]),
            BloomFilter::new(),
            filter_with(&["b"]),
            filter_with(&["a"]),
            filter_with(&["c"]),
        ];
        let once = dedup(&filters);
        let twice = dedup(&once);
        assert_eq!(once, twice);
        // Cut at the first duplicate, empties kept in place.
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn dedup_of_empty_input_is_empty() {
        assert!(dedup(&[]).is_empty());
    }

    #[test]
    fn dedup_keeps_empty_filters() {
        let filters = vec![BloomFilter::new(), BloomFilter::new()];
        assert_eq!(dedup(&filters), filters);
    }

    #[test]
    fn hops_to_skips_empty_layers() {
        let table = RoutingTable {
            filters: vec![BloomFilter::new(), filter_with(&["x"])],
        };
        assert_eq!(table.hops_to("x"), Some(1));
    }
}
