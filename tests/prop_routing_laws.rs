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

use orbitfs::core::routing::table::{dedup, trim_trailing_empty};
use orbitfs::core::routing::{BloomFilter, RoutingTable};
use orbitfs::core::types::{join_access_id, split_access_id};
use proptest::collection::vec;
use proptest::prelude::*;

fn filter_from(items: &[String]) -> BloomFilter {
    let mut filter = BloomFilter::new();
    for item in items {
        filter.add(item);
    }
    filter
}

fn arb_items() -> impl Strategy<Value = Vec<String>> {
    vec("[a-z0-9]{1,12}", 0..8)
}

fn arb_layers() -> impl Strategy<Value = Vec<BloomFilter>> {
    vec(arb_items().prop_map(|items| filter_from(&items)), 0..6)
}

proptest! {
    #[test]
    fn prop_union_is_commutative(a in arb_items(), b in arb_items()) {
        let fa = filter_from(&a);
        let fb = filter_from(&b);
        prop_assert_eq!(BloomFilter::union(&fa, &fb), BloomFilter::union(&fb, &fa));
    }

    #[test]
    fn prop_union_is_associative(a in arb_items(), b in arb_items(), c in arb_items()) {
        let fa = filter_from(&a);
        let fb = filter_from(&b);
        let fc = filter_from(&c);
        let left = BloomFilter::union(&BloomFilter::union(&fa, &fb), &fc);
        let right = BloomFilter::union(&fa, &BloomFilter::union(&fb, &fc));
        prop_assert_eq!(left, right);
    }

    #[test]
    fn prop_union_preserves_membership(a in arb_items(), b in arb_items()) {
        let union = BloomFilter::union(&filter_from(&a), &filter_from(&b));
        for item in a.iter().chain(b.iter()) {
            prop_assert!(union.test(item));
        }
    }

    #[test]
    fn prop_dedup_is_idempotent(layers in arb_layers()) {
        let once = dedup(&layers);
        let twice = dedup(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_trim_leaves_no_trailing_empty(layers in arb_layers()) {
        let trimmed = trim_trailing_empty(layers);
        if let Some(last) = trimmed.last() {
            prop_assert!(!last.is_empty());
        }
    }

    #[test]
    fn prop_merged_tables_are_well_formed(
        a in arb_layers(),
        b in arb_layers(),
        max_width in 0usize..6,
    ) {
        let rt0 = RoutingTable::from_filters(a);
        let rt1 = RoutingTable::from_filters(b);
        let merged = RoutingTable::merge(&rt0, &rt1, max_width);

        if max_width > 0 {
            prop_assert!(merged.len() <= max_width);
        }
        // Last layer non-empty, or the whole table empty.
        if let Some(last) = merged.filters().last() {
            prop_assert!(!last.is_empty());
        }
        // No two adjacent non-empty layers are equal.
        for pair in merged.filters().windows(2) {
            if !pair[0].is_empty() && !pair[1].is_empty() {
                prop_assert!(pair[0] != pair[1]);
            }
        }
    }

    #[test]
    fn prop_merge_keeps_local_inventory_reachable(
        local in vec("[a-z0-9]{1,12}", 1..8),
        peer in arb_layers(),
    ) {
        let rt0 = RoutingTable::local(filter_from(&local));
        let rt1 = RoutingTable::from_filters(peer);
        let merged = RoutingTable::merge(&rt0, &rt1, 0);
        for item in &local {
            prop_assert_eq!(merged.hops_to(item), Some(0));
        }
    }

    #[test]
    fn prop_access_id_round_trip(
        id in "[A-Za-z0-9_-]{1,44}",
        key in vec(any::<u8>(), 1..64),
    ) {
        let joined = join_access_id(&id, &key);
        let (got_id, got_key) = split_access_id(&joined).unwrap();
        prop_assert_eq!(got_id, id);
        prop_assert_eq!(got_key, key);
    }

    #[test]
    fn prop_bare_strings_are_not_access_ids(s in "[A-Za-z0-9_-]{0,44}") {
        prop_assert!(split_access_id(&s).is_err());
    }
}
