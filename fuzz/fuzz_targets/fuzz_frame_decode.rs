// Copyright (c) 2026 Orbitfs
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Wire frames come from untrusted peers; decoding must never panic
    // or allocate past the cap.
    let _ = orbitfs::core::types::unmarshal_record::<orbitfs::networking::rpc::Frame>(
        data,
        1 << 20,
    );
    let _ = orbitfs::core::routing::BloomFilter::decode(data);
});
