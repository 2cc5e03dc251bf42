// Copyright (c) 2026 Valhalla
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;
use valhalla::mesh::router::Message;

fuzz_target!(|data: &[u8]| {
    // Routed message decoding is exposed to every peer; it must not panic
    // and a decoded message must re-encode.
    if let Ok(msg) = Message::decode(data) {
        let _ = msg.encode();
    }
});
