// Copyright (c) 2026 Valhalla
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;
use valhalla::bifrost::FrameDecoder;

fuzz_target!(|data: &[u8]| {
    // The incremental decoder must never panic, whatever the wire bytes.
    let mut decoder = FrameDecoder::new(1 << 20);
    decoder.extend(data);
    while let Ok(Some(_)) = decoder.next_frame() {}
});
