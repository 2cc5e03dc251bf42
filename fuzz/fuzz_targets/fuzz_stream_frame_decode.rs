// Copyright (c) 2026 Valhalla
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;
use valhalla::veil::session::StreamFrame;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = StreamFrame::decode(data) {
        let encoded = frame.encode();
        assert_eq!(StreamFrame::decode(&encoded).unwrap(), frame);
    }
});
