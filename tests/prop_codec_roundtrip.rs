// Copyright (c) 2026 Valhalla
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

use proptest::prelude::*;
use valhalla::app::{RpcRequest, RpcResponse};
use valhalla::bifrost::{self, Frame, FrameDecoder, FrameError, FrameType};
use valhalla::intent::Cid;
use valhalla::mesh::router::Message;
use valhalla::types::NodeId;

fn arb_frame_type() -> impl Strategy<Value = FrameType> {
    prop_oneof![
        Just(FrameType::Data),
        Just(FrameType::Control),
        Just(FrameType::Keepalive),
        Just(FrameType::Close),
    ]
}

proptest! {
    #[test]
    fn frame_encode_decode_round_trips(
        frame_type in arb_frame_type(),
        payload in proptest::collection::vec(any::<u8>(), 0..2048),
    ) {
        let frame = Frame::new(frame_type, payload);
        let wire = frame.encode();

        let mut decoder = FrameDecoder::new(bifrost::DEFAULT_MAX_FRAME_LEN);
        decoder.extend(&wire);
        let decoded = decoder.next_frame().unwrap().expect("one frame");
        prop_assert_eq!(decoded, frame);
        prop_assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn frame_decoding_survives_arbitrary_splits(
        payload in proptest::collection::vec(any::<u8>(), 0..512),
        split in 0usize..520,
    ) {
        let frame = Frame::data(payload);
        let wire = frame.encode();
        let cut = split.min(wire.len());

        let mut decoder = FrameDecoder::new(bifrost::DEFAULT_MAX_FRAME_LEN);
        decoder.extend(&wire[..cut]);
        if let Some(early) = decoder.next_frame().unwrap() {
            // Only possible when the cut already covered the whole frame.
            prop_assert_eq!(cut, wire.len());
            prop_assert_eq!(early, frame);
            return Ok(());
        }
        decoder.extend(&wire[cut..]);
        let decoded = decoder.next_frame().unwrap().expect("completed frame");
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn back_to_back_frames_preserve_boundaries(
        first in proptest::collection::vec(any::<u8>(), 0..256),
        second in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let f1 = Frame::data(first);
        let f2 = Frame::control(second);
        let mut wire = f1.encode();
        wire.extend_from_slice(&f2.encode());

        let mut decoder = FrameDecoder::new(bifrost::DEFAULT_MAX_FRAME_LEN);
        decoder.extend(&wire);
        prop_assert_eq!(decoder.next_frame().unwrap().expect("first"), f1);
        prop_assert_eq!(decoder.next_frame().unwrap().expect("second"), f2);
        prop_assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn message_json_round_trips(
        msg_type in any::<u16>(),
        from in any::<[u8; 32]>(),
        to in any::<[u8; 32]>(),
        payload in proptest::collection::vec(any::<u8>(), 0..1024),
        ttl in 0u32..64,
    ) {
        let msg = Message {
            msg_type,
            from: NodeId::from_bytes(from),
            to: NodeId::from_bytes(to),
            payload,
            ttl,
        };
        let wire = msg.encode().expect("encode");
        let decoded = Message::decode(&wire).expect("decode");
        prop_assert_eq!(decoded, msg);
    }

    #[test]
    fn rpc_envelopes_round_trip(
        id in any::<u64>(),
        service in "[a-z][a-z0-9-]{0,16}",
        method in "[a-z][a-z0-9-]{0,16}",
        args in proptest::collection::vec(any::<u8>(), 0..512),
        from in any::<[u8; 32]>(),
        error in proptest::option::of("[ -~]{0,48}"),
    ) {
        let request = RpcRequest {
            id,
            service,
            method,
            args: args.clone(),
            from: NodeId::from_bytes(from),
        };
        let decoded = RpcRequest::decode(&request.encode().expect("encode")).expect("decode");
        prop_assert_eq!(decoded, request);

        let response = RpcResponse { id, data: args, error };
        let decoded = RpcResponse::decode(&response.encode().expect("encode")).expect("decode");
        prop_assert_eq!(decoded, response);
    }

    #[test]
    fn cid_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let a = Cid::compute(&data);
        let b = Cid::compute(&data);
        prop_assert_eq!(a, b);
        prop_assert_eq!(a.as_bytes()[0], 0x12);
        prop_assert_eq!(a.as_bytes()[1], 0x20);
        prop_assert_eq!(Cid::from_hex(&a.to_hex()), Some(a));
    }
}

#[test]
fn frame_at_the_limit_passes_one_byte_over_fails() {
    // Length field covers the type byte plus the payload.
    let max = 64usize;
    let at_limit = Frame::data(vec![0u8; max - 1]);
    let mut decoder = FrameDecoder::new(max);
    decoder.extend(&at_limit.encode());
    assert!(decoder.next_frame().unwrap().is_some());

    let over = Frame::data(vec![0u8; max]);
    let mut decoder = FrameDecoder::new(max);
    decoder.extend(&over.encode());
    assert!(matches!(
        decoder.next_frame(),
        Err(FrameError::TooLarge { .. })
    ));
}

#[test]
fn bad_magic_and_bad_type_are_rejected() {
    let mut wire = Frame::data(b"ok".to_vec()).encode();
    wire[0] = 0x00;
    let mut decoder = FrameDecoder::new(bifrost::DEFAULT_MAX_FRAME_LEN);
    decoder.extend(&wire);
    assert!(matches!(decoder.next_frame(), Err(FrameError::BadMagic)));

    let mut wire = Frame::data(b"ok".to_vec()).encode();
    wire[6] = 0x7f;
    let mut decoder = FrameDecoder::new(bifrost::DEFAULT_MAX_FRAME_LEN);
    decoder.extend(&wire);
    assert!(matches!(decoder.next_frame(), Err(FrameError::BadType(0x7f))));
}

#[test]
fn zero_length_frames_are_rejected() {
    let mut wire = vec![0x56, 0x48];
    wire.extend_from_slice(&0u32.to_be_bytes());
    wire.push(0);
    let mut decoder = FrameDecoder::new(bifrost::DEFAULT_MAX_FRAME_LEN);
    decoder.extend(&wire);
    assert!(matches!(decoder.next_frame(), Err(FrameError::BadLength)));
}
