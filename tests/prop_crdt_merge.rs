// Copyright (c) 2026 Valhalla
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use proptest::prelude::*;
use std::collections::BTreeMap;
use valhalla::app::{LwwRegister, LwwStore};
use valhalla::types::NodeId;

fn arb_register() -> impl Strategy<Value = LwwRegister> {
    (
        proptest::collection::vec(any::<u8>(), 0..16),
        0u64..10_000,
        any::<[u8; 32]>(),
    )
        .prop_map(|(value, timestamp_ms, writer)| LwwRegister {
            value,
            timestamp_ms,
            writer: NodeId::from_bytes(writer),
        })
}

fn arb_registers() -> impl Strategy<Value = BTreeMap<String, LwwRegister>> {
    proptest::collection::btree_map("[a-d]{1,3}", arb_register(), 0..12)
}

fn store_from(map: &BTreeMap<String, LwwRegister>) -> LwwStore {
    let store = LwwStore::new(NodeId::from_bytes([0xEE; 32]));
    for (key, register) in map {
        store.set_with_timestamp(key, register.clone());
    }
    store
}

proptest! {
    #[test]
    fn merge_is_idempotent(a in arb_registers(), b in arb_registers()) {
        let store = store_from(&a);
        store.merge(&b);
        let once = store.snapshot();
        let applied = store.merge(&b);
        prop_assert_eq!(applied, 0);
        prop_assert_eq!(store.snapshot(), once);
    }

    #[test]
    fn pairwise_merge_converges(a in arb_registers(), b in arb_registers()) {
        let sa = store_from(&a);
        let sb = store_from(&b);
        sa.merge(&sb.snapshot());
        sb.merge(&sa.snapshot());
        prop_assert_eq!(sa.snapshot(), sb.snapshot());

        // Every key holds the register with the greatest (timestamp, writer).
        for (key, register) in sa.snapshot() {
            let best = [a.get(&key), b.get(&key)]
                .into_iter()
                .flatten()
                .max_by(|x, y| {
                    (x.timestamp_ms, x.writer.as_bytes())
                        .cmp(&(y.timestamp_ms, y.writer.as_bytes()))
                })
                .expect("key came from one of the inputs");
            prop_assert_eq!(&register, best);
        }
    }

    #[test]
    fn merge_order_converges(
        a in arb_registers(),
        b in arb_registers(),
        c in arb_registers(),
    ) {
        let bc = store_from(&a);
        bc.merge(&b);
        bc.merge(&c);

        let cb = store_from(&a);
        cb.merge(&c);
        cb.merge(&b);

        prop_assert_eq!(bc.snapshot(), cb.snapshot());
    }
}
