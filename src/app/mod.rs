// Copyright (c) 2026 Valhalla
// Licensed under the Apache License, Version 2.0

//! Application layer: RPC dispatch, topic pub/sub, LWW registers.

#![forbid(unsafe_code)]

pub mod crdt;
pub mod pubsub;
pub mod rpc;

pub use crdt::{LwwRegister, LwwStore, RegisterSync};
pub use pubsub::{PubSub, SubscriptionHandle, TopicHandler};
pub use rpc::{RpcHandler, RpcRequest, RpcResponse, RpcRouter};
