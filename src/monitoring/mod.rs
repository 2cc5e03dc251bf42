// Copyright (c) 2026 Valhalla
// Licensed under the Apache License, Version 2.0

//! Observability: prometheus metrics registry.

#![forbid(unsafe_code)]

pub mod metrics;
