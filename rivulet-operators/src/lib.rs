// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

#![allow(clippy::multiple_crate_versions)]
//! Higher-order operators over Rivulet publishers.
//!
//! | Operator | Inners at once | Output order | Errors |
//! |----------|----------------|--------------|--------|
//! | [`FlatMapExt::flat_map`] | up to `max_concurrency` | interleaved, round-robin | first error wins |
//! | [`ConcatMapExt::concat_map`] | one | inner by inner | per [`ErrorMode`] |
//! | [`TimeoutExt::timeout`] | n/a | source order | deadline expiry |
//!
//! All operators honour downstream demand exactly, negotiate queue fusion
//! with their upstreams and release every inner subscription on
//! cancellation or termination.

#[macro_use]
mod logging;

pub mod concat_map;
pub mod config;
pub mod flat_map;
mod inner;
pub mod timeout;

pub use concat_map::ConcatMapExt;
pub use config::{
    ConcatMapConfig, ErrorMode, FlatMapConfig, DEFAULT_MAX_CONCURRENCY, DEFAULT_PREFETCH,
};
pub use flat_map::FlatMapExt;
pub use timeout::TimeoutExt;
