// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! # Rivulet
//!
//! Backpressured reactive streams: a producer never emits more than its
//! consumer asked for, and the operators on top keep that promise while
//! merging, concatenating and timing out asynchronous sequences.
//!
//! ## Overview
//!
//! A [`Publisher`] is a cold description of work. Subscribing links a
//! [`Subscriber`] through a [`Subscription`]; the subscriber asks for items
//! with `request(n)` and can `cancel` at any time. Every operator returns a
//! [`Flux`], a cloneable type-erased publisher.
//!
//! | Operator | Behaviour |
//! |----------|-----------|
//! | [`flat_map`](FlatMapExt::flat_map) | maps each item to a publisher and merges them, bounded concurrency |
//! | [`concat_map`](ConcatMapExt::concat_map) | maps each item to a publisher and plays them one after another |
//! | [`timeout`](TimeoutExt::timeout) | fails or switches to a fallback when a deadline producer fires first |
//! | [`map`](MapExt::map), [`filter`](MapExt::filter) | per-item transforms |
//!
//! With the default `runtime-tokio` feature, [`IntoStreamExt::into_stream`]
//! consumes any publisher as a `futures::Stream`, [`from_stream`] goes the
//! other way and [`timer`] provides wall-clock deadlines.
//!
//! ## Quick Start
//!
//! ```rust
//! use rivulet::prelude::*;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI32, Ordering};
//!
//! struct Sum(AtomicI32);
//!
//! impl Subscriber<i32> for Sum {
//!     fn on_subscribe(&self, subscription: SharedSubscription<i32>) {
//!         subscription.request(UNBOUNDED);
//!     }
//!     fn on_next(&self, item: i32) {
//!         self.0.fetch_add(item, Ordering::SeqCst);
//!     }
//!     fn on_error(&self, _error: RivuletError) {}
//!     fn on_complete(&self) {}
//! }
//!
//! let sum = Arc::new(Sum(AtomicI32::new(0)));
//! range(1, 3)
//!     .concat_map(|i| range(i * 10, 2))
//!     .subscribe(sum.clone());
//!
//! assert_eq!(sum.0.load(Ordering::SeqCst), 10 + 11 + 20 + 21 + 30 + 31);
//! ```

pub use rivulet_core::{
    demand, EmptySubscription, Flux, FusionMode, IntoFlux, Publisher, SharedPublisher,
    SharedSubscriber, SharedSubscription, StreamItem, Subscriber, Subscription, UNBOUNDED,
};
pub use rivulet_error::{Result, RivuletError};
pub use rivulet_operators::{
    ConcatMapConfig, ConcatMapExt, ErrorMode, FlatMapConfig, FlatMapExt, TimeoutExt,
    DEFAULT_MAX_CONCURRENCY, DEFAULT_PREFETCH,
};
pub use rivulet_publisher::{
    empty, error, from_iter, from_vec, just, never, range, DirectProcessor, MapExt,
    UnicastProcessor,
};

#[cfg(feature = "runtime-tokio")]
pub use rivulet_exec::{
    from_item_stream, from_stream, into_stream, timer, IntoStreamExt, PublisherStream,
    StreamPublisher, TimeoutAfterExt, Timer,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        empty, error, from_iter, from_vec, just, never, range, ConcatMapConfig, ConcatMapExt,
        DirectProcessor, ErrorMode, FlatMapConfig, FlatMapExt, Flux, IntoFlux, MapExt,
        Publisher, RivuletError, SharedSubscription, StreamItem, Subscriber, Subscription,
        TimeoutExt, UnicastProcessor, UNBOUNDED,
    };

    #[cfg(feature = "runtime-tokio")]
    pub use crate::{from_stream, timer, IntoStreamExt, TimeoutAfterExt};
}
