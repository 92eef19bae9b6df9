// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

#![allow(clippy::multiple_crate_versions)]
//! Core protocol and machinery for Rivulet reactive streams.
//!
//! The protocol is three traits: a [`Publisher`] links a [`Subscriber`] through
//! a [`Subscription`], the subscriber asks for items with `request(n)` and the
//! publisher never emits more than it was asked for. Operators built on top use
//! the shared machinery in this crate:
//!
//! - [`demand`]: saturating demand accounting,
//! - [`drain::WorkInProgress`]: the serialized drain loop,
//! - [`FlowQueue`]: lock-free buffers between push and drain,
//! - [`FusionMode`]: queue-fusion negotiation,
//! - [`ErrorHolder`]: first-only or accumulating error storage,
//! - [`SubscriptionArbiter`]: demand-preserving upstream switching.

#[macro_use]
mod logging;

pub mod arbiter;
pub mod demand;
pub mod drain;
pub mod error_holder;
pub mod flux;
pub mod fusion;
pub mod publisher;
pub mod queue;
pub mod report;
pub mod stream_item;
pub mod subscriber;
pub mod subscription;

pub use self::arbiter::SubscriptionArbiter;
pub use self::demand::{Demand, UNBOUNDED};
pub use self::drain::WorkInProgress;
pub use self::error_holder::{ErrorHolder, ErrorSource};
pub use self::flux::{Flux, IntoFlux};
pub use self::fusion::{AtomicFusionMode, FusionMode};
pub use self::publisher::{Publisher, SharedPublisher};
pub use self::queue::FlowQueue;
pub use self::stream_item::StreamItem;
pub use self::subscriber::{DownstreamCell, SharedSubscriber, Subscriber};
pub use self::subscription::{EmptySubscription, SharedSubscription, Subscription};
pub use rivulet_error::{Result, RivuletError};
