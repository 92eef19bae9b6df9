// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Test utilities and fixtures for the Rivulet reactive streams library.
//!
//! This crate is meant for development and testing only.
//!
//! # Key Types
//!
//! - [`TestSubscriber`]: records signals, checks the protocol and offers
//!   chainable assertions. It can also request queue fusion to drive a source
//!   through its `poll` path.
//! - [`ProbePublisher`]: wraps a publisher and counts subscriptions,
//!   cancellations and requests.
//! - [`ErrorInjectingPublisher`]: emits some values, then fails.

pub mod error_injection;
pub mod probe;
pub mod test_subscriber;

pub use error_injection::{forced_failure, ErrorInjectingPublisher};
pub use probe::{ProbePublisher, ProbeStats};
pub use test_subscriber::TestSubscriber;
