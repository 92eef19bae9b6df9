// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Queue-fusion capability negotiation.
//!
//! A consumer asks its upstream, once and synchronously inside `on_subscribe`,
//! whether the upstream subscription can act as a queue. The answer is a tagged
//! [`FusionMode`]:
//!
//! - [`FusionMode::Sync`]: every item is available right now. The consumer pulls
//!   with `poll` until it returns `Ok(None)`, which means completion. No
//!   `request` calls and no `on_next`/`on_complete` signals follow.
//! - [`FusionMode::Async`]: items arrive over time. The producer calls
//!   `on_ready` whenever new items can be polled and still delivers its
//!   terminal signal through `on_error`/`on_complete`.
//! - [`FusionMode::None`]: regular push mode.

use core::sync::atomic::{AtomicU8, Ordering};

/// Fusion mode requested by a consumer or granted by a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FusionMode {
    /// No fusion; items travel through `on_next`.
    #[default]
    None,
    /// Synchronous fusion; `poll` yields everything, `Ok(None)` ends the sequence.
    Sync,
    /// Asynchronous fusion; `on_ready` announces pollable items.
    Async,
    /// Either of [`FusionMode::Sync`] or [`FusionMode::Async`] (request only).
    Any,
}

impl FusionMode {
    /// Whether a producer able to fuse in `offered` mode may grant it to a
    /// consumer that asked for `self`.
    #[must_use]
    pub const fn accepts(self, offered: FusionMode) -> bool {
        match (self, offered) {
            (FusionMode::Any, FusionMode::Sync | FusionMode::Async) => true,
            (FusionMode::Sync, FusionMode::Sync) => true,
            (FusionMode::Async, FusionMode::Async) => true,
            _ => false,
        }
    }

    /// Returns `true` for [`FusionMode::Sync`] and [`FusionMode::Async`].
    #[must_use]
    pub const fn is_fused(self) -> bool {
        matches!(self, FusionMode::Sync | FusionMode::Async)
    }

    const fn to_u8(self) -> u8 {
        match self {
            FusionMode::None => 0,
            FusionMode::Sync => 1,
            FusionMode::Async => 2,
            FusionMode::Any => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => FusionMode::Sync,
            2 => FusionMode::Async,
            3 => FusionMode::Any,
            _ => FusionMode::None,
        }
    }
}

/// A [`FusionMode`] stored in an atomic, published once from `on_subscribe`
/// and read by the drain loop.
#[derive(Debug, Default)]
pub struct AtomicFusionMode(AtomicU8);

impl AtomicFusionMode {
    #[must_use]
    pub const fn new(mode: FusionMode) -> Self {
        Self(AtomicU8::new(mode.to_u8()))
    }

    pub fn load(&self) -> FusionMode {
        FusionMode::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, mode: FusionMode) {
        self.0.store(mode.to_u8(), Ordering::Release);
    }
}
