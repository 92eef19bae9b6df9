// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::fusion::FusionMode;
use rivulet_error::Result;
use std::marker::PhantomData;
use std::sync::Arc;

/// Shared handle to a subscription.
pub type SharedSubscription<T> = Arc<dyn Subscription<T>>;

/// The live link between one producer and one consumer.
///
/// `request` and `cancel` may be called from any thread, including from inside
/// the consumer's own `on_next`. Implementations must tolerate that re-entry
/// without recursing into emission (see [`crate::drain::WorkInProgress`]).
///
/// The queue methods (`request_fusion`, `poll`, `is_empty`, `clear`) are the
/// fused access path. Their defaults describe a subscription that cannot fuse.
pub trait Subscription<T>: Send + Sync {
    /// Adds `n` to the outstanding demand. `n` must be positive; the total
    /// saturates at [`crate::demand::UNBOUNDED`].
    fn request(&self, n: u64);

    /// Stops the producer as soon as practical. Idempotent.
    fn cancel(&self);

    /// Negotiates queue fusion. Called at most once, from `on_subscribe`,
    /// before any `request`.
    fn request_fusion(&self, _requested: FusionMode) -> FusionMode {
        FusionMode::None
    }

    /// Pulls the next item in fused mode.
    ///
    /// `Ok(None)` means "nothing right now" in async mode and "completed" in
    /// sync mode. A stage that would yield a null item returns
    /// `Err(RivuletError::NullValue)` instead.
    fn poll(&self) -> Result<Option<T>> {
        Ok(None)
    }

    /// Whether a fused `poll` would currently yield nothing.
    fn is_empty(&self) -> bool {
        true
    }

    /// Drops every item still buffered on the fused path.
    fn clear(&self) {}
}

/// A subscription that does nothing, handed to subscribers of sources that
/// terminate immediately.
pub struct EmptySubscription<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> EmptySubscription<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn shared() -> SharedSubscription<T>
    where
        T: 'static,
    {
        Arc::new(Self::new())
    }
}

impl<T> Default for EmptySubscription<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Subscription<T> for EmptySubscription<T> {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {}
}
