// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::subscription::SharedSubscription;
use parking_lot::Mutex;
use rivulet_error::RivuletError;
use std::sync::Arc;

/// Shared handle to a subscriber.
pub type SharedSubscriber<T> = Arc<dyn Subscriber<T>>;

/// Receiver of a producer's signals.
///
/// The producer calls `on_subscribe` exactly once, then `on_next` at most as
/// many times as demand allows, then at most one of `on_error`/`on_complete`.
/// Signals to one subscriber never overlap, although consecutive signals may
/// arrive on different threads.
pub trait Subscriber<T>: Send + Sync {
    /// Receives the link. Fusion must be negotiated here, before `request`.
    fn on_subscribe(&self, subscription: SharedSubscription<T>);

    /// Receives one item.
    fn on_next(&self, item: T);

    /// Receives the terminal error.
    fn on_error(&self, error: RivuletError);

    /// Receives the terminal completion.
    fn on_complete(&self);

    /// Announces that items can be polled from an async-fused subscription.
    ///
    /// Only delivered after the subscriber negotiated
    /// [`FusionMode::Async`](crate::FusionMode::Async).
    fn on_ready(&self) {}
}

/// The downstream of a stage, released once the link is over.
///
/// A subscriber holds its subscription and the subscription's stage holds
/// the subscriber, so each stage keeps its downstream here and calls
/// [`take`](Self::take) on termination or cancellation to break the cycle.
/// Signals are delivered through a clone, never while the lock is held.
pub struct DownstreamCell<T> {
    slot: Mutex<Option<SharedSubscriber<T>>>,
}

impl<T> DownstreamCell<T> {
    #[must_use]
    pub fn new(subscriber: SharedSubscriber<T>) -> Self {
        Self {
            slot: Mutex::new(Some(subscriber)),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Installs the downstream, returning `false` if one was already set.
    pub fn set(&self, subscriber: SharedSubscriber<T>) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(subscriber);
        true
    }

    /// The downstream, unless it was released.
    pub fn get(&self) -> Option<SharedSubscriber<T>> {
        self.slot.lock().clone()
    }

    /// Releases the downstream. Only the first caller gets it, which makes
    /// this the gate for the single terminal signal.
    pub fn take(&self) -> Option<SharedSubscriber<T>> {
        self.slot.lock().take()
    }

    pub fn is_released(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl<T> Default for DownstreamCell<T> {
    fn default() -> Self {
        Self::empty()
    }
}
