// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Tokio-backed deadline producers.

use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use rivulet_core::{
    demand, EmptySubscription, Flux, Publisher, SharedSubscriber, Subscription,
};
use rivulet_error::RivuletError;
use rivulet_operators::TimeoutExt;
use std::sync::{Arc, OnceLock};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Emits a single `()` after `delay`, then completes.
///
/// The tick needs outstanding demand when the delay elapses, otherwise the
/// timer fails with [`RivuletError::MissingBackpressure`]. Cancelling aborts
/// the sleeping task. Subscribing outside of a tokio runtime fails with
/// [`RivuletError::StreamProcessingError`].
#[must_use]
pub fn timer(delay: Duration) -> Timer {
    Timer { delay }
}

/// Publisher returned by [`timer`].
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    delay: Duration,
}

impl Timer {
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

impl Publisher for Timer {
    type Item = ();

    fn subscribe(&self, subscriber: SharedSubscriber<()>) {
        let Ok(handle) = Handle::try_current() else {
            warn!("timer: subscribed outside of a tokio runtime");
            subscriber.on_subscribe(EmptySubscription::shared());
            subscriber.on_error(RivuletError::stream_error("timer requires a tokio runtime"));
            return;
        };

        let tick = Arc::new(Tick::default());
        subscriber.on_subscribe(tick.clone());
        if tick.cancelled.load(Ordering::Acquire) {
            return;
        }

        let delay = self.delay;
        let state = tick.clone();
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if state.cancelled.swap(true, Ordering::AcqRel) {
                return;
            }
            if state.requested.load(Ordering::Acquire) {
                subscriber.on_next(());
                subscriber.on_complete();
            } else {
                subscriber.on_error(RivuletError::missing_backpressure(
                    "timer tick without demand",
                ));
            }
        });
        tick.attach(task.abort_handle());
    }
}

#[derive(Default)]
struct Tick {
    requested: AtomicBool,
    cancelled: AtomicBool,
    task: OnceLock<AbortHandle>,
}

impl Tick {
    fn attach(&self, task: AbortHandle) {
        let task = self.task.get_or_init(|| task);
        if self.cancelled.load(Ordering::Acquire) && !task.is_finished() {
            task.abort();
        }
    }
}

impl Subscription<()> for Tick {
    fn request(&self, n: u64) {
        if demand::validate(n) {
            self.requested.store(true, Ordering::Release);
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.task.get() {
            task.abort();
        }
    }
}

/// Wall-clock timeouts built from [`timer`] deadlines.
pub trait TimeoutAfterExt: Publisher + Sized + 'static {
    /// Fails with [`RivuletError::TimeoutError`] when the first item, or any
    /// item after the previous one, takes longer than `period`.
    fn timeout_after(self, period: Duration) -> Flux<Self::Item> {
        self.timeout(timer(period), move |_| timer(period))
    }

    /// Switches to `fallback` when `period` elapses without an item.
    fn timeout_after_with_fallback<P>(self, period: Duration, fallback: P) -> Flux<Self::Item>
    where
        P: Publisher<Item = Self::Item> + 'static,
    {
        self.timeout_with_fallback(timer(period), move |_| timer(period), fallback)
    }
}

impl<P> TimeoutAfterExt for P where P: Publisher + Sized + 'static {}
