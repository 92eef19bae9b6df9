// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Source stages.
//!
//! Every iterator-backed source answers [`FusionMode::Sync`] when asked, so a
//! fusing consumer can pull the whole sequence with `poll` and skip the
//! request/`on_next` round trip entirely.

use parking_lot::Mutex;
use rivulet_core::demand::{self, UNBOUNDED};
use rivulet_core::{
    DownstreamCell, EmptySubscription, Flux, FusionMode, Publisher, SharedSubscriber,
    Subscription,
};
use rivulet_error::{Result, RivuletError};
use std::iter::Peekable;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Emits `count` consecutive integers starting at `start`.
///
/// A range that would run past `i32::MAX` fails with
/// [`RivuletError::InvalidArgument`] on subscription.
pub fn range(start: i32, count: usize) -> Flux<i32> {
    let end = i64::from(start) + count as i64;
    if count > 0 && end - 1 > i64::from(i32::MAX) {
        return error(RivuletError::invalid_argument(format!(
            "range({start}, {count}) overflows i32"
        )));
    }
    Flux::new(IterPublisher::new(move || {
        (i64::from(start)..end).filter_map(|value| i32::try_from(value).ok())
    }))
}

/// Emits a single value, then completes.
pub fn just<T>(value: T) -> Flux<T>
where
    T: Clone + Send + Sync + 'static,
{
    Flux::new(IterPublisher::new(move || std::iter::once(value.clone())))
}

/// Emits the elements of `values` in order, then completes.
pub fn from_vec<T>(values: Vec<T>) -> Flux<T>
where
    T: Clone + Send + Sync + 'static,
{
    from_iter(values)
}

/// Emits the items of a fresh iterator over `iterable` for every subscriber.
pub fn from_iter<I>(iterable: I) -> Flux<I::Item>
where
    I: IntoIterator + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    Flux::new(IterPublisher::new(move || iterable.clone().into_iter()))
}

/// Completes immediately.
pub fn empty<T: Send + 'static>() -> Flux<T> {
    Flux::new(Empty(PhantomData))
}

/// Never signals anything after `on_subscribe`.
pub fn never<T: Send + 'static>() -> Flux<T> {
    Flux::new(Never(PhantomData))
}

/// Fails immediately with `error`.
pub fn error<T: Send + 'static>(error: RivuletError) -> Flux<T> {
    Flux::new(Fail {
        error,
        _marker: PhantomData,
    })
}

struct Empty<T>(PhantomData<fn() -> T>);

impl<T: Send + 'static> Publisher for Empty<T> {
    type Item = T;

    fn subscribe(&self, subscriber: SharedSubscriber<T>) {
        subscriber.on_subscribe(EmptySubscription::shared());
        subscriber.on_complete();
    }
}

struct Never<T>(PhantomData<fn() -> T>);

impl<T: Send + 'static> Publisher for Never<T> {
    type Item = T;

    fn subscribe(&self, subscriber: SharedSubscriber<T>) {
        subscriber.on_subscribe(EmptySubscription::shared());
    }
}

struct Fail<T> {
    error: RivuletError,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Publisher for Fail<T> {
    type Item = T;

    fn subscribe(&self, subscriber: SharedSubscriber<T>) {
        subscriber.on_subscribe(EmptySubscription::shared());
        subscriber.on_error(self.error.clone());
    }
}

/// Publisher replaying a fresh iterator per subscription.
pub struct IterPublisher<F> {
    make: F,
}

impl<F> IterPublisher<F> {
    pub fn new(make: F) -> Self {
        Self { make }
    }
}

impl<F, I> Publisher for IterPublisher<F>
where
    F: Fn() -> I + Send + Sync,
    I: Iterator + Send + 'static,
    I::Item: Send + 'static,
{
    type Item = I::Item;

    fn subscribe(&self, subscriber: SharedSubscriber<I::Item>) {
        let mut iter = (self.make)().peekable();
        if iter.peek().is_none() {
            subscriber.on_subscribe(EmptySubscription::shared());
            subscriber.on_complete();
            return;
        }
        let subscription = Arc::new(IterSubscription {
            iter: Mutex::new(Some(iter)),
            downstream: DownstreamCell::new(subscriber.clone()),
            requested: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
        });
        subscriber.on_subscribe(subscription);
    }
}

struct IterSubscription<I: Iterator> {
    iter: Mutex<Option<Peekable<I>>>,
    downstream: DownstreamCell<I::Item>,
    requested: AtomicU64,
    cancelled: AtomicBool,
}

impl<I> IterSubscription<I>
where
    I: Iterator + Send,
    I::Item: Send + 'static,
{
    fn next(&self) -> Option<I::Item> {
        self.iter.lock().as_mut().and_then(|iter| iter.next())
    }

    fn exhausted(&self) -> bool {
        self.iter
            .lock()
            .as_mut()
            .map_or(true, |iter| iter.peek().is_none())
    }

    fn complete(&self) {
        self.iter.lock().take();
        if let Some(subscriber) = self.downstream.take() {
            subscriber.on_complete();
        }
    }

    /// Emits while demand lasts. Only the caller that raised demand from zero
    /// gets here, so emission is never concurrent.
    fn emit(&self, mut requested: u64) {
        let Some(subscriber) = self.downstream.get() else {
            return;
        };
        let mut emitted = 0u64;
        loop {
            while emitted != requested {
                if self.cancelled.load(Ordering::Acquire) {
                    return;
                }
                let Some(item) = self.next() else {
                    self.complete();
                    return;
                };
                subscriber.on_next(item);
                if requested != UNBOUNDED {
                    emitted += 1;
                }
                if self.exhausted() {
                    if !self.cancelled.load(Ordering::Acquire) {
                        self.complete();
                    }
                    return;
                }
            }
            requested = demand::produced(&self.requested, emitted);
            if requested == 0 {
                return;
            }
            emitted = 0;
        }
    }
}

impl<I> Subscription<I::Item> for IterSubscription<I>
where
    I: Iterator + Send,
    I::Item: Send + 'static,
{
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        if demand::add_cap(&self.requested, n) == 0 {
            self.emit(self.requested.load(Ordering::Acquire));
        }
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.downstream.take();
            self.iter.lock().take();
        }
    }

    fn request_fusion(&self, requested: FusionMode) -> FusionMode {
        if requested.accepts(FusionMode::Sync) {
            // The consumer pulls from now on and never needs a push signal.
            self.downstream.take();
            FusionMode::Sync
        } else {
            FusionMode::None
        }
    }

    fn poll(&self) -> Result<Option<I::Item>> {
        Ok(self.next())
    }

    fn is_empty(&self) -> bool {
        self.exhausted()
    }

    fn clear(&self) {
        self.iter.lock().take();
    }
}
