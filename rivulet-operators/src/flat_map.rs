// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::config::{prefetch_request, replenish_limit, FlatMapConfig};
use crate::inner::{erase_mapper, InnerMapper, InnerParent, InnerSlot};
use parking_lot::Mutex;
use rivulet_core::demand::{Demand, UNBOUNDED};
use rivulet_core::{
    report, DownstreamCell, ErrorHolder, ErrorSource, FlowQueue, Flux, Publisher,
    SharedSubscriber, SharedSubscription, Subscriber, Subscription, WorkInProgress,
};
use rivulet_error::{Result, RivuletError};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Extension trait providing the `flat_map` family of operators.
///
/// Every outer item is mapped to an inner publisher; up to
/// `max_concurrency` inners run at once and their items are merged in
/// arrival order, with a round-robin pass over the inners so a fast inner
/// cannot starve the others. Downstream demand is honoured exactly: inners
/// are only asked for `prefetch` items ahead.
///
/// The first error (from the outer, an inner or the mapper) cancels
/// everything and is delivered at once.
///
/// # Examples
///
/// ```
/// use rivulet_core::Publisher;
/// use rivulet_operators::FlatMapExt;
/// use rivulet_publisher::range;
/// use rivulet_test_utils::TestSubscriber;
///
/// let ts = TestSubscriber::<i32>::new();
/// range(1, 3).flat_map(|v| range(v * 10, 2)).subscribe(ts.clone());
///
/// ts.assert_value_count(6).assert_complete();
/// ```
pub trait FlatMapExt: Publisher + Sized + 'static {
    /// Merges inners with the default configuration.
    fn flat_map<P, F>(self, mapper: F) -> Flux<P::Item>
    where
        P: Publisher + 'static,
        F: Fn(Self::Item) -> P + Send + Sync + 'static,
    {
        let mapper = erase_mapper(move |item| Ok(Some(mapper(item))));
        Flux::new(FlatMap {
            source: self,
            mapper,
            config: FlatMapConfig::default(),
        })
    }

    /// Merges inners with a custom configuration, rejected if invalid.
    fn flat_map_with<P, F>(self, mapper: F, config: FlatMapConfig) -> Result<Flux<P::Item>>
    where
        P: Publisher + 'static,
        F: Fn(Self::Item) -> P + Send + Sync + 'static,
    {
        self.try_flat_map_with(move |item| Ok(Some(mapper(item))), config)
    }

    /// Merges inners produced by a fallible mapper.
    ///
    /// `Err(e)` fails the sequence with `e`; `Ok(None)` fails it with
    /// [`RivuletError::NullValue`].
    fn try_flat_map<P, F>(self, mapper: F) -> Flux<P::Item>
    where
        P: Publisher + 'static,
        F: Fn(Self::Item) -> Result<Option<P>> + Send + Sync + 'static,
    {
        let mapper = erase_mapper(mapper);
        Flux::new(FlatMap {
            source: self,
            mapper,
            config: FlatMapConfig::default(),
        })
    }

    /// Fallible mapper with a custom configuration.
    fn try_flat_map_with<P, F>(self, mapper: F, config: FlatMapConfig) -> Result<Flux<P::Item>>
    where
        P: Publisher + 'static,
        F: Fn(Self::Item) -> Result<Option<P>> + Send + Sync + 'static,
    {
        config.validate()?;
        let mapper = erase_mapper(mapper);
        Ok(Flux::new(FlatMap {
            source: self,
            mapper,
            config,
        }))
    }
}

impl<P> FlatMapExt for P where P: Publisher + Sized + 'static {}

struct FlatMap<S: Publisher, R> {
    source: S,
    mapper: InnerMapper<S::Item, R>,
    config: FlatMapConfig,
}

impl<S, R> Publisher for FlatMap<S, R>
where
    S: Publisher,
    R: Send + 'static,
{
    type Item = R;

    fn subscribe(&self, subscriber: SharedSubscriber<R>) {
        let merge = MergeMain::new(self.mapper.clone(), self.config, subscriber);
        self.source.subscribe(merge);
    }
}

struct MergeMain<T, R> {
    mapper: InnerMapper<T, R>,
    config: FlatMapConfig,
    downstream: DownstreamCell<R>,
    upstream: OnceLock<SharedSubscription<T>>,
    outer_queue: FlowQueue<T>,
    outer_limit: usize,
    outer_consumed: AtomicUsize,
    outer_done: AtomicBool,
    // Drain-confined; locked only to read or swap.
    slots: Mutex<Vec<Arc<InnerSlot<R>>>>,
    last_index: AtomicUsize,
    requested: Demand,
    wip: WorkInProgress,
    errors: ErrorHolder,
    cancelled: AtomicBool,
    me: Weak<Self>,
}

impl<T, R> MergeMain<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    fn new(
        mapper: InnerMapper<T, R>,
        config: FlatMapConfig,
        downstream: SharedSubscriber<R>,
    ) -> Arc<Self> {
        let outer_prefetch = if config.max_concurrency == usize::MAX {
            usize::MAX
        } else {
            config.outer_prefetch
        };
        Arc::new_cyclic(|me| Self {
            mapper,
            config: FlatMapConfig {
                outer_prefetch,
                ..config
            },
            downstream: DownstreamCell::new(downstream),
            upstream: OnceLock::new(),
            outer_queue: FlowQueue::for_prefetch(outer_prefetch),
            outer_limit: replenish_limit(outer_prefetch),
            outer_consumed: AtomicUsize::new(0),
            outer_done: AtomicBool::new(false),
            slots: Mutex::new(Vec::new()),
            last_index: AtomicUsize::new(0),
            requested: Demand::new(),
            wip: WorkInProgress::new(),
            errors: ErrorHolder::first_only(),
            cancelled: AtomicBool::new(false),
            me: me.clone(),
        })
    }

    fn cancel_upstream(&self) {
        if let Some(upstream) = self.upstream.get() {
            upstream.cancel();
        }
    }

    fn cancel_slots(&self) {
        let slots = std::mem::take(&mut *self.slots.lock());
        for slot in slots {
            slot.cancel();
        }
    }

    fn remove_slot(&self, slot: &Arc<InnerSlot<R>>) {
        self.slots
            .lock()
            .retain(|candidate| !Arc::ptr_eq(candidate, slot));
    }

    /// Stops on cancellation or a pending error.
    fn check_terminated(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            self.cancel_slots();
            self.outer_queue.clear();
            self.downstream.take();
            return true;
        }
        if self.errors.is_set() {
            self.cancel_upstream();
            self.cancel_slots();
            self.outer_queue.clear();
            if let Some(error) = self.errors.take() {
                debug!("flat_map terminated with error: {}", error);
                if let Some(downstream) = self.downstream.take() {
                    downstream.on_error(error);
                }
            }
            return true;
        }
        false
    }

    fn outer_consumed_one(&self) {
        if self.config.outer_prefetch == usize::MAX {
            return;
        }
        let consumed = self.outer_consumed.load(Ordering::Relaxed) + 1;
        if consumed == self.outer_limit {
            self.outer_consumed.store(0, Ordering::Relaxed);
            if let Some(upstream) = self.upstream.get() {
                upstream.request(self.outer_limit as u64);
            }
        } else {
            self.outer_consumed.store(consumed, Ordering::Relaxed);
        }
    }

    /// Moves queued outer items into free slots. Returns whether any inner
    /// was subscribed.
    fn admit(&self) -> bool {
        let mut admitted = false;
        loop {
            if self.slots.lock().len() >= self.config.max_concurrency {
                return admitted;
            }
            let Some(item) = self.outer_queue.poll() else {
                return admitted;
            };
            self.outer_consumed_one();
            match (self.mapper)(item) {
                Ok(Some(inner)) => {
                    let parent: Weak<dyn InnerParent<R>> = self.me.clone();
                    let slot = InnerSlot::new(parent, self.config.prefetch);
                    self.slots.lock().push(slot.clone());
                    inner.subscribe(slot);
                    admitted = true;
                }
                Ok(None) => {
                    self.cancel_upstream();
                    self.errors.add(
                        ErrorSource::Inner,
                        RivuletError::null_value("the flat_map mapper returned no publisher"),
                    );
                    return admitted;
                }
                Err(error) => {
                    self.cancel_upstream();
                    self.errors.add(ErrorSource::Inner, error);
                    return admitted;
                }
            }
            if self.cancelled.load(Ordering::Acquire) || self.errors.is_set() {
                return admitted;
            }
        }
    }

    /// One round-robin pass over the active inners. Each inner gives up at
    /// most one prefetch batch before the next one gets a turn. Returns the
    /// number of items taken and whether a slot was freed.
    fn emit(&self, downstream: &SharedSubscriber<R>) -> ControlFlow<(), (usize, bool)> {
        let slots = self.slots.lock().clone();
        let count = slots.len();
        if count == 0 {
            return ControlFlow::Continue((0, false));
        }
        let requested = self.requested.get();
        let mut emitted = 0u64;
        let mut taken_total = 0usize;
        let mut freed = false;
        let start = (self.last_index.load(Ordering::Relaxed) + 1) % count;
        for step in 0..count {
            let index = (start + step) % count;
            let slot = &slots[index];
            let mut taken = 0usize;
            while emitted != requested && taken < slot.prefetch() {
                match slot.poll() {
                    Ok(Some(item)) => {
                        downstream.on_next(item);
                        if requested != UNBOUNDED {
                            emitted += 1;
                        }
                        taken += 1;
                        slot.consumed_one();
                    }
                    Ok(None) => break,
                    Err(error) => {
                        slot.cancel();
                        self.errors.add(ErrorSource::Inner, error);
                        break;
                    }
                }
                if self.cancelled.load(Ordering::Acquire) || self.errors.is_set() {
                    break;
                }
            }
            if self.check_terminated() {
                return ControlFlow::Break(());
            }
            if slot.is_finished() {
                self.remove_slot(slot);
                freed = true;
            }
            if taken != 0 {
                taken_total += taken;
                self.last_index.store(index, Ordering::Relaxed);
            }
        }
        if emitted != 0 {
            self.requested.produced(emitted);
        }
        ControlFlow::Continue((taken_total, freed))
    }

    fn drain_pass(&self) -> ControlFlow<()> {
        let Some(downstream) = self.downstream.get() else {
            self.cancel_slots();
            return ControlFlow::Break(());
        };
        loop {
            if self.check_terminated() {
                return ControlFlow::Break(());
            }
            let outer_done = self.outer_done.load(Ordering::Acquire);
            let admitted = self.admit();
            if self.check_terminated() {
                return ControlFlow::Break(());
            }
            let (taken, freed) = self.emit(&downstream)?;

            if outer_done && self.outer_queue.is_empty() && self.slots.lock().is_empty() {
                debug!("flat_map completed");
                if let Some(downstream) = self.downstream.take() {
                    downstream.on_complete();
                }
                return ControlFlow::Break(());
            }
            if !admitted && !freed && taken == 0 {
                return ControlFlow::Continue(());
            }
        }
    }
}

impl<T, R> InnerParent<R> for MergeMain<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    fn inner_error(&self, _slot: &InnerSlot<R>, error: RivuletError) {
        self.errors.add(ErrorSource::Inner, error);
        self.drain();
    }

    fn drain(&self) {
        self.wip.run(|| self.drain_pass());
    }
}

impl<T, R> Subscriber<T> for MergeMain<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    fn on_subscribe(&self, subscription: SharedSubscription<T>) {
        if self.upstream.set(subscription.clone()).is_err() {
            subscription.cancel();
            return;
        }
        let (Some(me), Some(downstream)) = (self.me.upgrade(), self.downstream.get()) else {
            subscription.cancel();
            return;
        };
        downstream.on_subscribe(me);
        if !self.cancelled.load(Ordering::Acquire) {
            subscription.request(prefetch_request(self.config.outer_prefetch));
        }
    }

    fn on_next(&self, item: T) {
        if self.outer_done.load(Ordering::Acquire) || self.cancelled.load(Ordering::Acquire) {
            report::item_dropped("flat_map");
            return;
        }
        if let Err(error) = self.outer_queue.push(item) {
            self.cancel_upstream();
            self.outer_done.store(true, Ordering::Release);
            self.errors.add(ErrorSource::Outer, error);
        }
        self.drain();
    }

    fn on_error(&self, error: RivuletError) {
        if self.outer_done.swap(true, Ordering::AcqRel) {
            report::error_dropped(&error);
            return;
        }
        self.errors.add(ErrorSource::Outer, error);
        self.drain();
    }

    fn on_complete(&self) {
        if self.outer_done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.drain();
    }
}

impl<T, R> Subscription<R> for MergeMain<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    fn request(&self, n: u64) {
        if self.requested.request(n).is_some() {
            self.drain();
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel_upstream();
        self.drain();
    }
}
