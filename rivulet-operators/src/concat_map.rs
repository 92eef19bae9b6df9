// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::config::{prefetch_request, replenish_limit, ConcatMapConfig, ErrorMode};
use crate::inner::{erase_mapper, InnerMapper, InnerParent, InnerSlot};
use parking_lot::Mutex;
use rivulet_core::demand::{Demand, UNBOUNDED};
use rivulet_core::{
    report, AtomicFusionMode, DownstreamCell, ErrorHolder, ErrorSource, FlowQueue, Flux,
    FusionMode, Publisher, SharedSubscriber, SharedSubscription, Subscriber, Subscription,
    WorkInProgress,
};
use rivulet_error::{Result, RivuletError};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Extension trait providing the `concat_map` family of operators.
///
/// Outer items are mapped to inner publishers which are subscribed one at a
/// time, in arrival order: inner `n + 1` is subscribed only after inner `n`
/// terminated, so the output keeps the inners' order. The [`ErrorMode`] of the
/// configuration decides when a failure surfaces.
///
/// # Examples
///
/// ```
/// use rivulet_core::Publisher;
/// use rivulet_operators::ConcatMapExt;
/// use rivulet_publisher::range;
/// use rivulet_test_utils::TestSubscriber;
///
/// let ts = TestSubscriber::<i32>::new();
/// range(1, 2).concat_map(|v| range(v, 2)).subscribe(ts.clone());
///
/// ts.assert_values(&[1, 2, 2, 3]).assert_complete();
/// ```
pub trait ConcatMapExt: Publisher + Sized + 'static {
    /// Concatenates inners in [`ErrorMode::Immediate`] with the default prefetch.
    fn concat_map<P, F>(self, mapper: F) -> Flux<P::Item>
    where
        P: Publisher + 'static,
        F: Fn(Self::Item) -> P + Send + Sync + 'static,
    {
        let mapper = erase_mapper(move |item| Ok(Some(mapper(item))));
        Flux::new(ConcatMap {
            source: self,
            mapper,
            config: ConcatMapConfig::default(),
        })
    }

    /// Concatenates inners with a custom configuration, rejected if invalid.
    fn concat_map_with<P, F>(self, mapper: F, config: ConcatMapConfig) -> Result<Flux<P::Item>>
    where
        P: Publisher + 'static,
        F: Fn(Self::Item) -> P + Send + Sync + 'static,
    {
        self.try_concat_map_with(move |item| Ok(Some(mapper(item))), config)
    }

    /// Concatenates inners produced by a fallible mapper.
    ///
    /// `Err(e)` and `Ok(None)` are mapper failures; the latter surfaces as
    /// [`RivuletError::NullValue`]. Both follow the error mode like an inner
    /// error would.
    fn try_concat_map<P, F>(self, mapper: F) -> Flux<P::Item>
    where
        P: Publisher + 'static,
        F: Fn(Self::Item) -> Result<Option<P>> + Send + Sync + 'static,
    {
        let mapper = erase_mapper(mapper);
        Flux::new(ConcatMap {
            source: self,
            mapper,
            config: ConcatMapConfig::default(),
        })
    }

    /// Fallible mapper with a custom configuration.
    fn try_concat_map_with<P, F>(
        self,
        mapper: F,
        config: ConcatMapConfig,
    ) -> Result<Flux<P::Item>>
    where
        P: Publisher + 'static,
        F: Fn(Self::Item) -> Result<Option<P>> + Send + Sync + 'static,
    {
        config.validate()?;
        let mapper = erase_mapper(mapper);
        Ok(Flux::new(ConcatMap {
            source: self,
            mapper,
            config,
        }))
    }
}

impl<P> ConcatMapExt for P where P: Publisher + Sized + 'static {}

struct ConcatMap<S: Publisher, R> {
    source: S,
    mapper: InnerMapper<S::Item, R>,
    config: ConcatMapConfig,
}

impl<S, R> Publisher for ConcatMap<S, R>
where
    S: Publisher,
    R: Send + 'static,
{
    type Item = R;

    fn subscribe(&self, subscriber: SharedSubscriber<R>) {
        let concat = ConcatMain::new(self.mapper.clone(), self.config, subscriber);
        self.source.subscribe(concat);
    }
}

enum OuterStep<T> {
    Item(T),
    Empty,
    Failed,
    Done,
}

enum InnerStep {
    Pending,
    Finished,
    Interrupted,
}

struct ConcatMain<T, R> {
    mapper: InnerMapper<T, R>,
    prefetch: usize,
    error_mode: ErrorMode,
    downstream: DownstreamCell<R>,
    upstream: OnceLock<SharedSubscription<T>>,
    outer_mode: AtomicFusionMode,
    outer_queue: FlowQueue<T>,
    outer_limit: usize,
    outer_consumed: AtomicUsize,
    outer_done: AtomicBool,
    outer_failed: AtomicBool,
    // Set even when the holder already kept an earlier outer error.
    inner_failed: AtomicBool,
    // Drain-confined.
    active: Mutex<Option<Arc<InnerSlot<R>>>>,
    requested: Demand,
    wip: WorkInProgress,
    errors: ErrorHolder,
    cancelled: AtomicBool,
    me: Weak<Self>,
}

impl<T, R> ConcatMain<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    fn new(
        mapper: InnerMapper<T, R>,
        config: ConcatMapConfig,
        downstream: SharedSubscriber<R>,
    ) -> Arc<Self> {
        let errors = match config.error_mode {
            ErrorMode::End => ErrorHolder::accumulating(),
            ErrorMode::Immediate | ErrorMode::Boundary => ErrorHolder::first_only(),
        };
        Arc::new_cyclic(|me| Self {
            mapper,
            prefetch: config.prefetch,
            error_mode: config.error_mode,
            downstream: DownstreamCell::new(downstream),
            upstream: OnceLock::new(),
            outer_mode: AtomicFusionMode::default(),
            outer_queue: FlowQueue::for_prefetch(config.prefetch),
            outer_limit: replenish_limit(config.prefetch),
            outer_consumed: AtomicUsize::new(0),
            outer_done: AtomicBool::new(false),
            outer_failed: AtomicBool::new(false),
            inner_failed: AtomicBool::new(false),
            active: Mutex::new(None),
            requested: Demand::new(),
            wip: WorkInProgress::new(),
            errors,
            cancelled: AtomicBool::new(false),
            me: me.clone(),
        })
    }

    fn cancel_upstream(&self) {
        if let Some(upstream) = self.upstream.get() {
            upstream.cancel();
        }
    }

    /// Whether a recorded error has to be delivered without waiting for the
    /// active inner.
    fn must_fail_now(&self) -> bool {
        match self.error_mode {
            ErrorMode::Immediate => self.errors.is_set(),
            ErrorMode::Boundary => self.inner_failed.load(Ordering::Acquire),
            ErrorMode::End => false,
        }
    }

    fn release(&self) {
        let active = self.active.lock().take();
        if let Some(active) = active {
            active.cancel();
        }
        self.outer_queue.clear();
        if self.outer_mode.load().is_fused() {
            if let Some(upstream) = self.upstream.get() {
                upstream.clear();
            }
        }
    }

    fn fail(&self) {
        self.cancel_upstream();
        self.release();
        if let Some(error) = self.errors.take() {
            debug!("concat_map terminated with error: {}", error);
            if let Some(downstream) = self.downstream.take() {
                downstream.on_error(error);
            }
        }
    }

    fn complete(&self) {
        let Some(downstream) = self.downstream.take() else {
            return;
        };
        match self.errors.take() {
            Some(error) => {
                debug!("concat_map completed with delayed error: {}", error);
                downstream.on_error(error);
            }
            None => {
                debug!("concat_map completed");
                downstream.on_complete();
            }
        }
    }

    fn outer_consumed_one(&self) {
        if self.prefetch == usize::MAX {
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

    fn inner_failed(&self, error: RivuletError) {
        self.inner_failed.store(true, Ordering::Release);
        self.errors.add(ErrorSource::Inner, error);
    }

    fn outer_failed(&self, error: RivuletError) {
        self.cancel_upstream();
        self.outer_failed.store(true, Ordering::Release);
        self.errors.add(ErrorSource::Outer, error);
    }

    fn next_outer(&self) -> OuterStep<T> {
        if self.outer_failed.load(Ordering::Acquire) {
            return OuterStep::Done;
        }
        let mode = self.outer_mode.load();
        // Read before polling so a completion racing with the last item is
        // never mistaken for an empty, finished outer.
        let done = self.outer_done.load(Ordering::Acquire);
        let polled = match (mode, self.upstream.get()) {
            (FusionMode::Sync | FusionMode::Async, Some(upstream)) => upstream.poll(),
            _ => Ok(self.outer_queue.poll()),
        };
        match polled {
            Ok(Some(item)) => {
                if mode != FusionMode::Sync {
                    self.outer_consumed_one();
                }
                OuterStep::Item(item)
            }
            Ok(None) if done || mode == FusionMode::Sync => OuterStep::Done,
            Ok(None) => OuterStep::Empty,
            Err(error) => {
                self.outer_failed(error);
                OuterStep::Failed
            }
        }
    }

    fn subscribe_next(&self, item: T) {
        let failure = match (self.mapper)(item) {
            Ok(Some(inner)) => {
                let parent: Weak<dyn InnerParent<R>> = self.me.clone();
                let slot = InnerSlot::new(parent, self.prefetch);
                *self.active.lock() = Some(slot.clone());
                inner.subscribe(slot);
                return;
            }
            Ok(None) => RivuletError::null_value("the concat_map mapper returned no publisher"),
            Err(error) => error,
        };
        if self.error_mode != ErrorMode::End {
            self.cancel_upstream();
        }
        self.inner_failed(failure);
    }

    fn drain_inner(&self, downstream: &SharedSubscriber<R>, slot: &InnerSlot<R>) -> InnerStep {
        let requested = self.requested.get();
        let mut emitted = 0u64;
        let step = loop {
            if emitted == requested {
                break Self::settled(slot);
            }
            match slot.poll() {
                Ok(Some(item)) => {
                    downstream.on_next(item);
                    if requested != UNBOUNDED {
                        emitted += 1;
                    }
                    slot.consumed_one();
                    if self.cancelled.load(Ordering::Acquire) || self.must_fail_now() {
                        break InnerStep::Interrupted;
                    }
                }
                Ok(None) => break Self::settled(slot),
                Err(error) => {
                    slot.cancel();
                    self.inner_failed(error);
                    break match self.error_mode {
                        ErrorMode::End => InnerStep::Finished,
                        ErrorMode::Immediate | ErrorMode::Boundary => InnerStep::Interrupted,
                    };
                }
            }
        };
        if emitted != 0 {
            self.requested.produced(emitted);
        }
        step
    }

    fn settled(slot: &InnerSlot<R>) -> InnerStep {
        if slot.is_finished() {
            InnerStep::Finished
        } else {
            InnerStep::Pending
        }
    }

    fn drain_pass(&self) -> ControlFlow<()> {
        let Some(downstream) = self.downstream.get() else {
            self.release();
            return ControlFlow::Break(());
        };
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                self.release();
                self.downstream.take();
                return ControlFlow::Break(());
            }
            if self.must_fail_now() {
                self.fail();
                return ControlFlow::Break(());
            }

            let active = self.active.lock().clone();
            match active {
                Some(slot) => match self.drain_inner(&downstream, &slot) {
                    InnerStep::Pending => return ControlFlow::Continue(()),
                    InnerStep::Finished => {
                        self.active.lock().take();
                    }
                    InnerStep::Interrupted => {}
                },
                None => {
                    if self.error_mode == ErrorMode::Boundary && self.errors.is_set() {
                        self.fail();
                        return ControlFlow::Break(());
                    }
                    match self.next_outer() {
                        OuterStep::Item(item) => self.subscribe_next(item),
                        OuterStep::Empty => return ControlFlow::Continue(()),
                        OuterStep::Failed => {}
                        OuterStep::Done => {
                            self.complete();
                            return ControlFlow::Break(());
                        }
                    }
                }
            }
        }
    }
}

impl<T, R> InnerParent<R> for ConcatMain<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    fn inner_error(&self, slot: &InnerSlot<R>, error: RivuletError) {
        self.inner_failed(error);
        if self.error_mode == ErrorMode::End {
            slot.mark_done();
        }
        self.drain();
    }

    fn drain(&self) {
        self.wip.run(|| self.drain_pass());
    }
}

impl<T, R> Subscriber<T> for ConcatMain<T, R>
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
        let mode = subscription.request_fusion(FusionMode::Any);
        self.outer_mode.store(mode);
        if mode == FusionMode::Sync {
            self.outer_done.store(true, Ordering::Release);
        }
        downstream.on_subscribe(me);
        match mode {
            FusionMode::Sync => self.drain(),
            FusionMode::Async | FusionMode::None | FusionMode::Any => {
                if !self.cancelled.load(Ordering::Acquire) {
                    subscription.request(prefetch_request(self.prefetch));
                }
            }
        }
    }

    fn on_next(&self, item: T) {
        if self.outer_mode.load() == FusionMode::Async {
            return;
        }
        if self.outer_done.load(Ordering::Acquire) || self.cancelled.load(Ordering::Acquire) {
            report::item_dropped("concat_map");
            return;
        }
        if let Err(error) = self.outer_queue.push(item) {
            self.outer_failed(error);
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
        if !self.outer_done.swap(true, Ordering::AcqRel) {
            self.drain();
        }
    }

    fn on_ready(&self) {
        self.drain();
    }
}

impl<T, R> Subscription<R> for ConcatMain<T, R>
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
