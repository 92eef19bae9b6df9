// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use rivulet_core::{
    report, AtomicFusionMode, DownstreamCell, Flux, FusionMode, Publisher, SharedSubscriber,
    SharedSubscription, Subscriber, Subscription,
};
use rivulet_error::{Result, RivuletError};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Item-wise transforms that keep queue fusion intact.
///
/// `map`, `try_map` and `filter` forward `request_fusion` upstream and apply
/// their function inside `poll`, so a fused consumer still pulls straight from
/// the source. `hide` does the opposite and makes any publisher non-fusable.
pub trait MapExt: Publisher + Sized + 'static {
    /// Applies `f` to every item.
    fn map<U, F>(self, f: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(Self::Item) -> U + Send + Sync + 'static,
    {
        Flux::new(Transform::new(self, move |item| Ok(Some(f(item))), OnNone::Fail))
    }

    /// Applies a fallible `f` to every item.
    ///
    /// `Err(e)` cancels the upstream and fails with `e`; `Ok(None)` fails with
    /// [`RivuletError::NullValue`].
    fn try_map<U, F>(self, f: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(Self::Item) -> Result<Option<U>> + Send + Sync + 'static,
    {
        Flux::new(Transform::new(self, f, OnNone::Fail))
    }

    /// Keeps only the items matching `predicate`, replenishing demand for the
    /// ones it drops.
    fn filter<F>(self, predicate: F) -> Flux<Self::Item>
    where
        F: Fn(&Self::Item) -> bool + Send + Sync + 'static,
    {
        Flux::new(Transform::new(
            self,
            move |item| Ok(predicate(&item).then_some(item)),
            OnNone::Skip,
        ))
    }

    /// Hides the upstream subscription so no consumer can fuse with it.
    fn hide(self) -> Flux<Self::Item> {
        Flux::new(Hide { source: self })
    }
}

impl<P> MapExt for P where P: Publisher + Sized + 'static {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnNone {
    Fail,
    Skip,
}

struct Transform<P, F, U> {
    source: P,
    op: Arc<F>,
    on_none: OnNone,
    _marker: PhantomData<fn() -> U>,
}

impl<P, F, U> Transform<P, F, U>
where
    P: Publisher,
    F: Fn(P::Item) -> Result<Option<U>> + Send + Sync + 'static,
{
    fn new(source: P, op: F, on_none: OnNone) -> Self {
        Self {
            source,
            op: Arc::new(op),
            on_none,
            _marker: PhantomData,
        }
    }
}

impl<P, F, U> Publisher for Transform<P, F, U>
where
    P: Publisher,
    U: Send + 'static,
    F: Fn(P::Item) -> Result<Option<U>> + Send + Sync + 'static,
{
    type Item = U;

    fn subscribe(&self, subscriber: SharedSubscriber<U>) {
        let stage: Arc<TransformStage<P::Item, U, F>> = Arc::new_cyclic(|me| TransformStage {
            op: self.op.clone(),
            on_none: self.on_none,
            downstream: DownstreamCell::new(subscriber),
            upstream: OnceLock::new(),
            mode: AtomicFusionMode::default(),
            done: AtomicBool::new(false),
            me: me.clone(),
        });
        self.source.subscribe(stage);
    }
}

struct TransformStage<T, U, F> {
    op: Arc<F>,
    on_none: OnNone,
    downstream: DownstreamCell<U>,
    upstream: OnceLock<SharedSubscription<T>>,
    mode: AtomicFusionMode,
    done: AtomicBool,
    me: Weak<Self>,
}

impl<T, U, F> TransformStage<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Result<Option<U>> + Send + Sync + 'static,
{
    fn upstream(&self) -> Option<&SharedSubscription<T>> {
        self.upstream.get()
    }

    fn fail(&self, error: RivuletError) {
        if self.done.swap(true, Ordering::AcqRel) {
            report::error_dropped(&error);
            return;
        }
        if let Some(upstream) = self.upstream() {
            upstream.cancel();
        }
        if let Some(downstream) = self.downstream.take() {
            downstream.on_error(error);
        }
    }

    fn null_value() -> RivuletError {
        RivuletError::null_value("the mapper returned no value")
    }
}

impl<T, U, F> Subscriber<T> for TransformStage<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Result<Option<U>> + Send + Sync + 'static,
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
    }

    fn on_next(&self, item: T) {
        if self.done.load(Ordering::Acquire) {
            report::item_dropped("map");
            return;
        }
        match (self.op)(item) {
            Ok(Some(mapped)) => {
                if let Some(downstream) = self.downstream.get() {
                    downstream.on_next(mapped);
                }
            }
            Ok(None) if self.on_none == OnNone::Skip => {
                if let Some(upstream) = self.upstream() {
                    upstream.request(1);
                }
            }
            Ok(None) => self.fail(Self::null_value()),
            Err(error) => self.fail(error),
        }
    }

    fn on_error(&self, error: RivuletError) {
        if self.done.swap(true, Ordering::AcqRel) {
            report::error_dropped(&error);
            return;
        }
        if let Some(downstream) = self.downstream.take() {
            downstream.on_error(error);
        }
    }

    fn on_complete(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(downstream) = self.downstream.take() {
            downstream.on_complete();
        }
    }

    fn on_ready(&self) {
        if let Some(downstream) = self.downstream.get() {
            downstream.on_ready();
        }
    }
}

impl<T, U, F> Subscription<U> for TransformStage<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Result<Option<U>> + Send + Sync + 'static,
{
    fn request(&self, n: u64) {
        if let Some(upstream) = self.upstream() {
            upstream.request(n);
        }
    }

    fn cancel(&self) {
        if let Some(upstream) = self.upstream() {
            upstream.cancel();
        }
        self.downstream.take();
    }

    fn request_fusion(&self, requested: FusionMode) -> FusionMode {
        let granted = self
            .upstream()
            .map_or(FusionMode::None, |upstream| upstream.request_fusion(requested));
        self.mode.store(granted);
        granted
    }

    fn poll(&self) -> Result<Option<U>> {
        let Some(upstream) = self.upstream() else {
            return Ok(None);
        };
        loop {
            let Some(item) = upstream.poll()? else {
                if self.mode.load() == FusionMode::Sync {
                    self.downstream.take();
                }
                return Ok(None);
            };
            match (self.op)(item)? {
                Some(mapped) => return Ok(Some(mapped)),
                None if self.on_none == OnNone::Skip => {
                    if self.mode.load() == FusionMode::Async {
                        upstream.request(1);
                    }
                }
                None => return Err(Self::null_value()),
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.upstream().map_or(true, |upstream| upstream.is_empty())
    }

    fn clear(&self) {
        if let Some(upstream) = self.upstream() {
            upstream.clear();
        }
    }
}

struct Hide<P> {
    source: P,
}

impl<P: Publisher> Publisher for Hide<P> {
    type Item = P::Item;

    fn subscribe(&self, subscriber: SharedSubscriber<P::Item>) {
        self.source.subscribe(Arc::new(HideSubscriber { downstream: subscriber }));
    }
}

struct HideSubscriber<T> {
    downstream: SharedSubscriber<T>,
}

impl<T: Send + 'static> Subscriber<T> for HideSubscriber<T> {
    fn on_subscribe(&self, subscription: SharedSubscription<T>) {
        self.downstream
            .on_subscribe(Arc::new(HiddenSubscription { upstream: subscription }));
    }

    fn on_next(&self, item: T) {
        self.downstream.on_next(item);
    }

    fn on_error(&self, error: RivuletError) {
        self.downstream.on_error(error);
    }

    fn on_complete(&self) {
        self.downstream.on_complete();
    }
}

/// Forwards demand and cancellation only; the fused path keeps its
/// non-fusable defaults.
struct HiddenSubscription<T> {
    upstream: SharedSubscription<T>,
}

impl<T: Send + 'static> Subscription<T> for HiddenSubscription<T> {
    fn request(&self, n: u64) {
        self.upstream.request(n);
    }

    fn cancel(&self) {
        self.upstream.cancel();
    }
}
