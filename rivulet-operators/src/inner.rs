// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The per-inner subscriber shared by the merge and concat engines.

use crate::config::{prefetch_request, replenish_limit};
use rivulet_core::{
    report, AtomicFusionMode, FlowQueue, Flux, FusionMode, Publisher, SharedSubscription,
    Subscriber,
};
use rivulet_error::{Result, RivuletError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Type-erased mapper from an outer item to the inner publisher.
pub(crate) type InnerMapper<T, R> = Arc<dyn Fn(T) -> Result<Option<Flux<R>>> + Send + Sync>;

/// Erases the inner publisher type of a user mapper.
pub(crate) fn erase_mapper<T, P, F>(mapper: F) -> InnerMapper<T, P::Item>
where
    P: Publisher + 'static,
    F: Fn(T) -> Result<Option<P>> + Send + Sync + 'static,
{
    Arc::new(move |item: T| -> Result<Option<Flux<P::Item>>> {
        Ok(mapper(item)?.map(Flux::new))
    })
}

/// The engine owning a set of inner slots.
pub(crate) trait InnerParent<R>: Send + Sync {
    /// An inner failed, either through `on_error` or a rejected item.
    fn inner_error(&self, slot: &InnerSlot<R>, error: RivuletError);

    /// Something changed that the drain loop must look at.
    fn drain(&self);
}

/// One subscribed inner publisher.
///
/// The inner is asked for any fusion mode. Without fusion its items land in
/// a bounded queue sized to the prefetch; with fusion the drain loop polls
/// the inner subscription directly. Either way the drain loop is the only
/// consumer.
pub(crate) struct InnerSlot<R> {
    parent: Weak<dyn InnerParent<R>>,
    subscription: OnceLock<SharedSubscription<R>>,
    queue: FlowQueue<R>,
    mode: AtomicFusionMode,
    prefetch: usize,
    limit: usize,
    consumed: AtomicUsize,
    done: AtomicBool,
    exhausted: AtomicBool,
    cancelled: AtomicBool,
}

impl<R: Send + 'static> InnerSlot<R> {
    pub(crate) fn new(parent: Weak<dyn InnerParent<R>>, prefetch: usize) -> Arc<Self> {
        Arc::new(Self {
            parent,
            subscription: OnceLock::new(),
            queue: FlowQueue::for_prefetch(prefetch),
            mode: AtomicFusionMode::default(),
            prefetch,
            limit: replenish_limit(prefetch),
            consumed: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            exhausted: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        })
    }

    pub(crate) fn prefetch(&self) -> usize {
        self.prefetch
    }

    /// Takes the next buffered item. A sync-fused inner returning nothing has
    /// completed.
    pub(crate) fn poll(&self) -> Result<Option<R>> {
        match self.mode.load() {
            FusionMode::Sync => {
                let item = self.fused_poll()?;
                if item.is_none() {
                    self.exhausted.store(true, Ordering::Release);
                }
                Ok(item)
            }
            FusionMode::Async => self.fused_poll(),
            FusionMode::None | FusionMode::Any => Ok(self.queue.poll()),
        }
    }

    fn fused_poll(&self) -> Result<Option<R>> {
        match self.subscription.get() {
            Some(subscription) => subscription.poll(),
            None => Ok(None),
        }
    }

    fn is_empty(&self) -> bool {
        match self.mode.load() {
            FusionMode::Sync | FusionMode::Async => self
                .subscription
                .get()
                .map_or(true, |subscription| subscription.is_empty()),
            FusionMode::None | FusionMode::Any => self.queue.is_empty(),
        }
    }

    /// Whether the inner terminated and everything it produced was taken.
    pub(crate) fn is_finished(&self) -> bool {
        if self.exhausted.load(Ordering::Acquire) {
            return true;
        }
        self.done.load(Ordering::Acquire) && self.is_empty()
    }

    /// Treats the inner as completed; used when its error is deferred.
    pub(crate) fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
    }

    /// Accounts for one consumed item and requests a new batch once the
    /// replenish threshold is reached.
    pub(crate) fn consumed_one(&self) {
        if self.mode.load() == FusionMode::Sync || self.prefetch == usize::MAX {
            return;
        }
        let consumed = self.consumed.load(Ordering::Relaxed) + 1;
        if consumed == self.limit {
            self.consumed.store(0, Ordering::Relaxed);
            if let Some(subscription) = self.subscription.get() {
                subscription.request(self.limit as u64);
            }
        } else {
            self.consumed.store(consumed, Ordering::Relaxed);
        }
    }

    /// Cancels the inner and drops its buffer. Later signals are ignored.
    pub(crate) fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(subscription) = self.subscription.get() {
            subscription.cancel();
            if self.mode.load().is_fused() {
                subscription.clear();
            }
        }
        self.queue.clear();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn with_parent(&self, f: impl FnOnce(&dyn InnerParent<R>)) {
        if let Some(parent) = self.parent.upgrade() {
            f(parent.as_ref());
        }
    }
}

impl<R: Send + 'static> Subscriber<R> for InnerSlot<R> {
    fn on_subscribe(&self, subscription: SharedSubscription<R>) {
        if self.subscription.set(subscription.clone()).is_err() || self.is_cancelled() {
            subscription.cancel();
            return;
        }
        match subscription.request_fusion(FusionMode::Any) {
            FusionMode::Sync => {
                self.mode.store(FusionMode::Sync);
                self.done.store(true, Ordering::Release);
                self.with_parent(|parent| parent.drain());
                return;
            }
            FusionMode::Async => self.mode.store(FusionMode::Async),
            FusionMode::None | FusionMode::Any => {}
        }
        subscription.request(prefetch_request(self.prefetch));
        if self.is_cancelled() {
            subscription.cancel();
        }
    }

    fn on_next(&self, item: R) {
        if self.is_cancelled() {
            report::item_dropped("inner");
            return;
        }
        match self.queue.push(item) {
            Ok(()) => self.with_parent(|parent| parent.drain()),
            Err(error) => {
                if let Some(subscription) = self.subscription.get() {
                    subscription.cancel();
                }
                self.with_parent(|parent| parent.inner_error(self, error));
            }
        }
    }

    fn on_error(&self, error: RivuletError) {
        if self.is_cancelled() {
            report::error_dropped(&error);
            return;
        }
        self.with_parent(|parent| parent.inner_error(self, error));
    }

    fn on_complete(&self) {
        if self.is_cancelled() {
            return;
        }
        self.done.store(true, Ordering::Release);
        self.with_parent(|parent| parent.drain());
    }

    fn on_ready(&self) {
        if !self.is_cancelled() {
            self.with_parent(|parent| parent.drain());
        }
    }
}
