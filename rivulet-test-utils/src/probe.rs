// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use parking_lot::Mutex;
use rivulet_core::{
    FusionMode, Publisher, SharedSubscriber, SharedSubscription, Subscriber, Subscription,
};
use rivulet_error::{Result, RivuletError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Wraps a publisher and records what happens to its subscriptions.
///
/// Counts subscriptions and cancellations and logs every `request` amount,
/// so tests can check how an operator drives its upstream. Fusion requests
/// pass through, so wrapping does not change the observed behaviour.
pub struct ProbePublisher<P> {
    source: P,
    stats: Arc<ProbeStats>,
}

#[derive(Debug, Default)]
pub struct ProbeStats {
    subscriptions: AtomicUsize,
    cancellations: AtomicUsize,
    requests: Mutex<Vec<u64>>,
}

impl ProbeStats {
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::Acquire)
    }

    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::Acquire)
    }

    pub fn requests(&self) -> Vec<u64> {
        self.requests.lock().clone()
    }
}

impl<P: Publisher> ProbePublisher<P> {
    pub fn new(source: P) -> Self {
        Self {
            source,
            stats: Arc::new(ProbeStats::default()),
        }
    }

    /// Shared view of the recorded statistics.
    pub fn stats(&self) -> Arc<ProbeStats> {
        self.stats.clone()
    }
}

impl<P: Publisher> Publisher for ProbePublisher<P> {
    type Item = P::Item;

    fn subscribe(&self, subscriber: SharedSubscriber<P::Item>) {
        self.stats.subscriptions.fetch_add(1, Ordering::AcqRel);
        self.source.subscribe(Arc::new(ProbeSubscriber {
            downstream: subscriber,
            stats: self.stats.clone(),
        }));
    }
}

struct ProbeSubscriber<T> {
    downstream: SharedSubscriber<T>,
    stats: Arc<ProbeStats>,
}

impl<T: Send + 'static> Subscriber<T> for ProbeSubscriber<T> {
    fn on_subscribe(&self, subscription: SharedSubscription<T>) {
        self.downstream.on_subscribe(Arc::new(ProbeSubscription {
            upstream: subscription,
            stats: self.stats.clone(),
        }));
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

    fn on_ready(&self) {
        self.downstream.on_ready();
    }
}

struct ProbeSubscription<T> {
    upstream: SharedSubscription<T>,
    stats: Arc<ProbeStats>,
}

impl<T: Send + 'static> Subscription<T> for ProbeSubscription<T> {
    fn request(&self, n: u64) {
        self.stats.requests.lock().push(n);
        self.upstream.request(n);
    }

    fn cancel(&self) {
        self.stats.cancellations.fetch_add(1, Ordering::AcqRel);
        self.upstream.cancel();
    }

    fn request_fusion(&self, requested: FusionMode) -> FusionMode {
        self.upstream.request_fusion(requested)
    }

    fn poll(&self) -> Result<Option<T>> {
        self.upstream.poll()
    }

    fn is_empty(&self) -> bool {
        self.upstream.is_empty()
    }

    fn clear(&self) {
        self.upstream.clear();
    }
}
