// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use parking_lot::Mutex;
use rivulet_core::demand::{self, UNBOUNDED};
use rivulet_core::{
    report, DownstreamCell, EmptySubscription, FlowQueue, FusionMode, Publisher, SharedSubscriber,
    SharedSubscription, Subscriber, Subscription, WorkInProgress,
};
use rivulet_error::{Result, RivuletError};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Buffers items until its single subscriber takes them.
///
/// Items and the terminal signal pushed before anyone subscribed are replayed
/// to the subscriber. A consumer asking for [`FusionMode::Async`] polls the
/// buffer directly and is woken through `on_ready`. A second subscriber is
/// rejected with an error.
pub struct UnicastProcessor<T> {
    state: Arc<UnicastState<T>>,
}

struct UnicastState<T> {
    queue: FlowQueue<T>,
    wip: WorkInProgress,
    requested: AtomicU64,
    done: AtomicBool,
    error: Mutex<Option<RivuletError>>,
    cancelled: AtomicBool,
    subscribed: AtomicBool,
    fused: AtomicBool,
    downstream: DownstreamCell<T>,
}

impl<T: Send + 'static> UnicastProcessor<T> {
    /// A processor with an unbounded buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_queue(FlowQueue::unbounded())
    }

    /// A processor buffering at most `capacity` items; overflowing it fails
    /// the processor with [`RivuletError::MissingBackpressure`].
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_queue(FlowQueue::bounded(capacity))
    }

    fn with_queue(queue: FlowQueue<T>) -> Self {
        Self {
            state: Arc::new(UnicastState {
                queue,
                wip: WorkInProgress::new(),
                requested: AtomicU64::new(0),
                done: AtomicBool::new(false),
                error: Mutex::new(None),
                cancelled: AtomicBool::new(false),
                subscribed: AtomicBool::new(false),
                fused: AtomicBool::new(false),
                downstream: DownstreamCell::empty(),
            }),
        }
    }

    /// Whether the subscriber cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Whether a subscriber is attached and has not cancelled or terminated.
    pub fn has_downstream(&self) -> bool {
        !self.state.downstream.is_released()
    }

    /// Number of buffered items.
    pub fn buffered(&self) -> usize {
        self.state.queue.len()
    }
}

impl<T: Send + 'static> Default for UnicastProcessor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for UnicastProcessor<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Send + 'static> UnicastState<T> {
    fn is_closed(&self) -> bool {
        self.done.load(Ordering::Acquire) || self.cancelled.load(Ordering::Acquire)
    }

    fn drain(&self) {
        self.wip.run(|| {
            if self.fused.load(Ordering::Acquire) {
                self.drain_fused()
            } else {
                self.drain_regular()
            }
        });
    }

    fn drain_fused(&self) -> ControlFlow<()> {
        if self.cancelled.load(Ordering::Acquire) {
            self.queue.clear();
            self.downstream.take();
            return ControlFlow::Break(());
        }
        let Some(downstream) = self.downstream.get() else {
            return ControlFlow::Continue(());
        };
        let done = self.done.load(Ordering::Acquire);
        downstream.on_ready();
        if done {
            self.terminate();
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    fn drain_regular(&self) -> ControlFlow<()> {
        let Some(downstream) = self.downstream.get() else {
            return ControlFlow::Continue(());
        };
        let requested = self.requested.load(Ordering::Acquire);
        let mut emitted = 0u64;
        while emitted != requested {
            if self.cancelled.load(Ordering::Acquire) {
                self.queue.clear();
                self.downstream.take();
                return ControlFlow::Break(());
            }
            let done = self.done.load(Ordering::Acquire);
            match self.queue.poll() {
                Some(item) => {
                    downstream.on_next(item);
                    emitted += 1;
                }
                None if done => {
                    self.terminate();
                    return ControlFlow::Break(());
                }
                None => break,
            }
        }
        if self.cancelled.load(Ordering::Acquire) {
            self.queue.clear();
            self.downstream.take();
            return ControlFlow::Break(());
        }
        if self.done.load(Ordering::Acquire) && self.queue.is_empty() {
            self.terminate();
            return ControlFlow::Break(());
        }
        if emitted != 0 && requested != UNBOUNDED {
            demand::produced(&self.requested, emitted);
        }
        ControlFlow::Continue(())
    }

    fn terminate(&self) {
        let Some(downstream) = self.downstream.take() else {
            return;
        };
        let error = self.error.lock().take();
        match error {
            Some(error) => downstream.on_error(error),
            None => downstream.on_complete(),
        }
    }
}

impl<T: Send + 'static> Publisher for UnicastProcessor<T> {
    type Item = T;

    fn subscribe(&self, subscriber: SharedSubscriber<T>) {
        let state = &self.state;
        if state.subscribed.swap(true, Ordering::AcqRel) {
            warn!("UnicastProcessor rejected a second subscriber");
            subscriber.on_subscribe(EmptySubscription::shared());
            subscriber.on_error(RivuletError::stream_error(
                "UnicastProcessor allows only a single subscriber",
            ));
            return;
        }
        state.downstream.set(subscriber.clone());
        subscriber.on_subscribe(state.clone());
        state.drain();
    }
}

impl<T: Send + 'static> Subscriber<T> for UnicastProcessor<T> {
    fn on_subscribe(&self, subscription: SharedSubscription<T>) {
        if self.state.is_closed() {
            subscription.cancel();
        } else {
            subscription.request(UNBOUNDED);
        }
    }

    fn on_next(&self, item: T) {
        let state = &self.state;
        if state.is_closed() {
            report::item_dropped("UnicastProcessor");
            return;
        }
        if state.queue.offer(item).is_err() {
            report::overflow("UnicastProcessor");
            self.on_error(RivuletError::missing_backpressure(
                "UnicastProcessor buffer is full",
            ));
            return;
        }
        state.drain();
    }

    fn on_error(&self, error: RivuletError) {
        let state = &self.state;
        if state.is_closed() {
            report::error_dropped(&error);
            return;
        }
        *state.error.lock() = Some(error);
        state.done.store(true, Ordering::Release);
        state.drain();
    }

    fn on_complete(&self) {
        let state = &self.state;
        if state.is_closed() {
            return;
        }
        state.done.store(true, Ordering::Release);
        state.drain();
    }
}

impl<T: Send + 'static> Subscription<T> for UnicastState<T> {
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        demand::add_cap(&self.requested, n);
        self.drain();
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.drain();
        }
    }

    fn request_fusion(&self, requested: FusionMode) -> FusionMode {
        if requested.accepts(FusionMode::Async) {
            self.fused.store(true, Ordering::Release);
            FusionMode::Async
        } else {
            FusionMode::None
        }
    }

    fn poll(&self) -> Result<Option<T>> {
        Ok(self.queue.poll())
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn clear(&self) {
        self.queue.clear();
    }
}
