// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use event_listener::Event;
use futures::stream::{BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use rivulet_core::{
    demand, EmptySubscription, Publisher, SharedSubscriber, StreamItem, Subscription,
};
use rivulet_error::RivuletError;
use std::sync::{Arc, OnceLock};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// A publisher driving a `futures::Stream`.
///
/// The stream can be consumed once: a second subscriber receives a
/// [`RivuletError::StreamProcessingError`]. Subscribing requires a tokio
/// runtime, since the stream is polled on a spawned task.
pub struct StreamPublisher<T> {
    stream: Mutex<Option<BoxStream<'static, StreamItem<T>>>>,
}

/// Turns a stream of plain values into a publisher.
pub fn from_stream<S>(stream: S) -> StreamPublisher<S::Item>
where
    S: Stream + Send + 'static,
    S::Item: Send + 'static,
{
    from_item_stream(stream.map(StreamItem::Value))
}

/// Turns a stream of [`StreamItem`]s into a publisher. The first
/// `StreamItem::Error` terminates the sequence.
pub fn from_item_stream<S, T>(stream: S) -> StreamPublisher<T>
where
    S: Stream<Item = StreamItem<T>> + Send + 'static,
    T: Send + 'static,
{
    StreamPublisher {
        stream: Mutex::new(Some(stream.boxed())),
    }
}

impl<T: Send + 'static> Publisher for StreamPublisher<T> {
    type Item = T;

    fn subscribe(&self, subscriber: SharedSubscriber<T>) {
        let Ok(handle) = Handle::try_current() else {
            warn!("from_stream: subscribed outside of a tokio runtime");
            subscriber.on_subscribe(EmptySubscription::shared());
            subscriber.on_error(RivuletError::stream_error(
                "from_stream requires a tokio runtime",
            ));
            return;
        };
        let taken = self.stream.lock().take();
        let Some(stream) = taken else {
            subscriber.on_subscribe(EmptySubscription::shared());
            subscriber.on_error(RivuletError::stream_error("stream already consumed"));
            return;
        };

        let link = Arc::new(StreamLink::new());
        subscriber.on_subscribe(link.clone());
        if link.is_cancelled() {
            return;
        }
        let task = handle.spawn(pump(stream, subscriber, link.clone()));
        link.attach(task.abort_handle());
    }
}

async fn pump<T>(
    mut stream: BoxStream<'static, StreamItem<T>>,
    subscriber: SharedSubscriber<T>,
    link: Arc<StreamLink>,
) {
    loop {
        if !link.wait_for_demand().await {
            return;
        }
        let next = stream.next().await;
        if link.is_cancelled() {
            return;
        }
        match next {
            Some(StreamItem::Value(item)) => {
                subscriber.on_next(item);
                demand::produced(&link.requested, 1);
            }
            Some(StreamItem::Error(error)) => {
                link.cancelled.store(true, Ordering::Release);
                subscriber.on_error(error);
                return;
            }
            None => {
                link.cancelled.store(true, Ordering::Release);
                subscriber.on_complete();
                return;
            }
        }
    }
}

/// Subscription of a [`StreamPublisher`]. The pump parks on `demand_changed`
/// while nothing is requested.
struct StreamLink {
    requested: AtomicU64,
    cancelled: AtomicBool,
    demand_changed: Event,
    task: OnceLock<AbortHandle>,
}

impl StreamLink {
    fn new() -> Self {
        Self {
            requested: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            demand_changed: Event::new(),
            task: OnceLock::new(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn attach(&self, task: AbortHandle) {
        let task = self.task.get_or_init(|| task);
        if self.is_cancelled() {
            task.abort();
        }
    }

    /// Returns `false` once the link was cancelled.
    async fn wait_for_demand(&self) -> bool {
        loop {
            if self.is_cancelled() {
                return false;
            }
            if self.requested.load(Ordering::Acquire) > 0 {
                return true;
            }
            let listener = self.demand_changed.listen();
            // Re-check after registering so a concurrent request is not missed.
            if self.is_cancelled() || self.requested.load(Ordering::Acquire) > 0 {
                continue;
            }
            listener.await;
        }
    }
}

impl<T> Subscription<T> for StreamLink {
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        if demand::add_cap(&self.requested, n) == 0 {
            self.demand_changed.notify(usize::MAX);
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("from_stream: cancelled");
        self.demand_changed.notify(usize::MAX);
        if let Some(task) = self.task.get() {
            task.abort();
        }
    }
}
