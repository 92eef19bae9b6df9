// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use core::pin::Pin;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::{Context, Poll};
use futures::stream::{FusedStream, Stream};
use futures::task::AtomicWaker;
use parking_lot::Mutex;
use rivulet_core::{
    FlowQueue, Publisher, SharedSubscription, StreamItem, Subscriber, UNBOUNDED,
};
use rivulet_error::{Result, RivuletError};
use std::sync::{Arc, OnceLock};

/// Consumes a publisher as a `futures::Stream`.
///
/// ```
/// use futures::StreamExt;
/// use rivulet_exec::IntoStreamExt;
/// use rivulet_publisher::range;
///
/// # let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
/// # runtime.block_on(async {
/// let items: Vec<i32> = range(1, 3)
///     .into_stream(2)
///     .unwrap()
///     .filter_map(|item| async move { item.ok() })
///     .collect()
///     .await;
/// assert_eq!(items, vec![1, 2, 3]);
/// # });
/// ```
pub trait IntoStreamExt: Publisher + Sized + 'static {
    /// Subscribes and returns the sequence as a stream of [`StreamItem`]s.
    ///
    /// At most `prefetch` items are requested ahead of the consumer and
    /// demand is replenished once three quarters of them were taken.
    /// `usize::MAX` requests everything up front. An error is yielded as the
    /// last item. Dropping the stream cancels the subscription.
    ///
    /// # Errors
    ///
    /// [`RivuletError::InvalidArgument`] if `prefetch` is zero.
    fn into_stream(self, prefetch: usize) -> Result<PublisherStream<Self::Item>> {
        if prefetch == 0 {
            return Err(RivuletError::invalid_argument("prefetch must be positive"));
        }
        let bridge = Arc::new(Bridge::new(prefetch));
        self.subscribe(bridge.clone());
        Ok(PublisherStream {
            bridge,
            limit: replenish_limit(prefetch),
            consumed: 0,
            terminated: false,
        })
    }
}

impl<P> IntoStreamExt for P where P: Publisher + Sized + 'static {}

/// Free-function form of [`IntoStreamExt::into_stream`].
///
/// # Errors
///
/// [`RivuletError::InvalidArgument`] if `prefetch` is zero.
pub fn into_stream<P>(publisher: P, prefetch: usize) -> Result<PublisherStream<P::Item>>
where
    P: Publisher + 'static,
{
    publisher.into_stream(prefetch)
}

fn replenish_limit(prefetch: usize) -> usize {
    if prefetch == usize::MAX {
        usize::MAX
    } else {
        prefetch - (prefetch >> 2)
    }
}

/// Stream returned by [`IntoStreamExt::into_stream`].
pub struct PublisherStream<T> {
    bridge: Arc<Bridge<T>>,
    limit: usize,
    consumed: usize,
    terminated: bool,
}

impl<T> PublisherStream<T> {
    fn replenish(&mut self) {
        if self.limit == usize::MAX {
            return;
        }
        self.consumed += 1;
        if self.consumed == self.limit {
            self.consumed = 0;
            if let Some(upstream) = self.bridge.upstream.get() {
                upstream.request(self.limit as u64);
            }
        }
    }
}

impl<T: Send + 'static> Stream for PublisherStream<T> {
    type Item = StreamItem<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.terminated {
            return Poll::Ready(None);
        }
        self.bridge.waker.register(cx.waker());

        // Items are queued before `done` is raised, so a queue found empty
        // after observing `done` is drained for good.
        let done = self.bridge.done.load(Ordering::Acquire);
        if let Some(item) = self.bridge.queue.poll() {
            self.replenish();
            return Poll::Ready(Some(StreamItem::Value(item)));
        }
        if !done {
            return Poll::Pending;
        }

        self.terminated = true;
        let error = self.bridge.error.lock().take();
        match error {
            Some(error) => Poll::Ready(Some(StreamItem::Error(error))),
            None => Poll::Ready(None),
        }
    }
}

impl<T: Send + 'static> FusedStream for PublisherStream<T> {
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl<T> Drop for PublisherStream<T> {
    fn drop(&mut self) {
        self.bridge.shutdown();
    }
}

struct Bridge<T> {
    prefetch: usize,
    queue: FlowQueue<T>,
    upstream: OnceLock<SharedSubscription<T>>,
    done: AtomicBool,
    error: Mutex<Option<RivuletError>>,
    cancelled: AtomicBool,
    waker: AtomicWaker,
}

impl<T> Bridge<T> {
    fn new(prefetch: usize) -> Self {
        Self {
            prefetch,
            queue: FlowQueue::for_prefetch(prefetch),
            upstream: OnceLock::new(),
            done: AtomicBool::new(false),
            error: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            waker: AtomicWaker::new(),
        }
    }

    fn finish(&self, error: Option<RivuletError>) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        if error.is_some() {
            *self.error.lock() = error;
        }
        self.done.store(true, Ordering::Release);
        self.waker.wake();
    }

    fn shutdown(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(upstream) = self.upstream.get() {
            upstream.cancel();
        }
        self.queue.clear();
    }
}

impl<T: Send + 'static> Subscriber<T> for Bridge<T> {
    fn on_subscribe(&self, subscription: SharedSubscription<T>) {
        if self.upstream.set(subscription.clone()).is_err() {
            warn!("into_stream: duplicate subscription cancelled");
            subscription.cancel();
            return;
        }
        if self.cancelled.load(Ordering::Acquire) {
            subscription.cancel();
            return;
        }
        let initial = if self.prefetch == usize::MAX {
            UNBOUNDED
        } else {
            self.prefetch as u64
        };
        subscription.request(initial);
    }

    fn on_next(&self, item: T) {
        if self.cancelled.load(Ordering::Acquire) || self.done.load(Ordering::Acquire) {
            return;
        }
        if let Err(error) = self.queue.push(item) {
            if let Some(upstream) = self.upstream.get() {
                upstream.cancel();
            }
            self.finish(Some(error));
            return;
        }
        self.waker.wake();
    }

    fn on_error(&self, error: RivuletError) {
        self.finish(Some(error));
    }

    fn on_complete(&self) {
        self.finish(None);
    }
}
