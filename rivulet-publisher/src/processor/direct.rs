// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use parking_lot::Mutex;
use rivulet_core::demand::{self, UNBOUNDED};
use rivulet_core::{
    report, DownstreamCell, Publisher, SharedSubscriber, SharedSubscription, Subscriber,
    Subscription,
};
use rivulet_error::RivuletError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Multicasts every item to the subscribers present at the time, without
/// buffering.
///
/// A subscriber with no outstanding demand cannot take an item: it is removed
/// and receives [`RivuletError::MissingBackpressure`]. Late subscribers get
/// the terminal signal only.
///
/// Pushing is not serialized: signals must come from one thread at a time.
pub struct DirectProcessor<T> {
    shared: Arc<DirectShared<T>>,
}

struct DirectShared<T> {
    state: Mutex<DirectState<T>>,
}

struct DirectState<T> {
    // Copy-on-write so emission iterates a snapshot without holding the lock.
    subscribers: Arc<Vec<Arc<DirectInner<T>>>>,
    terminal: Option<Terminal>,
}

impl<T> DirectProcessor<T>
where
    T: Clone + Send + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(DirectShared {
                state: Mutex::new(DirectState {
                    subscribers: Arc::new(Vec::new()),
                    terminal: None,
                }),
            }),
        }
    }

    /// Whether any subscriber is currently attached.
    pub fn has_downstreams(&self) -> bool {
        !self.shared.state.lock().subscribers.is_empty()
    }

    pub fn downstream_count(&self) -> usize {
        self.shared.state.lock().subscribers.len()
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.state.lock().terminal.is_some()
    }

    fn terminate(&self, terminal: Terminal) {
        let subscribers = {
            let mut state = self.shared.state.lock();
            if state.terminal.is_some() {
                None
            } else {
                state.terminal = Some(terminal.clone());
                Some(std::mem::take(&mut state.subscribers))
            }
        };
        let Some(subscribers) = subscribers else {
            if let Terminal::Error(error) = terminal {
                report::error_dropped(&error);
            }
            return;
        };
        for inner in subscribers.iter() {
            inner.deliver(&terminal);
        }
    }
}

impl<T> DirectShared<T> {
    fn remove(&self, inner: &DirectInner<T>) {
        let mut state = self.state.lock();
        if !state
            .subscribers
            .iter()
            .any(|candidate| std::ptr::eq(Arc::as_ptr(candidate), inner))
        {
            return;
        }
        let remaining = state
            .subscribers
            .iter()
            .filter(|candidate| !std::ptr::eq(Arc::as_ptr(candidate), inner))
            .cloned()
            .collect();
        state.subscribers = Arc::new(remaining);
    }
}

impl<T> Clone for DirectProcessor<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for DirectProcessor<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Publisher for DirectProcessor<T>
where
    T: Clone + Send + 'static,
{
    type Item = T;

    fn subscribe(&self, subscriber: SharedSubscriber<T>) {
        let inner = Arc::new(DirectInner {
            downstream: DownstreamCell::new(subscriber.clone()),
            requested: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            parent: Arc::downgrade(&self.shared),
        });
        subscriber.on_subscribe(inner.clone());
        if inner.cancelled.load(Ordering::Acquire) {
            return;
        }
        let terminal = {
            let mut state = self.shared.state.lock();
            match &state.terminal {
                Some(terminal) => Some(terminal.clone()),
                None => {
                    let mut subscribers = state.subscribers.as_ref().clone();
                    subscribers.push(inner.clone());
                    state.subscribers = Arc::new(subscribers);
                    None
                }
            }
        };
        if let Some(terminal) = terminal {
            inner.deliver(&terminal);
        }
    }
}

impl<T> Subscriber<T> for DirectProcessor<T>
where
    T: Clone + Send + 'static,
{
    fn on_subscribe(&self, subscription: SharedSubscription<T>) {
        if self.is_terminated() {
            subscription.cancel();
        } else {
            subscription.request(UNBOUNDED);
        }
    }

    fn on_next(&self, item: T) {
        let subscribers = {
            let state = self.shared.state.lock();
            if state.terminal.is_some() {
                None
            } else {
                Some(state.subscribers.clone())
            }
        };
        let Some(subscribers) = subscribers else {
            report::item_dropped("DirectProcessor");
            return;
        };
        for inner in subscribers.iter() {
            inner.emit(item.clone());
        }
    }

    fn on_error(&self, error: RivuletError) {
        self.terminate(Terminal::Error(error));
    }

    fn on_complete(&self) {
        self.terminate(Terminal::Complete);
    }
}

#[derive(Debug, Clone)]
enum Terminal {
    Complete,
    Error(RivuletError),
}

struct DirectInner<T> {
    downstream: DownstreamCell<T>,
    requested: AtomicU64,
    cancelled: AtomicBool,
    parent: Weak<DirectShared<T>>,
}

impl<T> DirectInner<T> {
    fn emit(&self, item: T) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        if self.requested.load(Ordering::Acquire) == 0 {
            self.detach();
            if let Some(downstream) = self.downstream.take() {
                downstream.on_error(RivuletError::missing_backpressure(
                    "DirectProcessor subscriber has no outstanding demand",
                ));
            }
            return;
        }
        let Some(downstream) = self.downstream.get() else {
            return;
        };
        downstream.on_next(item);
        demand::produced(&self.requested, 1);
    }

    fn deliver(&self, terminal: &Terminal) {
        let Some(downstream) = self.downstream.take() else {
            return;
        };
        match terminal {
            Terminal::Complete => downstream.on_complete(),
            Terminal::Error(error) => downstream.on_error(error.clone()),
        }
    }

    fn detach(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            if let Some(parent) = self.parent.upgrade() {
                parent.remove(self);
            }
        }
    }
}

impl<T: Send + 'static> Subscription<T> for DirectInner<T> {
    fn request(&self, n: u64) {
        if demand::validate(n) {
            demand::add_cap(&self.requested, n);
        }
    }

    fn cancel(&self) {
        self.detach();
        self.downstream.take();
    }
}
