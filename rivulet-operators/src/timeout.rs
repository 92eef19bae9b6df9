// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Racing a sequence against deadline publishers.
//!
//! A deadline is any publisher: its first item or its completion means
//! "expired", an error from it fails the whole sequence. The first deadline
//! covers the wait for the first item; after every item a fresh deadline is
//! produced from that item.
//!
//! Each armed deadline carries the generation of the item count it guards.
//! Items and expiries race on one atomic index through compare-and-swap, so a
//! superseded deadline that fires late finds a different generation and has
//! no effect.

use parking_lot::Mutex;
use rivulet_core::{
    report, DownstreamCell, Flux, Publisher, SharedSubscriber, SharedSubscription, Subscriber,
    Subscription, SubscriptionArbiter, UNBOUNDED,
};
use rivulet_error::{Result, RivuletError};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

const TERMINATED: u64 = u64::MAX;

/// Extension trait providing the `timeout` family of operators.
///
/// # Examples
///
/// ```
/// use rivulet_core::Publisher;
/// use rivulet_operators::TimeoutExt;
/// use rivulet_publisher::{empty, never, range};
/// use rivulet_test_utils::TestSubscriber;
///
/// // The first deadline expires at once, so the fallback takes over.
/// let ts = TestSubscriber::<i32>::new();
/// range(1, 3)
///     .timeout_with_fallback(empty::<()>(), |_| never::<()>(), range(10, 2))
///     .subscribe(ts.clone());
///
/// ts.assert_values(&[10, 11]).assert_complete();
/// ```
pub trait TimeoutExt: Publisher + Sized + 'static {
    /// Fails with [`RivuletError::TimeoutError`] when a deadline expires
    /// before the next item.
    fn timeout<F, D, M>(self, first: F, item_deadline: M) -> Flux<Self::Item>
    where
        F: Publisher + 'static,
        D: Publisher + 'static,
        M: Fn(&Self::Item) -> D + Send + Sync + 'static,
    {
        self.try_timeout(first, move |item| Ok(Some(item_deadline(item))))
    }

    /// Like [`timeout`](Self::timeout) with a fallible deadline mapper.
    ///
    /// `Err(e)` fails the sequence with `e`; `Ok(None)` fails it with
    /// [`RivuletError::NullValue`].
    fn try_timeout<F, D, M>(self, first: F, item_deadline: M) -> Flux<Self::Item>
    where
        F: Publisher + 'static,
        D: Publisher + 'static,
        M: Fn(&Self::Item) -> Result<Option<D>> + Send + Sync + 'static,
    {
        Flux::new(Timeout {
            source: self,
            first: Box::new(first),
            item_deadline: erase(item_deadline),
            fallback: None,
        })
    }

    /// Switches to `fallback` when a deadline expires, carrying over the
    /// outstanding demand. No further deadlines apply to the fallback.
    fn timeout_with_fallback<F, D, M, P>(
        self,
        first: F,
        item_deadline: M,
        fallback: P,
    ) -> Flux<Self::Item>
    where
        F: Publisher + 'static,
        D: Publisher + 'static,
        M: Fn(&Self::Item) -> D + Send + Sync + 'static,
        P: Publisher<Item = Self::Item> + 'static,
    {
        self.try_timeout_with_fallback(first, move |item| Ok(Some(item_deadline(item))), fallback)
    }

    /// Fallible deadline mapper with a fallback.
    ///
    /// `Err(e)` counts as an immediate expiry and switches to the fallback;
    /// `Ok(None)` still fails with [`RivuletError::NullValue`].
    fn try_timeout_with_fallback<F, D, M, P>(
        self,
        first: F,
        item_deadline: M,
        fallback: P,
    ) -> Flux<Self::Item>
    where
        F: Publisher + 'static,
        D: Publisher + 'static,
        M: Fn(&Self::Item) -> Result<Option<D>> + Send + Sync + 'static,
        P: Publisher<Item = Self::Item> + 'static,
    {
        Flux::new(Timeout {
            source: self,
            first: Box::new(first),
            item_deadline: erase(item_deadline),
            fallback: Some(Flux::new(fallback)),
        })
    }
}

impl<P> TimeoutExt for P where P: Publisher + Sized + 'static {}

type DeadlineMapper<T> =
    Arc<dyn Fn(&T) -> Result<Option<Box<dyn ArmDeadline>>> + Send + Sync>;

fn erase<T, D, M>(mapper: M) -> DeadlineMapper<T>
where
    D: Publisher + 'static,
    M: Fn(&T) -> Result<Option<D>> + Send + Sync + 'static,
{
    Arc::new(
        move |item: &T| -> Result<Option<Box<dyn ArmDeadline>>> {
            Ok(mapper(item)?.map(|deadline| Box::new(deadline) as Box<dyn ArmDeadline>))
        },
    )
}

/// A deadline publisher with its item type erased.
trait ArmDeadline: Send + Sync {
    fn arm(&self, timer: Arc<DeadlineTimer>);
}

impl<P: Publisher> ArmDeadline for P {
    fn arm(&self, timer: Arc<DeadlineTimer>) {
        self.subscribe(Arc::new(DeadlineSubscriber::<P::Item> {
            timer,
            _marker: PhantomData,
        }));
    }
}

trait TimeoutParent: Send + Sync {
    fn expire(&self, generation: u64);

    fn deadline_failed(&self, generation: u64, error: RivuletError);
}

struct Timeout<S: Publisher> {
    source: S,
    first: Box<dyn ArmDeadline>,
    item_deadline: DeadlineMapper<S::Item>,
    fallback: Option<Flux<S::Item>>,
}

impl<S: Publisher> Publisher for Timeout<S> {
    type Item = S::Item;

    fn subscribe(&self, subscriber: SharedSubscriber<S::Item>) {
        let main = TimeoutMain::new(self.item_deadline.clone(), self.fallback.clone(), subscriber);
        main.start(self.first.as_ref());
        if !main.main_cancelled.load(Ordering::Acquire) {
            self.source.subscribe(main);
        }
    }
}

struct DeadlineLink {
    canceller: Option<Box<dyn Fn() + Send + Sync>>,
    cancelled: bool,
}

/// One armed deadline, tagged with its generation.
struct DeadlineTimer {
    parent: Weak<dyn TimeoutParent>,
    generation: u64,
    link: Mutex<DeadlineLink>,
    signalled: AtomicBool,
}

impl DeadlineTimer {
    fn new(parent: Weak<dyn TimeoutParent>, generation: u64) -> Arc<Self> {
        Arc::new(Self {
            parent,
            generation,
            link: Mutex::new(DeadlineLink {
                canceller: None,
                cancelled: false,
            }),
            signalled: AtomicBool::new(false),
        })
    }

    /// Returns `false` when the timer was cancelled before the link arrived.
    fn attach(&self, canceller: Box<dyn Fn() + Send + Sync>) -> bool {
        let rejected = {
            let mut link = self.link.lock();
            if link.cancelled {
                Some(canceller)
            } else {
                link.canceller = Some(canceller);
                None
            }
        };
        match rejected {
            Some(canceller) => {
                canceller();
                false
            }
            None => true,
        }
    }

    fn cancel(&self) {
        let canceller = {
            let mut link = self.link.lock();
            link.cancelled = true;
            link.canceller.take()
        };
        if let Some(canceller) = canceller {
            canceller();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.link.lock().cancelled
    }

    fn fire(&self) {
        if self.signalled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel();
        if let Some(parent) = self.parent.upgrade() {
            parent.expire(self.generation);
        }
    }

    fn fail(&self, error: RivuletError) {
        if self.signalled.swap(true, Ordering::AcqRel) {
            report::error_dropped(&error);
            return;
        }
        match self.parent.upgrade() {
            Some(parent) => parent.deadline_failed(self.generation, error),
            None => report::error_dropped(&error),
        }
    }
}

struct DeadlineSubscriber<U> {
    timer: Arc<DeadlineTimer>,
    _marker: PhantomData<fn(U)>,
}

impl<U: Send + 'static> Subscriber<U> for DeadlineSubscriber<U> {
    fn on_subscribe(&self, subscription: SharedSubscription<U>) {
        let link = subscription.clone();
        if self.timer.attach(Box::new(move || link.cancel())) {
            subscription.request(UNBOUNDED);
        }
    }

    fn on_next(&self, _item: U) {
        self.timer.fire();
    }

    fn on_error(&self, error: RivuletError) {
        if self.timer.is_cancelled() {
            report::error_dropped(&error);
            return;
        }
        self.timer.fail(error);
    }

    fn on_complete(&self) {
        self.timer.fire();
    }
}

struct TimeoutMain<T> {
    item_deadline: DeadlineMapper<T>,
    fallback: Option<Flux<T>>,
    downstream: DownstreamCell<T>,
    arbiter: SubscriptionArbiter<T>,
    main: Mutex<Option<SharedSubscription<T>>>,
    main_cancelled: AtomicBool,
    index: AtomicU64,
    deadline: Mutex<Option<Arc<DeadlineTimer>>>,
    me: Weak<Self>,
}

impl<T: Send + 'static> TimeoutMain<T> {
    fn new(
        item_deadline: DeadlineMapper<T>,
        fallback: Option<Flux<T>>,
        downstream: SharedSubscriber<T>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            item_deadline,
            fallback,
            downstream: DownstreamCell::new(downstream),
            arbiter: SubscriptionArbiter::new(),
            main: Mutex::new(None),
            main_cancelled: AtomicBool::new(false),
            index: AtomicU64::new(0),
            deadline: Mutex::new(None),
            me: me.clone(),
        })
    }

    fn start(&self, first: &dyn ArmDeadline) {
        let (Some(me), Some(downstream)) = (self.me.upgrade(), self.downstream.get()) else {
            return;
        };
        downstream.on_subscribe(me);
        self.arm(0, first);
    }

    fn arm(&self, generation: u64, deadline: &dyn ArmDeadline) {
        let parent: Weak<dyn TimeoutParent> = self.me.clone();
        let timer = DeadlineTimer::new(parent, generation);
        let previous = self.deadline.lock().replace(timer.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }
        if self.index.load(Ordering::Acquire) != generation {
            timer.cancel();
            return;
        }
        deadline.arm(timer);
    }

    fn cancel_deadline(&self) {
        let deadline = self.deadline.lock().take();
        if let Some(deadline) = deadline {
            deadline.cancel();
        }
    }

    fn cancel_main(&self) {
        self.main_cancelled.store(true, Ordering::Release);
        let main = self.main.lock().take();
        if let Some(main) = main {
            main.cancel();
        }
    }

    /// Terminates with `error` if `generation` is still current.
    fn fail(&self, generation: u64, error: RivuletError) {
        if self
            .index
            .compare_exchange(generation, TERMINATED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            report::error_dropped(&error);
            return;
        }
        self.cancel_main();
        self.cancel_deadline();
        self.arbiter.cancel();
        match self.downstream.take() {
            Some(downstream) => downstream.on_error(error),
            None => report::error_dropped(&error),
        }
    }

    fn switch_to(&self, fallback: &Flux<T>) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        debug!("timeout expired, switching to the fallback");
        fallback.subscribe(Arc::new(FallbackSubscriber { main: me }));
    }
}

impl<T: Send + 'static> TimeoutParent for TimeoutMain<T> {
    fn expire(&self, generation: u64) {
        match &self.fallback {
            Some(fallback) => {
                if self
                    .index
                    .compare_exchange(generation, TERMINATED, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return;
                }
                self.cancel_main();
                self.cancel_deadline();
                self.switch_to(fallback);
            }
            None => {
                debug!("timeout expired at generation {}", generation);
                self.fail(generation, RivuletError::timeout_error("Timeout"));
            }
        }
    }

    fn deadline_failed(&self, generation: u64, error: RivuletError) {
        self.fail(generation, error);
    }
}

impl<T: Send + 'static> Subscriber<T> for TimeoutMain<T> {
    fn on_subscribe(&self, subscription: SharedSubscription<T>) {
        *self.main.lock() = Some(subscription.clone());
        if self.main_cancelled.load(Ordering::Acquire) {
            self.main.lock().take();
            subscription.cancel();
            return;
        }
        self.arbiter.set(subscription);
    }

    fn on_next(&self, item: T) {
        let index = self.index.load(Ordering::Acquire);
        if index == TERMINATED
            || self
                .index
                .compare_exchange(index, index + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            report::item_dropped("timeout");
            return;
        }
        self.cancel_deadline();

        let next = (self.item_deadline)(&item);
        if let Some(downstream) = self.downstream.get() {
            downstream.on_next(item);
        }
        self.arbiter.produced(1);

        let generation = index + 1;
        match next {
            Ok(Some(deadline)) => self.arm(generation, deadline.as_ref()),
            Ok(None) => self.fail(
                generation,
                RivuletError::null_value("the timeout mapper returned no deadline publisher"),
            ),
            Err(error) => match &self.fallback {
                Some(_) => self.expire(generation),
                None => self.fail(generation, error),
            },
        }
    }

    fn on_error(&self, error: RivuletError) {
        if self.index.swap(TERMINATED, Ordering::AcqRel) == TERMINATED {
            report::error_dropped(&error);
            return;
        }
        self.cancel_deadline();
        match self.downstream.take() {
            Some(downstream) => downstream.on_error(error),
            None => report::error_dropped(&error),
        }
    }

    fn on_complete(&self) {
        if self.index.swap(TERMINATED, Ordering::AcqRel) == TERMINATED {
            return;
        }
        self.cancel_deadline();
        if let Some(downstream) = self.downstream.take() {
            downstream.on_complete();
        }
    }
}

impl<T: Send + 'static> Subscription<T> for TimeoutMain<T> {
    fn request(&self, n: u64) {
        self.arbiter.request(n);
    }

    fn cancel(&self) {
        self.index.swap(TERMINATED, Ordering::AcqRel);
        self.cancel_deadline();
        self.arbiter.cancel();
        self.cancel_main();
        self.downstream.take();
    }
}

/// Relays the fallback once it took over.
struct FallbackSubscriber<T> {
    main: Arc<TimeoutMain<T>>,
}

impl<T: Send + 'static> Subscriber<T> for FallbackSubscriber<T> {
    fn on_subscribe(&self, subscription: SharedSubscription<T>) {
        self.main.arbiter.seal(subscription);
    }

    fn on_next(&self, item: T) {
        if let Some(downstream) = self.main.downstream.get() {
            downstream.on_next(item);
        }
        self.main.arbiter.produced(1);
    }

    fn on_error(&self, error: RivuletError) {
        match self.main.downstream.take() {
            Some(downstream) => downstream.on_error(error),
            None => report::error_dropped(&error),
        }
    }

    fn on_complete(&self) {
        if let Some(downstream) = self.main.downstream.take() {
            downstream.on_complete();
        }
    }
}
