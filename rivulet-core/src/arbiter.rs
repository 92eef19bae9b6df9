// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::demand::{self, UNBOUNDED};
use crate::drain::WorkInProgress;
use crate::subscription::{SharedSubscription, Subscription};
use core::ops::ControlFlow;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A subscription that can switch its upstream while keeping the consumer's
/// outstanding demand.
///
/// The consumer sees one stable subscription. Whoever feeds it calls
/// [`produced`](Self::produced) per delivered item and [`set`](Self::set) to
/// swap in a new upstream, which is then asked for exactly the demand the
/// consumer still has outstanding.
///
/// Changes from any thread are recorded in the `missed_*` fields and applied
/// by the drain owner; the locks only guard the swaps.
pub struct SubscriptionArbiter<T> {
    wip: WorkInProgress,
    missed_requested: AtomicU64,
    missed_produced: AtomicU64,
    pending: Mutex<Pending<T>>,
    current: Mutex<Option<SharedSubscription<T>>>,
    requested: AtomicU64,
    cancelled: AtomicBool,
}

impl<T> SubscriptionArbiter<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            wip: WorkInProgress::new(),
            missed_requested: AtomicU64::new(0),
            missed_produced: AtomicU64::new(0),
            pending: Mutex::new(Pending {
                subscription: None,
                sealed: false,
            }),
            current: Mutex::new(None),
            requested: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Switches to `subscription`. A pending subscription that the drain loop
    /// has not installed yet is replaced and cancelled; the current upstream
    /// is left alone, callers cancel it themselves when it is still live.
    /// After [`seal`](Self::seal) the new subscription itself is cancelled.
    pub fn set(&self, subscription: SharedSubscription<T>) {
        if self.is_cancelled() {
            subscription.cancel();
            return;
        }
        let rejected = {
            let mut pending = self.pending.lock();
            if pending.sealed {
                Some(subscription)
            } else {
                pending.subscription.replace(subscription)
            }
        };
        if let Some(rejected) = rejected {
            rejected.cancel();
        }
        self.drain();
    }

    /// Switches to `subscription` for good: any later [`set`](Self::set) is
    /// cancelled on arrival. Used when a fallback takes over from an upstream
    /// that may still be subscribing.
    pub fn seal(&self, subscription: SharedSubscription<T>) {
        if self.is_cancelled() {
            subscription.cancel();
            return;
        }
        let replaced = {
            let mut pending = self.pending.lock();
            pending.sealed = true;
            pending.subscription.replace(subscription)
        };
        if let Some(replaced) = replaced {
            replaced.cancel();
        }
        self.drain();
    }

    /// Records `n` items delivered downstream.
    pub fn produced(&self, n: u64) {
        if n == 0 {
            return;
        }
        demand::add_cap(&self.missed_produced, n);
        self.drain();
    }

    /// Outstanding demand as of the last drain pass.
    pub fn requested(&self) -> u64 {
        self.requested.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn drain(&self) {
        self.wip.run(|| {
            self.apply_missed();
            ControlFlow::Continue(())
        });
    }

    fn apply_missed(&self) {
        let missed_requested = self.missed_requested.swap(0, Ordering::AcqRel);
        let missed_produced = self.missed_produced.swap(0, Ordering::AcqRel);
        let missed_subscription = self.pending.lock().subscription.take();

        if self.is_cancelled() {
            let current = self.current.lock().take();
            if let Some(current) = current {
                current.cancel();
            }
            if let Some(missed) = missed_subscription {
                missed.cancel();
            }
            return;
        }

        let mut requested = self.requested.load(Ordering::Acquire);
        if requested != UNBOUNDED {
            requested = requested.saturating_add(missed_requested);
            if requested != UNBOUNDED {
                requested = requested.saturating_sub(missed_produced);
            }
            self.requested.store(requested, Ordering::Release);
        }

        match missed_subscription {
            Some(next) => {
                *self.current.lock() = Some(next.clone());
                if requested != 0 {
                    next.request(requested);
                }
            }
            None if missed_requested != 0 => {
                let current = self.current.lock().clone();
                if let Some(current) = current {
                    current.request(missed_requested);
                }
            }
            None => {}
        }
    }
}

struct Pending<T> {
    subscription: Option<SharedSubscription<T>>,
    sealed: bool,
}

impl<T> Default for SubscriptionArbiter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Subscription<T> for SubscriptionArbiter<T> {
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        demand::add_cap(&self.missed_requested, n);
        self.drain();
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.drain();
        }
    }
}
