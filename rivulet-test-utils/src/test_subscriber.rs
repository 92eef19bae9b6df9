// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A recording subscriber with chainable assertions.

use event_listener::{Event, Listener};
use parking_lot::Mutex;
use rivulet_core::demand::{self, UNBOUNDED};
use rivulet_core::{AtomicFusionMode, FusionMode, SharedSubscription, Subscriber, WorkInProgress};
use rivulet_error::RivuletError;
use std::fmt::Debug;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Records every signal it receives and checks the protocol along the way.
///
/// Items beyond the requested amount, signals after a terminal signal and a
/// second `on_subscribe` are recorded as violations instead of panicking
/// inside the producer; [`assert_no_violations`](Self::assert_no_violations)
/// surfaces them.
///
/// ```
/// use rivulet_core::Publisher;
/// use rivulet_publisher::range;
/// use rivulet_test_utils::TestSubscriber;
///
/// let ts = TestSubscriber::<i32>::new();
/// range(1, 3).subscribe(ts.clone());
/// ts.assert_values(&[1, 2, 3]).assert_complete();
/// ```
pub struct TestSubscriber<T> {
    initial_request: u64,
    fusion: FusionMode,
    granted: AtomicFusionMode,
    subscription: OnceLock<SharedSubscription<T>>,
    outstanding: AtomicU64,
    values: Mutex<Vec<T>>,
    errors: Mutex<Vec<RivuletError>>,
    completions: AtomicUsize,
    subscriptions: AtomicUsize,
    violations: Mutex<Vec<String>>,
    upstream_done: AtomicBool,
    pending_error: Mutex<Option<RivuletError>>,
    wip: WorkInProgress,
    terminated: Event,
}

impl<T> TestSubscriber<T>
where
    T: Send + 'static,
{
    /// A subscriber requesting an unbounded amount on subscription.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_request(UNBOUNDED)
    }

    /// A subscriber requesting `initial_request` on subscription; `0` means
    /// nothing until [`request`](Self::request).
    #[must_use]
    pub fn with_request(initial_request: u64) -> Arc<Self> {
        Self::build(initial_request, FusionMode::None)
    }

    /// A subscriber asking its upstream for queue fusion in `mode` and pulling
    /// through `poll` when granted.
    #[must_use]
    pub fn fused(mode: FusionMode) -> Arc<Self> {
        Self::build(UNBOUNDED, mode)
    }

    fn build(initial_request: u64, fusion: FusionMode) -> Arc<Self> {
        Arc::new(Self {
            initial_request,
            fusion,
            granted: AtomicFusionMode::default(),
            subscription: OnceLock::new(),
            outstanding: AtomicU64::new(0),
            values: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            completions: AtomicUsize::new(0),
            subscriptions: AtomicUsize::new(0),
            violations: Mutex::new(Vec::new()),
            upstream_done: AtomicBool::new(false),
            pending_error: Mutex::new(None),
            wip: WorkInProgress::new(),
            terminated: Event::new(),
        })
    }

    /// Requests `n` more items.
    pub fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        demand::add_cap(&self.outstanding, n);
        if let Some(subscription) = self.subscription.get() {
            subscription.request(n);
        }
    }

    pub fn cancel(&self) {
        if let Some(subscription) = self.subscription.get() {
            subscription.cancel();
        }
    }

    /// The fusion mode the upstream granted.
    pub fn fusion_mode(&self) -> FusionMode {
        self.granted.load()
    }

    pub fn is_terminated(&self) -> bool {
        self.completions.load(Ordering::Acquire) > 0 || !self.errors.lock().is_empty()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.get().is_some()
    }

    /// How many times `on_subscribe` was called.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::Acquire)
    }

    pub fn value_count(&self) -> usize {
        self.values.lock().len()
    }

    pub fn errors(&self) -> Vec<RivuletError> {
        self.errors.lock().clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.violations.lock().clone()
    }

    /// Blocks until a terminal signal arrives or `timeout` elapses. Returns
    /// whether the subscriber terminated.
    pub fn await_terminal(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_terminated() {
                return true;
            }
            let listener = self.terminated.listen();
            if self.is_terminated() {
                return true;
            }
            if listener.wait_deadline(deadline).is_none() {
                return self.is_terminated();
            }
        }
    }

    /// Waits for a terminal signal without blocking the executor.
    pub async fn terminal(&self) {
        loop {
            if self.is_terminated() {
                return;
            }
            let listener = self.terminated.listen();
            if self.is_terminated() {
                return;
            }
            listener.await;
        }
    }

    pub fn assert_value_count(&self, expected: usize) -> &Self {
        let actual = self.value_count();
        assert_eq!(actual, expected, "unexpected number of values");
        self
    }

    pub fn assert_no_values(&self) -> &Self {
        self.assert_value_count(0)
    }

    pub fn assert_complete(&self) -> &Self {
        let completions = self.completions.load(Ordering::Acquire);
        assert_eq!(completions, 1, "expected exactly one completion");
        self
    }

    pub fn assert_not_complete(&self) -> &Self {
        let completions = self.completions.load(Ordering::Acquire);
        assert_eq!(completions, 0, "expected no completion");
        self
    }

    pub fn assert_no_error(&self) -> &Self {
        let errors = self.errors.lock();
        assert!(errors.is_empty(), "expected no error, got {errors:?}");
        self
    }

    /// Asserts a single error whose display text equals `expected`.
    pub fn assert_error_message(&self, expected: &str) -> &Self {
        let errors = self.errors.lock();
        assert_eq!(errors.len(), 1, "expected exactly one error, got {errors:?}");
        assert_eq!(errors[0].to_string(), expected);
        self
    }

    /// Asserts a single error matching `predicate`.
    pub fn assert_error_matches(&self, predicate: impl FnOnce(&RivuletError) -> bool) -> &Self {
        let errors = self.errors.lock();
        assert_eq!(errors.len(), 1, "expected exactly one error, got {errors:?}");
        assert!(predicate(&errors[0]), "unexpected error {:?}", errors[0]);
        self
    }

    pub fn assert_terminated(&self) -> &Self {
        assert!(self.is_terminated(), "expected a terminal signal");
        self
    }

    pub fn assert_not_terminated(&self) -> &Self {
        assert!(!self.is_terminated(), "expected no terminal signal");
        self
    }

    pub fn assert_no_violations(&self) -> &Self {
        let violations = self.violations.lock();
        assert!(violations.is_empty(), "protocol violations: {violations:?}");
        self
    }

    pub fn assert_fusion_mode(&self, expected: FusionMode) -> &Self {
        assert_eq!(self.fusion_mode(), expected, "unexpected fusion mode");
        self
    }

    fn violation(&self, message: impl Into<String>) {
        self.violations.lock().push(message.into());
    }

    fn record_complete(&self) {
        if self.is_terminated() {
            self.violation("on_complete after a terminal signal");
            return;
        }
        self.completions.fetch_add(1, Ordering::AcqRel);
        self.terminated.notify(usize::MAX);
    }

    fn record_error(&self, error: RivuletError) {
        if self.is_terminated() {
            self.violation(format!("on_error after a terminal signal: {error}"));
            return;
        }
        self.errors.lock().push(error);
        self.terminated.notify(usize::MAX);
    }

    fn drain_fused(&self) {
        let Some(subscription) = self.subscription.get() else {
            return;
        };
        let mode = self.fusion_mode();
        self.wip.run(|| {
            loop {
                match subscription.poll() {
                    Ok(Some(item)) => self.values.lock().push(item),
                    Ok(None) if mode == FusionMode::Sync => {
                        self.record_complete();
                        return ControlFlow::Break(());
                    }
                    Ok(None) => break,
                    Err(error) => {
                        subscription.cancel();
                        self.record_error(error);
                        return ControlFlow::Break(());
                    }
                }
            }
            if self.upstream_done.load(Ordering::Acquire) && subscription.is_empty() {
                let error = self.pending_error.lock().take();
                match error {
                    Some(error) => self.record_error(error),
                    None => self.record_complete(),
                }
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        });
    }
}

impl<T> TestSubscriber<T>
where
    T: Clone + Send + 'static,
{
    pub fn values(&self) -> Vec<T> {
        self.values.lock().clone()
    }
}

impl<T> TestSubscriber<T>
where
    T: PartialEq + Debug + Send + 'static,
{
    pub fn assert_values(&self, expected: &[T]) -> &Self {
        let values = self.values.lock();
        assert_eq!(values.as_slice(), expected, "unexpected values");
        self
    }

    /// Asserts that the recorded values start with `expected`.
    pub fn assert_values_start_with(&self, expected: &[T]) -> &Self {
        let values = self.values.lock();
        assert!(
            values.len() >= expected.len() && &values[..expected.len()] == expected,
            "values {values:?} do not start with {expected:?}"
        );
        self
    }
}

impl<T> Subscriber<T> for TestSubscriber<T>
where
    T: Send + 'static,
{
    fn on_subscribe(&self, subscription: SharedSubscription<T>) {
        self.subscriptions.fetch_add(1, Ordering::AcqRel);
        if self.subscription.set(subscription.clone()).is_err() {
            self.violation("on_subscribe called more than once");
            subscription.cancel();
            return;
        }
        if self.fusion != FusionMode::None {
            let granted = subscription.request_fusion(self.fusion);
            self.granted.store(granted);
            match granted {
                FusionMode::Sync => {
                    self.drain_fused();
                    return;
                }
                FusionMode::Async => {
                    if self.initial_request != 0 {
                        subscription.request(self.initial_request);
                    }
                    self.drain_fused();
                    return;
                }
                FusionMode::None | FusionMode::Any => {}
            }
        }
        if self.initial_request != 0 {
            demand::add_cap(&self.outstanding, self.initial_request);
            subscription.request(self.initial_request);
        }
    }

    fn on_next(&self, item: T) {
        if self.is_terminated() {
            self.violation("on_next after a terminal signal");
            return;
        }
        if self.fusion_mode().is_fused() {
            self.violation("on_next on a fused subscription");
            return;
        }
        if self.outstanding.load(Ordering::Acquire) == 0 {
            self.violation("on_next without outstanding demand");
        } else {
            demand::produced(&self.outstanding, 1);
        }
        self.values.lock().push(item);
    }

    fn on_error(&self, error: RivuletError) {
        if self.fusion_mode() == FusionMode::Async {
            *self.pending_error.lock() = Some(error);
            self.upstream_done.store(true, Ordering::Release);
            self.drain_fused();
            return;
        }
        self.record_error(error);
    }

    fn on_complete(&self) {
        if self.fusion_mode() == FusionMode::Async {
            self.upstream_done.store(true, Ordering::Release);
            self.drain_fused();
            return;
        }
        self.record_complete();
    }

    fn on_ready(&self) {
        self.drain_fused();
    }
}
