// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Publishers that fail on purpose.

use rivulet_core::{Publisher, SharedSubscriber, Subscriber};
use rivulet_error::RivuletError;
use rivulet_publisher::UnicastProcessor;

/// The error used by tests that only care that *some* error travels.
#[must_use]
pub fn forced_failure() -> RivuletError {
    RivuletError::stream_error("forced failure")
}

/// Emits the given values, honouring demand, then fails with the injected
/// error.
///
/// # Examples
///
/// ```rust
/// use rivulet_core::Publisher;
/// use rivulet_test_utils::{forced_failure, ErrorInjectingPublisher, TestSubscriber};
///
/// let source = ErrorInjectingPublisher::new(vec![1, 2], forced_failure());
/// let ts = TestSubscriber::<i32>::new();
/// source.subscribe(ts.clone());
///
/// ts.assert_values(&[1, 2])
///     .assert_error_message("Stream processing error: forced failure");
/// ```
pub struct ErrorInjectingPublisher<T> {
    values: Vec<T>,
    error: RivuletError,
}

impl<T> ErrorInjectingPublisher<T> {
    pub fn new(values: Vec<T>, error: RivuletError) -> Self {
        Self { values, error }
    }

    /// Fails immediately with [`forced_failure`].
    pub fn failing() -> Self {
        Self::new(Vec::new(), forced_failure())
    }
}

impl<T> Publisher for ErrorInjectingPublisher<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Item = T;

    fn subscribe(&self, subscriber: SharedSubscriber<T>) {
        let processor = UnicastProcessor::new();
        for value in &self.values {
            processor.on_next(value.clone());
        }
        processor.on_error(self.error.clone());
        processor.subscribe(subscriber);
    }
}
