// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::report;
use crossbeam_queue::SegQueue;
use rivulet_error::RivuletError;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Where a held error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    /// The outer (main) sequence.
    Outer,
    /// An inner sequence or the mapper that produced it.
    Inner,
}

impl ErrorSource {
    const fn bit(self) -> u8 {
        match self {
            ErrorSource::Outer => 0b01,
            ErrorSource::Inner => 0b10,
        }
    }
}

/// Lock-free accumulator for errors awaiting delivery.
///
/// In first-only mode the first error wins and later ones are reported as
/// dropped. In accumulating mode every error is kept; [`take`](Self::take)
/// yields the outer error first, then inner errors in encounter order.
/// After `take` the holder is terminated and rejects further errors.
#[derive(Debug)]
pub struct ErrorHolder {
    accumulate: bool,
    claimed: AtomicBool,
    terminated: AtomicBool,
    sources: AtomicU8,
    outer: SegQueue<RivuletError>,
    inner: SegQueue<RivuletError>,
}

impl ErrorHolder {
    /// Keeps only the first error.
    #[must_use]
    pub fn first_only() -> Self {
        Self::new(false)
    }

    /// Keeps every error.
    #[must_use]
    pub fn accumulating() -> Self {
        Self::new(true)
    }

    fn new(accumulate: bool) -> Self {
        Self {
            accumulate,
            claimed: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            sources: AtomicU8::new(0),
            outer: SegQueue::new(),
            inner: SegQueue::new(),
        }
    }

    /// Records `error`. Returns `false` if it was dropped instead.
    pub fn add(&self, source: ErrorSource, error: RivuletError) -> bool {
        if self.terminated.load(Ordering::Acquire) {
            report::error_dropped(&error);
            return false;
        }
        if !self.accumulate && self.claimed.swap(true, Ordering::AcqRel) {
            report::error_dropped(&error);
            return false;
        }
        match source {
            ErrorSource::Outer => self.outer.push(error),
            ErrorSource::Inner => self.inner.push(error),
        }
        self.sources.fetch_or(source.bit(), Ordering::AcqRel);
        if self.terminated.load(Ordering::Acquire) {
            // Lost the race against `take`.
            self.drop_remaining();
        }
        true
    }

    /// Whether any error is held.
    pub fn is_set(&self) -> bool {
        self.sources.load(Ordering::Acquire) != 0
    }

    /// Whether an error from `source` is held.
    pub fn contains(&self, source: ErrorSource) -> bool {
        self.sources.load(Ordering::Acquire) & source.bit() != 0
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Terminates the holder and returns the error to deliver, collapsing
    /// several into [`RivuletError::MultipleErrors`]. Returns `None` if nothing
    /// was held or the holder was already terminated.
    pub fn take(&self) -> Option<RivuletError> {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return None;
        }
        let mut errors = Vec::with_capacity(self.outer.len() + self.inner.len());
        while let Some(error) = self.outer.pop() {
            errors.push(error);
        }
        while let Some(error) = self.inner.pop() {
            errors.push(error);
        }
        RivuletError::composite(errors)
    }

    fn drop_remaining(&self) {
        while let Some(error) = self.outer.pop() {
            report::error_dropped(&error);
        }
        while let Some(error) = self.inner.pop() {
            report::error_dropped(&error);
        }
    }
}
