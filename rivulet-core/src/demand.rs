// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Demand accounting.
//!
//! Demand is a plain `AtomicU64` that only ever changes through [`add_cap`] and
//! [`produced`]. [`UNBOUNDED`] is sticky: once reached, the counter is never
//! decremented again and the producer may emit freely.

use crate::report;
use core::sync::atomic::{AtomicU64, Ordering};

/// Demand value meaning "no limit".
pub const UNBOUNDED: u64 = u64::MAX;

/// Adds `n` to `requested`, saturating at [`UNBOUNDED`]. Returns the previous
/// value, so `0` tells the caller that it just turned an idle producer on.
pub fn add_cap(requested: &AtomicU64, n: u64) -> u64 {
    requested
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            if current == UNBOUNDED {
                None
            } else {
                Some(current.saturating_add(n))
            }
        })
        .unwrap_or(UNBOUNDED)
}

/// Subtracts `n` emitted items from `requested` unless it is unbounded.
/// Returns the remaining demand.
pub fn produced(requested: &AtomicU64, n: u64) -> u64 {
    match requested.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        if current == UNBOUNDED {
            None
        } else {
            Some(current.saturating_sub(n))
        }
    }) {
        Ok(previous) => {
            if previous < n {
                report::overflow("demand counter");
            }
            previous.saturating_sub(n)
        }
        Err(_) => UNBOUNDED,
    }
}

/// Returns `true` if `n` is a valid request amount. Zero is reported and
/// rejected.
pub fn validate(n: u64) -> bool {
    if n == 0 {
        report::invalid_request(n);
        return false;
    }
    true
}

/// A demand counter bundling the operations above.
#[derive(Debug, Default)]
pub struct Demand {
    requested: AtomicU64,
}

impl Demand {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            requested: AtomicU64::new(0),
        }
    }

    /// Adds a validated request. Returns the previous demand, or `None` if `n`
    /// was rejected.
    pub fn request(&self, n: u64) -> Option<u64> {
        validate(n).then(|| add_cap(&self.requested, n))
    }

    /// Records `n` emitted items and returns the remaining demand.
    pub fn produced(&self, n: u64) -> u64 {
        produced(&self.requested, n)
    }

    /// Current outstanding demand.
    pub fn get(&self) -> u64 {
        self.requested.load(Ordering::Acquire)
    }

    pub fn is_unbounded(&self) -> bool {
        self.get() == UNBOUNDED
    }
}
