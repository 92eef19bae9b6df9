// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Operator tuning.
//!
//! Configuration is plain typed values checked once, when the operator is
//! assembled: an invalid value fails with [`RivuletError::InvalidArgument`]
//! before anything is subscribed.

use rivulet_error::{Result, RivuletError};

/// Default number of concurrently active inners in `flat_map`.
pub const DEFAULT_MAX_CONCURRENCY: usize = 256;

/// Default number of items requested ahead from each inner.
pub const DEFAULT_PREFETCH: usize = 32;

/// When a pending error is delivered relative to in-flight inner work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorMode {
    /// Any error cancels everything and is delivered at once.
    #[default]
    Immediate,
    /// An outer error waits until the active inner terminates.
    Boundary,
    /// Errors are collected and delivered after every source is exhausted.
    End,
}

/// Configuration of the merge engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatMapConfig {
    /// Maximum number of inners subscribed at once; `usize::MAX` is unbounded.
    pub max_concurrency: usize,
    /// Items requested ahead from each inner; `usize::MAX` is unbounded.
    pub prefetch: usize,
    /// Outer items buffered while waiting for a free slot.
    pub outer_prefetch: usize,
}

impl Default for FlatMapConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            prefetch: DEFAULT_PREFETCH,
            outer_prefetch: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl FlatMapConfig {
    /// Sets the concurrency limit. The outer prefetch follows it, as the
    /// merge never needs more outer items than it can admit.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self.outer_prefetch = max_concurrency;
        self
    }

    #[must_use]
    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }

    #[must_use]
    pub fn with_outer_prefetch(mut self, outer_prefetch: usize) -> Self {
        self.outer_prefetch = outer_prefetch;
        self
    }

    /// No concurrency limit; the outer is requested unboundedly.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default().with_max_concurrency(usize::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        positive("max_concurrency", self.max_concurrency)?;
        positive("prefetch", self.prefetch)?;
        positive("outer_prefetch", self.outer_prefetch)
    }
}

/// Configuration of the concat engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcatMapConfig {
    /// Outer items requested ahead, and inner items requested ahead.
    pub prefetch: usize,
    pub error_mode: ErrorMode,
}

impl Default for ConcatMapConfig {
    fn default() -> Self {
        Self {
            prefetch: DEFAULT_PREFETCH,
            error_mode: ErrorMode::Immediate,
        }
    }
}

impl ConcatMapConfig {
    #[must_use]
    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }

    #[must_use]
    pub fn with_error_mode(mut self, error_mode: ErrorMode) -> Self {
        self.error_mode = error_mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        positive("prefetch", self.prefetch)
    }
}

fn positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(RivuletError::invalid_argument(format!(
            "{name} must be positive"
        )));
    }
    Ok(())
}

/// Demand to request from an upstream for `prefetch` buffered items.
pub(crate) fn prefetch_request(prefetch: usize) -> u64 {
    if prefetch == usize::MAX {
        rivulet_core::UNBOUNDED
    } else {
        prefetch as u64
    }
}

/// Replenish threshold: request more once three quarters were consumed.
pub(crate) fn replenish_limit(prefetch: usize) -> usize {
    prefetch - (prefetch >> 2)
}
