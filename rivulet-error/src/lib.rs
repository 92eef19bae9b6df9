// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

#![allow(clippy::multiple_crate_versions)]
//! Error types for the Rivulet reactive-streams engine
//!
//! This crate defines the root [`RivuletError`] type carried by every `on_error`
//! signal. Variants separate opaque upstream failures from protocol contract
//! violations, timeout expiry and the composite produced when errors are
//! delayed to the end of a sequence.
//!
//! # Examples
//!
//! ```
//! use rivulet_error::{Result, RivuletError};
//!
//! fn admit(prefetch: usize) -> Result<usize> {
//!     if prefetch == 0 {
//!         return Err(RivuletError::invalid_argument("prefetch must be positive"));
//!     }
//!     Ok(prefetch)
//! }
//!
//! assert!(admit(0).is_err());
//! ```

use std::sync::Arc;

/// Root error type for all Rivulet operations
///
/// Errors travel through the `on_error` signal, may be fanned out to several
/// subscribers and may be aggregated, so the type is cheaply [`Clone`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum RivuletError {
    /// Stream processing encountered an error
    ///
    /// General-purpose domain error reported by a producer.
    #[error("Stream processing error: {context}")]
    StreamProcessingError {
        /// Description of what went wrong
        context: String,
    },

    /// Custom error from user code
    ///
    /// Wraps errors produced by user-provided mappers and sources so they can
    /// be passed through the pipeline untouched.
    #[error("User error: {0}")]
    UserError(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A null value was produced where a value is required
    ///
    /// Raised when a mapper yields no publisher, or a fused stage yields no
    /// item. Never treated as an empty signal.
    #[error("Null value: {context}")]
    NullValue {
        /// Which stage produced the null
        context: String,
    },

    /// A producer emitted more items than were requested
    ///
    /// Raised when a bounded queue overflows or a multicast subscriber has no
    /// outstanding demand.
    #[error("Missing backpressure: {context}")]
    MissingBackpressure {
        /// Which buffer or subscriber overflowed
        context: String,
    },

    /// An operator was constructed with an invalid argument
    #[error("Invalid argument: {context}")]
    InvalidArgument {
        /// Description of the rejected argument
        context: String,
    },

    /// Timeout occurred
    ///
    /// Emitted by the `timeout` operator when a deadline producer fires before
    /// the next item and no fallback is configured.
    #[error("Timeout error: {context}")]
    TimeoutError {
        /// Context about the timeout
        context: String,
    },

    /// Multiple errors occurred
    ///
    /// Aggregates errors delayed to the end of a sequence, in encounter order.
    #[error("Multiple errors occurred: {count} errors")]
    MultipleErrors {
        /// Number of errors that occurred
        count: usize,
        /// The individual errors
        errors: Vec<RivuletError>,
    },
}

impl RivuletError {
    /// Create a stream processing error with the given context
    pub fn stream_error(context: impl Into<String>) -> Self {
        Self::StreamProcessingError {
            context: context.into(),
        }
    }

    /// Wrap a user error
    pub fn user_error(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::UserError(Arc::new(error))
    }

    /// Create a null value contract violation
    pub fn null_value(context: impl Into<String>) -> Self {
        Self::NullValue {
            context: context.into(),
        }
    }

    /// Create a missing backpressure contract violation
    pub fn missing_backpressure(context: impl Into<String>) -> Self {
        Self::MissingBackpressure {
            context: context.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(context: impl Into<String>) -> Self {
        Self::InvalidArgument {
            context: context.into(),
        }
    }

    /// Create a timeout error with the given context
    pub fn timeout_error(context: impl Into<String>) -> Self {
        Self::TimeoutError {
            context: context.into(),
        }
    }

    /// Collapse a list of errors into a single error
    ///
    /// Returns `None` for an empty list, the error itself for a single entry
    /// and [`RivuletError::MultipleErrors`] otherwise.
    ///
    /// ```
    /// use rivulet_error::RivuletError;
    ///
    /// let single = RivuletError::composite(vec![RivuletError::stream_error("a")]).unwrap();
    /// assert!(matches!(single, RivuletError::StreamProcessingError { .. }));
    ///
    /// let many = RivuletError::composite(vec![
    ///     RivuletError::stream_error("a"),
    ///     RivuletError::stream_error("b"),
    /// ])
    /// .unwrap();
    /// assert!(matches!(many, RivuletError::MultipleErrors { count: 2, .. }));
    /// ```
    #[must_use]
    pub fn composite(mut errors: Vec<RivuletError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            count => Some(Self::MultipleErrors { count, errors }),
        }
    }

    /// Check if this error signals timeout expiry
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutError { .. })
    }

    /// Check if this error reports a broken protocol contract
    ///
    /// Null values and missing backpressure are contract violations; domain
    /// errors, timeouts and composites are not.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::NullValue { .. } | Self::MissingBackpressure { .. }
        )
    }
}

/// Specialized Result type for Rivulet operations
pub type Result<T> = std::result::Result<T, RivuletError>;

/// Extension trait for converting foreign errors into `RivuletError`
///
/// Implemented for every `std::error::Error + Send + Sync + 'static`, so user
/// mappers can write `io_result.map_err(IntoRivuletError::into_rivulet)`.
pub trait IntoRivuletError {
    /// Convert this error into a `RivuletError`
    fn into_rivulet(self) -> RivuletError;
}

impl<E: std::error::Error + Send + Sync + 'static> IntoRivuletError for E {
    fn into_rivulet(self) -> RivuletError {
        RivuletError::user_error(self)
    }
}
