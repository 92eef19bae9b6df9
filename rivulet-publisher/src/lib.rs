// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

#![allow(clippy::multiple_crate_versions)]
//! Source stages, fusable transforms and processors.
//!
//! ```
//! use rivulet_publisher::{range, MapExt};
//!
//! let doubled = range(1, 5).map(|v| v * 2).filter(|v| v % 4 == 0);
//! # let _ = doubled;
//! ```

#[macro_use]
mod logging;

pub mod processor;
pub mod source;
pub mod transform;

pub use processor::{DirectProcessor, UnicastProcessor};
pub use source::{empty, error, from_iter, from_vec, just, never, range, IterPublisher};
pub use transform::MapExt;
