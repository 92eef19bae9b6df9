// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

#![allow(clippy::multiple_crate_versions)]
//! Async bridges for Rivulet publishers.
//!
//! | Bridge | Direction |
//! |--------|-----------|
//! | [`IntoStreamExt::into_stream`] | `Publisher` → `futures::Stream<Item = StreamItem<T>>` |
//! | [`from_stream`] / [`from_item_stream`] | `futures::Stream` → `Publisher` (tokio task) |
//! | [`timer`] | one-shot tokio deadline producer |
//! | [`TimeoutAfterExt`] | `timeout` with [`timer`] deadlines |
//!
//! Stream-driven publishers and timers spawn on the ambient tokio runtime.

#[macro_use]
mod logging;

pub mod source;
pub mod stream;
pub mod timer;

pub use self::source::{from_item_stream, from_stream, StreamPublisher};
pub use self::stream::{into_stream, IntoStreamExt, PublisherStream};
pub use self::timer::{timer, TimeoutAfterExt, Timer};
