// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Processors are both a [`Subscriber`](rivulet_core::Subscriber) and a
//! [`Publisher`](rivulet_core::Publisher): items pushed in through the
//! subscriber side come out of the publisher side. They bridge imperative
//! code into a pipeline and let tests drive inners by hand.

pub mod direct;
pub mod unicast;

pub use direct::DirectProcessor;
pub use unicast::UnicastProcessor;

