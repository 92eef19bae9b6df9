// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::subscriber::SharedSubscriber;
use std::sync::Arc;

/// Shared handle to a publisher.
pub type SharedPublisher<T> = Arc<dyn Publisher<Item = T>>;

/// A producer of items.
///
/// Publishers are cold descriptions of work: nothing happens until
/// `subscribe`, and every call creates a fresh, independent subscription.
pub trait Publisher: Send + Sync {
    /// Type of the emitted items.
    type Item: Send + 'static;

    /// Links `subscriber` to a new run of this producer. The subscriber's
    /// `on_subscribe` is called before any other signal.
    fn subscribe(&self, subscriber: SharedSubscriber<Self::Item>);
}

impl<P> Publisher for Arc<P>
where
    P: Publisher + ?Sized,
{
    type Item = P::Item;

    fn subscribe(&self, subscriber: SharedSubscriber<Self::Item>) {
        (**self).subscribe(subscriber);
    }
}
