// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::publisher::{Publisher, SharedPublisher};
use crate::subscriber::SharedSubscriber;
use std::fmt;
use std::sync::Arc;

/// A type-erased, cheaply cloneable publisher.
///
/// `Flux` is the common currency between stages: sources return it, operator
/// extension traits return it, and mappers of `flat_map`/`concat_map` can
/// return it to mix different source kinds in one pipeline.
///
/// ```
/// use rivulet_core::{Flux, Publisher};
/// # use rivulet_core::{SharedSubscriber, EmptySubscription};
/// # struct Nothing;
/// # impl Publisher for Nothing {
/// #     type Item = i32;
/// #     fn subscribe(&self, subscriber: SharedSubscriber<i32>) {
/// #         subscriber.on_subscribe(EmptySubscription::shared());
/// #         subscriber.on_complete();
/// #     }
/// # }
/// let flux: Flux<i32> = Flux::new(Nothing);
/// let again = flux.clone();
/// # let _ = again;
/// ```
pub struct Flux<T> {
    publisher: SharedPublisher<T>,
}

impl<T: Send + 'static> Flux<T> {
    /// Wraps any publisher.
    pub fn new<P>(publisher: P) -> Self
    where
        P: Publisher<Item = T> + 'static,
    {
        Self {
            publisher: Arc::new(publisher),
        }
    }

    /// Wraps an already shared publisher without another allocation.
    #[must_use]
    pub fn from_shared(publisher: SharedPublisher<T>) -> Self {
        Self { publisher }
    }

    /// Returns the shared publisher behind this handle.
    #[must_use]
    pub fn into_shared(self) -> SharedPublisher<T> {
        self.publisher
    }
}

impl<T> Clone for Flux<T> {
    fn clone(&self) -> Self {
        Self {
            publisher: Arc::clone(&self.publisher),
        }
    }
}

impl<T> fmt::Debug for Flux<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flux").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Publisher for Flux<T> {
    type Item = T;

    fn subscribe(&self, subscriber: SharedSubscriber<T>) {
        self.publisher.subscribe(subscriber);
    }
}

/// Conversion into a [`Flux`].
pub trait IntoFlux: Publisher + Sized + 'static {
    /// Erases the concrete publisher type.
    fn into_flux(self) -> Flux<Self::Item> {
        Flux::new(self)
    }
}

impl<P> IntoFlux for P where P: Publisher + Sized + 'static {}
