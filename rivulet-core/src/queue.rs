// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::report;
use crossbeam_queue::{ArrayQueue, SegQueue};
use rivulet_error::{Result, RivuletError};
use std::fmt;

/// Multi-producer, multi-consumer buffer between a producer's push path and
/// a drain loop.
///
/// Bounded queues hold exactly the prefetch amount: a producer that honours
/// demand can never fill one, so a rejected `offer` means the producer broke
/// the protocol.
pub enum FlowQueue<T> {
    Bounded(ArrayQueue<T>),
    Unbounded(SegQueue<T>),
}

impl<T> FlowQueue<T> {
    /// A queue holding at most `capacity` items (at least one).
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        FlowQueue::Bounded(ArrayQueue::new(capacity.max(1)))
    }

    #[must_use]
    pub fn unbounded() -> Self {
        FlowQueue::Unbounded(SegQueue::new())
    }

    /// A queue sized for `prefetch` outstanding items; `usize::MAX` means
    /// unbounded prefetch and yields an unbounded queue.
    #[must_use]
    pub fn for_prefetch(prefetch: usize) -> Self {
        if prefetch == usize::MAX {
            Self::unbounded()
        } else {
            Self::bounded(prefetch)
        }
    }

    /// Appends `item`, handing it back if the queue is full.
    pub fn offer(&self, item: T) -> std::result::Result<(), T> {
        match self {
            FlowQueue::Bounded(queue) => queue.push(item),
            FlowQueue::Unbounded(queue) => {
                queue.push(item);
                Ok(())
            }
        }
    }

    /// Appends `item`, turning a full queue into
    /// [`RivuletError::MissingBackpressure`].
    pub fn push(&self, item: T) -> Result<()> {
        self.offer(item).map_err(|_| {
            report::overflow("queue");
            RivuletError::missing_backpressure("queue is full")
        })
    }

    pub fn poll(&self) -> Option<T> {
        match self {
            FlowQueue::Bounded(queue) => queue.pop(),
            FlowQueue::Unbounded(queue) => queue.pop(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FlowQueue::Bounded(queue) => queue.is_empty(),
            FlowQueue::Unbounded(queue) => queue.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FlowQueue::Bounded(queue) => queue.len(),
            FlowQueue::Unbounded(queue) => queue.len(),
        }
    }

    /// `None` for unbounded queues.
    pub fn capacity(&self) -> Option<usize> {
        match self {
            FlowQueue::Bounded(queue) => Some(queue.capacity()),
            FlowQueue::Unbounded(_) => None,
        }
    }

    /// Drops every buffered item.
    pub fn clear(&self) {
        while self.poll().is_some() {}
    }
}

impl<T> fmt::Debug for FlowQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_queue_rejects_overflow() {
        let queue = FlowQueue::bounded(2);
        queue.push(1).unwrap();
        queue.push(2).unwrap();

        let error = queue.push(3).unwrap_err();

        assert!(error.is_contract_violation());
        assert_eq!(queue.poll(), Some(1));
        assert_eq!(queue.poll(), Some(2));
        assert_eq!(queue.poll(), None);
    }

    #[test]
    fn unbounded_prefetch_gives_unbounded_queue() {
        let queue = FlowQueue::for_prefetch(usize::MAX);
        for i in 0..10_000 {
            queue.push(i).unwrap();
        }

        assert_eq!(queue.capacity(), None);
        assert_eq!(queue.len(), 10_000);
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn zero_capacity_is_rounded_up() {
        let queue = FlowQueue::<u8>::bounded(0);
        assert_eq!(queue.capacity(), Some(1));
    }
}
