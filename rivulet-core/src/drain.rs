// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Serialized drain loop.
//!
//! Every event that may let a stage make progress calls [`WorkInProgress::run`].
//! Exactly one caller (the one moving the counter away from zero) executes the
//! body; everybody else only bumps the counter and returns. The owner keeps
//! looping until it has accounted for every bump, so no trigger is lost and the
//! body never runs on two threads at once or recursively on one.

use core::ops::ControlFlow;
use core::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct WorkInProgress {
    missed: AtomicUsize,
}

impl WorkInProgress {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            missed: AtomicUsize::new(0),
        }
    }

    /// Registers a trigger. Returns `true` if the caller became the owner.
    pub fn enter(&self) -> bool {
        self.missed.fetch_add(1, Ordering::AcqRel) == 0
    }

    /// Acknowledges `missed` triggers and returns how many arrived meanwhile.
    /// Ownership is released when this returns `0`.
    pub fn leave(&self, missed: usize) -> usize {
        self.missed.fetch_sub(missed, Ordering::AcqRel) - missed
    }

    /// Whether some caller currently owns the loop (or the loop is sealed).
    pub fn is_active(&self) -> bool {
        self.missed.load(Ordering::Acquire) != 0
    }

    /// Runs `body` to a fixed point if the caller wins ownership.
    ///
    /// A body returning [`ControlFlow::Break`] ends the loop without releasing
    /// ownership: the stage is terminal and later triggers become no-ops.
    pub fn run(&self, mut body: impl FnMut() -> ControlFlow<()>) {
        if !self.enter() {
            return;
        }
        let mut missed = 1;
        loop {
            if body().is_break() {
                return;
            }
            missed = self.leave(missed);
            if missed == 0 {
                return;
            }
        }
    }
}
