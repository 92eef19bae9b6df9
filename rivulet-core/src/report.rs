// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Dropped-signal reporting.
//!
//! Signals that cannot be delivered without breaking the protocol (an error
//! after termination, an item nobody asked for, a non-positive request) are
//! never re-thrown. They are handed to these functions, which log them.

use rivulet_error::RivuletError;

/// An error arrived after the stage already terminated.
pub fn error_dropped(error: &RivuletError) {
    warn!("rivulet: error dropped after termination: {}", error);
}

/// An item arrived after the stage already terminated or was cancelled.
pub fn item_dropped(stage: &str) {
    debug!("rivulet: {} dropped an item after termination", stage);
}

/// A consumer called `request` with a non-positive amount.
pub fn invalid_request(n: u64) {
    warn!("rivulet: request({}) ignored, demand must be positive", n);
}

/// A producer emitted more items than it was granted.
pub fn overflow(stage: &str) {
    error!("rivulet: {} received more items than requested", stage);
}
