// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use rivulet_core::{Flux, Publisher, Subscriber};
use rivulet_error::{Result, RivuletError};
use rivulet_operators::TimeoutExt;
use rivulet_publisher::{empty, error, never, range, DirectProcessor};
use rivulet_test_utils::{forced_failure, TestSubscriber};

const FORCED: &str = "Stream processing error: forced failure";

#[test]
fn test_timeout_never_expiring_passes_everything() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 10)
        .timeout(never::<()>(), |_| never::<()>())
        .subscribe(ts.clone());

    // Assert
    ts.assert_values(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10])
        .assert_complete()
        .assert_no_error();
}

#[test]
fn test_timeout_first_deadline_expiring_at_once_fails() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 10)
        .timeout(empty::<()>(), |_| never::<()>())
        .subscribe(ts.clone());

    // Assert
    ts.assert_no_values()
        .assert_not_complete()
        .assert_error_matches(RivuletError::is_timeout);
}

#[test]
fn test_timeout_item_deadline_expiring_at_once_fails_after_first_item() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 10)
        .timeout(never::<()>(), |_| empty::<()>())
        .subscribe(ts.clone());

    // Assert
    ts.assert_values(&[1])
        .assert_not_complete()
        .assert_error_message("Timeout error: Timeout");
}

#[test]
fn test_timeout_first_deadline_switches_to_fallback() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 10)
        .timeout_with_fallback(empty::<()>(), |_| never::<()>(), range(1, 10))
        .subscribe(ts.clone());

    // Assert
    ts.assert_values(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10])
        .assert_complete()
        .assert_no_error();
}

#[test]
fn test_timeout_item_deadline_switches_to_fallback() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 10)
        .timeout_with_fallback(never::<()>(), |_| empty::<()>(), range(1, 10))
        .subscribe(ts.clone());

    // Assert
    ts.assert_values(&[1, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10])
        .assert_complete()
        .assert_no_error()
        .assert_no_violations();
}

#[test]
fn test_timeout_superseded_deadline_item_has_no_effect() {
    // Arrange
    let source = DirectProcessor::<i32>::new();
    let first = DirectProcessor::<i32>::new();
    let ts = TestSubscriber::<i32>::new();
    source
        .clone()
        .timeout_with_fallback(first.clone(), |_| never::<()>(), range(1, 10))
        .subscribe(ts.clone());

    // Act
    source.on_next(0);
    first.on_next(1);
    source.on_complete();

    // Assert
    assert!(!first.has_downstreams());
    ts.assert_values(&[0]).assert_complete().assert_no_error();
}

#[test]
fn test_timeout_superseded_deadline_completion_has_no_effect() {
    // Arrange
    let source = DirectProcessor::<i32>::new();
    let first = DirectProcessor::<i32>::new();
    let ts = TestSubscriber::<i32>::new();
    source
        .clone()
        .timeout_with_fallback(first.clone(), |_| never::<()>(), range(1, 10))
        .subscribe(ts.clone());

    // Act
    source.on_next(0);
    first.on_complete();
    source.on_complete();

    // Assert
    assert!(!first.has_downstreams());
    ts.assert_values(&[0]).assert_complete().assert_no_error();
}

#[test]
fn test_timeout_superseded_deadline_error_has_no_effect() {
    // Arrange
    let source = DirectProcessor::<i32>::new();
    let first = DirectProcessor::<i32>::new();
    let ts = TestSubscriber::<i32>::new();
    source
        .clone()
        .timeout_with_fallback(first.clone(), |_| never::<()>(), range(1, 10))
        .subscribe(ts.clone());

    // Act
    source.on_next(0);
    first.on_error(forced_failure());
    source.on_complete();

    // Assert
    assert!(!first.has_downstreams());
    ts.assert_values(&[0]).assert_complete().assert_no_error();
}

#[test]
fn test_timeout_mapper_error_fails_without_fallback() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 10)
        .try_timeout(never::<()>(), |_: &i32| -> Result<Option<Flux<()>>> {
            Err(forced_failure())
        })
        .subscribe(ts.clone());

    // Assert
    ts.assert_values(&[1])
        .assert_not_complete()
        .assert_error_message(FORCED);
}

#[test]
fn test_timeout_mapper_error_expires_into_fallback() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 10)
        .try_timeout_with_fallback(
            never::<()>(),
            |_: &i32| -> Result<Option<Flux<()>>> { Err(forced_failure()) },
            range(100, 2),
        )
        .subscribe(ts.clone());

    // Assert
    ts.assert_values(&[1, 100, 101])
        .assert_complete()
        .assert_no_error();
}

#[test]
fn test_timeout_mapper_returning_none_fails_even_with_fallback() {
    // Arrange
    let plain = TestSubscriber::<i32>::new();
    let with_fallback = TestSubscriber::<i32>::new();

    // Act
    range(1, 10)
        .try_timeout(never::<()>(), |_| Ok(None::<Flux<()>>))
        .subscribe(plain.clone());
    range(1, 10)
        .try_timeout_with_fallback(never::<()>(), |_| Ok(None::<Flux<()>>), range(1, 3))
        .subscribe(with_fallback.clone());

    // Assert
    for ts in [plain, with_fallback] {
        ts.assert_values(&[1])
            .assert_not_complete()
            .assert_error_matches(|e| matches!(e, RivuletError::NullValue { .. }));
    }
}

#[test]
fn test_timeout_first_deadline_error_is_delivered() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 10)
        .timeout(error::<()>(forced_failure()), |_| never::<()>())
        .subscribe(ts.clone());

    // Assert
    ts.assert_no_values()
        .assert_not_complete()
        .assert_error_message(FORCED);
}

#[test]
fn test_timeout_item_deadline_error_is_delivered() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 10)
        .timeout(never::<()>(), |_| error::<()>(forced_failure()))
        .subscribe(ts.clone());

    // Assert
    ts.assert_values(&[1])
        .assert_not_complete()
        .assert_error_message(FORCED);
}

#[test]
fn test_timeout_deadline_error_bypasses_fallback() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 10)
        .timeout_with_fallback(error::<()>(forced_failure()), |_| never::<()>(), range(1, 3))
        .subscribe(ts.clone());

    // Assert
    ts.assert_no_values().assert_error_message(FORCED);
}

#[test]
fn test_timeout_expiry_cancels_main_source() {
    // Arrange
    let source = DirectProcessor::<i32>::new();
    let deadline = DirectProcessor::<i32>::new();
    let ts = TestSubscriber::<i32>::new();
    let item_deadline = deadline.clone();
    source
        .clone()
        .timeout(deadline.clone(), move |_| item_deadline.clone())
        .subscribe(ts.clone());

    // Act
    deadline.on_next(1);
    source.on_next(2);
    source.on_complete();

    // Assert
    assert!(!source.has_downstreams());
    ts.assert_no_values()
        .assert_error_matches(RivuletError::is_timeout)
        .assert_not_complete();
}

#[test]
fn test_timeout_fallback_receives_outstanding_demand() {
    // Arrange
    let source = DirectProcessor::<i32>::new();
    let deadline = DirectProcessor::<()>::new();
    let ts = TestSubscriber::<i32>::with_request(3);
    let item_deadline = deadline.clone();
    source
        .clone()
        .timeout_with_fallback(never::<()>(), move |_| item_deadline.clone(), range(100, 10))
        .subscribe(ts.clone());
    source.on_next(1);

    // Act
    deadline.on_next(());

    // Assert
    ts.assert_values(&[1, 100, 101]).assert_not_terminated();
    assert!(!source.has_downstreams());

    // Act
    ts.request(10);

    // Assert
    ts.assert_value_count(11)
        .assert_complete()
        .assert_no_violations();
}

#[test]
fn test_timeout_cancel_releases_main_and_deadline() {
    // Arrange
    let source = DirectProcessor::<i32>::new();
    let deadline = DirectProcessor::<()>::new();
    let ts = TestSubscriber::<i32>::new();
    source
        .clone()
        .timeout(deadline.clone(), |_| never::<()>())
        .subscribe(ts.clone());
    assert!(source.has_downstreams());
    assert!(deadline.has_downstreams());

    // Act
    ts.cancel();

    // Assert
    assert!(!source.has_downstreams());
    assert!(!deadline.has_downstreams());
    ts.assert_not_terminated();
}

#[test]
fn test_timeout_rearms_after_every_item() {
    // Arrange
    let source = DirectProcessor::<i32>::new();
    let deadlines = DirectProcessor::<()>::new();
    let ts = TestSubscriber::<i32>::new();
    let item_deadline = deadlines.clone();
    source
        .clone()
        .timeout(never::<()>(), move |_| item_deadline.clone())
        .subscribe(ts.clone());

    // Act
    source.on_next(1);
    source.on_next(2);
    source.on_next(3);

    // Assert
    assert_eq!(deadlines.downstream_count(), 1);
    ts.assert_values(&[1, 2, 3]).assert_not_terminated();

    // Act
    deadlines.on_next(());

    // Assert
    ts.assert_error_matches(RivuletError::is_timeout);
    assert!(!source.has_downstreams());
}
