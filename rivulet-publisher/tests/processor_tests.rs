// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use rivulet_core::{Publisher, Subscriber};
use rivulet_publisher::{DirectProcessor, UnicastProcessor};
use rivulet_test_utils::{forced_failure, TestSubscriber};

#[test]
fn test_direct_processor_multicasts() {
    // Arrange
    let processor = DirectProcessor::<i32>::new();
    let first = TestSubscriber::<i32>::new();
    let second = TestSubscriber::<i32>::new();
    processor.subscribe(first.clone());
    processor.subscribe(second.clone());

    // Act
    processor.on_next(1);
    processor.on_next(2);
    processor.on_complete();

    // Assert
    first.assert_values(&[1, 2]).assert_complete();
    second.assert_values(&[1, 2]).assert_complete();
    assert!(!processor.has_downstreams());
}

#[test]
fn test_direct_processor_cancel_removes_downstream() {
    // Arrange
    let processor = DirectProcessor::<i32>::new();
    let ts = TestSubscriber::<i32>::new();
    processor.subscribe(ts.clone());
    assert!(processor.has_downstreams());

    // Act
    ts.cancel();

    // Assert
    assert!(!processor.has_downstreams());
}

#[test]
fn test_direct_processor_without_demand_fails_subscriber() {
    // Arrange
    let processor = DirectProcessor::<i32>::new();
    let hungry = TestSubscriber::<i32>::new();
    let idle = TestSubscriber::<i32>::with_request(0);
    processor.subscribe(hungry.clone());
    processor.subscribe(idle.clone());

    // Act
    processor.on_next(1);

    // Assert
    hungry.assert_values(&[1]).assert_not_terminated();
    idle.assert_no_values()
        .assert_error_matches(|e| e.is_contract_violation());
    assert_eq!(processor.downstream_count(), 1);
}

#[test]
fn test_direct_processor_late_subscriber_gets_terminal_only() {
    let processor = DirectProcessor::<i32>::new();
    processor.on_error(forced_failure());

    let ts = TestSubscriber::<i32>::new();
    processor.subscribe(ts.clone());

    ts.assert_no_values()
        .assert_error_message("Stream processing error: forced failure");
}

#[test]
fn test_unicast_processor_replays_buffer() {
    // Arrange
    let processor = UnicastProcessor::<i32>::new();
    processor.on_next(1);
    processor.on_next(2);
    processor.on_complete();

    // Act
    let ts = TestSubscriber::<i32>::with_request(1);
    processor.subscribe(ts.clone());

    // Assert
    ts.assert_values(&[1]).assert_not_complete();
    ts.request(1);
    ts.assert_values(&[1, 2]).assert_complete();
}

#[test]
fn test_unicast_processor_rejects_second_subscriber() {
    let processor = UnicastProcessor::<i32>::new();
    let first = TestSubscriber::<i32>::new();
    let second = TestSubscriber::<i32>::new();

    processor.subscribe(first.clone());
    processor.subscribe(second.clone());

    first.assert_not_terminated();
    second.assert_error_message("Stream processing error: UnicastProcessor allows only a single subscriber");
}

#[test]
fn test_unicast_processor_bounded_overflow() {
    let processor = UnicastProcessor::<i32>::with_capacity(1);
    let ts = TestSubscriber::<i32>::with_request(0);
    processor.subscribe(ts.clone());

    processor.on_next(1);
    processor.on_next(2);

    ts.request(5);
    ts.assert_values(&[1])
        .assert_error_matches(|e| e.is_contract_violation());
}
