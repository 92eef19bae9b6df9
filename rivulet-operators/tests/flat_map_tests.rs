// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use rivulet_core::{Flux, Publisher, Subscriber};
use rivulet_error::RivuletError;
use rivulet_operators::{FlatMapConfig, FlatMapExt};
use rivulet_publisher::{
    empty, error, from_iter, from_vec, just, range, DirectProcessor, MapExt, UnicastProcessor,
};
use rivulet_test_utils::{forced_failure, ErrorInjectingPublisher, ProbePublisher, TestSubscriber};
use std::thread;
use std::time::Duration;

const FORCED: &str = "Stream processing error: forced failure";

#[test]
fn test_flat_map_emits_every_inner_item() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 1000)
        .flat_map(|v| range(v, 2))
        .subscribe(ts.clone());

    // Assert
    ts.assert_value_count(2000)
        .assert_no_error()
        .assert_complete()
        .assert_no_violations();
}

#[test]
fn test_flat_map_honours_partial_demand() {
    // Arrange
    let ts = TestSubscriber::<i32>::with_request(0);
    range(1, 1000)
        .flat_map(|v| range(v, 2))
        .subscribe(ts.clone());
    ts.assert_no_values().assert_not_terminated();

    // Act
    ts.request(1000);

    // Assert
    ts.assert_value_count(1000).assert_not_terminated();

    // Act
    ts.request(1000);

    // Assert
    ts.assert_value_count(2000)
        .assert_complete()
        .assert_no_violations();
}

#[test]
fn test_flat_map_hidden_inners_honour_partial_demand() {
    // Arrange
    let ts = TestSubscriber::<i32>::with_request(0);
    range(1, 1000)
        .flat_map(|v| from_vec(vec![v, v + 1]).hide())
        .subscribe(ts.clone());

    // Act
    ts.request(1000);

    // Assert
    ts.assert_value_count(1000).assert_not_terminated();

    // Act
    ts.request(1000);

    // Assert
    ts.assert_value_count(2000).assert_complete();
}

#[test]
fn test_flat_map_outer_error_is_delivered() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    error::<i32>(forced_failure())
        .flat_map(just)
        .subscribe(ts.clone());

    // Assert
    ts.assert_no_values()
        .assert_error_message(FORCED)
        .assert_not_complete();
}

#[test]
fn test_flat_map_inner_error_is_delivered() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    just(1)
        .flat_map(|_| error::<i32>(forced_failure()))
        .subscribe(ts.clone());

    // Assert
    ts.assert_no_values()
        .assert_error_message(FORCED)
        .assert_not_complete();
}

#[test]
fn test_flat_map_inner_error_cancels_outer_and_siblings() {
    // Arrange
    let outer = DirectProcessor::<i32>::new();
    let healthy = DirectProcessor::<i32>::new();
    let failing = DirectProcessor::<i32>::new();
    let ts = TestSubscriber::<i32>::new();
    let (first, second) = (healthy.clone(), failing.clone());
    outer
        .clone()
        .flat_map(move |v| if v == 1 { first.clone() } else { second.clone() })
        .subscribe(ts.clone());
    outer.on_next(1);
    outer.on_next(2);
    assert!(healthy.has_downstreams());
    assert!(failing.has_downstreams());

    // Act
    healthy.on_next(10);
    failing.on_error(forced_failure());

    // Assert
    ts.assert_values(&[10]).assert_error_message(FORCED);
    assert!(!outer.has_downstreams());
    assert!(!healthy.has_downstreams());
}

#[test]
fn test_flat_map_null_inner_item_is_a_contract_violation() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 1000)
        .flat_map(|v| from_vec(vec![v]).try_map(|_| Ok(None::<i32>)))
        .subscribe(ts.clone());

    // Assert
    ts.assert_no_values()
        .assert_error_matches(|e| matches!(e, RivuletError::NullValue { .. }))
        .assert_not_complete();
}

#[test]
fn test_flat_map_mapper_returning_none_fails() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 10)
        .try_flat_map(|v| Ok(if v == 3 { None } else { Some(just(v)) }))
        .subscribe(ts.clone());

    // Assert
    ts.assert_values(&[1, 2])
        .assert_error_matches(RivuletError::is_contract_violation)
        .assert_not_complete();
}

#[test]
fn test_flat_map_mapper_error_fails() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 10)
        .try_flat_map(|v| {
            if v == 2 {
                Err(forced_failure())
            } else {
                Ok(Some(just(v)))
            }
        })
        .subscribe(ts.clone());

    // Assert
    ts.assert_values(&[1]).assert_error_message(FORCED);
}

#[test]
fn test_flat_map_empty_outer_completes() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    empty::<i32>().flat_map(just).subscribe(ts.clone());

    // Assert
    ts.assert_no_values().assert_no_error().assert_complete();
}

#[test]
fn test_flat_map_empty_inners_complete() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 1000)
        .flat_map(|_| empty::<i32>())
        .subscribe(ts.clone());

    // Assert
    ts.assert_no_values().assert_no_error().assert_complete();
}

#[test]
fn test_flat_map_of_just_backpressured() {
    // Arrange
    let ts = TestSubscriber::<i32>::with_request(0);
    range(1, 1000).flat_map(just).subscribe(ts.clone());
    ts.assert_no_values();

    // Act
    ts.request(500);

    // Assert
    ts.assert_value_count(500).assert_not_complete();

    // Act
    ts.request(501);

    // Assert
    ts.assert_value_count(1000)
        .assert_complete()
        .assert_no_violations();
}

#[test]
fn test_flat_map_of_mixed_sources_backpressured() {
    // Arrange
    let ts = TestSubscriber::<i32>::with_request(0);
    range(1, 1000)
        .flat_map(|v| {
            if v % 2 == 0 {
                just(v)
            } else {
                from_iter(vec![v])
            }
        })
        .subscribe(ts.clone());

    // Act
    ts.request(500);

    // Assert
    ts.assert_value_count(500).assert_not_complete();

    // Act
    ts.request(500);

    // Assert
    ts.assert_value_count(1000).assert_complete();
}

#[test]
fn test_flat_map_async_fused_inner_buffered_before_subscribe() {
    // Arrange
    let up = UnicastProcessor::<i32>::new();
    for i in 0..1000 {
        up.on_next(i);
    }
    up.on_complete();
    let ts = TestSubscriber::<i32>::new();

    // Act
    just(1)
        .hide()
        .flat_map(move |_| up.clone())
        .subscribe(ts.clone());

    // Assert
    ts.assert_value_count(1000).assert_no_error().assert_complete();
}

#[test]
fn test_flat_map_async_fused_inner_fed_after_subscribe() {
    // Arrange
    let up = UnicastProcessor::<i32>::new();
    let ts = TestSubscriber::<i32>::new();
    let inner = up.clone();
    just(1)
        .hide()
        .flat_map(move |_| inner.clone())
        .subscribe(ts.clone());
    ts.assert_no_values().assert_not_terminated();

    // Act
    for i in 0..1000 {
        up.on_next(i);
    }
    up.on_complete();

    // Assert
    ts.assert_value_count(1000).assert_no_error().assert_complete();
}

#[test]
fn test_flat_map_async_fused_inner_fed_from_another_thread() {
    // Arrange
    let up = UnicastProcessor::<i32>::new();
    let ts = TestSubscriber::<i32>::new();
    let inner = up.clone();
    just(1)
        .hide()
        .flat_map(move |_| inner.clone())
        .subscribe(ts.clone());

    // Act
    let producer = thread::spawn(move || {
        for i in 0..1000 {
            up.on_next(i);
        }
        up.on_complete();
    });
    producer.join().expect("producer panicked");

    // Assert
    assert!(ts.await_terminal(Duration::from_secs(5)));
    ts.assert_value_count(1000)
        .assert_complete()
        .assert_no_violations();
}

#[test]
fn test_flat_map_failing_async_inner_delivers_its_error() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    just(1)
        .flat_map(|_| ErrorInjectingPublisher::new(vec![1, 2, 3], forced_failure()))
        .subscribe(ts.clone());

    // Assert
    ts.assert_error_message(FORCED).assert_not_complete();
    assert!(ts.value_count() <= 3);
}

#[test]
fn test_flat_map_limits_active_inners() -> anyhow::Result<()> {
    // Arrange
    let outer = DirectProcessor::<usize>::new();
    let inners: Vec<_> = (0..3).map(|_| DirectProcessor::<i32>::new()).collect();
    let ts = TestSubscriber::<i32>::new();
    let lookup = inners.clone();
    outer
        .clone()
        .flat_map_with(
            move |i| lookup[i].clone(),
            FlatMapConfig::default().with_max_concurrency(2),
        )?
        .subscribe(ts.clone());

    // Act
    outer.on_next(0);
    outer.on_next(1);
    outer.on_next(2);

    // Assert
    assert!(inners[0].has_downstreams());
    assert!(inners[1].has_downstreams());
    assert!(!inners[2].has_downstreams());

    // Act
    inners[0].on_next(1);
    inners[0].on_complete();

    // Assert
    assert!(inners[2].has_downstreams());
    ts.assert_values(&[1]);

    // Act
    inners[1].on_complete();
    inners[2].on_next(3);
    inners[2].on_complete();
    outer.on_complete();

    // Assert
    ts.assert_values(&[1, 3]).assert_complete();
    Ok(())
}

#[test]
fn test_flat_map_concurrency_one_preserves_order() -> anyhow::Result<()> {
    // Arrange
    let ts = TestSubscriber::<i32>::new();
    let config = FlatMapConfig::default().with_max_concurrency(1);

    // Act
    range(0, 3)
        .flat_map_with(|v| range(v * 10, 3).hide(), config)?
        .subscribe(ts.clone());

    // Assert
    ts.assert_values(&[0, 1, 2, 10, 11, 12, 20, 21, 22])
        .assert_complete();
    Ok(())
}

#[test]
fn test_flat_map_unbounded_concurrency_requests_outer_unbounded() -> anyhow::Result<()> {
    // Arrange
    let probe = ProbePublisher::new(range(1, 100).hide());
    let stats = probe.stats();
    let ts = TestSubscriber::<i32>::new();

    // Act
    probe
        .flat_map_with(just, FlatMapConfig::unbounded())?
        .subscribe(ts.clone());

    // Assert
    assert_eq!(stats.requests(), vec![u64::MAX]);
    ts.assert_value_count(100).assert_complete();
    Ok(())
}

#[test]
fn test_flat_map_replenishes_outer_in_batches() -> anyhow::Result<()> {
    // Arrange
    let probe = ProbePublisher::new(range(1, 16).hide());
    let stats = probe.stats();
    let ts = TestSubscriber::<i32>::new();

    // Act
    probe
        .flat_map_with(
            just,
            FlatMapConfig::default()
                .with_max_concurrency(4)
                .with_outer_prefetch(4),
        )?
        .subscribe(ts.clone());

    // Assert
    ts.assert_value_count(16).assert_complete();
    let requests = stats.requests();
    assert_eq!(requests[0], 4);
    assert!(requests[1..].iter().all(|&n| n == 3));
    Ok(())
}

#[test]
fn test_flat_map_rejects_invalid_configuration() {
    // Arrange
    let config = FlatMapConfig::default().with_prefetch(0);

    // Act
    let result = range(1, 3).flat_map_with(just, config);

    // Assert
    let error = result.err().expect("zero prefetch must be rejected");
    assert!(matches!(error, RivuletError::InvalidArgument { .. }));
}

#[test]
fn test_flat_map_cancel_releases_inners() {
    // Arrange
    let inner = DirectProcessor::<i32>::new();
    let ts = TestSubscriber::<i32>::new();
    let source = inner.clone();
    just(1)
        .flat_map(move |_| source.clone())
        .subscribe(ts.clone());
    assert!(inner.has_downstreams());

    // Act
    ts.cancel();

    // Assert
    assert!(!inner.has_downstreams());
    ts.assert_not_terminated();
}

#[test]
fn test_flat_map_fused_and_hidden_sources_agree() {
    // Arrange
    let fused = TestSubscriber::<i32>::new();
    let hidden = TestSubscriber::<i32>::new();

    // Act
    range(1, 50)
        .flat_map(|v| range(v, 3))
        .subscribe(fused.clone());
    range(1, 50)
        .hide()
        .flat_map(|v| range(v, 3).hide())
        .subscribe(hidden.clone());

    // Assert
    assert_eq!(fused.values(), hidden.values());
    fused.assert_complete();
    hidden.assert_complete();
}

#[test]
fn test_flat_map_accepts_type_erased_inners() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 4)
        .flat_map(|v| -> Flux<i32> {
            if v % 2 == 0 {
                just(v)
            } else {
                empty()
            }
        })
        .subscribe(ts.clone());

    // Assert
    ts.assert_values(&[2, 4]).assert_complete();
}

#[test]
fn test_flat_map_long_run_under_unbounded_demand() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 1000)
        .flat_map(|v| range(v, 1000))
        .subscribe(ts.clone());

    // Assert
    ts.assert_value_count(1_000_000)
        .assert_no_error()
        .assert_complete();
}

#[test]
fn test_flat_map_single_inner_longer_than_prefetch() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    just(1)
        .flat_map(|_| range(0, 5000))
        .subscribe(ts.clone());

    // Assert
    ts.assert_value_count(5000).assert_complete();
}

#[test]
fn test_flat_map_round_robin_interleaves_long_inners() -> anyhow::Result<()> {
    // Arrange
    let ts = TestSubscriber::<i32>::with_request(0);
    range(0, 2)
        .flat_map_with(
            |v| range(v * 10_000, 1000),
            FlatMapConfig::default().with_prefetch(16),
        )?
        .subscribe(ts.clone());
    ts.assert_no_values().assert_not_terminated();

    // Act
    ts.request(u64::MAX);

    // Assert
    ts.assert_value_count(2000).assert_complete();
    let values = ts.values();
    let mut longest_run = 0;
    let mut run = 0;
    for pair in values.windows(2) {
        if (pair[0] < 10_000) == (pair[1] < 10_000) {
            run += 1;
        } else {
            run = 0;
        }
        longest_run = longest_run.max(run + 1);
    }
    assert!(longest_run <= 16, "an inner ran {longest_run} items in a row");
    assert!(values[..32].iter().any(|&v| v < 10_000));
    assert!(values[..32].iter().any(|&v| v >= 10_000));
    Ok(())
}

#[test]
fn test_flat_map_async_fused_inner_fed_concurrently_backpressured() {
    // Arrange
    let up = UnicastProcessor::<i32>::new();
    let ts = TestSubscriber::<i32>::with_request(0);
    let inner = up.clone();
    just(1)
        .hide()
        .flat_map(move |_| inner.clone())
        .subscribe(ts.clone());
    ts.assert_no_values().assert_not_terminated();

    // Act
    let producer = thread::spawn(move || {
        for i in 0..1000 {
            up.on_next(i);
            if i % 10 == 0 {
                thread::sleep(Duration::from_micros(50));
            }
        }
        up.on_complete();
    });
    ts.request(500);
    producer.join().expect("producer panicked");

    // Assert
    ts.assert_value_count(500)
        .assert_no_error()
        .assert_not_complete();

    // Act
    ts.request(500);

    // Assert
    assert!(ts.await_terminal(Duration::from_secs(1)));
    ts.assert_value_count(1000)
        .assert_no_error()
        .assert_complete()
        .assert_no_violations();
}

#[test]
fn test_flat_map_async_fused_inner_error_after_subscribe() {
    // Arrange
    let up = UnicastProcessor::<i32>::new();
    let ts = TestSubscriber::<i32>::new();
    let inner = up.clone();
    just(1)
        .hide()
        .flat_map(move |_| inner.clone())
        .subscribe(ts.clone());
    ts.assert_no_values().assert_no_error().assert_not_complete();

    // Act
    up.on_error(forced_failure());

    // Assert
    ts.assert_no_values()
        .assert_error_message(FORCED)
        .assert_not_complete();
}

#[test]
fn test_flat_map_async_fused_inner_completed_before_subscribe() {
    // Arrange
    let up = UnicastProcessor::<i32>::new();
    up.on_complete();
    let ts = TestSubscriber::<i32>::new();

    // Act
    just(1)
        .hide()
        .flat_map(move |_| up.clone())
        .subscribe(ts.clone());

    // Assert
    ts.assert_no_values().assert_no_error().assert_complete();
}

#[test]
fn test_flat_map_async_fused_inner_completed_after_subscribe() {
    // Arrange
    let up = UnicastProcessor::<i32>::new();
    let ts = TestSubscriber::<i32>::new();
    let inner = up.clone();
    just(1)
        .hide()
        .flat_map(move |_| inner.clone())
        .subscribe(ts.clone());
    ts.assert_no_values().assert_not_terminated();

    // Act
    up.on_complete();

    // Assert
    ts.assert_no_values().assert_no_error().assert_complete();
}
