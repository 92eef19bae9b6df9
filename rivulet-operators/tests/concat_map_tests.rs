// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use rivulet_core::{Flux, FusionMode, Publisher, Subscriber};
use rivulet_error::RivuletError;
use rivulet_operators::{ConcatMapConfig, ConcatMapExt, ErrorMode};
use rivulet_publisher::{empty, error, just, range, DirectProcessor, MapExt, UnicastProcessor};
use rivulet_test_utils::{forced_failure, ProbePublisher, TestSubscriber};

const FORCED: &str = "Stream processing error: forced failure";

fn with_mode(mode: ErrorMode) -> ConcatMapConfig {
    ConcatMapConfig::default().with_error_mode(mode)
}

/// Outer processor plus two inner processors selected by the outer value.
struct Processors {
    outer: DirectProcessor<i32>,
    first: DirectProcessor<i32>,
    second: DirectProcessor<i32>,
}

impl Processors {
    fn subscribe(mode: ErrorMode, ts: &std::sync::Arc<TestSubscriber<i32>>) -> anyhow::Result<Self> {
        let processors = Self {
            outer: DirectProcessor::new(),
            first: DirectProcessor::new(),
            second: DirectProcessor::new(),
        };
        let (first, second) = (processors.first.clone(), processors.second.clone());
        processors
            .outer
            .clone()
            .concat_map_with(
                move |v| if v == 1 { first.clone() } else { second.clone() },
                with_mode(mode),
            )?
            .subscribe(ts.clone());
        Ok(processors)
    }

    fn assert_released(&self) {
        assert!(!self.first.has_downstreams(), "first inner still subscribed");
        assert!(!self.second.has_downstreams(), "second inner still subscribed");
    }
}

#[test]
fn test_concat_map_keeps_inner_order() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 2).concat_map(|v| range(v, 2)).subscribe(ts.clone());

    // Assert
    ts.assert_values(&[1, 2, 2, 3])
        .assert_no_error()
        .assert_complete();
}

#[test]
fn test_concat_map_keeps_inner_order_with_hidden_outer() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 2)
        .hide()
        .concat_map(|v| range(v, 2))
        .subscribe(ts.clone());

    // Assert
    ts.assert_values(&[1, 2, 2, 3]).assert_complete();
}

#[test]
fn test_concat_map_boundary_mode_without_errors() -> anyhow::Result<()> {
    // Arrange
    let fused = TestSubscriber::<i32>::new();
    let hidden = TestSubscriber::<i32>::new();

    // Act
    range(1, 2)
        .concat_map_with(|v| range(v, 2), with_mode(ErrorMode::Boundary))?
        .subscribe(fused.clone());
    range(1, 2)
        .hide()
        .concat_map_with(|v| range(v, 2), with_mode(ErrorMode::Boundary))?
        .subscribe(hidden.clone());

    // Assert
    fused.assert_values(&[1, 2, 2, 3]).assert_complete();
    hidden.assert_values(&[1, 2, 2, 3]).assert_complete();
    Ok(())
}

#[test]
fn test_concat_map_long_run() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 1000)
        .concat_map(|v| range(v, 1000))
        .subscribe(ts.clone());

    // Assert
    ts.assert_value_count(1_000_000)
        .assert_no_error()
        .assert_complete();
}

#[test]
fn test_concat_map_long_run_of_just_with_hidden_outer() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 100_000)
        .hide()
        .concat_map(just)
        .subscribe(ts.clone());

    // Assert
    ts.assert_value_count(100_000).assert_complete();
    assert_eq!(ts.values(), (1..=100_000).collect::<Vec<_>>());
}

#[test]
fn test_concat_map_subscribes_one_inner_at_a_time() -> anyhow::Result<()> {
    // Arrange
    let ts = TestSubscriber::<i32>::new();
    let p = Processors::subscribe(ErrorMode::Immediate, &ts)?;
    ts.assert_no_values().assert_not_terminated();

    // Act
    p.outer.on_next(1);
    p.outer.on_next(2);

    // Assert
    assert!(p.first.has_downstreams());
    assert!(!p.second.has_downstreams());

    // Act
    p.first.on_next(1);
    p.second.on_next(10);
    p.first.on_complete();
    p.outer.on_complete();
    p.second.on_next(2);
    p.second.on_complete();

    // Assert
    ts.assert_values(&[1, 2]).assert_no_error().assert_complete();
    p.assert_released();
    Ok(())
}

#[test]
fn test_concat_map_boundary_subscribes_one_inner_at_a_time() -> anyhow::Result<()> {
    // Arrange
    let ts = TestSubscriber::<i32>::new();
    let p = Processors::subscribe(ErrorMode::Boundary, &ts)?;

    // Act
    p.outer.on_next(1);

    // Assert
    assert!(p.first.has_downstreams());
    assert!(!p.second.has_downstreams());

    // Act
    p.first.on_next(1);
    p.second.on_next(10);
    p.first.on_complete();
    p.outer.on_next(2);
    p.outer.on_complete();
    p.second.on_next(2);
    p.second.on_complete();

    // Assert
    ts.assert_values(&[1, 2]).assert_complete();
    p.assert_released();
    Ok(())
}

#[test]
fn test_concat_map_immediate_outer_error_preempts_active_inner() -> anyhow::Result<()> {
    // Arrange
    let ts = TestSubscriber::<i32>::new();
    let p = Processors::subscribe(ErrorMode::Immediate, &ts)?;
    p.outer.on_next(1);
    p.first.on_next(1);

    // Act
    p.outer.on_error(forced_failure());

    // Assert
    ts.assert_values(&[1])
        .assert_error_message(FORCED)
        .assert_not_complete();
    p.assert_released();
    Ok(())
}

#[test]
fn test_concat_map_boundary_outer_error_waits_for_active_inner() -> anyhow::Result<()> {
    // Arrange
    let ts = TestSubscriber::<i32>::new();
    let p = Processors::subscribe(ErrorMode::Boundary, &ts)?;
    p.outer.on_next(1);
    p.first.on_next(1);

    // Act
    p.outer.on_error(forced_failure());

    // Assert
    ts.assert_values(&[1]).assert_no_error().assert_not_complete();

    // Act
    p.first.on_next(2);
    p.first.on_complete();

    // Assert
    ts.assert_values(&[1, 2])
        .assert_error_message(FORCED)
        .assert_not_complete();
    p.assert_released();
    Ok(())
}

#[test]
fn test_concat_map_boundary_inner_error_after_outer_error_terminates() -> anyhow::Result<()> {
    // Arrange
    let ts = TestSubscriber::<i32>::new();
    let p = Processors::subscribe(ErrorMode::Boundary, &ts)?;
    p.outer.on_next(1);
    p.first.on_next(1);
    p.outer.on_error(RivuletError::stream_error("outer"));
    ts.assert_not_terminated();

    // Act
    p.first.on_error(RivuletError::stream_error("inner"));

    // Assert
    ts.assert_values(&[1])
        .assert_terminated()
        .assert_error_message("Stream processing error: outer")
        .assert_not_complete()
        .assert_no_violations();
    p.assert_released();
    Ok(())
}

#[test]
fn test_concat_map_inner_error_is_immediate_in_both_immediate_and_boundary() -> anyhow::Result<()>
{
    for mode in [ErrorMode::Immediate, ErrorMode::Boundary] {
        // Arrange
        let ts = TestSubscriber::<i32>::new();
        let p = Processors::subscribe(mode, &ts)?;
        p.outer.on_next(1);
        p.first.on_next(1);

        // Act
        p.first.on_error(forced_failure());

        // Assert
        ts.assert_values(&[1])
            .assert_error_message(FORCED)
            .assert_not_complete();
        p.assert_released();
        assert!(!p.outer.has_downstreams());
    }
    Ok(())
}

#[test]
fn test_concat_map_end_mode_continues_after_inner_error() -> anyhow::Result<()> {
    // Arrange
    let ts = TestSubscriber::<i32>::new();
    let p = Processors::subscribe(ErrorMode::End, &ts)?;
    p.outer.on_next(1);
    p.first.on_next(1);

    // Act
    p.first.on_error(forced_failure());
    p.outer.on_next(2);

    // Assert
    assert!(p.second.has_downstreams());
    ts.assert_not_terminated();

    // Act
    p.second.on_next(2);
    p.second.on_complete();
    p.outer.on_complete();

    // Assert
    ts.assert_values(&[1, 2])
        .assert_error_message(FORCED)
        .assert_not_complete();
    p.assert_released();
    Ok(())
}

#[test]
fn test_concat_map_end_mode_composes_errors_outer_first() -> anyhow::Result<()> {
    // Arrange
    let ts = TestSubscriber::<i32>::new();
    let p = Processors::subscribe(ErrorMode::End, &ts)?;
    p.outer.on_next(1);
    p.first.on_error(RivuletError::stream_error("inner"));
    p.outer.on_next(2);

    // Act
    p.outer.on_error(RivuletError::stream_error("outer"));
    p.second.on_next(2);
    p.second.on_complete();

    // Assert
    ts.assert_values(&[2]).assert_error_matches(|error| match error {
        RivuletError::MultipleErrors { count, errors } => {
            *count == 2
                && errors[0].to_string() == "Stream processing error: outer"
                && errors[1].to_string() == "Stream processing error: inner"
        }
        _ => false,
    });
    Ok(())
}

#[test]
fn test_concat_map_end_mode_skips_failed_mapping() -> anyhow::Result<()> {
    // Arrange
    let ts = TestSubscriber::<i32>::new();
    let config = with_mode(ErrorMode::End);

    // Act
    range(1, 4)
        .try_concat_map_with(
            |v| {
                if v == 2 {
                    Err(forced_failure())
                } else {
                    Ok(Some(just(v)))
                }
            },
            config,
        )?
        .subscribe(ts.clone());

    // Assert
    ts.assert_values(&[1, 3, 4])
        .assert_error_message(FORCED)
        .assert_not_complete();
    Ok(())
}

#[test]
fn test_concat_map_sync_fused_null_item_fails_in_every_mode() -> anyhow::Result<()> {
    for mode in [ErrorMode::Immediate, ErrorMode::Boundary, ErrorMode::End] {
        // Arrange
        let ts = TestSubscriber::<i32>::new();

        // Act
        range(1, 2)
            .try_map(|v| Ok((v != 2).then_some(v)))
            .concat_map_with(just, with_mode(mode))?
            .subscribe(ts.clone());

        // Assert
        ts.assert_values(&[1])
            .assert_error_matches(|e| matches!(e, RivuletError::NullValue { .. }))
            .assert_not_complete();
    }
    Ok(())
}

#[test]
fn test_concat_map_sync_fused_null_item_through_filter() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 2)
        .try_map(|v| Ok((v != 2).then_some(v)))
        .filter(|_| true)
        .concat_map(just)
        .subscribe(ts.clone());

    // Assert
    ts.assert_values(&[1])
        .assert_error_matches(RivuletError::is_contract_violation)
        .assert_not_complete();
}

#[test]
fn test_concat_map_async_fused_null_item_fails() {
    // Arrange
    let up = UnicastProcessor::<i32>::with_capacity(2);
    up.on_next(1);
    up.on_next(2);
    up.on_complete();
    let ts = TestSubscriber::<i32>::new();

    // Act
    up.try_map(|v| Ok((v != 2).then_some(v)))
        .concat_map(just)
        .subscribe(ts.clone());

    // Assert
    ts.assert_values(&[1])
        .assert_error_matches(|e| matches!(e, RivuletError::NullValue { .. }))
        .assert_not_complete();
}

#[test]
fn test_concat_map_async_fused_null_item_through_filter_fails() {
    // Arrange
    let up = UnicastProcessor::<i32>::with_capacity(2);
    up.on_next(1);
    up.on_next(2);
    up.on_complete();
    let ts = TestSubscriber::<i32>::new();

    // Act
    up.try_map(|v| Ok((v != 2).then_some(v)))
        .filter(|_| true)
        .concat_map(just)
        .subscribe(ts.clone());

    // Assert
    ts.assert_values(&[1])
        .assert_error_matches(RivuletError::is_contract_violation)
        .assert_not_complete();
}

#[test]
fn test_concat_map_mapper_returning_none_fails() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    range(1, 3)
        .try_concat_map(|v| Ok((v != 2).then(|| just(v))))
        .subscribe(ts.clone());

    // Assert
    ts.assert_values(&[1])
        .assert_error_matches(|e| matches!(e, RivuletError::NullValue { .. }));
}

#[test]
fn test_concat_map_scalar_and_range_backpressured() {
    // Arrange
    let ts = TestSubscriber::<i32>::with_request(0);
    let sources: Vec<Flux<i32>> = vec![just(1), range(2, 3)];
    range(0, 2)
        .concat_map(move |v| sources[v as usize].clone())
        .subscribe(ts.clone());
    ts.assert_no_values().assert_no_error();

    // Act
    ts.request(5);

    // Assert
    ts.assert_values(&[1, 2, 3, 4])
        .assert_complete()
        .assert_no_error()
        .assert_no_violations();
}

#[test]
fn test_concat_map_all_empty_inners_complete_without_demand() -> anyhow::Result<()> {
    // Arrange
    let ts = TestSubscriber::<i32>::with_request(0);
    let config = ConcatMapConfig::default().with_prefetch(2);

    // Act
    range(0, 10)
        .hide()
        .concat_map_with(|_| empty::<i32>(), config)?
        .subscribe(ts.clone());

    // Assert
    ts.assert_no_values().assert_no_error().assert_complete();
    Ok(())
}

#[test]
fn test_concat_map_delivers_no_more_than_requested() {
    // Arrange
    let ts = TestSubscriber::<i32>::with_request(3);

    // Act
    range(0, 5)
        .hide()
        .concat_map(|v| range(v * 10, 5).hide())
        .subscribe(ts.clone());

    // Assert
    ts.assert_values(&[0, 1, 2]).assert_not_terminated();

    // Act
    ts.request(4);

    // Assert
    ts.assert_values(&[0, 1, 2, 3, 4, 10, 11])
        .assert_not_terminated()
        .assert_no_violations();
}

#[test]
fn test_concat_map_outer_error_without_items() {
    // Arrange
    let ts = TestSubscriber::<i32>::new();

    // Act
    error::<i32>(forced_failure())
        .concat_map(just)
        .subscribe(ts.clone());

    // Assert
    ts.assert_no_values().assert_error_message(FORCED);
}

#[test]
fn test_concat_map_replenishes_hidden_outer_in_batches() {
    // Arrange
    let probe = ProbePublisher::new(range(0, 20).hide());
    let stats = probe.stats();
    let ts = TestSubscriber::<i32>::new();

    // Act
    probe.concat_map(just).subscribe(ts.clone());

    // Assert
    ts.assert_value_count(20).assert_complete();
    assert_eq!(stats.requests()[0], 32);
}

#[test]
fn test_concat_map_cancel_releases_active_inner() -> anyhow::Result<()> {
    // Arrange
    let ts = TestSubscriber::<i32>::new();
    let p = Processors::subscribe(ErrorMode::Immediate, &ts)?;
    p.outer.on_next(1);
    assert!(p.first.has_downstreams());

    // Act
    ts.cancel();

    // Assert
    p.assert_released();
    assert!(!p.outer.has_downstreams());
    ts.assert_not_terminated();
    Ok(())
}

#[test]
fn test_concat_map_fused_consumer_sees_plain_sequence() {
    // Arrange
    let ts = TestSubscriber::<i32>::fused(FusionMode::Any);

    // Act
    range(1, 3).concat_map(|v| just(v * 2)).subscribe(ts.clone());

    // Assert
    ts.assert_fusion_mode(FusionMode::None)
        .assert_values(&[2, 4, 6])
        .assert_complete();
}

#[test]
fn test_concat_map_rejects_zero_prefetch() {
    // Arrange
    let config = ConcatMapConfig::default().with_prefetch(0);

    // Act
    let result = range(1, 3).concat_map_with(just, config);

    // Assert
    assert!(matches!(result, Err(RivuletError::InvalidArgument { .. })));
}
