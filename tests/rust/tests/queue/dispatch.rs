//! Concurrency, rate limiting, failures, shutdown and history

use std::sync::Arc;
use std::time::Duration;

use cmdmux_core::{
    CommandError, CommandOutcome, CommandPayload, DispatcherSettings, DomainEvent,
    EXECUTION_FAILED_EXIT_CODE,
};
use pretty_assertions::assert_eq;
use tests::async_helpers::{with_timeout, DEFAULT_TIMEOUT};
use tests::events::{started_order, RecordingSubscriber};
use tests::{GatedExecutor, RecordingExecutor};
use tokio::time::Instant;

use super::{dispatcher, dispatcher_with};

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let executor = GatedExecutor::new();
    let (dispatcher, _bus) = dispatcher(2, executor.clone());

    let tickets: Vec<_> = (0..5)
        .map(|i| dispatcher.submit(CommandPayload::new(format!("job-{}", i)), 0).unwrap())
        .collect();

    executor.wait_started(2).await;
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert_eq!(executor.started(), vec!["job-0", "job-1"]);
    assert_eq!(dispatcher.running(), 2);
    assert_eq!(dispatcher.queue().len(), 3);

    executor.release("job-0");
    let started = executor.wait_started(3).await;
    assert_eq!(started[2], "job-2");

    executor.release_all();
    for ticket in tickets {
        with_timeout(DEFAULT_TIMEOUT, ticket).await.unwrap();
    }
    assert_eq!(executor.max_running(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_bounds_starts_per_window() {
    let executor = RecordingExecutor::new();
    let (dispatcher, _bus) = dispatcher_with(
        DispatcherSettings {
            concurrency: 20,
            rate_limit: 5.0,
            ..DispatcherSettings::default()
        },
        executor.clone(),
    );

    let begin = Instant::now();
    for i in 0..20 {
        dispatcher.submit(CommandPayload::new(format!("tick-{}", i)), 0).unwrap();
    }
    dispatcher.drain().await;

    let starts = executor.start_times();
    assert_eq!(starts.len(), 20);

    // rate * window + burst
    let first_second = starts
        .iter()
        .filter(|t| t.duration_since(begin) <= Duration::from_secs(1))
        .count();
    assert!(first_second <= 10, "{} starts in the first second", first_second);
    assert!(first_second >= 5, "burst should start immediately");

    // 5 burst tokens, then 15 more at 5/s
    assert!(begin.elapsed() >= Duration::from_millis(2_900));
}

#[tokio::test(start_paused = true)]
async fn test_sustained_rate_spaces_starts() {
    let executor = RecordingExecutor::new();
    let (dispatcher, _bus) = dispatcher_with(
        DispatcherSettings {
            concurrency: 4,
            rate_limit: 1.0,
            ..DispatcherSettings::default()
        },
        executor.clone(),
    );

    for name in ["a", "b", "c"] {
        dispatcher.submit(CommandPayload::new(name), 0).unwrap();
    }
    dispatcher.drain().await;

    let starts = executor.start_times();
    for pair in starts.windows(2) {
        assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(990));
    }
}

#[tokio::test]
async fn test_failure_does_not_stop_the_queue() {
    let executor = RecordingExecutor::new();
    executor.fail_on("bad");
    let (dispatcher, _bus) = dispatcher(1, executor.clone());

    let good = dispatcher.submit(CommandPayload::new("good"), 0).unwrap();
    let bad = dispatcher.submit(CommandPayload::new("bad"), 0).unwrap();
    let after = dispatcher.submit(CommandPayload::new("after"), 0).unwrap();

    assert_eq!(good.await.unwrap().stdout, "good");
    match bad.await {
        Err(CommandError::Execution { message, .. }) => assert!(message.contains("bad exploded")),
        other => panic!("expected execution error, got {:?}", other),
    }
    assert_eq!(after.await.unwrap().stdout, "after");

    dispatcher.drain().await;
    let history = dispatcher.history();
    let failed = history.iter().find(|e| e.command == "bad").unwrap();
    assert_eq!(failed.exit_code, EXECUTION_FAILED_EXIT_CODE);
    assert!(failed.error.as_deref().unwrap().contains("bad exploded"));
    assert!(failed.stderr.contains("bad exploded"));
}

#[tokio::test]
async fn test_history_keeps_latest_entries() {
    let executor = RecordingExecutor::new();
    let (dispatcher, _bus) = dispatcher_with(
        DispatcherSettings {
            concurrency: 1,
            rate_limit: f64::INFINITY,
            max_history_size: 3,
            ..DispatcherSettings::default()
        },
        executor,
    );

    for i in 0..5 {
        dispatcher.submit(CommandPayload::new(format!("h{}", i)), 0).unwrap();
    }
    dispatcher.drain().await;

    let names: Vec<String> = dispatcher.history().into_iter().map(|e| e.command).collect();
    assert_eq!(names, vec!["h2", "h3", "h4"]);
}

#[tokio::test]
async fn test_events_follow_command_lifecycle() {
    let executor = RecordingExecutor::new();
    let (dispatcher, bus) = dispatcher(1, executor);
    let recorder = RecordingSubscriber::new();
    bus.register(recorder.clone());

    let low = dispatcher.submit(CommandPayload::new("low"), 0).unwrap();
    let high = dispatcher.submit(CommandPayload::new("high"), 9).unwrap();
    let (low_id, high_id) = (low.id(), high.id());
    dispatcher.drain().await;

    let events = recorder.events();
    assert_eq!(started_order(&events), vec!["high", "low"]);

    for id in [low_id, high_id] {
        let lifecycle: Vec<&str> = events
            .iter()
            .filter(|e| e.command_id() == Some(id))
            .map(|e| e.type_name())
            .collect();
        assert_eq!(
            lifecycle,
            vec!["command_queued", "command_started", "command_completed"]
        );
    }

    let outcomes: Vec<CommandOutcome> = events
        .iter()
        .filter_map(|e| match e {
            DomainEvent::CommandCompleted { outcome, .. } => Some(outcome.clone()),
            _ => None,
        })
        .collect();
    assert!(outcomes.iter().all(|o| o.is_success()));
}

#[tokio::test]
async fn test_shutdown_cancels_pending_and_waits_for_running() {
    let executor = GatedExecutor::new();
    let (dispatcher, bus) = dispatcher(1, executor.clone());
    let dispatcher = Arc::new(dispatcher);
    let recorder = RecordingSubscriber::new();
    bus.register(recorder.clone());

    let running = dispatcher.submit(CommandPayload::new("running"), 0).unwrap();
    let pending_a = dispatcher.submit(CommandPayload::new("pending-a"), 0).unwrap();
    let pending_b = dispatcher.submit(CommandPayload::new("pending-b"), 0).unwrap();
    executor.wait_started(1).await;

    let shutdown = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        async move { dispatcher.shutdown().await }
    });

    assert!(matches!(pending_a.await, Err(CommandError::Cancelled { .. })));
    assert!(matches!(pending_b.await, Err(CommandError::Cancelled { .. })));
    assert!(!shutdown.is_finished());

    executor.release_all();
    with_timeout(DEFAULT_TIMEOUT, shutdown).await.unwrap();
    assert_eq!(running.await.unwrap().stdout, "running");

    assert!(dispatcher.is_shut_down());
    assert_eq!(
        dispatcher.submit(CommandPayload::new("late"), 0).unwrap_err(),
        CommandError::Closed
    );
    assert_eq!(executor.started(), vec!["running"]);

    let cancelled = recorder
        .events()
        .iter()
        .filter(|e| {
            matches!(
                e,
                DomainEvent::CommandCompleted {
                    outcome: CommandOutcome::Cancelled,
                    ..
                }
            )
        })
        .count();
    assert_eq!(cancelled, 2);
}
