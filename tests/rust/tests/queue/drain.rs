//! Drain semantics

use std::time::Duration;

use cmdmux_core::CommandPayload;
use futures::FutureExt;
use tests::async_helpers::{with_timeout, DEFAULT_TIMEOUT};
use tests::GatedExecutor;

use super::dispatcher;

#[tokio::test]
async fn test_drain_on_idle_dispatcher_returns_immediately() {
    let (dispatcher, _bus) = dispatcher(2, GatedExecutor::new());

    assert!(dispatcher.drain().now_or_never().is_some());
}

#[tokio::test]
async fn test_drain_waits_for_running_commands() {
    let executor = GatedExecutor::new();
    let (dispatcher, _bus) = dispatcher(2, executor.clone());

    dispatcher.submit(CommandPayload::new("a"), 0).unwrap();
    dispatcher.submit(CommandPayload::new("b"), 0).unwrap();
    executor.wait_started(2).await;

    let drain = dispatcher.drain();
    tokio::pin!(drain);
    assert!(futures::poll!(drain.as_mut()).is_pending());

    executor.release("a");
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(futures::poll!(drain.as_mut()).is_pending());

    executor.release("b");
    with_timeout(DEFAULT_TIMEOUT, drain).await;
    assert!(dispatcher.queue().is_idle());
}

#[tokio::test]
async fn test_multiple_drain_waiters_resolve_together() {
    let executor = GatedExecutor::new();
    let (dispatcher, _bus) = dispatcher(1, executor.clone());

    dispatcher.submit(CommandPayload::new("slow"), 0).unwrap();
    dispatcher.submit(CommandPayload::new("next"), 0).unwrap();
    executor.wait_started(1).await;

    let waiters = futures::future::join3(dispatcher.drain(), dispatcher.drain(), dispatcher.drain());
    let release = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        executor.release_all();
    };

    with_timeout(DEFAULT_TIMEOUT, futures::future::join(waiters, release)).await;
    assert_eq!(executor.started(), vec!["slow", "next"]);
}

#[tokio::test]
async fn test_cancelling_the_last_pending_command_releases_drain() {
    let executor = GatedExecutor::new();
    let (dispatcher, _bus) = dispatcher(1, executor.clone());

    dispatcher.submit(CommandPayload::new("running"), 0).unwrap();
    let pending = dispatcher.submit(CommandPayload::new("pending"), 0).unwrap();
    executor.wait_started(1).await;

    // Still counted as running until the worker observes the release
    executor.release("running");
    assert!(dispatcher.try_cancel(pending.id()));

    with_timeout(DEFAULT_TIMEOUT, dispatcher.drain()).await;
    assert_eq!(executor.started(), vec!["running"]);
}
