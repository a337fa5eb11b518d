//! Queue and dispatcher tests
//!
//! Priority ordering, capacity, drain, concurrency, rate limiting, failure
//! isolation, shutdown and history.

mod dispatch;
mod drain;

use std::sync::Arc;

use cmdmux_core::{CommandExecutor, Dispatcher, DispatcherSettings, EventBus};

/// Dispatcher with no rate limit and the given concurrency
pub fn dispatcher(concurrency: usize, executor: Arc<dyn CommandExecutor>) -> (Dispatcher, EventBus) {
    dispatcher_with(
        DispatcherSettings {
            concurrency,
            rate_limit: f64::INFINITY,
            ..DispatcherSettings::default()
        },
        executor,
    )
}

pub fn dispatcher_with(
    settings: DispatcherSettings,
    executor: Arc<dyn CommandExecutor>,
) -> (Dispatcher, EventBus) {
    let bus = EventBus::new();
    let dispatcher = Dispatcher::start(settings, executor, bus.sender());
    (dispatcher, bus)
}
