//! Dispatcher - bounded-concurrency worker loop over the command queue
//!
//! A single loop task waits for work, takes a rate-limiter token, pops the
//! highest-priority command and hands it to the executor on a tracked task.
//! When a command settles its history entry is recorded, its ticket is
//! resolved, and the queue is told one slot is free (which also releases
//! drain waiters once everything is idle).
//!
//! A failing or panicking executor only fails its own command.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::domain::{CommandId, CommandOutcome, CommandOutput, CommandPayload, DomainEvent};
use crate::error::CommandError;
use crate::event_bus::EventSender;
use crate::history::{truncate, HistoryEntry, RingHistoryBuffer};
use crate::queue::{CommandTicket, PriorityCommandQueue, QueuedItem};
use crate::rate_limiter::RateLimiter;

/// Exit code recorded when the executor failed instead of returning output
pub const EXECUTION_FAILED_EXIT_CODE: i32 = -1;

/// Runs a command payload. Supplied by the surrounding shell.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, payload: CommandPayload) -> anyhow::Result<CommandOutput>;
}

/// Adapter turning an async closure into a [`CommandExecutor`]
pub struct FnExecutor<F>(pub F);

#[async_trait]
impl<F, Fut> CommandExecutor for FnExecutor<F>
where
    F: Fn(CommandPayload) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<CommandOutput>> + Send,
{
    async fn execute(&self, payload: CommandPayload) -> anyhow::Result<CommandOutput> {
        (self.0)(payload).await
    }
}

/// Limits the dispatcher runs under
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub max_queue_size: usize,
    pub concurrency: usize,
    pub rate_limit: f64,
    pub max_history_size: usize,
    pub max_stdout_len: usize,
    pub max_stderr_len: usize,
}

impl From<&OrchestratorConfig> for DispatcherSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_queue_size: config.max_queue_size,
            concurrency: config.concurrency,
            rate_limit: config.rate_limit,
            max_history_size: config.max_history_size,
            max_stdout_len: config.max_stdout_len,
            max_stderr_len: config.max_stderr_len,
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

/// State shared between the loop task and execution tasks
struct Worker {
    queue: Arc<PriorityCommandQueue>,
    limiter: RateLimiter,
    executor: Arc<dyn CommandExecutor>,
    history: Arc<Mutex<RingHistoryBuffer>>,
    events: EventSender,
    settings: DispatcherSettings,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

/// Owns the queue and the worker loop
pub struct Dispatcher {
    worker: Arc<Worker>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Create the queue and spawn the worker loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        settings: DispatcherSettings,
        executor: Arc<dyn CommandExecutor>,
        events: EventSender,
    ) -> Self {
        let settings = DispatcherSettings {
            concurrency: settings.concurrency.max(1),
            ..settings
        };
        let worker = Arc::new(Worker {
            queue: Arc::new(PriorityCommandQueue::new(
                settings.max_queue_size,
                events.clone(),
            )),
            limiter: RateLimiter::new(settings.rate_limit),
            executor,
            history: Arc::new(Mutex::new(RingHistoryBuffer::new(settings.max_history_size))),
            events,
            settings,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        });

        info!(
            concurrency = worker.settings.concurrency,
            max_queue_size = worker.settings.max_queue_size,
            rate_limit = worker.settings.rate_limit,
            "[Dispatcher] Starting worker loop"
        );
        let loop_handle = tokio::spawn(Arc::clone(&worker).run());

        Self {
            worker,
            loop_handle: Mutex::new(Some(loop_handle)),
        }
    }

    /// Queue a command. See [`PriorityCommandQueue::enqueue`].
    pub fn submit(&self, payload: CommandPayload, priority: i32) -> Result<CommandTicket, CommandError> {
        self.worker.queue.enqueue(payload, priority)
    }

    /// Cancel a command that has not started. See [`PriorityCommandQueue::try_cancel`].
    pub fn try_cancel(&self, id: CommandId) -> bool {
        self.worker.queue.try_cancel(id)
    }

    /// Wait until no command is pending or running
    pub async fn drain(&self) {
        self.worker.queue.drain().await
    }

    pub fn queue(&self) -> &Arc<PriorityCommandQueue> {
        &self.worker.queue
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.worker.settings
    }

    /// History snapshot, oldest first
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.worker.history.lock().entries()
    }

    pub fn running(&self) -> usize {
        self.worker.queue.running()
    }

    pub fn is_shut_down(&self) -> bool {
        self.worker.shutdown.is_cancelled()
    }

    /// Stop the loop, cancel pending commands and wait for running ones.
    pub async fn shutdown(&self) {
        if self.worker.shutdown.is_cancelled() {
            return;
        }
        self.worker.shutdown.cancel();

        let cancelled = self.worker.queue.close();
        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "[Dispatcher] Worker loop ended abnormally");
            }
        }

        self.worker.tracker.close();
        self.worker.tracker.wait().await;
        info!(cancelled, "[Dispatcher] Shut down");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.worker.shutdown.cancel();
    }
}

impl Worker {
    async fn run(self: Arc<Self>) {
        let concurrency = self.settings.concurrency;
        loop {
            if !self.queue.has_ready(concurrency) {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = self.queue.notified() => continue,
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.limiter.acquire() => {}
            }

            // The command may have been cancelled while we waited for a token.
            let Some(item) = self.queue.next_ready(concurrency) else {
                self.limiter.release();
                continue;
            };

            let worker = Arc::clone(&self);
            self.tracker.spawn(async move { worker.execute(item).await });
        }
        debug!("[Dispatcher] Worker loop stopped");
    }

    async fn execute(&self, item: QueuedItem) {
        let QueuedItem {
            id,
            payload,
            enqueued_at,
            sink,
            ..
        } = item;
        let name = payload.name.clone();

        let waited = enqueued_at.elapsed();
        debug!(command_id = %id, command = %name, waited_ms = waited.as_millis() as u64, "[Dispatcher] Starting command");
        self.events.emit(DomainEvent::CommandStarted {
            command_id: id,
            name: name.clone(),
            waited_ms: waited.as_millis() as u64,
        });

        let started = Instant::now();
        let result = AssertUnwindSafe(self.executor.execute(payload))
            .catch_unwind()
            .await;
        let duration = started.elapsed();

        let result = match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(format!("{:#}", err)),
            Err(panic) => Err(panic_message(panic.as_ref())),
        };

        let (entry, outcome, settled) = match result {
            Ok(output) => {
                debug!(command_id = %id, command = %name, exit_code = output.exit_code, "[Dispatcher] Command completed");
                let entry = HistoryEntry {
                    command_id: id,
                    command: name.clone(),
                    stdout: truncate(&output.stdout, self.settings.max_stdout_len),
                    stderr: truncate(&output.stderr, self.settings.max_stderr_len),
                    exit_code: output.exit_code,
                    error: None,
                    duration,
                    timestamp: Utc::now(),
                };
                let outcome = CommandOutcome::Completed {
                    exit_code: output.exit_code,
                };
                (entry, outcome, Ok(output))
            }
            Err(message) => {
                warn!(command_id = %id, command = %name, error = %message, "[Dispatcher] Command failed");
                let entry = HistoryEntry {
                    command_id: id,
                    command: name.clone(),
                    stdout: String::new(),
                    stderr: truncate(&message, self.settings.max_stderr_len),
                    exit_code: EXECUTION_FAILED_EXIT_CODE,
                    error: Some(message.clone()),
                    duration,
                    timestamp: Utc::now(),
                };
                let outcome = CommandOutcome::Failed {
                    error: message.clone(),
                };
                (entry, outcome, Err(CommandError::Execution { id, message }))
            }
        };

        self.history.lock().push(entry);
        self.events.emit(DomainEvent::CommandCompleted {
            command_id: id,
            name,
            outcome,
            duration_ms: duration.as_millis() as u64,
        });
        let _ = sink.send(settled);

        self.queue.complete();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("executor panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("executor panicked: {}", s)
    } else {
        "executor panicked".to_string()
    }
}
