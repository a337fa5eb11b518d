//! # CmdMux Core Library
//!
//! Command orchestration primitives for CmdMux.
//!
//! ## Modules
//!
//! - `domain` - Command value objects and domain events
//! - `queue` - Bounded priority queue of pending commands
//! - `dispatcher` - Rate-limited, bounded-concurrency worker loop
//! - `rate_limiter` - Token bucket
//! - `history` - Ring buffer of executed commands and output truncation
//! - `cache` - Key/value cache with TTL and invalidation
//! - `config` - Configuration loading (file + `CMDMUX_*` environment)
//! - `event_bus` - Central event distribution system

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod event_bus;
pub mod history;
pub mod queue;
pub mod rate_limiter;

// Re-export commonly used types
pub use domain::*;

pub use cache::{FetchTicket, TtlCache};
pub use config::{ConfigError, OrchestratorConfig, ENV_PREFIX};
pub use dispatcher::{CommandExecutor, Dispatcher, DispatcherSettings, FnExecutor, EXECUTION_FAILED_EXIT_CODE};
pub use error::{CommandError, CommandResult};
pub use event_bus::{EventBus, EventReceiver, EventSender, EventSubscriber};
pub use history::{truncate, HistoryEntry, RingHistoryBuffer};
pub use queue::{CommandTicket, PriorityCommandQueue};
pub use rate_limiter::RateLimiter;
