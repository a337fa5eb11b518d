//! # CmdMux
//!
//! Command orchestration layer: a priority, rate-limited command queue with
//! bounded concurrency in front of a multi-server protocol client.
//!
//! ## Modules
//!
//! - `shell` - `CommandShell`, the owner of queue, dispatcher, client and event bus
//! - `executor` - `ProtocolExecutor`, routing `server_tool` commands to servers
//! - `logging` - tracing subscriber setup (console + rolling file)
//!
//! ## Usage
//!
//! ```rust,ignore
//! let _guard = cmdmux::logging::init_tracing(LogConfig::default())?;
//! let config = OrchestratorConfig::load(Some(Path::new("cmdmux.json")))?;
//!
//! let shell = CommandShell::builder(config)
//!     .server("github", github_connector)
//!     .executor(local_executor)
//!     .build()?;
//!
//! shell.connect().await?;
//! let ticket = shell.submit(CommandPayload::new("github_search_code"), 5)?;
//! let output = ticket.await?;
//! shell.drain().await;
//! shell.shutdown().await;
//! ```

pub mod executor;
pub mod logging;
pub mod shell;

pub use executor::{ProtocolExecutor, TOOL_ERROR_EXIT_CODE};
pub use logging::{default_logs_dir, init_tracing, LogConfig};
pub use shell::{CommandShell, CommandShellBuilder};

// Re-export the lower layers so callers need a single dependency
pub use cmdmux_core as core;
pub use cmdmux_mcp as mcp;
