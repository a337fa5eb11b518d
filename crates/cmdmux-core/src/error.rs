//! Error types for the command queue and dispatcher.

use thiserror::Error;

use crate::domain::CommandId;

/// Errors surfaced to the caller awaiting a single command.
///
/// These never escape the dispatcher loop: each one settles exactly one
/// command ticket and the loop moves on to the next queued item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The queue already held `capacity` pending commands.
    #[error("command queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// The command was removed before it started executing.
    #[error("command {id} was cancelled before it started")]
    Cancelled { id: CommandId },

    /// The executor returned an error (or panicked) while running the command.
    #[error("command {id} failed: {message}")]
    Execution { id: CommandId, message: String },

    /// The queue has been shut down and accepts no more work.
    #[error("command queue is shut down")]
    Closed,
}

impl CommandError {
    /// Short machine-friendly kind, used in events and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::QueueFull { .. } => "queue_full",
            Self::Cancelled { .. } => "cancelled",
            Self::Execution { .. } => "execution",
            Self::Closed => "closed",
        }
    }
}

/// Result type for a settled command.
pub type CommandResult = Result<crate::domain::CommandOutput, CommandError>;
