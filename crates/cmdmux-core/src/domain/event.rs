//! Domain Events - Unified event system for CmdMux
//!
//! Every observable state change of the orchestration layer is an event in
//! this module. Events are emitted by the queue, the dispatcher and the
//! protocol client and consumed by:
//! - CLI status output
//! - Logging/audit sinks
//! - Tests asserting on ordering
//!
//! # Design Principles
//!
//! - **Single Source of Truth**: One enum for all domain events
//! - **Immutable**: Events are facts that happened, never mutated
//! - **Serializable**: All events can be serialized for transport/storage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::CommandId;

// ============================================================================
// CONNECTION STATUS
// ============================================================================

/// Protocol connection status
///
/// Transitions: `Disconnected -> Connecting -> {Connected | Failed}`, and
/// `Connected | Failed -> Disconnected` through an explicit disconnect only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Not connected (idle state) - this is the default
    #[default]
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Successfully connected and responding
    Connected,
    /// Connection attempt failed (timeout or transport error)
    Failed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }

    /// Check if the server is currently connected
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if this is a terminal state (not transitioning)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Connecting)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: ConnectionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connected)
                | (Self::Connecting, Self::Failed)
                | (Self::Connected, Self::Disconnected)
                | (Self::Failed, Self::Disconnected)
        )
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// COMMAND OUTCOME
// ============================================================================

/// How a command was settled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// Executor returned output (exit code may still be non-zero)
    Completed { exit_code: i32 },
    /// Executor returned an error or panicked
    Failed { error: String },
    /// Removed from the queue before it started
    Cancelled,
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { exit_code: 0 })
    }
}

// ============================================================================
// DOMAIN EVENT ENUM
// ============================================================================

/// Unified domain events for the orchestration layer
///
/// # Event Categories
///
/// - **Commands**: queued, started, completed
/// - **Connections**: status changes, failures
/// - **Capabilities**: cache invalidation, forwarded server notifications
///
/// # Serialization
///
/// Events serialize with a `type` field containing the snake_case variant name:
/// ```json
/// { "type": "command_queued", "command_id": "...", "name": "...", "priority": 5 }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    // ════════════════════════════════════════════════════════════════════════
    // COMMANDS
    // ════════════════════════════════════════════════════════════════════════
    /// A command was accepted into the queue
    CommandQueued {
        command_id: CommandId,
        name: String,
        priority: i32,
        /// Pending commands after insertion
        queue_len: usize,
    },

    /// The dispatcher handed a command to the executor
    CommandStarted {
        command_id: CommandId,
        name: String,
        /// Time spent waiting in the queue
        waited_ms: u64,
    },

    /// A command was settled (completed, failed or cancelled)
    CommandCompleted {
        command_id: CommandId,
        name: String,
        #[serde(flatten)]
        outcome: CommandOutcome,
        duration_ms: u64,
    },

    // ════════════════════════════════════════════════════════════════════════
    // CONNECTIONS
    // ════════════════════════════════════════════════════════════════════════
    /// Connection status changed
    ConnectionStatusChanged {
        server: String,
        status: ConnectionStatus,
        /// Connect attempt counter, for discarding stale updates
        generation: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A connection attempt failed
    ConnectionFailed {
        server: String,
        error: String,
        /// Whether the connection was required for startup
        required: bool,
    },

    // ════════════════════════════════════════════════════════════════════════
    // CAPABILITIES
    // ════════════════════════════════════════════════════════════════════════
    /// A capability cache entry was removed
    CacheInvalidated { key: String },

    /// An out-of-band notification from a server, forwarded unmodified
    ServerNotification {
        server: String,
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
}

impl DomainEvent {
    /// Get the event type name (matches the serialized `type` tag)
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::CommandQueued { .. } => "command_queued",
            Self::CommandStarted { .. } => "command_started",
            Self::CommandCompleted { .. } => "command_completed",
            Self::ConnectionStatusChanged { .. } => "connection_status_changed",
            Self::ConnectionFailed { .. } => "connection_failed",
            Self::CacheInvalidated { .. } => "cache_invalidated",
            Self::ServerNotification { .. } => "server_notification",
        }
    }

    /// Get the command id if this event is command-scoped
    pub fn command_id(&self) -> Option<CommandId> {
        match self {
            Self::CommandQueued { command_id, .. }
            | Self::CommandStarted { command_id, .. }
            | Self::CommandCompleted { command_id, .. } => Some(*command_id),
            _ => None,
        }
    }

    /// Get the server name if this event is server-scoped
    pub fn server(&self) -> Option<&str> {
        match self {
            Self::ConnectionStatusChanged { server, .. }
            | Self::ConnectionFailed { server, .. }
            | Self::ServerNotification { server, .. } => Some(server),
            _ => None,
        }
    }
}

// ============================================================================
// EVENT METADATA (for audit logging)
// ============================================================================

/// Metadata wrapper for events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEventEnvelope {
    /// Unique event ID
    pub event_id: Uuid,
    /// When the event was wrapped
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: DomainEvent,
}

impl DomainEventEnvelope {
    pub fn new(event: DomainEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
