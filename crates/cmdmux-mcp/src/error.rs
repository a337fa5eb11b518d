//! Protocol client errors

use cmdmux_core::ConnectionStatus;
use thiserror::Error;

use crate::transport::TransportError;

/// Errors returned by [`crate::ProtocolClient`] operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// No response (or no connection) within the allowed time
    #[error("{operation} on '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        operation: String,
        timeout_ms: u64,
    },

    /// The transport failed, closed, or could not be opened
    #[error("transport error on '{server}': {message}")]
    Transport { server: String, message: String },

    #[error("server '{server}' is not connected (status: {status})")]
    NotConnected {
        server: String,
        status: ConnectionStatus,
    },

    #[error("unknown connection '{0}'")]
    UnknownConnection(String),

    /// The server answered with an error response
    #[error("server '{server}' returned error {code}: {message}")]
    Remote {
        server: String,
        code: i64,
        message: String,
    },

    #[error("invalid response from '{server}': {message}")]
    InvalidResponse { server: String, message: String },

    #[error("invalid status transition for '{server}': {from} -> {to}")]
    InvalidTransition {
        server: String,
        from: ConnectionStatus,
        to: ConnectionStatus,
    },

    /// A connection marked required failed; the client was torn down
    #[error("required connection '{server}' failed: {cause}")]
    RequiredConnectionFailed {
        server: String,
        cause: Box<ProtocolError>,
    },
}

impl ProtocolError {
    pub(crate) fn transport(server: &str, err: TransportError) -> Self {
        Self::Transport {
            server: server.to_string(),
            message: err.to_string(),
        }
    }

    /// Short machine-friendly kind, used in events and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Transport { .. } => "transport",
            Self::NotConnected { .. } => "not_connected",
            Self::UnknownConnection(_) => "unknown_connection",
            Self::Remote { .. } => "remote",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::RequiredConnectionFailed { .. } => "required_connection_failed",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Server the error is about, if any
    pub fn server(&self) -> Option<&str> {
        match self {
            Self::Timeout { server, .. }
            | Self::Transport { server, .. }
            | Self::NotConnected { server, .. }
            | Self::Remote { server, .. }
            | Self::InvalidResponse { server, .. }
            | Self::InvalidTransition { server, .. }
            | Self::RequiredConnectionFailed { server, .. } => Some(server),
            Self::UnknownConnection(server) => Some(server),
        }
    }
}
