//! Transport abstraction for protocol connections
//!
//! A [`Connector`] opens a [`Transport`] for a named server; the client only
//! talks to the trait objects. How bytes move (child process stdio, sockets,
//! in-memory pipes) is up to the implementation.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::Message;

/// Errors raised by transports and connectors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("failed to send: {0}")]
    Send(String),
}

/// Something that arrived from the server side of a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(Message),
    /// The transport went away; no further events follow
    Closed { reason: Option<String> },
}

/// Callback receiving inbound transport events.
///
/// Invoked from the transport's reader task; it must not block.
pub type InboundHandler = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Bidirectional message channel to one server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to the server
    async fn send(&self, message: Message) -> Result<(), TransportError>;

    /// Install the handler for inbound messages, replacing any previous one
    fn on_message(&self, handler: InboundHandler);

    /// Close the transport. Idempotent.
    async fn close(&self);
}

/// Opens transports by server name
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, name: &str) -> Result<Arc<dyn Transport>, TransportError>;
}
