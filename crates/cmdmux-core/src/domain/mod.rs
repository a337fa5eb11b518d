//! Domain value objects and events
//!
//! - Commands (CommandId, CommandPayload, CommandOutput)
//! - Value Objects (ConnectionStatus, CommandOutcome)
//! - Domain Events (DomainEvent enum for event-driven architecture)

mod command;
mod event;

pub use command::{CommandId, CommandOutput, CommandPayload};
pub use event::{CommandOutcome, ConnectionStatus, DomainEvent, DomainEventEnvelope};
