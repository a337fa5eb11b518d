//! Per-server connection state machine
//!
//! ```text
//!  Disconnected ──begin_connect──► Connecting ──► Connected
//!        ▲                              │              │
//!        │                              ▼              │
//!        └────────── disconnect ◄──── Failed ◄─────────┘ (disconnect only)
//! ```
//!
//! Every connect attempt bumps `generation`. Updates carrying an older
//! generation (a late handshake, a transport that closed after being
//! replaced) are dropped.
//!
//! Status changes are emitted after the state lock is released, so event
//! subscribers may read the client back.

use std::sync::Arc;

use cmdmux_core::{ConnectionStatus, DomainEvent, EventSender};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::error::ProtocolError;
use crate::features::ServerInfo;
use crate::transport::{Connector, Transport};

pub(crate) type PendingSender = oneshot::Sender<Result<Value, ProtocolError>>;

struct ConnectionState {
    status: ConnectionStatus,
    transport: Option<Arc<dyn Transport>>,
    /// The transport reported itself closed
    transport_closed: bool,
    last_error: Option<String>,
    server_info: Option<ServerInfo>,
    generation: u64,
}

/// One named server connection
pub(crate) struct Connection {
    name: String,
    connector: Arc<dyn Connector>,
    state: RwLock<ConnectionState>,
    pending: DashMap<u64, PendingSender>,
    /// Serializes connect/disconnect of this connection
    lifecycle: Mutex<()>,
    events: EventSender,
}

impl Connection {
    pub(crate) fn new(name: String, connector: Arc<dyn Connector>, events: EventSender) -> Self {
        Self {
            name,
            connector,
            state: RwLock::new(ConnectionState {
                status: ConnectionStatus::Disconnected,
                transport: None,
                transport_closed: false,
                last_error: None,
                server_info: None,
                generation: 0,
            }),
            pending: DashMap::new(),
            lifecycle: Mutex::new(()),
            events,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub(crate) fn lifecycle(&self) -> &Mutex<()> {
        &self.lifecycle
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        self.state.read().status
    }

    pub(crate) fn generation(&self) -> u64 {
        self.state.read().generation
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        self.state.read().last_error.clone()
    }

    pub(crate) fn server_info(&self) -> Option<ServerInfo> {
        self.state.read().server_info.clone()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn check_transition(
        &self,
        state: &ConnectionState,
        to: ConnectionStatus,
    ) -> Result<(), ProtocolError> {
        if state.status.can_transition_to(to) {
            return Ok(());
        }
        warn!(
            server = %self.name,
            from = %state.status,
            to = %to,
            "[Connection] Rejected illegal status transition"
        );
        Err(ProtocolError::InvalidTransition {
            server: self.name.clone(),
            from: state.status,
            to,
        })
    }

    fn emit_status(&self, status: ConnectionStatus, generation: u64, message: Option<String>) {
        self.events.emit(DomainEvent::ConnectionStatusChanged {
            server: self.name.clone(),
            status,
            generation,
            message,
        });
    }

    /// Disconnected -> Connecting. Returns the new generation.
    pub(crate) fn begin_connect(&self) -> Result<u64, ProtocolError> {
        let generation = {
            let mut state = self.state.write();
            self.check_transition(&state, ConnectionStatus::Connecting)?;
            state.status = ConnectionStatus::Connecting;
            state.generation += 1;
            state.transport = None;
            state.transport_closed = false;
            state.last_error = None;
            state.server_info = None;
            state.generation
        };

        debug!(server = %self.name, generation, "[Connection] Connecting");
        self.emit_status(ConnectionStatus::Connecting, generation, None);
        Ok(generation)
    }

    /// Store the transport opened for `generation`.
    ///
    /// Returns false if that attempt is no longer current.
    pub(crate) fn attach_transport(&self, generation: u64, transport: Arc<dyn Transport>) -> bool {
        let mut state = self.state.write();
        if state.generation != generation || state.status != ConnectionStatus::Connecting {
            return false;
        }
        state.transport = Some(transport);
        true
    }

    /// Connecting -> Connected
    pub(crate) fn mark_connected(&self, generation: u64, info: ServerInfo) -> Result<(), ProtocolError> {
        {
            let mut state = self.state.write();
            if state.generation != generation {
                debug!(server = %self.name, generation, "[Connection] Ignoring stale handshake");
                return Ok(());
            }
            self.check_transition(&state, ConnectionStatus::Connected)?;
            state.status = ConnectionStatus::Connected;
            state.server_info = Some(info);
        }

        info!(server = %self.name, generation, "[Connection] Connected");
        self.emit_status(ConnectionStatus::Connected, generation, None);
        Ok(())
    }

    /// Connecting -> Failed. Returns the transport so the caller can close it.
    pub(crate) fn mark_failed(
        &self,
        generation: u64,
        error: &ProtocolError,
    ) -> Result<Option<Arc<dyn Transport>>, ProtocolError> {
        let transport = {
            let mut state = self.state.write();
            if state.generation != generation {
                return Ok(None);
            }
            self.check_transition(&state, ConnectionStatus::Failed)?;
            state.status = ConnectionStatus::Failed;
            state.last_error = Some(error.to_string());
            state.transport.take()
        };

        self.fail_pending(error);
        warn!(server = %self.name, generation, error = %error, "[Connection] Connection failed");
        self.emit_status(ConnectionStatus::Failed, generation, Some(error.to_string()));
        Ok(transport)
    }

    /// Connected | Failed -> Disconnected. A disconnected connection is left alone.
    ///
    /// Returns the transport so the caller can close it.
    pub(crate) fn mark_disconnected(&self) -> Result<Option<Arc<dyn Transport>>, ProtocolError> {
        let (transport, generation) = {
            let mut state = self.state.write();
            if state.status == ConnectionStatus::Disconnected {
                return Ok(None);
            }
            self.check_transition(&state, ConnectionStatus::Disconnected)?;
            state.status = ConnectionStatus::Disconnected;
            state.server_info = None;
            (state.transport.take(), state.generation)
        };

        self.fail_pending(&ProtocolError::Transport {
            server: self.name.clone(),
            message: "connection disconnected".to_string(),
        });
        info!(server = %self.name, generation, "[Connection] Disconnected");
        self.emit_status(ConnectionStatus::Disconnected, generation, None);
        Ok(transport)
    }

    /// The transport of `generation` closed on its own.
    ///
    /// Status is left as is; requests fail fast until the caller reconnects.
    pub(crate) fn mark_transport_closed(&self, generation: u64, reason: Option<String>) {
        let message = reason.unwrap_or_else(|| "transport closed".to_string());
        {
            let mut state = self.state.write();
            if state.generation != generation || state.transport_closed {
                return;
            }
            state.transport_closed = true;
            state.last_error = Some(message.clone());
        }

        warn!(server = %self.name, generation, reason = %message, "[Connection] Transport closed");
        self.fail_pending(&ProtocolError::Transport {
            server: self.name.clone(),
            message,
        });
    }

    /// Transport to send on.
    ///
    /// Normal requests need `Connected`; the handshake runs while `Connecting`.
    pub(crate) fn transport_for(&self, handshake: bool) -> Result<Arc<dyn Transport>, ProtocolError> {
        let state = self.state.read();
        let ready = match state.status {
            ConnectionStatus::Connected => true,
            ConnectionStatus::Connecting => handshake,
            _ => false,
        };
        if !ready {
            return Err(ProtocolError::NotConnected {
                server: self.name.clone(),
                status: state.status,
            });
        }
        if state.transport_closed {
            return Err(ProtocolError::Transport {
                server: self.name.clone(),
                message: state
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "transport closed".to_string()),
            });
        }
        state.transport.clone().ok_or_else(|| ProtocolError::NotConnected {
            server: self.name.clone(),
            status: state.status,
        })
    }

    pub(crate) fn is_transport_closed(&self) -> bool {
        self.state.read().transport_closed
    }

    /// Register a pending request slot
    pub(crate) fn register(&self, id: u64) -> oneshot::Receiver<Result<Value, ProtocolError>> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        rx
    }

    /// Settle the pending request `id`. Returns false if nobody is waiting.
    pub(crate) fn resolve(&self, id: u64, result: Result<Value, ProtocolError>) -> bool {
        match self.pending.remove(&id) {
            Some((_, sender)) => sender.send(result).is_ok(),
            None => false,
        }
    }

    pub(crate) fn forget(&self, id: u64) {
        self.pending.remove(&id);
    }

    fn fail_pending(&self, error: &ProtocolError) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, sender)) = self.pending.remove(&id) {
                let _ = sender.send(Err(error.clone()));
            }
        }
    }
}

/// Removes a pending slot when the request finishes, times out or is dropped
pub(crate) struct PendingGuard<'a> {
    connection: &'a Connection,
    id: u64,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(connection: &'a Connection, id: u64) -> Self {
        Self { connection, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.connection.forget(self.id);
    }
}
