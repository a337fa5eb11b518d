//! CommandShell - owner of the orchestration layer
//!
//! Wires one event bus, one protocol client and one dispatcher together with
//! an explicit lifecycle:
//!
//! ```text
//! builder(config) ─► build() ─► connect() ─► submit()* ─► drain() ─► shutdown()
//! ```
//!
//! Commands named `server_tool` run on the matching server; everything else
//! goes to the fallback executor.

use std::sync::Arc;

use cmdmux_core::{
    CommandError, CommandExecutor, CommandId, CommandPayload, CommandResult, CommandTicket,
    ConfigError, Dispatcher, DispatcherSettings, EventBus, HistoryEntry, OrchestratorConfig,
};
use cmdmux_mcp::{ClientSettings, ConnectOptions, ConnectReport, Connector, ProtocolClient, ProtocolError};
use tracing::info;

use crate::executor::ProtocolExecutor;

pub struct CommandShellBuilder {
    config: OrchestratorConfig,
    servers: Vec<(String, Arc<dyn Connector>)>,
    fallback: Option<Arc<dyn CommandExecutor>>,
    event_bus: Option<EventBus>,
}

impl CommandShellBuilder {
    /// Add a server connection. Names must not contain `_`.
    pub fn server(mut self, name: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        self.servers.push((name.into(), connector));
        self
    }

    /// Executor for commands that don't name a server tool
    pub fn executor(mut self, fallback: Arc<dyn CommandExecutor>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Use an existing bus instead of a fresh one
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Validate the configuration and start the dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<CommandShell, ConfigError> {
        self.config.validate()?;
        for (name, _) in &self.servers {
            if name.is_empty() || name.contains('_') {
                return Err(ConfigError::Invalid(format!(
                    "server name {:?} must be non-empty and must not contain '_'",
                    name
                )));
            }
        }
        for name in &self.config.required_connections {
            if !self.servers.iter().any(|(server, _)| server == name) {
                return Err(ConfigError::Invalid(format!(
                    "required connection {:?} is not a configured server",
                    name
                )));
            }
        }

        let events = self.event_bus.unwrap_or_default();
        let client = ProtocolClient::new(
            self.servers,
            ClientSettings::from(&self.config),
            events.sender(),
        );
        let executor: Arc<dyn CommandExecutor> =
            Arc::new(ProtocolExecutor::new(client.clone(), self.fallback));
        let dispatcher = Dispatcher::start(
            DispatcherSettings::from(&self.config),
            executor,
            events.sender(),
        );

        info!(
            servers = client.connection_names().len(),
            concurrency = self.config.concurrency,
            "[CommandShell] Ready"
        );
        Ok(CommandShell {
            config: self.config,
            events,
            client,
            dispatcher,
        })
    }
}

pub struct CommandShell {
    config: OrchestratorConfig,
    events: EventBus,
    client: ProtocolClient,
    dispatcher: Dispatcher,
}

impl CommandShell {
    pub fn builder(config: OrchestratorConfig) -> CommandShellBuilder {
        CommandShellBuilder {
            config,
            servers: Vec::new(),
            fallback: None,
            event_bus: None,
        }
    }

    /// Connect every configured server using the configured timeout and
    /// required connections.
    pub async fn connect(&self) -> Result<ConnectReport, ProtocolError> {
        self.client
            .connect(None, ConnectOptions::from_config(&self.config))
            .await
    }

    /// Queue a command. Higher priorities run first.
    pub fn submit(&self, payload: CommandPayload, priority: i32) -> Result<CommandTicket, CommandError> {
        self.dispatcher.submit(payload, priority)
    }

    /// Queue a command and wait for its result
    pub async fn run(&self, payload: CommandPayload, priority: i32) -> CommandResult {
        self.submit(payload, priority)?.await
    }

    /// Cancel a command that has not started
    pub fn cancel(&self, id: CommandId) -> bool {
        self.dispatcher.try_cancel(id)
    }

    /// Wait until no command is pending or running
    pub async fn drain(&self) {
        self.dispatcher.drain().await
    }

    /// Executed commands, oldest first
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.dispatcher.history()
    }

    pub fn client(&self) -> &ProtocolClient {
        &self.client
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Stop accepting work, cancel pending commands, wait for running ones,
    /// then disconnect every server.
    pub async fn shutdown(&self) {
        info!("[CommandShell] Shutting down");
        self.dispatcher.shutdown().await;
        self.client.shutdown().await;
    }
}
