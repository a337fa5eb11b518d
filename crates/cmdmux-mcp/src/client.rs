//! ProtocolClient - multi-server request/response client
//!
//! Owns one [`Connection`] per configured server for its whole lifetime.
//! Responsibilities:
//! - Parallel connect with required/optional semantics and a connect timeout
//! - Request/response correlation by id, with per-call timeouts
//! - `tools/list` and `resources/list` caching with TTL, invalidated by
//!   list-changed notifications
//! - Answering server-initiated requests (`ping`)
//!
//! Inbound handlers hold a `Weak` reference to the client plus the
//! generation of the attempt that installed them, so a dropped client or a
//! replaced transport never receives stale traffic.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cmdmux_core::{ConnectionStatus, DomainEvent, EventSender, OrchestratorConfig, TtlCache};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::connection::{Connection, PendingGuard};
use crate::error::ProtocolError;
use crate::features::{
    CacheKey, ResourceContents, ResourceDescriptor, ServerInfo, ToolCallResult, ToolDescriptor,
};
use crate::protocol::{Message, Request, Response, RpcError};
use crate::transport::{Connector, InboundHandler, TransportEvent};

/// Used when no connect timeout is configured
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Protocol revision sent in the handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Upper bound on `nextCursor` pages followed in one listing
const MAX_LIST_PAGES: usize = 100;

const TOOLS_LIST_CHANGED: [&str; 2] = ["tools/listChanged", "notifications/tools/list_changed"];
const RESOURCES_LIST_CHANGED: [&str; 2] = [
    "resources/listChanged",
    "notifications/resources/list_changed",
];

/// Client-wide settings
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub request_timeout: Duration,
    pub cache_ttl: Duration,
    /// Reported to servers in the handshake
    pub client_name: String,
    pub client_version: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cache_ttl: Duration::from_secs(60),
            client_name: "cmdmux".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl From<&OrchestratorConfig> for ClientSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            cache_ttl: config.cache_ttl(),
            ..Default::default()
        }
    }
}

/// Options for one `connect()` call
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Bound on each connection's establishment (transport + handshake)
    pub timeout: Duration,
    /// Connections whose failure fails the whole call
    pub required: BTreeSet<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CONNECT_TIMEOUT,
            required: BTreeSet::new(),
        }
    }
}

impl ConnectOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            timeout: config.connect_timeout(),
            required: config.required_connections.clone(),
        }
    }

    /// Mark connections as required
    pub fn require<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required.extend(names.into_iter().map(Into::into));
        self
    }
}

/// Outcome of a `connect()` call that did not fail outright
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectReport {
    /// Connections that are connected after the call, in name order
    pub connected: Vec<String>,
    /// Optional connections that failed, with the reason
    pub failed: BTreeMap<String, ProtocolError>,
}

impl ConnectReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Capability lists the client caches
trait ListedFeature: DeserializeOwned + Clone + Send + Sync + 'static {
    /// Result field holding the list, also the cache name in events
    const KIND: &'static str;
    const LIST_METHOD: &'static str;

    fn cache(inner: &ClientInner) -> &TtlCache<CacheKey, Vec<Self>>;
    fn set_server(&mut self, server: &str);
}

impl ListedFeature for ToolDescriptor {
    const KIND: &'static str = "tools";
    const LIST_METHOD: &'static str = "tools/list";

    fn cache(inner: &ClientInner) -> &TtlCache<CacheKey, Vec<Self>> {
        &inner.tools
    }

    fn set_server(&mut self, server: &str) {
        self.server = server.to_string();
    }
}

impl ListedFeature for ResourceDescriptor {
    const KIND: &'static str = "resources";
    const LIST_METHOD: &'static str = "resources/list";

    fn cache(inner: &ClientInner) -> &TtlCache<CacheKey, Vec<Self>> {
        &inner.resources
    }

    fn set_server(&mut self, server: &str) {
        self.server = server.to_string();
    }
}

struct ClientInner {
    connections: BTreeMap<String, Arc<Connection>>,
    settings: ClientSettings,
    next_id: AtomicU64,
    tools: TtlCache<CacheKey, Vec<ToolDescriptor>>,
    resources: TtlCache<CacheKey, Vec<ResourceDescriptor>>,
    events: EventSender,
}

/// Client for a fixed set of named servers
#[derive(Clone)]
pub struct ProtocolClient {
    inner: Arc<ClientInner>,
}

impl ProtocolClient {
    /// Create a client for `servers`. Every connection starts disconnected.
    pub fn new<I, S>(servers: I, settings: ClientSettings, events: EventSender) -> Self
    where
        I: IntoIterator<Item = (S, Arc<dyn Connector>)>,
        S: Into<String>,
    {
        let connections = servers
            .into_iter()
            .map(|(name, connector)| {
                let name = name.into();
                let connection = Connection::new(name.clone(), connector, events.clone());
                (name, Arc::new(connection))
            })
            .collect::<BTreeMap<_, _>>();

        debug!(servers = connections.len(), "[ProtocolClient] Created");
        Self {
            inner: Arc::new(ClientInner {
                connections,
                tools: TtlCache::new(settings.cache_ttl),
                resources: TtlCache::new(settings.cache_ttl),
                settings,
                next_id: AtomicU64::new(1),
                events,
            }),
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    /// Configured connection names, sorted
    pub fn connection_names(&self) -> Vec<String> {
        self.inner.connections.keys().cloned().collect()
    }

    pub fn status(&self, server: &str) -> Option<ConnectionStatus> {
        self.inner.connections.get(server).map(|c| c.status())
    }

    pub fn statuses(&self) -> BTreeMap<String, ConnectionStatus> {
        self.inner
            .connections
            .iter()
            .map(|(name, conn)| (name.clone(), conn.status()))
            .collect()
    }

    pub fn last_error(&self, server: &str) -> Option<String> {
        self.inner.connections.get(server).and_then(|c| c.last_error())
    }

    /// What the server reported in its handshake
    pub fn server_info(&self, server: &str) -> Option<ServerInfo> {
        self.inner.connections.get(server).and_then(|c| c.server_info())
    }

    /// Requests currently awaiting a response on `server`
    pub fn pending_requests(&self, server: &str) -> usize {
        self.inner
            .connections
            .get(server)
            .map(|c| c.pending_count())
            .unwrap_or(0)
    }

    /// Connect `names` (or every configured server) in parallel.
    ///
    /// Connected servers are left alone; failed ones are disconnected and
    /// retried. If a required connection fails, every connection is torn down
    /// and [`ProtocolError::RequiredConnectionFailed`] is returned. Optional
    /// failures are listed in the report.
    pub async fn connect(
        &self,
        names: Option<&[&str]>,
        options: ConnectOptions,
    ) -> Result<ConnectReport, ProtocolError> {
        let targets: BTreeMap<String, Arc<Connection>> = match names {
            Some(names) => names
                .iter()
                .map(|name| {
                    self.inner
                        .connection(name)
                        .map(|conn| (name.to_string(), conn))
                })
                .collect::<Result<_, _>>()?,
            None => self.inner.connections.clone(),
        };
        for name in &options.required {
            self.inner.connection(name)?;
        }

        info!(
            targets = targets.len(),
            required = options.required.len(),
            timeout_ms = options.timeout.as_millis() as u64,
            "[ProtocolClient] Connecting"
        );

        let attempts = targets.values().map(|conn| {
            let required = options.required.contains(conn.name());
            self.connect_one(conn, options.timeout, required)
        });
        let outcomes = join_all(attempts).await;

        let mut report = ConnectReport::default();
        for (name, outcome) in targets.keys().zip(outcomes) {
            match outcome {
                Ok(()) => report.connected.push(name.clone()),
                Err(e) => {
                    report.failed.insert(name.clone(), e);
                }
            }
        }

        let required_failure = report
            .failed
            .iter()
            .find(|(name, _)| options.required.contains(*name))
            .map(|(name, cause)| (name.clone(), cause.clone()));
        if let Some((server, cause)) = required_failure {
            error!(
                server = %server,
                error = %cause,
                "[ProtocolClient] Required connection failed, disconnecting everything"
            );
            self.disconnect_all().await;
            return Err(ProtocolError::RequiredConnectionFailed {
                server,
                cause: Box::new(cause),
            });
        }

        if !report.failed.is_empty() {
            warn!(
                failed = ?report.failed.keys().collect::<Vec<_>>(),
                "[ProtocolClient] Optional connections failed"
            );
        }
        info!(connected = report.connected.len(), "[ProtocolClient] Connect finished");
        Ok(report)
    }

    async fn connect_one(
        &self,
        conn: &Arc<Connection>,
        timeout: Duration,
        required: bool,
    ) -> Result<(), ProtocolError> {
        let deadline = Instant::now() + timeout;
        let Ok(_lifecycle) = tokio::time::timeout_at(deadline, conn.lifecycle().lock()).await else {
            warn!(
                server = %conn.name(),
                "[ProtocolClient] Timed out waiting for a concurrent connect attempt"
            );
            return Err(connect_timeout(conn.name(), timeout));
        };

        match conn.status() {
            ConnectionStatus::Connected if !conn.is_transport_closed() => {
                debug!(server = %conn.name(), "[ProtocolClient] Already connected");
                return Ok(());
            }
            ConnectionStatus::Disconnected => {}
            _ => self.inner.disconnect_connection(conn).await?,
        }

        let generation = conn.begin_connect()?;
        let result = match tokio::time::timeout_at(deadline, self.establish(conn, generation)).await {
            Ok(result) => result,
            Err(_) => Err(connect_timeout(conn.name(), timeout)),
        };

        match result {
            Ok(info) => {
                conn.mark_connected(generation, info)?;
                // The aggregate listings cover connected servers only.
                self.inner.invalidate::<ToolDescriptor>(conn.name());
                self.inner.invalidate::<ResourceDescriptor>(conn.name());
                Ok(())
            }
            Err(error) => {
                if let Some(transport) = conn.mark_failed(generation, &error)? {
                    transport.close().await;
                }
                self.inner.events.emit(DomainEvent::ConnectionFailed {
                    server: conn.name().to_string(),
                    error: error.to_string(),
                    required,
                });
                Err(error)
            }
        }
    }

    /// Open the transport and run the handshake
    async fn establish(&self, conn: &Connection, generation: u64) -> Result<ServerInfo, ProtocolError> {
        let transport = conn
            .connector()
            .connect(conn.name())
            .await
            .map_err(|e| ProtocolError::transport(conn.name(), e))?;

        transport.on_message(self.inbound_handler(conn.name(), generation));
        if !conn.attach_transport(generation, Arc::clone(&transport)) {
            transport.close().await;
            return Err(ProtocolError::Transport {
                server: conn.name().to_string(),
                message: "connect attempt superseded".to_string(),
            });
        }

        let settings = &self.inner.settings;
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": settings.client_name,
                "version": settings.client_version,
            }
        });
        let result = self
            .inner
            .call(conn, "initialize", Some(params), settings.request_timeout, true)
            .await?;
        let info: ServerInfo = parse_result(conn.name(), result)?;

        conn.transport_for(true)?
            .send(Message::notification("notifications/initialized", None))
            .await
            .map_err(|e| ProtocolError::transport(conn.name(), e))?;

        debug!(
            server = %conn.name(),
            protocol_version = ?info.protocol_version,
            "[ProtocolClient] Handshake complete"
        );
        Ok(info)
    }

    fn inbound_handler(&self, server: &str, generation: u64) -> InboundHandler {
        let client = Arc::downgrade(&self.inner);
        let server = server.to_string();
        Arc::new(move |event| {
            if let Some(inner) = client.upgrade() {
                inner.handle_inbound(&server, generation, event);
            }
        })
    }

    /// Send a request with the configured request timeout
    pub async fn request(
        &self,
        server: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ProtocolError> {
        self.request_with_timeout(server, method, params, self.inner.settings.request_timeout)
            .await
    }

    pub async fn request_with_timeout(
        &self,
        server: &str,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ProtocolError> {
        let conn = self.inner.connection(server)?;
        self.inner.call(&conn, method, params, timeout, false).await
    }

    /// Send a notification (no response expected)
    pub async fn notify(
        &self,
        server: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), ProtocolError> {
        let conn = self.inner.connection(server)?;
        conn.transport_for(false)?
            .send(Message::notification(method, params))
            .await
            .map_err(|e| ProtocolError::transport(server, e))
    }

    /// Tools of one server, or of every connected server when `server` is None
    pub async fn list_tools(&self, server: Option<&str>) -> Result<Vec<ToolDescriptor>, ProtocolError> {
        self.inner.list::<ToolDescriptor>(server).await
    }

    /// Resources of one server, or of every connected server when `server` is None
    pub async fn list_resources(
        &self,
        server: Option<&str>,
    ) -> Result<Vec<ResourceDescriptor>, ProtocolError> {
        self.inner.list::<ResourceDescriptor>(server).await
    }

    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, ProtocolError> {
        debug!(server = %server, tool = %tool, "[ProtocolClient] Calling tool");
        let result = self
            .request(
                server,
                "tools/call",
                Some(json!({ "name": tool, "arguments": arguments })),
            )
            .await?;
        parse_result(server, result)
    }

    pub async fn read_resource(
        &self,
        server: &str,
        uri: &str,
    ) -> Result<Vec<ResourceContents>, ProtocolError> {
        let mut result = self
            .request(server, "resources/read", Some(json!({ "uri": uri })))
            .await?;
        let contents = result
            .get_mut("contents")
            .map(Value::take)
            .unwrap_or_else(|| Value::Array(Vec::new()));
        parse_result(server, contents)
    }

    /// Close one connection, failing its pending requests
    pub async fn disconnect(&self, server: &str) -> Result<(), ProtocolError> {
        let conn = self.inner.connection(server)?;
        let _lifecycle = conn.lifecycle().lock().await;
        self.inner.disconnect_connection(&conn).await
    }

    pub async fn disconnect_all(&self) {
        let inner = &self.inner;
        let closing = inner.connections.values().map(|conn| async move {
            let _lifecycle = conn.lifecycle().lock().await;
            if let Err(e) = inner.disconnect_connection(conn).await {
                warn!(server = %conn.name(), error = %e, "[ProtocolClient] Disconnect failed");
            }
        });
        join_all(closing).await;
    }

    /// Disconnect everything and drop all cached capabilities
    pub async fn shutdown(&self) {
        info!("[ProtocolClient] Shutting down");
        self.disconnect_all().await;
        self.inner.tools.invalidate_all();
        self.inner.resources.invalidate_all();
    }
}

impl ClientInner {
    fn connection(&self, name: &str) -> Result<Arc<Connection>, ProtocolError> {
        self.connections
            .get(name)
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownConnection(name.to_string()))
    }

    async fn call(
        &self,
        conn: &Connection,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        handshake: bool,
    ) -> Result<Value, ProtocolError> {
        let transport = conn.transport_for(handshake)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let receiver = conn.register(id);
        let _pending = PendingGuard::new(conn, id);
        // The transport may have closed between the lookup and registration.
        conn.transport_for(handshake)?;

        trace!(server = %conn.name(), id, method = %method, "[ProtocolClient] Sending request");
        transport
            .send(Message::request(id, method, params))
            .await
            .map_err(|e| ProtocolError::transport(conn.name(), e))?;

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProtocolError::Transport {
                server: conn.name().to_string(),
                message: "request abandoned".to_string(),
            }),
            Err(_) => {
                warn!(
                    server = %conn.name(),
                    id,
                    method = %method,
                    timeout_ms = timeout.as_millis() as u64,
                    "[ProtocolClient] Request timed out"
                );
                Err(ProtocolError::Timeout {
                    server: conn.name().to_string(),
                    operation: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn disconnect_connection(&self, conn: &Connection) -> Result<(), ProtocolError> {
        // Only an abandoned connect() leaves this status behind an unlocked lifecycle.
        if conn.status() == ConnectionStatus::Connecting {
            let abandoned = ProtocolError::Transport {
                server: conn.name().to_string(),
                message: "connect attempt abandoned".to_string(),
            };
            if let Some(transport) = conn.mark_failed(conn.generation(), &abandoned)? {
                transport.close().await;
            }
        }

        if let Some(transport) = conn.mark_disconnected()? {
            transport.close().await;
        }
        self.invalidate::<ToolDescriptor>(conn.name());
        self.invalidate::<ResourceDescriptor>(conn.name());
        Ok(())
    }

    async fn list<F: ListedFeature>(&self, server: Option<&str>) -> Result<Vec<F>, ProtocolError> {
        match server {
            Some(name) => self.list_server::<F>(name).await,
            None => self.list_aggregate::<F>().await,
        }
    }

    async fn list_server<F: ListedFeature>(&self, server: &str) -> Result<Vec<F>, ProtocolError> {
        let conn = self.connection(server)?;
        let cache = F::cache(self);
        let key = CacheKey::server(server);

        if let Some(items) = cache.get(&key) {
            trace!(server = %server, kind = F::KIND, "[ProtocolClient] Cache hit");
            return Ok(items);
        }

        let ticket = cache.fetch_ticket();
        let items = self.fetch_pages::<F>(&conn).await?;
        if !cache.insert_fresh(key, items.clone(), ticket) {
            debug!(
                server = %server,
                kind = F::KIND,
                "[ProtocolClient] List changed during fetch, result not cached"
            );
        }
        Ok(items)
    }

    async fn list_aggregate<F: ListedFeature>(&self) -> Result<Vec<F>, ProtocolError> {
        let cache = F::cache(self);
        if let Some(items) = cache.get(&CacheKey::Aggregate) {
            trace!(kind = F::KIND, "[ProtocolClient] Aggregate cache hit");
            return Ok(items);
        }

        let ticket = cache.fetch_ticket();
        let names: Vec<&str> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.status().is_connected())
            .map(|(name, _)| name.as_str())
            .collect();
        let results = join_all(names.iter().map(|name| self.list_server::<F>(name))).await;

        let mut merged = Vec::new();
        let mut complete = true;
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(items) => merged.extend(items),
                Err(e) => {
                    warn!(
                        server = %name,
                        kind = F::KIND,
                        error = %e,
                        "[ProtocolClient] Skipping server in aggregate listing"
                    );
                    complete = false;
                }
            }
        }

        if complete {
            cache.insert_fresh(CacheKey::Aggregate, merged.clone(), ticket);
        }
        Ok(merged)
    }

    /// Live fetch of one server's list, following `nextCursor`
    async fn fetch_pages<F: ListedFeature>(&self, conn: &Connection) -> Result<Vec<F>, ProtocolError> {
        let mut items: Vec<F> = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let mut result = self
                .call(conn, F::LIST_METHOD, params, self.settings.request_timeout, false)
                .await?;

            let list = result.get_mut(F::KIND).map(Value::take).ok_or_else(|| {
                ProtocolError::InvalidResponse {
                    server: conn.name().to_string(),
                    message: format!("{} result has no `{}` field", F::LIST_METHOD, F::KIND),
                }
            })?;
            let mut page: Vec<F> = parse_result(conn.name(), list)?;
            page.iter_mut().for_each(|item| item.set_server(conn.name()));
            items.append(&mut page);

            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(String::from);
            if cursor.is_none() {
                debug!(
                    server = %conn.name(),
                    kind = F::KIND,
                    count = items.len(),
                    "[ProtocolClient] Fetched list"
                );
                return Ok(items);
            }
        }

        warn!(
            server = %conn.name(),
            kind = F::KIND,
            pages = MAX_LIST_PAGES,
            "[ProtocolClient] Stopped following nextCursor"
        );
        Ok(items)
    }

    fn handle_inbound(&self, server: &str, generation: u64, event: TransportEvent) {
        let Some(conn) = self.connections.get(server) else {
            return;
        };
        if conn.generation() != generation {
            debug!(server = %server, generation, "[ProtocolClient] Ignoring event from stale transport");
            return;
        }

        match event {
            TransportEvent::Closed { reason } => conn.mark_transport_closed(generation, reason),
            TransportEvent::Message(Message::Response(response)) => {
                self.handle_response(conn, response)
            }
            TransportEvent::Message(Message::Notification(notification)) => {
                self.handle_notification(server, notification.method, notification.params)
            }
            TransportEvent::Message(Message::Request(request)) => self.handle_request(conn, request),
        }
    }

    fn handle_response(&self, conn: &Connection, response: Response) {
        let Some(id) = response.id.as_number() else {
            warn!(server = %conn.name(), id = %response.id, "[ProtocolClient] Response with foreign id");
            return;
        };

        let result = response.into_result().map_err(|e| ProtocolError::Remote {
            server: conn.name().to_string(),
            code: e.code,
            message: e.message,
        });
        if !conn.resolve(id, result) {
            debug!(server = %conn.name(), id, "[ProtocolClient] No pending request for response");
        }
    }

    fn handle_notification(&self, server: &str, method: String, params: Option<Value>) {
        if TOOLS_LIST_CHANGED.contains(&method.as_str()) {
            info!(server = %server, "[ProtocolClient] Tool list changed");
            self.invalidate::<ToolDescriptor>(server);
        } else if RESOURCES_LIST_CHANGED.contains(&method.as_str()) {
            info!(server = %server, "[ProtocolClient] Resource list changed");
            self.invalidate::<ResourceDescriptor>(server);
        } else {
            debug!(server = %server, method = %method, "[ProtocolClient] Forwarding notification");
            self.events.emit(DomainEvent::ServerNotification {
                server: server.to_string(),
                method,
                params,
            });
        }
    }

    /// Answer a server-initiated request
    fn handle_request(&self, conn: &Connection, request: Request) {
        let reply = if request.method == "ping" {
            Message::result(request.id, json!({}))
        } else {
            debug!(server = %conn.name(), method = %request.method, "[ProtocolClient] Unsupported server request");
            Message::error(request.id, RpcError::method_not_found(&request.method))
        };

        let transport = match conn.transport_for(true) {
            Ok(transport) => transport,
            Err(e) => {
                debug!(server = %conn.name(), error = %e, "[ProtocolClient] Cannot answer server request");
                return;
            }
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(server = %conn.name(), "[ProtocolClient] No runtime to answer server request");
            return;
        };

        let server = conn.name().to_string();
        runtime.spawn(async move {
            if let Err(e) = transport.send(reply).await {
                warn!(server = %server, error = %e, "[ProtocolClient] Failed to answer server request");
            }
        });
    }

    /// Drop the server's and the aggregate entry of one capability cache
    fn invalidate<F: ListedFeature>(&self, server: &str) {
        let cache = F::cache(self);
        for key in [CacheKey::server(server), CacheKey::Aggregate] {
            if cache.invalidate(&key) {
                let key = format!("{}:{}", F::KIND, key);
                debug!(key = %key, "[ProtocolClient] Cache entry invalidated");
                self.events.emit(DomainEvent::CacheInvalidated { key });
            }
        }
    }
}

fn connect_timeout(server: &str, timeout: Duration) -> ProtocolError {
    ProtocolError::Timeout {
        server: server.to_string(),
        operation: "connect".to_string(),
        timeout_ms: timeout.as_millis() as u64,
    }
}

fn parse_result<T: DeserializeOwned>(server: &str, value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidResponse {
        server: server.to_string(),
        message: e.to_string(),
    })
}
