//! ProtocolClient tests against scripted servers
//!
//! Connect semantics, request correlation and capability caching.

mod requests;

use std::sync::Arc;
use std::time::Duration;

use cmdmux_core::EventBus;
use cmdmux_mcp::{ClientSettings, ConnectOptions, ProtocolClient};
use tests::MockConnector;

/// Client over `names`, all resolved through `connector`
pub fn client(
    connector: &Arc<MockConnector>,
    names: &[&str],
    settings: ClientSettings,
) -> (ProtocolClient, EventBus) {
    let bus = EventBus::new();
    let servers = names
        .iter()
        .map(|name| (name.to_string(), connector.as_connector()));
    let client = ProtocolClient::new(servers, settings, bus.sender());
    (client, bus)
}

pub fn options(timeout_ms: u64) -> ConnectOptions {
    ConnectOptions::new(Duration::from_millis(timeout_ms))
}

/// Client with every server in `names` served and connected
pub async fn connected(
    names: &[&str],
    settings: ClientSettings,
) -> (ProtocolClient, EventBus, Arc<MockConnector>) {
    let connector = MockConnector::new();
    for name in names {
        connector.serve(name);
    }
    let (client, bus) = client(&connector, names, settings);
    let report = client.connect(None, options(1_000)).await.unwrap();
    assert!(report.is_complete());
    (client, bus, connector)
}
