//! Request correlation, timeouts and transport failures

use std::time::Duration;

use cmdmux_core::{ConnectionStatus, DomainEvent};
use cmdmux_mcp::{ClientSettings, Message, ProtocolError, RequestId};
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::events::collect;
use tests::Reply;

use super::{connected, options};

#[tokio::test]
async fn test_out_of_order_responses_reach_their_callers() {
    let (client, _bus, connector) = connected(&["srv"], ClientSettings::default()).await;
    let server = connector.transport("srv");
    server.on("tools/call", Reply::Hold);

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.call_tool("srv", "first", json!({})).await }
    });
    let second = tokio::spawn({
        let client = client.clone();
        async move { client.call_tool("srv", "second", json!({})).await }
    });

    let held = server.wait_for_held(2).await;
    assert_eq!(client.pending_requests("srv"), 2);

    // Answer in reverse order, echoing the tool name back
    for request in held.iter().rev() {
        let name = request.params.as_ref().unwrap()["name"].clone();
        server.respond(
            &request.id,
            json!({"content": [{"type": "text", "text": name}]}),
        );
    }

    assert_eq!(first.await.unwrap().unwrap().text(), "first");
    assert_eq!(second.await.unwrap().unwrap().text(), "second");
    assert_eq!(client.pending_requests("srv"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_clears_pending_and_ignores_late_response() {
    let (client, _bus, connector) = connected(&["srv"], ClientSettings::default()).await;
    let server = connector.transport("srv");
    server.on("slow", Reply::Hold);

    let err = client
        .request_with_timeout("srv", "slow", None, Duration::from_millis(100))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ProtocolError::Timeout {
            server: "srv".into(),
            operation: "slow".into(),
            timeout_ms: 100,
        }
    );
    assert_eq!(client.pending_requests("srv"), 0);

    let late = server.held().remove(0);
    server.respond(&late.id, json!({"too": "late"}));

    server.on("fast", Reply::Result(json!({"ok": true})));
    let value = client.request("srv", "fast", None).await.unwrap();
    assert_eq!(value, json!({"ok": true}));
}

#[tokio::test]
async fn test_remote_errors_keep_code_and_message() {
    let (client, _bus, connector) = connected(&["srv"], ClientSettings::default()).await;
    connector
        .transport("srv")
        .on("boom", Reply::error(-32000, "kaboom"));

    let err = client.request("srv", "boom", None).await.unwrap_err();
    assert_eq!(
        err,
        ProtocolError::Remote {
            server: "srv".into(),
            code: -32000,
            message: "kaboom".into(),
        }
    );
    // The connection survives remote errors
    assert_eq!(client.status("srv"), Some(ConnectionStatus::Connected));
}

#[tokio::test]
async fn test_requests_need_a_connected_server() {
    let connector = tests::MockConnector::new();
    connector.serve("srv");
    let (client, _bus) = super::client(&connector, &["srv"], ClientSettings::default());

    let err = client.request("srv", "anything", None).await.unwrap_err();
    assert_eq!(
        err,
        ProtocolError::NotConnected {
            server: "srv".into(),
            status: ConnectionStatus::Disconnected,
        }
    );

    let err = client.request("other", "anything", None).await.unwrap_err();
    assert_eq!(err, ProtocolError::UnknownConnection("other".into()));
}

#[tokio::test]
async fn test_transport_close_fails_pending_then_fails_fast() {
    let (client, _bus, connector) = connected(&["srv"], ClientSettings::default()).await;
    let server = connector.transport("srv");
    server.on("slow", Reply::Hold);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.request("srv", "slow", None).await }
    });
    server.wait_for_held(1).await;
    server.drop_connection("server exited");

    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(
        err,
        ProtocolError::Transport {
            server: "srv".into(),
            message: "server exited".into(),
        }
    );
    assert_eq!(client.pending_requests("srv"), 0);
    assert_eq!(client.last_error("srv").as_deref(), Some("server exited"));

    // Status is untouched, but nothing can be sent until a reconnect
    assert_eq!(client.status("srv"), Some(ConnectionStatus::Connected));
    let err = client.request("srv", "slow", None).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Transport { .. }));

    server.on("slow", Reply::Result(json!("back")));
    client.connect(None, options(1_000)).await.unwrap();
    assert_eq!(connector.attempts("srv"), 2);
    assert_eq!(client.request("srv", "slow", None).await.unwrap(), json!("back"));
}

#[tokio::test]
async fn test_disconnect_fails_pending_requests() {
    let (client, _bus, connector) = connected(&["srv"], ClientSettings::default()).await;
    let server = connector.transport("srv");
    server.on("slow", Reply::Hold);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.request("srv", "slow", None).await }
    });
    server.wait_for_held(1).await;

    client.disconnect("srv").await.unwrap();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ProtocolError::Transport { .. }));
    assert_eq!(client.status("srv"), Some(ConnectionStatus::Disconnected));
    assert!(server.is_closed());
    assert!(matches!(
        client.request("srv", "slow", None).await,
        Err(ProtocolError::NotConnected { .. })
    ));
}

#[tokio::test]
async fn test_server_ping_is_answered() {
    let (_client, _bus, connector) = connected(&["srv"], ClientSettings::default()).await;
    let server = connector.transport("srv");

    server.request("ping-1", "ping");
    server.request("ask-1", "sampling/createMessage");
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    let replies: Vec<_> = server
        .sent()
        .into_iter()
        .filter_map(|m| match m {
            Message::Response(response) => Some(response),
            _ => None,
        })
        .collect();
    assert_eq!(replies.len(), 2);

    let ping = replies
        .iter()
        .find(|r| r.id == RequestId::String("ping-1".into()))
        .unwrap();
    assert_eq!(ping.result, Some(json!({})));

    let unsupported = replies
        .iter()
        .find(|r| r.id == RequestId::String("ask-1".into()))
        .unwrap();
    assert_eq!(unsupported.error.as_ref().unwrap().code, -32601);
}

#[tokio::test]
async fn test_other_notifications_are_forwarded() {
    let (_client, bus, connector) = connected(&["srv"], ClientSettings::default()).await;
    let mut rx = bus.subscribe();

    connector
        .transport("srv")
        .notify("notifications/message", Some(json!({"level": "info", "data": "hi"})));

    let events = collect(&mut rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        DomainEvent::ServerNotification {
            server,
            method,
            params,
        } => {
            assert_eq!(server, "srv");
            assert_eq!(method, "notifications/message");
            assert_eq!(params.as_ref().unwrap()["data"], "hi");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_stale_transport_traffic_is_ignored() {
    let (client, bus, connector) = connected(&["srv"], ClientSettings::default()).await;
    let old = connector.transport("srv");
    old.with_tools(&["old"]);

    client.disconnect("srv").await.unwrap();
    let fresh = connector.serve("srv");
    fresh.with_tools(&["new"]);
    client.connect(None, options(1_000)).await.unwrap();

    let tools = client.list_tools(Some("srv")).await.unwrap();
    assert_eq!(tools[0].name, "new");

    let mut rx = bus.subscribe();
    old.notify("notifications/tools/list_changed", None);
    old.drop_connection("old process exited");

    assert!(collect(&mut rx).is_empty());
    assert_eq!(client.last_error("srv"), None);
    client.list_tools(Some("srv")).await.unwrap();
    assert_eq!(fresh.calls("tools/list"), 1);
}
