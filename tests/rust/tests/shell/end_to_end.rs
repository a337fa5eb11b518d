//! Commands flowing through queue, dispatcher, executor and client

use std::sync::Arc;

use cmdmux::{CommandShell, TOOL_ERROR_EXIT_CODE};
use cmdmux_core::{
    CommandError, CommandExecutor, CommandPayload, ConnectionStatus, DomainEvent, EventBus,
    OrchestratorConfig, EXECUTION_FAILED_EXIT_CODE,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::events::RecordingSubscriber;
use tests::{GatedExecutor, MockConnector, RecordingExecutor, Reply};

use super::shell;

fn text_result(text: &str, is_error: bool) -> Reply {
    Reply::Result(json!({
        "content": [{"type": "text", "text": text}],
        "isError": is_error,
    }))
}

#[tokio::test]
async fn test_server_tool_command_returns_tool_text() {
    let connector = MockConnector::new();
    let github = connector.serve("github");
    github.on_fn("tools/call", |request, _| {
        let params = request.params.clone().unwrap_or_default();
        assert_eq!(params["name"], "search_code");
        assert_eq!(params["arguments"]["query"], "tokio");
        text_result("3 matches", false)
    });
    let shell = shell(OrchestratorConfig::default(), &connector, &["github"], None);
    shell.connect().await.unwrap();

    let output = shell
        .run(
            CommandPayload::new("github_search_code").with_params(json!({"query": "tokio"})),
            5,
        )
        .await
        .unwrap();

    assert_eq!(output.stdout, "3 matches");
    assert_eq!(output.exit_code, 0);

    let history = shell.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].command, "github_search_code");
    assert_eq!(history[0].stdout, "3 matches");
    shell.shutdown().await;
}

#[tokio::test]
async fn test_tool_error_result_becomes_failed_output() {
    let connector = MockConnector::new();
    connector
        .serve("github")
        .on("tools/call", text_result("rate limited by upstream", true));
    let shell = shell(OrchestratorConfig::default(), &connector, &["github"], None);
    shell.connect().await.unwrap();

    let output = shell
        .run(CommandPayload::new("github_create_issue"), 0)
        .await
        .unwrap();

    assert_eq!(output.exit_code, TOOL_ERROR_EXIT_CODE);
    assert_eq!(output.stderr, "rate limited by upstream");
    assert!(output.stdout.is_empty());

    let entry = &shell.history()[0];
    assert_eq!(entry.exit_code, TOOL_ERROR_EXIT_CODE);
    assert_eq!(entry.error, None);
    shell.shutdown().await;
}

#[tokio::test]
async fn test_remote_error_fails_the_command() {
    let connector = MockConnector::new();
    connector
        .serve("github")
        .on("tools/call", Reply::error(-32602, "unknown tool"));
    let shell = shell(OrchestratorConfig::default(), &connector, &["github"], None);
    shell.connect().await.unwrap();

    let err = shell
        .run(CommandPayload::new("github_nope"), 0)
        .await
        .unwrap_err();

    match err {
        CommandError::Execution { message, .. } => {
            assert!(message.contains("tool call 'github_nope' failed"));
            assert!(message.contains("unknown tool"));
        }
        other => panic!("expected execution error, got {:?}", other),
    }
    assert_eq!(shell.history()[0].exit_code, EXECUTION_FAILED_EXIT_CODE);
    shell.shutdown().await;
}

#[tokio::test]
async fn test_unrouted_commands_use_the_fallback_executor() {
    let connector = MockConnector::new();
    connector.serve("github");
    let fallback = RecordingExecutor::new();
    let shell = shell(
        OrchestratorConfig::default(),
        &connector,
        &["github"],
        Some(fallback.clone() as Arc<dyn CommandExecutor>),
    );
    shell.connect().await.unwrap();

    // "gitlab" is not a configured connection, so this is not a tool call
    let output = shell.run(CommandPayload::new("gitlab_search"), 0).await.unwrap();
    assert_eq!(output.stdout, "gitlab_search");
    shell.run(CommandPayload::new("status"), 0).await.unwrap();

    assert_eq!(fallback.order(), vec!["gitlab_search", "status"]);
    assert_eq!(connector.transport("github").calls("tools/call"), 0);
    shell.shutdown().await;
}

#[tokio::test]
async fn test_history_output_is_truncated() {
    let connector = MockConnector::new();
    connector
        .serve("fs")
        .on("tools/call", text_result("abcdefghijklmnopqrstuvwxyz", false));
    let config = OrchestratorConfig {
        max_stdout_len: 10,
        ..OrchestratorConfig::default()
    };
    let shell = shell(config, &connector, &["fs"], None);
    shell.connect().await.unwrap();

    let output = shell.run(CommandPayload::new("fs_cat"), 0).await.unwrap();
    assert_eq!(output.stdout.len(), 26, "callers get the full output");

    assert_eq!(
        shell.history()[0].stdout,
        "abcdefghij\n... [16 characters truncated]"
    );
    shell.shutdown().await;
}

#[tokio::test]
async fn test_subscribers_see_connection_then_command_events() {
    let connector = MockConnector::new();
    connector.serve("github").on("tools/call", text_result("ok", false));
    let bus = EventBus::new();
    let recorder = RecordingSubscriber::new();
    bus.register(recorder.clone());

    let shell = CommandShell::builder(OrchestratorConfig::default())
        .server("github", connector.as_connector())
        .event_bus(bus)
        .build()
        .unwrap();
    shell.connect().await.unwrap();
    shell.run(CommandPayload::new("github_ping"), 0).await.unwrap();

    assert_eq!(
        recorder.type_names(),
        vec![
            "connection_status_changed",
            "connection_status_changed",
            "command_queued",
            "command_started",
            "command_completed",
        ]
    );
    assert!(matches!(
        recorder.events()[1],
        DomainEvent::ConnectionStatusChanged {
            status: ConnectionStatus::Connected,
            ..
        }
    ));
    shell.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_cancels_pending_and_disconnects() {
    let connector = MockConnector::new();
    connector.serve("github");
    let gate = GatedExecutor::new();
    let config = OrchestratorConfig {
        concurrency: 1,
        ..OrchestratorConfig::default()
    };
    let fallback: Arc<dyn CommandExecutor> = gate.clone();
    let shell = Arc::new(shell(config, &connector, &["github"], Some(fallback)));
    shell.connect().await.unwrap();

    let running = shell.submit(CommandPayload::new("build"), 0).unwrap();
    let queued = shell.submit(CommandPayload::new("deploy"), 0).unwrap();
    gate.wait_started(1).await;

    let stopping = tokio::spawn({
        let shell = Arc::clone(&shell);
        async move { shell.shutdown().await }
    });
    assert!(matches!(queued.await, Err(CommandError::Cancelled { .. })));

    gate.release_all();
    stopping.await.unwrap();
    assert!(running.await.is_ok());

    assert_eq!(
        shell.submit(CommandPayload::new("late"), 0).unwrap_err(),
        CommandError::Closed
    );
    assert_eq!(
        shell.client().status("github"),
        Some(ConnectionStatus::Disconnected)
    );
    assert_eq!(gate.started(), vec!["build"]);
}
