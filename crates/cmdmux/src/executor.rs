//! ProtocolExecutor - routes qualified command names to server tools
//!
//! `github_search_code` runs tool `search_code` on connection `github` when
//! `github` is a configured connection. Anything else goes to the fallback
//! executor.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use cmdmux_core::{CommandExecutor, CommandOutput, CommandPayload};
use cmdmux_mcp::{resolve_qualified_name, ProtocolClient};
use serde_json::{json, Value};
use tracing::debug;

/// Exit code for a tool result flagged `isError`
pub const TOOL_ERROR_EXIT_CODE: i32 = 1;

pub struct ProtocolExecutor {
    client: ProtocolClient,
    fallback: Option<Arc<dyn CommandExecutor>>,
}

impl ProtocolExecutor {
    pub fn new(client: ProtocolClient, fallback: Option<Arc<dyn CommandExecutor>>) -> Self {
        Self { client, fallback }
    }

    /// Split `name` into (server, tool) if it names a tool of a configured server
    pub fn route<'a>(&self, name: &'a str) -> Option<(&'a str, &'a str)> {
        let (server, tool) = resolve_qualified_name(name)?;
        self.client.status(server)?;
        Some((server, tool))
    }
}

#[async_trait]
impl CommandExecutor for ProtocolExecutor {
    async fn execute(&self, payload: CommandPayload) -> Result<CommandOutput> {
        if let Some((server, tool)) = self.route(&payload.name) {
            debug!(server = %server, tool = %tool, "[ProtocolExecutor] Routing command to server");
            let arguments = match &payload.params {
                Value::Null => json!({}),
                params => params.clone(),
            };
            let result = self
                .client
                .call_tool(server, tool, arguments)
                .await
                .with_context(|| format!("tool call '{}' failed", payload.name))?;

            let text = result.text();
            return Ok(if result.is_error {
                CommandOutput::failure(text, TOOL_ERROR_EXIT_CODE)
            } else {
                CommandOutput::success(text)
            });
        }

        match &self.fallback {
            Some(fallback) => fallback.execute(payload).await,
            None => bail!("no executor for command '{}'", payload.name),
        }
    }
}
