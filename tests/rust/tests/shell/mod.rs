//! CommandShell tests: commands routed to scripted servers end to end

mod end_to_end;

use std::sync::Arc;

use cmdmux::CommandShell;
use cmdmux_core::{CommandExecutor, OrchestratorConfig};
use tests::MockConnector;

/// Shell over `servers`, all resolved through `connector`
pub fn shell(
    config: OrchestratorConfig,
    connector: &Arc<MockConnector>,
    servers: &[&str],
    fallback: Option<Arc<dyn CommandExecutor>>,
) -> CommandShell {
    let mut builder = CommandShell::builder(config);
    for name in servers {
        builder = builder.server(*name, connector.as_connector());
    }
    if let Some(fallback) = fallback {
        builder = builder.executor(fallback);
    }
    builder.build().expect("valid shell configuration")
}
