//! Process lifecycle glue around the scripted scenario.

use std::time::Duration;

use anyhow::{anyhow, Context};
use lsp_types::Url;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::time;
use tracing::{debug, warn};

use crate::cli::Config;
use crate::lsp::session::SessionClient;
use crate::lsp::transport;
use crate::scenario::{self, ScenarioInput};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Run the probe end to end. Returns the process exit code: non-zero only
/// for a fatal transport or framing failure.
pub async fn run(config: Config) -> anyhow::Result<i32> {
    let text = tokio::fs::read_to_string(&config.document)
        .await
        .with_context(|| format!("failed to read document '{}'", config.document))?;

    let input = ScenarioInput {
        root_uri: to_file_url(&config.workspace).context("invalid workspace root")?,
        document_uri: to_file_url(&config.document).context("invalid document path")?,
        language_id: config.language_id.clone(),
        text,
        line: config.line,
        character: config.character,
        reply_timeout: config.reply_timeout(),
    };

    let (mut child, stdio, stderr) = transport::spawn_server(&config.server, &config.server_args)?;
    let stderr_task = tokio::spawn(forward_stderr(stderr));

    let mut session = SessionClient::new(Box::new(stdio));
    let report = scenario::run(&mut session, &input).await;

    // Dropping the session closes the server's stdin, so even a server that
    // ignored the exit notification sees EOF before the grace period.
    drop(session);

    print!("{report}");

    reap_server(&mut child).await;
    stderr_task.abort();

    Ok(if report.is_fatal() { 1 } else { 0 })
}

async fn reap_server(child: &mut Child) {
    match time::timeout(SHUTDOWN_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!(%status, "server exited"),
        Ok(Err(e)) => warn!(error = %e, "failed waiting for server exit"),
        Err(_) => {
            warn!("server still running after {SHUTDOWN_GRACE:?}, killing it");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill server");
            }
        }
    }
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "server_stderr", "{line}");
    }
}

fn to_file_url(path: &str) -> anyhow::Result<Url> {
    if path.starts_with("file://") {
        return Url::parse(path).with_context(|| format!("unparseable URL '{path}'"));
    }
    let absolute = std::path::Path::new(path)
        .canonicalize()
        .with_context(|| format!("cannot resolve path '{path}'"))?;
    Url::from_file_path(&absolute).map_err(|_| anyhow!("path '{path}' does not form a file URL"))
}
