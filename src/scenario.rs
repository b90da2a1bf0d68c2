//! The fixed probe script and its per-step report.
//!
//! Steps run in order; a fatal transport failure halts the run, anything
//! else is recorded and the script moves on. Diagnostic coverage beats
//! strict conformance here.

use std::fmt;
use std::time::Duration;

use lsp_types::Url;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::lsp::error::ProbeError;
use crate::lsp::messages;
use crate::lsp::session::{Reply, SessionClient};

pub struct ScenarioInput {
    pub root_uri: Url,
    pub document_uri: Url,
    pub language_id: String,
    pub text: String,
    pub line: u32,
    pub character: u32,
    pub reply_timeout: Duration,
}

#[derive(Debug)]
pub enum StepOutcome {
    Passed(String),
    Failed(ProbeError),
    Fatal(ProbeError),
}

#[derive(Debug)]
pub struct StepReport {
    pub name: &'static str,
    pub outcome: StepOutcome,
}

#[derive(Debug, Default)]
pub struct ScenarioReport {
    pub steps: Vec<StepReport>,
    pub server_notifications: Vec<String>,
    pub unanswered_requests: usize,
}

impl ScenarioReport {
    pub fn is_fatal(&self) -> bool {
        self.steps
            .iter()
            .any(|step| matches!(step.outcome, StepOutcome::Fatal(_)))
    }

    /// Record a step outcome. Returns whether the scenario may continue.
    fn record(&mut self, name: &'static str, result: Result<String, ProbeError>) -> bool {
        match result {
            Ok(detail) => {
                info!(step = name, %detail, "step passed");
                self.steps.push(StepReport {
                    name,
                    outcome: StepOutcome::Passed(detail),
                });
                true
            }
            Err(e) if e.is_fatal() => {
                error!(step = name, error = %e, "fatal failure, halting scenario");
                self.steps.push(StepReport {
                    name,
                    outcome: StepOutcome::Fatal(e),
                });
                false
            }
            Err(e) => {
                warn!(step = name, error = %e, "step failed, continuing");
                self.steps.push(StepReport {
                    name,
                    outcome: StepOutcome::Failed(e),
                });
                true
            }
        }
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            match &step.outcome {
                StepOutcome::Passed(detail) => {
                    writeln!(f, "PASS  {:<24} {detail}", step.name)?
                }
                StepOutcome::Failed(e) => writeln!(f, "FAIL  {:<24} {e}", step.name)?,
                StepOutcome::Fatal(e) => writeln!(f, "FATAL {:<24} {e}", step.name)?,
            }
        }
        if !self.server_notifications.is_empty() {
            writeln!(
                f,
                "server notifications: {}",
                self.server_notifications.join(", ")
            )?;
        }
        if self.unanswered_requests > 0 {
            writeln!(f, "requests left unanswered: {}", self.unanswered_requests)?;
        }
        let passed = self
            .steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Passed(_)))
            .count();
        writeln!(f, "{passed}/{} steps passed", self.steps.len())
    }
}

/// Run the scripted exchange: handshake, open the document, ask for
/// completion, shut the server down.
pub async fn run(session: &mut SessionClient, input: &ScenarioInput) -> ScenarioReport {
    let mut report = ScenarioReport::default();

    if report.record("initialize", initialize(session, input).await)
        && report.record("initialized", initialized(session).await)
        && report.record("textDocument/didOpen", did_open(session, input).await)
        && report.record("textDocument/completion", completion(session, input).await)
        && report.record("shutdown", shutdown(session, input.reply_timeout).await)
    {
        report.record("exit", exit(session).await);
    }

    report.server_notifications = session
        .take_notifications()
        .into_iter()
        .map(|n| n.method)
        .collect();
    report.unanswered_requests = session.pending_count();
    session.close();
    report
}

async fn initialize(
    session: &mut SessionClient,
    input: &ScenarioInput,
) -> Result<String, ProbeError> {
    let params = serde_json::to_value(messages::initialize_params(&input.root_uri))?;
    let id = session.send_request("initialize", Some(params)).await?;

    match session.await_reply(input.reply_timeout).await? {
        Reply::Success {
            id: reply_id,
            result,
            ..
        } => {
            if reply_id != id {
                return Err(ProbeError::Protocol(format!(
                    "initialize reply answered id {reply_id}, expected {id}"
                )));
            }
            if result.get("capabilities").is_none() {
                return Err(ProbeError::Protocol(
                    "initialize result has no capabilities field".to_string(),
                ));
            }
            Ok(describe_server(&result))
        }
        Reply::Failure { error, .. } => Err(ProbeError::Protocol(format!(
            "initialize rejected: {} (code {})",
            error.message, error.code
        ))),
    }
}

async fn initialized(session: &mut SessionClient) -> Result<String, ProbeError> {
    session
        .send_notification("initialized", Some(serde_json::json!({})))
        .await?;
    Ok("handshake complete".to_string())
}

async fn did_open(
    session: &mut SessionClient,
    input: &ScenarioInput,
) -> Result<String, ProbeError> {
    let params = serde_json::to_value(messages::did_open_params(
        &input.document_uri,
        &input.language_id,
        1,
        &input.text,
    ))?;
    session
        .send_notification("textDocument/didOpen", Some(params))
        .await?;
    Ok(format!(
        "opened {} ({} bytes)",
        input.document_uri,
        input.text.len()
    ))
}

async fn completion(
    session: &mut SessionClient,
    input: &ScenarioInput,
) -> Result<String, ProbeError> {
    let params = serde_json::to_value(messages::completion_params(
        &input.document_uri,
        input.line,
        input.character,
    ))?;
    let id = session
        .send_request("textDocument/completion", Some(params))
        .await?;

    match session.await_reply(input.reply_timeout).await? {
        Reply::Success {
            id: reply_id,
            result,
            ..
        } => {
            if reply_id != id {
                return Err(ProbeError::Protocol(format!(
                    "completion reply answered id {reply_id}, expected {id}"
                )));
            }
            match completion_item_count(&result) {
                Some(count) => Ok(format!(
                    "{count} completion items at {}:{}",
                    input.line, input.character
                )),
                None => Err(ProbeError::Protocol(format!(
                    "completion result is neither a list nor an item container: {result}"
                ))),
            }
        }
        Reply::Failure { error, .. } => Err(ProbeError::Protocol(format!(
            "completion rejected: {} (code {})",
            error.message, error.code
        ))),
    }
}

async fn shutdown(session: &mut SessionClient, timeout: Duration) -> Result<String, ProbeError> {
    session.send_request("shutdown", None).await?;
    match session.await_reply(timeout).await? {
        Reply::Success { .. } => Ok("server acknowledged shutdown".to_string()),
        Reply::Failure { error, .. } => Err(ProbeError::Protocol(format!(
            "shutdown rejected: {} (code {})",
            error.message, error.code
        ))),
    }
}

async fn exit(session: &mut SessionClient) -> Result<String, ProbeError> {
    session.send_notification("exit", None).await?;
    Ok("server told to exit".to_string())
}

fn describe_server(result: &Value) -> String {
    match result
        .get("serverInfo")
        .and_then(|info| info.get("name"))
        .and_then(Value::as_str)
    {
        Some(name) => format!("server '{name}' declared capabilities"),
        None => "server declared capabilities".to_string(),
    }
}

/// The result of a completion request is either a bare item list or a
/// `CompletionList` object carrying `items`.
fn completion_item_count(result: &Value) -> Option<usize> {
    if let Some(items) = result.as_array() {
        return Some(items.len());
    }
    result
        .get("items")
        .and_then(Value::as_array)
        .map(|items| items.len())
}
