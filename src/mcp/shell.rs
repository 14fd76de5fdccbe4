//! Shell command delegation through the external orchestrator.
//!
//! The orchestrator is a separate process that forwards `runShellCommand`
//! to the target server and prints the result. Its stdout is not clean
//! JSON: logging noise is interleaved with the structured payload, so
//! normalization is a three-tier fallback rather than a strict parse.
//!
//! This component performs no command validation or sandboxing. Permitting
//! a command is entirely the remote server's responsibility; treating this
//! layer as a safety boundary would be a mistake.

use crate::core::config::data::ServerDescriptor;
use crate::utils::url::server_base_url;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const SHELL_TOOL_WIRE_NAME: &str = "runShellCommand";

/// Normalized orchestrator output.
///
/// Callers must handle all three shapes explicitly; log noise on the
/// stream is expected, not exceptional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorOutput {
    /// A well-formed JSON object was recovered.
    Parsed(Value),
    /// No JSON was recoverable but the process succeeded; the captured
    /// stdout is passed through verbatim.
    PartialText(String),
    /// The process failed and nothing structured could be salvaged.
    Failed(String),
}

/// Outcome of one orchestrator invocation. Immutable once produced.
#[derive(Debug, Clone, Serialize)]
pub struct ShellExecutionResult {
    pub command: String,
    pub success: bool,
    pub output: Option<String>,
    pub stderr: Option<String>,
    pub error: Option<String>,
    pub server: ServerDescriptor,
    pub timestamp: DateTime<Utc>,
}

pub struct ShellDelegate {
    orchestrator: Vec<String>,
    timeout: Duration,
}

impl ShellDelegate {
    pub fn new(orchestrator_command: Vec<String>, timeout_secs: u64) -> Result<Self, String> {
        if orchestrator_command.is_empty() {
            return Err("Orchestrator command is not configured.".to_string());
        }
        Ok(Self {
            orchestrator: orchestrator_command,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Run `command` on `server` through the orchestrator.
    ///
    /// The child is bounded by `timeout` (falling back to the configured
    /// default) and forcibly killed when it elapses; no orchestrator
    /// process is left running in the background.
    pub async fn execute(
        &self,
        command: &str,
        server: &ServerDescriptor,
        timeout: Option<Duration>,
    ) -> ShellExecutionResult {
        let timeout = timeout.unwrap_or(self.timeout);
        let parameters = serde_json::json!({ "command": command }).to_string();
        let base_url = server_base_url(server);

        debug!(server = %server.id, "Delegating shell command to orchestrator");
        let mut child_command = Command::new(&self.orchestrator[0]);
        child_command
            .args(&self.orchestrator[1..])
            .arg("--server")
            .arg(&base_url)
            .arg(SHELL_TOOL_WIRE_NAME)
            .arg(&parameters)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match child_command.spawn() {
            Ok(child) => child,
            Err(err) => {
                return self.result_from_error(
                    command,
                    server,
                    format!("Failed to launch orchestrator: {err}"),
                );
            }
        };

        // wait_with_output owns the child; dropping the future on timeout
        // kills the process via kill_on_drop.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return self.result_from_error(
                    command,
                    server,
                    format!("Orchestrator I/O failure: {err}"),
                );
            }
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Orchestrator timed out; child killed"
                );
                return self.result_from_error(command, server, "timeout".to_string());
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_ok = output.status.success();

        let (success, normalized_output, error) =
            match parse_orchestrator_output(&stdout, exit_ok) {
                OrchestratorOutput::Parsed(value) => {
                    let reported_error = value
                        .get("error")
                        .and_then(Value::as_str)
                        .map(|err| err.to_string());
                    let rendered = serde_json::to_string_pretty(&value)
                        .unwrap_or_else(|_| value.to_string());
                    (
                        exit_ok && reported_error.is_none(),
                        Some(rendered),
                        reported_error,
                    )
                }
                OrchestratorOutput::PartialText(text) => (exit_ok, Some(text), None),
                OrchestratorOutput::Failed(message) => (false, None, Some(message)),
            };

        ShellExecutionResult {
            command: command.to_string(),
            success,
            output: normalized_output,
            stderr: (!stderr.is_empty()).then_some(stderr),
            error,
            server: server.clone(),
            timestamp: Utc::now(),
        }
    }

    fn result_from_error(
        &self,
        command: &str,
        server: &ServerDescriptor,
        error: String,
    ) -> ShellExecutionResult {
        ShellExecutionResult {
            command: command.to_string(),
            success: false,
            output: None,
            stderr: None,
            error: Some(error),
            server: server.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Three-tier normalization of the orchestrator's mixed output.
///
/// 1. Strict parse of the whole capture as one JSON object.
/// 2. Recover the last top-level JSON object embedded in the text; log
///    lines may precede it and objects may span lines (pretty-printed).
/// 3. Fall back to plain text, with success inferred from the exit code.
pub fn parse_orchestrator_output(stdout: &str, exit_ok: bool) -> OrchestratorOutput {
    let trimmed = stdout.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return OrchestratorOutput::Parsed(value);
        }
    }

    if let Some(value) = last_embedded_json_object(stdout) {
        return OrchestratorOutput::Parsed(value);
    }

    if exit_ok {
        OrchestratorOutput::PartialText(stdout.to_string())
    } else if trimmed.is_empty() {
        OrchestratorOutput::Failed("Orchestrator exited with failure and no output.".to_string())
    } else {
        OrchestratorOutput::Failed(format!("Orchestrator exited with failure: {trimmed}"))
    }
}

/// Find the last top-level JSON object embedded in `text`.
///
/// Candidates are probed left to right; a successful parse skips past its
/// span so nested objects are not mistaken for separate candidates.
fn last_embedded_json_object(text: &str) -> Option<Value> {
    let mut last = None;
    let mut index = 0;

    while let Some(offset) = text[index..].find('{') {
        let start = index + offset;
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) if value.is_object() => {
                let consumed = stream.byte_offset().max(1);
                last = Some(value);
                index = start + consumed;
            }
            _ => {
                index = start + 1;
            }
        }
    }

    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_server() -> ServerDescriptor {
        ServerDescriptor {
            id: "alpha".to_string(),
            display_name: "Alpha".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }

    fn delegate(orchestrator: &[&str], timeout_secs: u64) -> ShellDelegate {
        ShellDelegate::new(
            orchestrator.iter().map(|s| s.to_string()).collect(),
            timeout_secs,
        )
        .expect("delegate should build")
    }

    #[test]
    fn pure_json_matches_direct_decoding() {
        let raw = r#"{"stdout": "hello\n", "stderr": "", "exitCode": 0}"#;
        let parsed = parse_orchestrator_output(raw, true);
        let direct: Value = serde_json::from_str(raw).expect("direct decode");
        assert_eq!(parsed, OrchestratorOutput::Parsed(direct));
    }

    #[test]
    fn log_lines_before_json_are_skipped() {
        let raw = "2024-05-01 12:00:00 - mcp_orchestrator - INFO - Connecting\n\
                   Connected with client ID: abc\n\
                   Executing tool on remote server: http://10.0.0.5:8080\n\
                   {\"stdout\": \"done\", \"exitCode\": 0}";
        let parsed = parse_orchestrator_output(raw, true);
        assert_eq!(
            parsed,
            OrchestratorOutput::Parsed(json!({ "stdout": "done", "exitCode": 0 }))
        );
    }

    #[test]
    fn pretty_printed_json_spanning_lines_is_recovered() {
        let raw = "INFO starting\n{\n  \"stdout\": \"x\",\n  \"nested\": {\"a\": 1}\n}\n";
        let parsed = parse_orchestrator_output(raw, true);
        assert_eq!(
            parsed,
            OrchestratorOutput::Parsed(json!({ "stdout": "x", "nested": { "a": 1 } }))
        );
    }

    #[test]
    fn nested_objects_are_not_mistaken_for_candidates() {
        let raw = "noise\n{\"outer\": {\"inner\": 1}}\n";
        let parsed = parse_orchestrator_output(raw, true);
        assert_eq!(
            parsed,
            OrchestratorOutput::Parsed(json!({ "outer": { "inner": 1 } }))
        );
    }

    #[test]
    fn later_objects_win_over_earlier_ones() {
        let raw = "{\"first\": 1}\nlog line\n{\"second\": 2}";
        // Not a single valid document, so tier two picks the last object.
        let parsed = parse_orchestrator_output(raw, true);
        assert_eq!(parsed, OrchestratorOutput::Parsed(json!({ "second": 2 })));
    }

    #[test]
    fn plain_text_with_clean_exit_passes_through_verbatim() {
        let raw = "total 0\ndrwxr-xr-x 2 user user 40 .\n";
        let parsed = parse_orchestrator_output(raw, true);
        assert_eq!(parsed, OrchestratorOutput::PartialText(raw.to_string()));
    }

    #[test]
    fn plain_text_with_failed_exit_is_a_failure() {
        let parsed = parse_orchestrator_output("boom", false);
        assert!(matches!(parsed, OrchestratorOutput::Failed(msg) if msg.contains("boom")));
    }

    #[test]
    fn empty_command_line_is_rejected() {
        assert!(ShellDelegate::new(Vec::new(), 30).is_err());
    }

    #[tokio::test]
    async fn executes_orchestrator_and_parses_result() {
        // sh -c ignores the appended orchestrator arguments; they land in $0
        // and onward.
        let delegate = delegate(
            &[
                "sh",
                "-c",
                "printf 'INFO connecting\\n{\"stdout\":\"hi\\\\n\",\"exitCode\":0}\\n'",
            ],
            5,
        );
        let result = delegate.execute("echo hi", &test_server(), None).await;
        assert!(result.success);
        assert!(result.error.is_none());
        assert!(result.output.as_deref().unwrap_or("").contains("\"stdout\""));
    }

    #[tokio::test]
    async fn reported_error_key_marks_failure() {
        let delegate = delegate(
            &["sh", "-c", "printf '{\"error\":\"No command specified\"}'"],
            5,
        );
        let result = delegate.execute("ls", &test_server(), None).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No command specified"));
    }

    #[tokio::test]
    async fn plain_text_success_is_passed_through() {
        let delegate = delegate(&["sh", "-c", "printf 'hello world'"], 5);
        let result = delegate.execute("echo", &test_server(), None).await;
        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn timeout_kills_the_child_and_reports_timeout() {
        let delegate = delegate(&["sh", "-c", "sleep 30"], 1);
        let started = std::time::Instant::now();
        let result = delegate.execute("sleep", &test_server(), None).await;
        let elapsed = started.elapsed();

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("timeout"));
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn per_call_timeout_overrides_the_default() {
        let delegate = delegate(&["sh", "-c", "sleep 30"], 600);
        let started = std::time::Instant::now();
        let result = delegate
            .execute("sleep", &test_server(), Some(Duration::from_secs(1)))
            .await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("timeout"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
