//! Command lifecycle: proposal through terminal result.
//!
//! Every tool invocation is tracked as a [`CommandRecord`] owned by a
//! [`CommandLedger`]. The state machine is
//! `proposed → {executing → (succeeded|failed)} | declined`; approval is
//! the `proposed → executing` transition, since dispatch follows it
//! immediately and an approved-but-idle state would never be observable.
//! Terminal records are immutable; any transition attempt on them returns
//! the recorded result unchanged. That guard is the mechanism that makes
//! execution at-most-once — UI re-renders and page-reload replays hit the
//! guard instead of re-dispatching a side-effecting call.

use crate::core::conversation::{ConversationSink, ToolCallEntry};
use crate::mcp::connection::ConnectionManager;
use crate::mcp::is_shell_command_tool;
use crate::mcp::shell::{ShellDelegate, ShellExecutionResult};
use crate::mcp::transport::ToolTransport;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type CommandId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Proposed,
    Executing,
    Succeeded,
    Failed,
    Declined,
}

impl CommandState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandState::Succeeded | CommandState::Failed | CommandState::Declined
        )
    }
}

/// Terminal result of an executed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    pub payload: Option<Value>,
    pub error: Option<String>,
}

impl CommandOutcome {
    pub fn success(payload: Value) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(error.into()),
        }
    }

    pub fn from_shell(result: &ShellExecutionResult) -> Self {
        Self {
            success: result.success,
            payload: serde_json::to_value(result).ok(),
            error: result.error.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub id: CommandId,
    pub tool_name: String,
    /// Mutable until approval; replaced atomically when the user edits
    /// before approving.
    pub parameters: Value,
    pub proposed_at: DateTime<Utc>,
    pub state: CommandState,
    pub result: Option<CommandOutcome>,
    pub completed_at: Option<DateTime<Utc>>,
    persisted: bool,
}

#[derive(Debug)]
pub enum LifecycleError {
    UnknownCommand(CommandId),
    InvalidTransition {
        id: CommandId,
        from: CommandState,
    },
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleError::UnknownCommand(id) => write!(f, "Unknown command record: {id}"),
            LifecycleError::InvalidTransition { id, from } => {
                write!(f, "Invalid transition for command {id} from {from:?}")
            }
        }
    }
}

impl std::error::Error for LifecycleError {}

/// What `approve` decided to do. Only `Dispatch` carries work.
#[derive(Debug)]
pub enum ApproveOutcome {
    /// Transitioned to `Executing`; the caller must run the ticket and
    /// feed the outcome back through [`CommandLedger::complete`].
    Dispatch(DispatchTicket),
    /// The record was already terminal; the recorded result is returned
    /// unchanged and nothing executes again.
    AlreadyTerminal(Option<CommandOutcome>),
    /// The record is already on its way; no second dispatch.
    InFlight,
    /// New dispatches are paused; the record stays `Proposed` so it can be
    /// approved later.
    Paused,
}

/// Snapshot of what to execute, taken at the approval transition.
#[derive(Debug, Clone)]
pub struct DispatchTicket {
    pub id: CommandId,
    pub tool_name: String,
    pub parameters: Value,
}

/// Owns all command records for one conversation.
#[derive(Debug, Default)]
pub struct CommandLedger {
    records: BTreeMap<CommandId, CommandRecord>,
    next_id: CommandId,
}

impl CommandLedger {
    pub fn propose(&mut self, tool_name: impl Into<String>, parameters: Value) -> CommandId {
        self.next_id += 1;
        let id = self.next_id;
        self.records.insert(
            id,
            CommandRecord {
                id,
                tool_name: tool_name.into(),
                parameters,
                proposed_at: Utc::now(),
                state: CommandState::Proposed,
                result: None,
                completed_at: None,
                persisted: false,
            },
        );
        id
    }

    pub fn record(&self, id: CommandId) -> Option<&CommandRecord> {
        self.records.get(&id)
    }

    /// Records in proposal order.
    pub fn records(&self) -> impl Iterator<Item = &CommandRecord> {
        self.records.values()
    }

    /// Replace the parameters of a not-yet-approved record.
    pub fn edit_parameters(
        &mut self,
        id: CommandId,
        parameters: Value,
    ) -> Result<(), LifecycleError> {
        let record = self.record_mut(id)?;
        if record.state != CommandState::Proposed {
            return Err(LifecycleError::InvalidTransition {
                id,
                from: record.state,
            });
        }
        record.parameters = parameters;
        Ok(())
    }

    /// Decline a proposed record. Terminal records are left untouched;
    /// executing records can no longer be declined.
    pub fn decline(&mut self, id: CommandId) -> Result<(), LifecycleError> {
        let record = self.record_mut(id)?;
        if record.state.is_terminal() {
            return Ok(());
        }
        if record.state != CommandState::Proposed {
            return Err(LifecycleError::InvalidTransition {
                id,
                from: record.state,
            });
        }
        record.state = CommandState::Declined;
        record.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Approve a record, optionally replacing its parameters atomically as
    /// part of the transition.
    ///
    /// The approved record moves straight to `Executing`; dispatch is the
    /// caller's next step via the returned ticket. Re-approval of a
    /// terminal record returns the cached result; re-approval of an
    /// in-flight record is a no-op. A set `pause` token gates new
    /// dispatches only — it never touches records already executing.
    pub fn approve(
        &mut self,
        id: CommandId,
        edited_parameters: Option<Value>,
        pause: Option<&CancellationToken>,
    ) -> Result<ApproveOutcome, LifecycleError> {
        let record = self.record_mut(id)?;

        if record.state.is_terminal() {
            return Ok(ApproveOutcome::AlreadyTerminal(record.result.clone()));
        }
        if record.state == CommandState::Executing {
            return Ok(ApproveOutcome::InFlight);
        }
        if pause.is_some_and(|token| token.is_cancelled()) {
            return Ok(ApproveOutcome::Paused);
        }

        if let Some(parameters) = edited_parameters {
            record.parameters = parameters;
        }
        record.state = CommandState::Executing;
        debug!(command = record.id, tool = %record.tool_name, "Command approved for execution");
        Ok(ApproveOutcome::Dispatch(DispatchTicket {
            id: record.id,
            tool_name: record.tool_name.clone(),
            parameters: record.parameters.clone(),
        }))
    }

    /// Record the terminal result of an executing command.
    ///
    /// Completing an already-terminal record is a no-op that returns the
    /// existing result unchanged.
    pub fn complete(
        &mut self,
        id: CommandId,
        outcome: CommandOutcome,
    ) -> Result<CommandOutcome, LifecycleError> {
        let record = self.record_mut(id)?;
        match record.state {
            state if state.is_terminal() => record
                .result
                .clone()
                .ok_or(LifecycleError::InvalidTransition { id, from: state }),
            CommandState::Executing => {
                record.state = if outcome.success {
                    CommandState::Succeeded
                } else {
                    CommandState::Failed
                };
                record.result = Some(outcome.clone());
                record.completed_at = Some(Utc::now());
                Ok(outcome)
            }
            state => Err(LifecycleError::InvalidTransition { id, from: state }),
        }
    }

    /// Fail every executing record, used when the transport closes while
    /// dispatches are in flight. Returns the affected ids.
    pub fn fail_in_flight(&mut self, error: &str) -> Vec<CommandId> {
        let mut failed = Vec::new();
        for record in self.records.values_mut() {
            if record.state == CommandState::Executing {
                record.state = CommandState::Failed;
                record.result = Some(CommandOutcome::failure(error));
                record.completed_at = Some(Utc::now());
                failed.push(record.id);
            }
        }
        failed
    }

    /// Write a terminal record to durable conversation state, exactly once.
    ///
    /// Returns `true` when the entry was written now, `false` when it was
    /// already persisted (retriggered renders hit this path).
    pub fn persist_terminal(
        &mut self,
        id: CommandId,
        sink: &mut dyn ConversationSink,
    ) -> Result<bool, LifecycleError> {
        let record = self.record_mut(id)?;
        if !record.state.is_terminal() {
            return Err(LifecycleError::InvalidTransition {
                id,
                from: record.state,
            });
        }
        if record.persisted {
            return Ok(false);
        }

        let result_text = match &record.result {
            Some(outcome) => outcome
                .error
                .clone()
                .or_else(|| {
                    outcome.payload.as_ref().map(|payload| {
                        serde_json::to_string_pretty(payload)
                            .unwrap_or_else(|_| payload.to_string())
                    })
                })
                .unwrap_or_default(),
            None => "Declined by user.".to_string(),
        };

        sink.append_tool_call(ToolCallEntry {
            tool_name: record.tool_name.clone(),
            command: is_shell_command_tool(&record.tool_name)
                .then(|| {
                    record
                        .parameters
                        .get("command")
                        .and_then(Value::as_str)
                        .map(|cmd| cmd.to_string())
                })
                .flatten(),
            success: record.state == CommandState::Succeeded,
            result_text,
            timestamp: record.completed_at.unwrap_or_else(Utc::now),
        });
        record.persisted = true;
        Ok(true)
    }

    fn record_mut(&mut self, id: CommandId) -> Result<&mut CommandRecord, LifecycleError> {
        self.records
            .get_mut(&id)
            .ok_or(LifecycleError::UnknownCommand(id))
    }
}

/// Routes an execution ticket to the right executor.
///
/// Resolution happens here, at dispatch time, not at proposal time, so a
/// server reconnect between proposal and approval is picked up
/// automatically.
pub struct ExecutionRouter<'a> {
    pub connection: &'a ConnectionManager,
    pub shell: &'a ShellDelegate,
}

impl ExecutionRouter<'_> {
    pub async fn execute(&self, ticket: &DispatchTicket) -> CommandOutcome {
        if is_shell_command_tool(&ticket.tool_name) {
            let Some(server) = self.connection.state().server.clone() else {
                return CommandOutcome::failure("No tool server selected.");
            };
            let Some(command) = ticket.parameters.get("command").and_then(Value::as_str) else {
                return CommandOutcome::failure("Shell invocation is missing the command parameter.");
            };
            let result = self.shell.execute(command, &server, None).await;
            return CommandOutcome::from_shell(&result);
        }

        match self.connection.transport() {
            Some(transport) => match transport
                .invoke(&ticket.tool_name, ticket.parameters.clone())
                .await
            {
                Ok(payload) => CommandOutcome::success(payload),
                Err(err) => CommandOutcome::failure(err.to_string()),
            },
            None => CommandOutcome::failure("Not connected to a tool server."),
        }
    }
}

/// Result of [`run_command`].
#[derive(Debug)]
pub enum RunOutcome {
    Executed(CommandOutcome),
    AlreadyTerminal(Option<CommandOutcome>),
    InFlight,
    Paused,
    /// The edited parameters failed schema validation; nothing was
    /// approved and the record stays `Proposed` with its prior parameters.
    InvalidParameters(String),
}

/// Approve, dispatch, complete, and persist one command end to end.
///
/// Edited parameters are validated against the tool's published schema
/// before the approval transition; a rejected edit leaves the record
/// untouched. The `Executing` transition is applied before the suspending
/// call and the terminal transition after it; no ledger state is held in
/// an intermediate shape across the await.
pub async fn run_command(
    ledger: &mut CommandLedger,
    id: CommandId,
    edited_parameters: Option<Value>,
    router: &ExecutionRouter<'_>,
    pause: Option<&CancellationToken>,
    sink: &mut dyn ConversationSink,
) -> Result<RunOutcome, LifecycleError> {
    if let Some(parameters) = edited_parameters.as_ref() {
        let tool_name = ledger
            .record(id)
            .map(|record| record.tool_name.clone())
            .ok_or(LifecycleError::UnknownCommand(id))?;
        if let Err(err) = router
            .connection
            .registry()
            .validate_parameters(&tool_name, parameters)
        {
            return Ok(RunOutcome::InvalidParameters(err));
        }
    }

    match ledger.approve(id, edited_parameters, pause)? {
        ApproveOutcome::Dispatch(ticket) => {
            let outcome = router.execute(&ticket).await;
            ledger.complete(id, outcome.clone())?;
            ledger.persist_terminal(id, sink)?;
            Ok(RunOutcome::Executed(outcome))
        }
        ApproveOutcome::AlreadyTerminal(result) => Ok(RunOutcome::AlreadyTerminal(result)),
        ApproveOutcome::InFlight => Ok(RunOutcome::InFlight),
        ApproveOutcome::Paused => Ok(RunOutcome::Paused),
    }
}
