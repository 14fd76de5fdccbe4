//! Tool server integration: connection management, the invocation
//! protocol, the command lifecycle, and shell delegation.

pub mod connection;
pub mod events;
pub mod intent;
pub mod lifecycle;
pub mod registry;
pub mod shell;
pub mod transport;


/// Canonical name of the shell execution tool.
pub const SHELL_COMMAND_TOOL: &str = "runShellCommand";

/// Whether `name` refers to the shell execution tool. Matching is
/// case-insensitive; servers and model output disagree on casing.
pub fn is_shell_command_tool(name: &str) -> bool {
    name.eq_ignore_ascii_case(SHELL_COMMAND_TOOL)
}
