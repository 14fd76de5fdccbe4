//! Toolbridge connects a chat agent to remote tool servers and executes
//! model-proposed commands under explicit user approval.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns configuration (server descriptors, orchestrator command,
//!   timeouts) and durable conversation state for tool-call records.
//! - [`mcp`] provides the tool server integration: the SSE transport and
//!   invocation protocol, tool discovery, connection management, the
//!   command approval lifecycle, intent detection in assistant text, and
//!   shell delegation through the external orchestrator.
//! - [`utils`] holds small shared helpers for URL normalization and
//!   message-id generation.
//!
//! There is no binary entrypoint; an embedding chat UI drives
//! [`mcp::connection::ConnectionManager`] and [`mcp::lifecycle`] directly.

pub mod core;
pub mod logging;
pub mod mcp;
pub mod utils;
