//! Tool-invocation intent detection in assistant text.
//!
//! Assistant output may embed a JSON object naming a tool and its
//! parameters, inline or inside a code fence, surrounded by prose. The
//! detector locates the *smallest* well-formed JSON object carrying a
//! `tool` key; greedy matching to the last closing brace in the message
//! was a past source of false positives and is deliberately avoided.
//!
//! Extraction is total and side-effect free: no network, no state. The UI
//! may call it repeatedly against streaming partial text; deduplicating by
//! message id is the caller's job, not the detector's.

use serde_json::Value;
use std::ops::Range;

/// One candidate command extracted from assistant text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandProposal {
    pub tool: String,
    pub parameters: Value,
    /// Byte range of the matched JSON object within the input; trailing
    /// prose after `span.end` is untouched.
    pub span: Range<usize>,
}

impl CommandProposal {
    /// The shell command text, when the proposal targets the shell tool.
    pub fn shell_command(&self) -> Option<&str> {
        self.parameters.get("command").and_then(Value::as_str)
    }
}

/// Scan `text` for an embedded tool invocation.
///
/// `is_known_tool` filters the `tool` key against the connected server's
/// registry so conversational text that merely mentions a tool name never
/// matches. Among all well-formed candidates the smallest span wins; ties
/// go to the earliest.
pub fn extract_command(
    text: &str,
    is_known_tool: impl Fn(&str) -> bool,
) -> Option<CommandProposal> {
    let mut best: Option<CommandProposal> = None;
    let mut index = 0;

    while let Some(offset) = text[index..].find('{') {
        let start = index + offset;
        index = start + 1;

        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        let Some(Ok(value)) = stream.next() else {
            continue;
        };
        let consumed = stream.byte_offset();

        let Some(tool) = value.get("tool").and_then(Value::as_str) else {
            continue;
        };
        if !is_known_tool(tool) {
            continue;
        }
        let Some(parameters) = value.get("parameters").filter(|p| p.is_object()) else {
            continue;
        };

        let candidate = CommandProposal {
            tool: tool.to_string(),
            parameters: parameters.clone(),
            span: start..start + consumed,
        };
        let better = match &best {
            None => true,
            Some(current) => candidate.span.len() < current.span.len(),
        };
        if better {
            best = Some(candidate);
        }
    }

    best
}
