//! Tool discovery snapshot for a connected server.
//!
//! Discovery runs exactly once per successful connection (`GET /tools`);
//! the snapshot is replaced wholesale on reconnect, never merged.

use crate::utils::url::construct_endpoint_url;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Immutable description of one remote tool.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON Schema for the tool's parameters, as published by the server.
    #[serde(default, rename = "parameters")]
    pub parameter_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ToolsListing {
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    /// Fetch the tool list from a connected server.
    ///
    /// A failure here fails the whole connection attempt: a server without a
    /// usable tool list is not a useful connection.
    pub async fn discover(http: &reqwest::Client, base_url: &str) -> Result<Self, String> {
        let url = construct_endpoint_url(base_url, "tools");
        debug!(url = %url, "Fetching tool listing");

        let response = http.get(&url).send().await.map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }

        let listing: ToolsListing = response.json().await.map_err(|err| err.to_string())?;
        debug!(count = listing.tools.len(), "Tool listing retrieved");

        let mut tools = HashMap::with_capacity(listing.tools.len());
        for tool in listing.tools {
            let key = tool.name.to_ascii_lowercase();
            if tools.insert(key, tool).is_some() {
                warn!("Duplicate tool name in listing; keeping the last entry");
            }
        }
        Ok(Self { tools })
    }

    pub fn from_tools(descriptors: Vec<ToolDescriptor>) -> Self {
        let tools = descriptors
            .into_iter()
            .map(|tool| (tool.name.to_ascii_lowercase(), tool))
            .collect();
        Self { tools }
    }

    pub fn find(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tools(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values()
    }

    /// Validate edited parameters against the tool's published schema.
    ///
    /// Tools without a schema accept anything; the server remains the final
    /// authority either way.
    pub fn validate_parameters(&self, name: &str, parameters: &Value) -> Result<(), String> {
        let Some(tool) = self.find(name) else {
            return Err(format!("Unknown tool: {name}"));
        };
        let Some(schema) = tool.parameter_schema.as_ref() else {
            return Ok(());
        };
        if schema.is_null() {
            return Ok(());
        }

        let validator = jsonschema::validator_for(schema)
            .map_err(|err| format!("Invalid parameter schema for {name}: {err}"))?;
        let errors: Vec<String> = validator
            .iter_errors(parameters)
            .map(|err| err.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "Parameters rejected by schema for {name}: {}",
                errors.join("; ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_with_shell_tool() -> ToolRegistry {
        ToolRegistry::from_tools(vec![ToolDescriptor {
            name: "runShellCommand".to_string(),
            description: Some("Run a shell command".to_string()),
            parameter_schema: Some(json!({
                "type": "object",
                "properties": { "command": { "type": "string" } },
                "required": ["command"]
            })),
        }])
    }

    #[test]
    fn find_is_case_insensitive() {
        let registry = registry_with_shell_tool();
        assert!(registry.find("runshellcommand").is_some());
        assert!(registry.find("RUNSHELLCOMMAND").is_some());
        assert!(registry.find("readFile").is_none());
    }

    #[test]
    fn listing_parses_wire_shape() {
        let listing: ToolsListing = serde_json::from_value(json!({
            "tools": [
                { "name": "readDirectory", "description": "List a directory",
                  "parameters": { "type": "object" } },
                { "name": "readFile" }
            ]
        }))
        .expect("listing should parse");
        assert_eq!(listing.tools.len(), 2);
        assert!(listing.tools[1].parameter_schema.is_none());
    }

    #[test]
    fn validates_parameters_against_schema() {
        let registry = registry_with_shell_tool();
        assert!(registry
            .validate_parameters("runShellCommand", &json!({ "command": "ls" }))
            .is_ok());

        let err = registry
            .validate_parameters("runShellCommand", &json!({ "command": 7 }))
            .expect_err("expected schema rejection");
        assert!(err.contains("runShellCommand"));
    }

    #[test]
    fn missing_schema_accepts_anything() {
        let registry = ToolRegistry::from_tools(vec![ToolDescriptor {
            name: "combinationTask".to_string(),
            description: None,
            parameter_schema: None,
        }]);
        assert!(registry
            .validate_parameters("combinationTask", &json!({ "anything": true }))
            .is_ok());
    }

    #[test]
    fn unknown_tool_is_rejected() {
        let registry = registry_with_shell_tool();
        let err = registry
            .validate_parameters("deleteEverything", &json!({}))
            .expect_err("expected unknown-tool error");
        assert!(err.contains("Unknown tool"));
    }
}
