use serde::{Deserialize, Serialize};
use std::path::Path;

/// A remote tool server a user may connect to.
///
/// Immutable once a connection attempt starts; the bridge only reads these,
/// ownership stays with the configuration store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub id: String,
    pub display_name: String,
    pub host: String,
    pub port: u16,
}

/// Timeout knobs for the suspension points of the bridge.
///
/// Every operation that awaits I/O is bounded by one of these; nothing in
/// the bridge waits indefinitely.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimeoutConfig {
    /// Seconds to wait for the SSE handshake to deliver a client id.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_secs: u64,
    /// Seconds to wait for a correlated tool result after a request is
    /// acknowledged.
    #[serde(default = "default_request_timeout_secs")]
    pub request_secs: u64,
    /// Seconds a delegated shell command may run before the orchestrator
    /// process is killed.
    #[serde(default = "default_shell_timeout_secs")]
    pub shell_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_secs: default_handshake_timeout_secs(),
            request_secs: default_request_timeout_secs(),
            shell_secs: default_shell_timeout_secs(),
        }
    }
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_shell_timeout_secs() -> u64 {
    30
}

/// Automatic reconnect policy after transport-reported errors.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReconnectConfig {
    /// Number of automatic attempts before surfacing an error to the caller.
    #[serde(default = "default_reconnect_attempts")]
    pub max_attempts: u32,
    /// Base delay in milliseconds; doubled per attempt.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_reconnect_attempts(),
            base_delay_ms: default_reconnect_base_delay_ms(),
        }
    }
}

fn default_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_base_delay_ms() -> u64 {
    500
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Config {
    /// Tool servers available for connection, keyed by `id`.
    #[serde(default)]
    pub tool_servers: Vec<ServerDescriptor>,
    /// Command line that launches the shell orchestrator, e.g.
    /// `["python3", "scripts/orchestrator.py"]`. Target server, tool name,
    /// and parameters are appended per invocation.
    #[serde(default)]
    pub orchestrator_command: Vec<String>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Config {
    pub fn find_server(&self, id: &str) -> Option<&ServerDescriptor> {
        self.tool_servers
            .iter()
            .find(|server| server.id.eq_ignore_ascii_case(id))
    }
}

/// Get a user-friendly display string for a path, using ~ notation on
/// Unix-like systems when the path sits under the home directory.
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = std::path::PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_server_is_case_insensitive() {
        let config = Config {
            tool_servers: vec![ServerDescriptor {
                id: "Alpha".to_string(),
                display_name: "Alpha".to_string(),
                host: "127.0.0.1".to_string(),
                port: 8080,
            }],
            ..Config::default()
        };
        assert!(config.find_server("alpha").is_some());
        assert!(config.find_server("beta").is_none());
    }

    #[test]
    fn timeouts_default_when_absent() {
        let config: Config = toml::from_str(
            r#"
            [[tool_servers]]
            id = "alpha"
            display_name = "Alpha"
            host = "10.0.0.5"
            port = 8080
            "#,
        )
        .expect("config should parse");
        assert_eq!(config.timeouts.handshake_secs, 10);
        assert_eq!(config.timeouts.request_secs, 30);
        assert_eq!(config.reconnect.max_attempts, 3);
    }
}
