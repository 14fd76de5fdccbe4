use crate::core::config::data::{path_display, Config};
use directories::ProjectDirs;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Errors that can occur when loading configuration from disk.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse the configuration file as valid TOML.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(
                    f,
                    "Failed to read config at {}: {}",
                    path_display(path),
                    source
                )
            }
            ConfigError::Parse { path, source } => {
                write!(
                    f,
                    "Failed to parse config at {}: {}",
                    path_display(path),
                    source
                )
            }
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Default configuration file location (`toolbridge.toml` in the platform
/// config directory).
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "permacommons", "toolbridge")
        .map(|dirs| dirs.config_dir().join("toolbridge.toml"))
}

impl Config {
    pub fn load_from_path(config_path: &Path) -> Result<Config, Box<dyn StdError>> {
        if config_path.exists() {
            let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
                path: config_path.to_path_buf(),
                source,
            })?;
            let config: Config =
                toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: config_path.to_path_buf(),
                    source,
                })?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Load from the default path, falling back to an empty config when no
    /// file exists yet.
    pub fn load() -> Result<Config, Box<dyn StdError>> {
        match default_config_path() {
            Some(path) => Config::load_from_path(&path),
            None => Ok(Config::default()),
        }
    }

    /// Persist the configuration atomically: written to a temp file in the
    /// same directory, then renamed over the target.
    pub fn save_to_path(&self, config_path: &Path) -> Result<(), Box<dyn StdError>> {
        let parent = config_path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let contents = toml::to_string_pretty(self)?;
        let mut temp_file = NamedTempFile::new_in(parent)?;
        temp_file.write_all(contents.as_bytes())?;
        temp_file.flush()?;
        temp_file.persist(config_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::data::ServerDescriptor;

    #[test]
    fn missing_file_loads_default_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::load_from_path(&dir.path().join("nope.toml"))
            .expect("missing file should yield defaults");
        assert!(config.tool_servers.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("toolbridge.toml");

        let config = Config {
            tool_servers: vec![ServerDescriptor {
                id: "alpha".to_string(),
                display_name: "Alpha".to_string(),
                host: "10.0.0.5".to_string(),
                port: 8080,
            }],
            orchestrator_command: vec!["python3".to_string(), "orchestrator.py".to_string()],
            ..Config::default()
        };
        config.save_to_path(&path).expect("save should succeed");

        let loaded = Config::load_from_path(&path).expect("load should succeed");
        assert_eq!(loaded.tool_servers, config.tool_servers);
        assert_eq!(loaded.orchestrator_command, config.orchestrator_command);
    }

    #[test]
    fn invalid_toml_reports_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("toolbridge.toml");
        fs::write(&path, "tool_servers = \"not a list\"").expect("write");

        let err = Config::load_from_path(&path).expect_err("expected parse failure");
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
