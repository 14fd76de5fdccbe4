pub mod data;
pub mod io;

pub use data::{Config, ReconnectConfig, ServerDescriptor, TimeoutConfig};
pub use io::{default_config_path, ConfigError};
