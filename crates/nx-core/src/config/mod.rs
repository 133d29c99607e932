//! Configuration management for the console gateway

mod console;
mod gateway;
mod node;
pub mod serde_utils;

pub use console::{BlockedCommand, ConsoleConfig};
pub use gateway::{GatewayConfig, ServerConfig, SshConfig, TunnelConfig};
pub use node::NodeProfile;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ConfigError;

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nexus")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("gateway.toml")
}

/// Get the default directory for keys and persisted console settings
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nexus")
}

/// Read a TOML file into `T`
pub fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    tracing::debug!("Loading config from {:?}", path);

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Err(e) => {
            return Err(ConfigError::Invalid(format!(
                "cannot read {}: {}",
                path.display(),
                e
            )));
        }
    };
    Ok(toml::from_str(&content)?)
}

/// Write `config` as TOML, creating parent directories.
///
/// The file is written next to its destination and renamed into place, so a
/// reader never sees half a file.
pub fn save_config<T: Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    let io_error = |what: &str, e: std::io::Error| {
        ConfigError::Invalid(format!("cannot {} {}: {}", what, path.display(), e))
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error("create directory for", e))?;
    }
    let staging = path.with_extension("toml.tmp");
    std::fs::write(&staging, content).map_err(|e| io_error("write", e))?;
    std::fs::rename(&staging, path).map_err(|e| io_error("replace", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config::<GatewayConfig>(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_save_then_load_console_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("console.toml");

        let mut console = ConsoleConfig::default();
        console.allow_sudo = true;
        console.blocked_commands.push(BlockedCommand::new("^docker rm", "No container removal"));
        save_config(&path, &console).unwrap();
        assert!(!path.with_extension("toml.tmp").exists());

        let loaded: ConsoleConfig = load_config(&path).unwrap();
        assert_eq!(loaded, console);
    }
}
