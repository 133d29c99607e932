//! Console security configuration

use serde::{Deserialize, Serialize};

/// An operator-defined blocked command rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedCommand {
    /// Case-insensitive regular expression; matched literally if it does not compile
    pub pattern: String,
    /// Shown to the operator when the rule fires
    pub reason: String,
}

impl BlockedCommand {
    /// Create a new rule
    pub fn new(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

/// Process-wide console settings, read by the policy engine on every check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Global kill switch for new console sessions
    pub enabled: bool,

    /// Whether commands may start with `sudo`
    pub allow_sudo: bool,

    /// Paths that must not be the target of redirection, tee, mv or cp
    pub blocked_paths: Vec<String>,

    /// Operator rules checked after the built-in dangerous patterns
    pub blocked_commands: Vec<BlockedCommand>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_sudo: false,
            blocked_paths: [
                "/etc/passwd",
                "/etc/shadow",
                "/etc/sudoers",
                "/boot",
                "/proc",
                "/sys",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            blocked_commands: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConsoleConfig::default();
        assert!(config.enabled);
        assert!(!config.allow_sudo);
        assert!(config.blocked_paths.iter().any(|p| p == "/etc/shadow"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ConsoleConfig = toml::from_str("allow_sudo = true").unwrap();
        assert!(config.allow_sudo);
        assert!(config.enabled);
        assert_eq!(config.blocked_paths.len(), 6);
    }
}
