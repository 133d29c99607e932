//! Core domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Unique identifier for a monitored node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Create a new node ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What the node registry knows about a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// Node identifier
    pub id: NodeId,
    /// Hostname the node's agent reported
    pub hostname: String,
    /// Per-node console switch
    pub console_enabled: bool,
    /// Free-form facts reported by the agent (os, arch, ip, ...)
    #[serde(default)]
    pub system_info: BTreeMap<String, String>,
}

impl NodeInfo {
    /// Create a node with the console enabled and no system info
    pub fn new(id: impl Into<NodeId>, hostname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hostname: hostname.into(),
            console_enabled: true,
            system_info: BTreeMap::new(),
        }
    }

    /// Whether this node runs on the same machine as the gateway.
    ///
    /// Hostnames are compared case-insensitively and without any domain
    /// suffix, since agents and the OS disagree on whether to report FQDNs.
    pub fn is_same_host(&self, gateway_hostname: &str) -> bool {
        short_hostname(&self.hostname).eq_ignore_ascii_case(short_hostname(gateway_hostname))
    }
}

fn short_hostname(name: &str) -> &str {
    let name = name.trim();
    name.split('.').next().unwrap_or(name)
}

/// Kind of backend a console session is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Shell on the gateway host behind a pseudo-terminal
    LocalPty,
    /// SSH straight to a host
    DirectSsh,
    /// SSH to a node through its reverse tunnel
    TunneledSsh,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::LocalPty => write!(f, "local-pty"),
            BackendKind::DirectSsh => write!(f, "direct-ssh"),
            BackendKind::TunneledSsh => write!(f, "tunneled-ssh"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_host_ignores_case_and_domain() {
        let node = NodeInfo::new("n1", "Web-01.example.com");
        assert!(node.is_same_host("web-01"));
        assert!(node.is_same_host("WEB-01.lan"));
        assert!(!node.is_same_host("web-02"));
    }

    #[test]
    fn test_node_info_json_shape() {
        let node = NodeInfo::new("n1", "db");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["id"], "n1");
        assert_eq!(json["consoleEnabled"], true);
    }

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(BackendKind::TunneledSsh.to_string(), "tunneled-ssh");
    }
}
