//! Static node entries

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{NodeId, NodeInfo};

/// A node declared in the gateway config file.
///
/// Deployments without a live registry (or tests) list their nodes here;
/// they seed the in-memory node registry at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProfile {
    /// Node identifier
    pub id: String,

    /// Hostname the node reports
    pub hostname: String,

    /// Per-node console switch
    #[serde(default = "default_true")]
    pub console_enabled: bool,

    /// Free-form facts shown on the dashboard
    #[serde(default)]
    pub system_info: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl Default for NodeProfile {
    fn default() -> Self {
        Self {
            id: String::new(),
            hostname: String::new(),
            console_enabled: true,
            system_info: BTreeMap::new(),
        }
    }
}

impl From<&NodeProfile> for NodeInfo {
    fn from(profile: &NodeProfile) -> Self {
        NodeInfo {
            id: NodeId::new(&profile.id),
            hostname: profile.hostname.clone(),
            console_enabled: profile.console_enabled,
            system_info: profile.system_info.clone(),
        }
    }
}
