//! Node registry interface
//!
//! The gateway does not own node records. Registration, heartbeats and
//! online status live in the metrics side of the system; the console only
//! needs to look nodes up by ID.

use async_trait::async_trait;

use crate::types::{NodeId, NodeInfo};

/// Read access to the fleet's node records
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// Look up a node by ID
    async fn get_node(&self, node_id: &NodeId) -> Option<NodeInfo>;

    /// List every known node
    async fn list_nodes(&self) -> Vec<NodeInfo>;
}
