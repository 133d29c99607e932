//! In-memory node registry
//!
//! Seeded from the `[[nodes]]` table of the gateway config. The fleet server
//! replaces this with its device database through the [`NodeRegistry`] trait.

use async_trait::async_trait;
use dashmap::DashMap;

use nx_core::config::NodeProfile;
use nx_core::traits::NodeRegistry;
use nx_core::{NodeId, NodeInfo};

/// Nodes indexed by ID
pub struct InMemoryNodeRegistry {
    nodes: DashMap<NodeId, NodeInfo>,
}

impl InMemoryNodeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
        }
    }

    /// Build a registry from config profiles
    pub fn from_profiles(profiles: &[NodeProfile]) -> Self {
        let registry = Self::new();
        for profile in profiles {
            registry.upsert(NodeInfo::from(profile));
        }
        registry
    }

    /// Insert or replace a node
    pub fn upsert(&self, node: NodeInfo) {
        self.nodes.insert(node.id.clone(), node);
    }

    /// Remove a node
    pub fn remove(&self, node_id: &NodeId) -> Option<NodeInfo> {
        self.nodes.remove(node_id).map(|(_, node)| node)
    }

    /// Number of known nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for InMemoryNodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeRegistry for InMemoryNodeRegistry {
    async fn get_node(&self, node_id: &NodeId) -> Option<NodeInfo> {
        self.nodes.get(node_id).map(|r| r.value().clone())
    }

    async fn list_nodes(&self) -> Vec<NodeInfo> {
        let mut nodes: Vec<NodeInfo> = self.nodes.iter().map(|r| r.value().clone()).collect();
        nodes.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        nodes
    }
}
