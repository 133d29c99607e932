//! Reverse tunnel registry
//!
//! A node without inbound reachability runs the tunnel agent, which dials the
//! gateway's SSH server and exposes the node's sshd on a gateway-local port.
//! This registry owns the node ↔ port bookkeeping for those tunnels.
//!
//! # Invariants
//!
//! - at most one record per node
//! - at most one record per local port
//! - ports are allocated upward from `base_port` and never beyond `max_port`

use std::collections::BTreeMap;
use std::sync::Mutex;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use nx_core::config::TunnelConfig;
use nx_core::time::{current_time_millis, elapsed_duration};
use nx_core::{NodeId, TunnelError};
use nx_protocol::Credential;

/// Parameters for [`TunnelRegistry::start`]
#[derive(Debug, Clone, Default)]
pub struct TunnelStartOptions {
    /// Host the node's agent dials
    pub server_host: Option<String>,
    /// SSH port the node's agent dials
    pub server_port: Option<u16>,
    /// Login the agent uses on the gateway side
    pub username: Option<String>,
    /// Credential for consoles opened through this tunnel
    pub credential: Option<Credential>,
    /// Pin the tunnel to a specific local port
    pub requested_port: Option<u16>,
}

/// One active reverse tunnel
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelRecord {
    pub node_id: NodeId,
    /// Gateway-local port the node's sshd is exposed on
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    pub username: String,
    /// Which credential consoles use; never the secret itself
    pub credential_ref: String,
    #[serde(skip)]
    pub credential: Option<Credential>,
    /// Unix millis
    pub started_at: u64,
}

struct TunnelEntry {
    record: TunnelRecord,
    /// Cancelled when the tunnel stops; sessions riding on it watch this
    cancel: CancellationToken,
}

/// Registry of reverse tunnels keyed by node and by local port
pub struct TunnelRegistry {
    config: TunnelConfig,
    tunnels: DashMap<NodeId, TunnelEntry>,
    ports: Mutex<BTreeMap<u16, NodeId>>,
}

impl TunnelRegistry {
    /// Create an empty registry
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config,
            tunnels: DashMap::new(),
            ports: Mutex::new(BTreeMap::new()),
        }
    }

    /// Start (register) a tunnel for a node.
    ///
    /// Idempotent: if the node already has a tunnel its record is returned
    /// unchanged and no second port is allocated. Concurrent starts for the
    /// same node are serialized on the node's map entry.
    pub fn start(
        &self,
        node_id: &NodeId,
        opts: TunnelStartOptions,
    ) -> Result<TunnelRecord, TunnelError> {
        match self.tunnels.entry(node_id.clone()) {
            Entry::Occupied(existing) => {
                tracing::debug!("Reverse tunnel already active for node {}", node_id);
                Ok(existing.get().record.clone())
            }
            Entry::Vacant(slot) => {
                let local_port = self.allocate_port(node_id, opts.requested_port)?;
                let credential_ref = opts
                    .credential
                    .as_ref()
                    .map(|c| c.kind())
                    .unwrap_or("gateway-identity")
                    .to_string();

                let record = TunnelRecord {
                    node_id: node_id.clone(),
                    local_port,
                    remote_host: opts
                        .server_host
                        .unwrap_or_else(|| self.config.server_host.clone()),
                    remote_port: opts.server_port.unwrap_or(self.config.server_port),
                    username: opts
                        .username
                        .unwrap_or_else(|| self.config.username.clone()),
                    credential_ref,
                    credential: opts.credential,
                    started_at: current_time_millis(),
                };

                tracing::info!(
                    "Starting reverse tunnel for node {} on port {}",
                    node_id,
                    local_port
                );

                slot.insert(TunnelEntry {
                    record: record.clone(),
                    cancel: CancellationToken::new(),
                });
                Ok(record)
            }
        }
    }

    fn allocate_port(&self, node_id: &NodeId, requested: Option<u16>) -> Result<u16, TunnelError> {
        let base = self.config.base_port;
        let max = self.config.max_port;
        let mut ports = self.ports.lock().unwrap_or_else(|e| e.into_inner());

        let port = match requested {
            Some(port) if port < base || port > max => {
                return Err(TunnelError::PortOutOfRange { port, base, max });
            }
            Some(port) => {
                if let Some(owner) = ports.get(&port) {
                    return Err(TunnelError::PortInUse {
                        port,
                        node_id: owner.to_string(),
                    });
                }
                port
            }
            None => (base..=max)
                .find(|port| !ports.contains_key(port))
                .ok_or(TunnelError::PortsExhausted { base, max })?,
        };

        ports.insert(port, node_id.clone());
        Ok(port)
    }

    /// Stop a node's tunnel, releasing its port and closing every console
    /// riding on it. Returns whether a tunnel existed.
    pub fn stop(&self, node_id: &NodeId) -> bool {
        let Some((_, entry)) = self.tunnels.remove(node_id) else {
            tracing::debug!("No tunnel found for node {}", node_id);
            return false;
        };

        self.ports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&entry.record.local_port);
        entry.cancel.cancel();

        tracing::info!(
            "Reverse tunnel stopped for node {} (port {})",
            node_id,
            entry.record.local_port
        );
        true
    }

    /// Stop every tunnel
    pub fn stop_all(&self) -> usize {
        let nodes: Vec<NodeId> = self.tunnels.iter().map(|r| r.key().clone()).collect();
        nodes.iter().filter(|node_id| self.stop(node_id)).count()
    }

    /// Tunnel record for a node
    pub fn get(&self, node_id: &NodeId) -> Option<TunnelRecord> {
        self.tunnels.get(node_id).map(|r| r.record.clone())
    }

    /// All tunnels, ordered by local port
    pub fn list(&self) -> Vec<TunnelRecord> {
        let mut records: Vec<TunnelRecord> =
            self.tunnels.iter().map(|r| r.record.clone()).collect();
        records.sort_by_key(|r| r.local_port);
        records
    }

    /// Whether the node has a tunnel younger than `max_age`.
    ///
    /// `started_at` is never refreshed, so a busy tunnel still reports
    /// inactive once it is older than `max_age`.
    pub fn is_active(&self, node_id: &NodeId) -> bool {
        self.tunnels
            .get(node_id)
            .map(|r| elapsed_duration(r.record.started_at) < self.config.max_age)
            .unwrap_or(false)
    }

    /// Node whose tunnel holds `port`
    pub fn node_for_port(&self, port: u16) -> Option<NodeId> {
        self.ports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&port)
            .cloned()
    }

    /// Token cancelled when the node's tunnel stops
    pub fn cancel_token(&self, node_id: &NodeId) -> Option<CancellationToken> {
        self.tunnels.get(node_id).map(|r| r.cancel.clone())
    }

    /// Command line the node must run to establish its side of the tunnel
    pub fn setup_command(&self, node_id: &NodeId) -> Result<String, TunnelError> {
        let record = self
            .get(node_id)
            .ok_or_else(|| TunnelError::NotFound(node_id.to_string()))?;
        Ok(format!(
            "{} -v -b {} {}@{}:{}",
            self.config.agent_binary,
            record.local_port,
            record.username,
            record.remote_host,
            record.remote_port
        ))
    }

    /// Login used on the node when a console is opened through its tunnel
    pub fn node_username(&self) -> &str {
        &self.config.node_username
    }

    /// Number of tunnels
    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    /// Check if there are no tunnels
    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn registry() -> TunnelRegistry {
        TunnelRegistry::new(TunnelConfig::default())
    }

    fn small_range(base: u16, max: u16) -> TunnelRegistry {
        TunnelRegistry::new(TunnelConfig {
            base_port: base,
            max_port: max,
            ..TunnelConfig::default()
        })
    }

    #[test]
    fn test_start_is_idempotent() {
        let registry = registry();
        let node = NodeId::new("web-1");

        let first = registry.start(&node, TunnelStartOptions::default()).unwrap();
        let second = registry
            .start(
                &node,
                TunnelStartOptions {
                    requested_port: Some(9500),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(first.local_port, 9000);
        assert_eq!(second.local_port, first.local_port);
        assert_eq!(second.started_at, first.started_at);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.node_for_port(9000), Some(node));
    }

    #[test]
    fn test_ports_are_distinct_and_ascending() {
        let registry = registry();
        let ports: Vec<u16> = (0..5)
            .map(|i| {
                registry
                    .start(&NodeId::new(format!("n{}", i)), TunnelStartOptions::default())
                    .unwrap()
                    .local_port
            })
            .collect();
        assert_eq!(ports, vec![9000, 9001, 9002, 9003, 9004]);
    }

    #[test]
    fn test_allocation_skips_used_ports() {
        let registry = registry();
        registry
            .start(
                &NodeId::new("pinned"),
                TunnelStartOptions {
                    requested_port: Some(9001),
                    ..Default::default()
                },
            )
            .unwrap();

        let a = registry.start(&NodeId::new("a"), TunnelStartOptions::default()).unwrap();
        let b = registry.start(&NodeId::new("b"), TunnelStartOptions::default()).unwrap();
        assert_eq!(a.local_port, 9000);
        assert_eq!(b.local_port, 9002);
    }

    #[test]
    fn test_stop_releases_port() {
        let registry = registry();
        let a = NodeId::new("a");
        registry.start(&a, TunnelStartOptions::default()).unwrap();
        registry.start(&NodeId::new("b"), TunnelStartOptions::default()).unwrap();

        let token = registry.cancel_token(&a).unwrap();
        assert!(registry.stop(&a));
        assert!(token.is_cancelled());
        assert!(!registry.stop(&a));
        assert!(registry.node_for_port(9000).is_none());

        let c = registry.start(&NodeId::new("c"), TunnelStartOptions::default()).unwrap();
        assert_eq!(c.local_port, 9000);
    }

    #[test]
    fn test_exhausted_range_is_an_error() {
        let registry = small_range(9000, 9001);
        registry.start(&NodeId::new("a"), TunnelStartOptions::default()).unwrap();
        registry.start(&NodeId::new("b"), TunnelStartOptions::default()).unwrap();

        let err = registry
            .start(&NodeId::new("c"), TunnelStartOptions::default())
            .unwrap_err();
        assert_eq!(
            err,
            TunnelError::PortsExhausted {
                base: 9000,
                max: 9001
            }
        );
        assert!(registry.get(&NodeId::new("c")).is_none());
    }

    #[test]
    fn test_requested_port_conflicts() {
        let registry = registry();
        registry
            .start(
                &NodeId::new("a"),
                TunnelStartOptions {
                    requested_port: Some(9100),
                    ..Default::default()
                },
            )
            .unwrap();

        let taken = registry
            .start(
                &NodeId::new("b"),
                TunnelStartOptions {
                    requested_port: Some(9100),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(taken, TunnelError::PortInUse { port: 9100, .. }));

        let outside = registry
            .start(
                &NodeId::new("b"),
                TunnelStartOptions {
                    requested_port: Some(22),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(outside, TunnelError::PortOutOfRange { port: 22, .. }));
    }

    #[test]
    fn test_is_active_uses_fixed_age() {
        let registry = TunnelRegistry::new(TunnelConfig {
            max_age: Duration::ZERO,
            ..TunnelConfig::default()
        });
        let node = NodeId::new("a");
        registry.start(&node, TunnelStartOptions::default()).unwrap();

        assert!(registry.get(&node).is_some());
        assert!(!registry.is_active(&node));
        assert!(!registry.is_active(&NodeId::new("unknown")));

        let fresh = self::registry();
        fresh.start(&node, TunnelStartOptions::default()).unwrap();
        assert!(fresh.is_active(&node));
    }

    #[test]
    fn test_setup_command() {
        let registry = registry();
        let node = NodeId::new("edge-3");
        registry
            .start(
                &node,
                TunnelStartOptions {
                    server_host: Some("nexus.example.com".into()),
                    server_port: Some(2222),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(
            registry.setup_command(&node).unwrap(),
            "reverse-ssh -v -b 9000 nexus@nexus.example.com:2222"
        );
        assert!(registry.setup_command(&NodeId::new("other")).is_err());
    }

    #[test]
    fn test_credential_is_not_serialized() {
        let registry = registry();
        let record = registry
            .start(
                &NodeId::new("a"),
                TunnelStartOptions {
                    credential: Some(Credential::Password {
                        password: "hunter2".into(),
                    }),
                    ..Default::default()
                },
            )
            .unwrap();

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"credentialRef\":\"password\""));
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_concurrent_starts_share_one_record() {
        let registry = Arc::new(registry());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry
                        .start(&NodeId::new("shared"), TunnelStartOptions::default())
                        .unwrap()
                        .local_port
                })
            })
            .collect();

        let ports: Vec<u16> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ports.iter().all(|p| *p == ports[0]));
        assert_eq!(registry.len(), 1);
    }
}
