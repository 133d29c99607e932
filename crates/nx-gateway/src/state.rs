//! Global gateway state

use std::sync::Arc;

use tokio::sync::mpsc;

use nx_core::config::GatewayConfig;
use nx_core::traits::NodeRegistry;
use nx_core::IdentityError;
use nx_protocol::{ConnectionId, ServerMessage};

use crate::auth::IdentityStore;
use crate::mux::ConnectionMux;
use crate::nodes::InMemoryNodeRegistry;
use crate::router::ChannelRouter;
use crate::session::SessionRegistry;
use crate::settings::ConsoleSettings;
use crate::tunnel::TunnelRegistry;

/// Outbound messages buffered per client connection
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Global state for the gateway daemon
pub struct GatewayState {
    /// Configuration
    pub config: GatewayConfig,
    /// This machine's hostname
    pub hostname: String,
    /// Live console settings
    pub settings: Arc<ConsoleSettings>,
    /// Node registry
    pub nodes: Arc<dyn NodeRegistry>,
    /// Reverse tunnels
    pub tunnels: Arc<TunnelRegistry>,
    /// Gateway SSH identity
    pub identity: Arc<IdentityStore>,
    /// Live console sessions
    pub sessions: Arc<SessionRegistry>,
    /// Connect routing
    pub router: Arc<ChannelRouter>,
}

impl GatewayState {
    /// Build state with the statically configured nodes
    pub fn new(config: GatewayConfig) -> Result<Self, IdentityError> {
        let nodes = Arc::new(InMemoryNodeRegistry::from_profiles(&config.nodes));
        Self::with_nodes(config, nodes)
    }

    /// Build state around an external node registry
    pub fn with_nodes(
        config: GatewayConfig,
        nodes: Arc<dyn NodeRegistry>,
    ) -> Result<Self, IdentityError> {
        let hostname = config.gateway.hostname();
        let settings = Arc::new(ConsoleSettings::load_or(
            config.console.clone(),
            config.gateway.console_settings_path(),
        ));
        let identity = Arc::new(IdentityStore::load_or_generate(
            config.gateway.ssh_dir(),
            format!("nexus-gateway@{}", hostname),
        )?);
        let tunnels = Arc::new(TunnelRegistry::new(config.tunnel.clone()));
        let sessions = Arc::new(SessionRegistry::new(
            Arc::clone(&settings),
            Arc::clone(&tunnels),
            Arc::clone(&identity),
            config.ssh.clone(),
        ));
        let router = Arc::new(ChannelRouter::new(
            Arc::clone(&settings),
            Arc::clone(&nodes),
            Arc::clone(&tunnels),
            Arc::clone(&sessions),
            hostname.clone(),
            config.ssh.default_username.clone(),
            config.ssh.default_port,
        ));

        Ok(Self {
            config,
            hostname,
            settings,
            nodes,
            tunnels,
            identity,
            sessions,
            router,
        })
    }

    /// A multiplexer for a new client connection and the receiving end of
    /// its outbound channel
    pub fn connect_client(
        &self,
        connection_id: ConnectionId,
    ) -> (ConnectionMux, mpsc::Receiver<ServerMessage>) {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let mux = ConnectionMux::new(
            connection_id,
            outbound,
            Arc::clone(&self.router),
            Arc::clone(&self.sessions),
        );
        (mux, outbound_rx)
    }

    /// Close every session and stop every tunnel
    pub async fn shutdown(&self) {
        let sessions = self.sessions.close_all().await;
        let tunnels = self.tunnels.stop_all();
        tracing::info!(
            "Shut down {} console session(s) and {} tunnel(s)",
            sessions,
            tunnels
        );
    }
}
