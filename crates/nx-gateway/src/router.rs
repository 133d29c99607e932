//! Channel router
//!
//! Decides which backend a `terminal:connect` gets. The decision is an
//! ordered rule table evaluated against a snapshot of everything the rules
//! need; the first rule that returns a route wins. Adding a backend means
//! adding a rule at the right position, not re-deriving nested conditionals.

use std::sync::Arc;

use nx_core::traits::NodeRegistry;
use nx_core::{ConsoleError, NodeId, NodeInfo};
use nx_protocol::{ConnectRequest, Credential, SessionKey};

use crate::session::{DirectSshRequest, OutboundSender, SessionInfo, SessionRegistry};
use crate::settings::ConsoleSettings;
use crate::tunnel::TunnelRegistry;

/// Where a connect request goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Refuse without opening anything
    Reject(ConsoleError),
    /// Shell on the gateway host
    Local { node_id: Option<NodeId> },
    /// SSH through the node's reverse tunnel
    Tunneled { node_id: NodeId },
    /// SSH straight to a host
    Direct {
        host: String,
        port: u16,
        username: String,
        node_id: Option<NodeId>,
    },
}

/// Facts the rules are evaluated against
#[derive(Debug, Clone)]
pub struct RouteContext {
    /// Global console switch
    pub console_enabled: bool,
    /// The gateway's own hostname
    pub gateway_hostname: String,
    /// The requested node, if it is known to the node registry
    pub node: Option<NodeInfo>,
    /// Whether the requested node has an active reverse tunnel
    pub tunnel_active: bool,
    /// Login used when the request names none
    pub default_username: String,
    /// Port used when the request names none
    pub default_port: u16,
}

type Rule = fn(&ConnectRequest, &RouteContext) -> Option<Route>;

/// Routing rules in priority order
const RULES: &[(&str, Rule)] = &[
    ("console-disabled", rule_console_disabled),
    ("explicit-local", rule_explicit_local),
    ("node-console-disabled", rule_node_console_disabled),
    ("combined-host", rule_combined_host),
    ("reverse-tunnel", rule_reverse_tunnel),
    ("direct-host", rule_direct_host),
    ("fallback-local", rule_fallback_local),
];

fn requested_node(request: &ConnectRequest) -> Option<NodeId> {
    request
        .node_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .map(NodeId::new)
}

fn rule_console_disabled(_: &ConnectRequest, ctx: &RouteContext) -> Option<Route> {
    (!ctx.console_enabled).then_some(Route::Reject(ConsoleError::Disabled))
}

fn rule_explicit_local(request: &ConnectRequest, _: &RouteContext) -> Option<Route> {
    request.is_local.then(|| Route::Local {
        node_id: requested_node(request),
    })
}

fn rule_node_console_disabled(_: &ConnectRequest, ctx: &RouteContext) -> Option<Route> {
    let node = ctx.node.as_ref()?;
    (!node.console_enabled).then(|| {
        Route::Reject(ConsoleError::NodeConsoleDisabled(node.id.to_string()))
    })
}

fn rule_combined_host(_: &ConnectRequest, ctx: &RouteContext) -> Option<Route> {
    let node = ctx.node.as_ref()?;
    node.is_same_host(&ctx.gateway_hostname).then(|| Route::Local {
        node_id: Some(node.id.clone()),
    })
}

fn rule_reverse_tunnel(request: &ConnectRequest, ctx: &RouteContext) -> Option<Route> {
    let node_id = requested_node(request)?;
    (ctx.tunnel_active || request.use_reverse_tunnel).then_some(Route::Tunneled { node_id })
}

fn rule_direct_host(request: &ConnectRequest, ctx: &RouteContext) -> Option<Route> {
    let host = request.host.as_deref().filter(|h| !h.is_empty())?;
    Some(Route::Direct {
        host: host.to_string(),
        port: request.port.unwrap_or(ctx.default_port),
        username: request
            .username
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| ctx.default_username.clone()),
        node_id: requested_node(request),
    })
}

fn rule_fallback_local(request: &ConnectRequest, _: &RouteContext) -> Option<Route> {
    Some(Route::Local {
        node_id: requested_node(request),
    })
}

/// Evaluate the rule table. Pure, so every branch can be tested without
/// spawning anything.
pub fn decide(request: &ConnectRequest, ctx: &RouteContext) -> Route {
    for (name, rule) in RULES {
        if let Some(route) = rule(request, ctx) {
            tracing::debug!("Connect routed by rule {}: {:?}", name, route);
            return route;
        }
    }
    // The fallback rule always matches
    Route::Local { node_id: None }
}

/// Routes connect requests to the session registry
pub struct ChannelRouter {
    settings: Arc<ConsoleSettings>,
    nodes: Arc<dyn NodeRegistry>,
    tunnels: Arc<TunnelRegistry>,
    sessions: Arc<SessionRegistry>,
    hostname: String,
    default_username: String,
    default_port: u16,
}

impl ChannelRouter {
    pub fn new(
        settings: Arc<ConsoleSettings>,
        nodes: Arc<dyn NodeRegistry>,
        tunnels: Arc<TunnelRegistry>,
        sessions: Arc<SessionRegistry>,
        hostname: String,
        default_username: String,
        default_port: u16,
    ) -> Self {
        Self {
            settings,
            nodes,
            tunnels,
            sessions,
            hostname,
            default_username,
            default_port,
        }
    }

    /// Gather the facts for `request`
    pub async fn context(&self, request: &ConnectRequest) -> RouteContext {
        let node_id = requested_node(request);
        let node = match &node_id {
            Some(id) => {
                let node = self.nodes.get_node(id).await;
                if node.is_none() {
                    tracing::debug!("Node {} is not in the registry", id);
                }
                node
            }
            None => None,
        };
        let tunnel_active = node_id
            .as_ref()
            .map(|id| self.tunnels.is_active(id))
            .unwrap_or(false);

        RouteContext {
            console_enabled: self.settings.is_enabled(),
            gateway_hostname: self.hostname.clone(),
            node,
            tunnel_active,
            default_username: self.default_username.clone(),
            default_port: self.default_port,
        }
    }

    /// Route a connect request and open the chosen backend.
    ///
    /// Rejections happen before any process or connection is created.
    pub async fn connect(
        &self,
        key: SessionKey,
        request: ConnectRequest,
        sink: OutboundSender,
    ) -> Result<SessionInfo, ConsoleError> {
        let ctx = self.context(&request).await;
        let route = decide(&request, &ctx);

        match route {
            Route::Reject(err) => {
                tracing::warn!("Console connect {} rejected: {}", key, err);
                Err(err)
            }
            Route::Local { node_id } => self.sessions.open_local(key, node_id, sink).await,
            Route::Tunneled { node_id } => {
                self.sessions.open_tunneled_ssh(key, node_id, sink).await
            }
            Route::Direct {
                host,
                port,
                username,
                node_id,
            } => {
                tracing::debug!(
                    "Direct SSH for {} using {}",
                    key,
                    credential_kind(request.credential.as_ref())
                );
                let request = DirectSshRequest {
                    host,
                    port,
                    username,
                    credential: request.credential.clone(),
                    node_id,
                };
                self.sessions.open_direct_ssh(key, request, sink).await
            }
        }
    }
}

impl std::fmt::Debug for ChannelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRouter")
            .field("hostname", &self.hostname)
            .finish_non_exhaustive()
    }
}

/// Credential kinds accepted on a connect request, for diagnostics
pub fn credential_kind(credential: Option<&Credential>) -> &'static str {
    credential.map(Credential::kind).unwrap_or("gateway-identity")
}
