//! Reverse tunnel handlers

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use nx_core::{NodeId, TunnelError};
use nx_protocol::Credential;

use super::error::{ApiError, ApiResult};
use crate::state::GatewayState;
use crate::tunnel::TunnelStartOptions;

/// `GET /api/console/tunnels`
pub async fn list(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let tunnels: Vec<Value> = state
        .tunnels
        .list()
        .into_iter()
        .map(|record| {
            let active = state.tunnels.is_active(&record.node_id);
            let mut value = json!(record);
            value["active"] = json!(active);
            value
        })
        .collect();

    Json(json!({
        "success": true,
        "tunnels": tunnels,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTunnelRequest {
    #[serde(default)]
    server_host: Option<String>,
    #[serde(default)]
    server_port: Option<u16>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    credential: Option<Credential>,
    /// Pin the tunnel to this gateway-local port
    #[serde(default)]
    port: Option<u16>,
}

/// `POST /api/console/tunnels/:node_id/start`
pub async fn start(
    State(state): State<Arc<GatewayState>>,
    Path(node_id): Path<String>,
    body: Option<Json<StartTunnelRequest>>,
) -> ApiResult<Json<Value>> {
    let node_id = NodeId::new(node_id);
    if state.nodes.get_node(&node_id).await.is_none() {
        return Err(ApiError::NotFound(format!("Node not found: {}", node_id)));
    }

    let request = body.map(|Json(r)| r).unwrap_or_default();
    let record = state.tunnels.start(
        &node_id,
        TunnelStartOptions {
            server_host: request.server_host,
            server_port: request.server_port,
            username: request.username,
            credential: request.credential,
            requested_port: request.port,
        },
    )?;
    let command = state.tunnels.setup_command(&node_id)?;

    Ok(Json(json!({
        "success": true,
        "tunnel": record,
        "setupCommand": command,
    })))
}

/// `POST /api/console/tunnels/:node_id/stop`
pub async fn stop(
    State(state): State<Arc<GatewayState>>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let node_id = NodeId::new(node_id);
    if !state.tunnels.stop(&node_id) {
        return Err(TunnelError::NotFound(node_id.to_string()).into());
    }
    Ok(Json(json!({
        "success": true,
        "nodeId": node_id,
    })))
}

/// `GET /api/console/tunnels/:node_id/setup`
pub async fn setup(
    State(state): State<Arc<GatewayState>>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let node_id = NodeId::new(node_id);
    let record = state
        .tunnels
        .get(&node_id)
        .ok_or_else(|| TunnelError::NotFound(node_id.to_string()))?;
    let command = state.tunnels.setup_command(&node_id)?;
    let identity = state.identity.current();

    let instructions = [
        format!(
            "1. Install the {} binary on the node.",
            state.config.tunnel.agent_binary
        ),
        format!(
            "2. Allow the node to log in as {} on {} (add its key to that account's authorized_keys).",
            record.username, record.remote_host
        ),
        format!(
            "3. Add the gateway key to /{}/.ssh/authorized_keys on the node: {}",
            state.tunnels.node_username(),
            identity.public_key()
        ),
        format!("4. Run on the node: {}", command),
    ];

    Ok(Json(json!({
        "success": true,
        "nodeId": node_id,
        "port": record.local_port,
        "command": command,
        "instructions": instructions,
    })))
}
