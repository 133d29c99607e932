//! Console administration handlers

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use nx_core::config::{BlockedCommand, ConsoleConfig};
use nx_core::policy;
use nx_core::NodeId;

use super::error::{ApiError, ApiResult};
use crate::auth::GatewayIdentity;
use crate::state::GatewayState;
use crate::tunnel::TunnelRecord;

/// Console settings as the dashboard sees them
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConsoleConfigView {
    enabled: bool,
    allow_sudo: bool,
    blocked_commands: Vec<BlockedCommand>,
    blocked_paths: Vec<String>,
}

impl From<&ConsoleConfig> for ConsoleConfigView {
    fn from(config: &ConsoleConfig) -> Self {
        Self {
            enabled: config.enabled,
            allow_sudo: config.allow_sudo,
            blocked_commands: config.blocked_commands.clone(),
            blocked_paths: config.blocked_paths.clone(),
        }
    }
}

/// `GET /api/console/status`
pub async fn status(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    Json(json!({
        "success": true,
        "enabled": state.settings.is_enabled(),
        "activeSessions": state.sessions.count(),
        "activeTunnels": state.tunnels.len(),
        "hostname": state.hostname,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ToggleRequest {
    /// Target state; omitted flips the current one
    #[serde(default)]
    enabled: Option<bool>,
}

/// `POST /api/console/toggle`
pub async fn toggle(
    State(state): State<Arc<GatewayState>>,
    body: Option<Json<ToggleRequest>>,
) -> ApiResult<Json<Value>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let enabled = request
        .enabled
        .unwrap_or_else(|| !state.settings.is_enabled());

    let updated = state.settings.set_enabled(enabled)?;
    Ok(Json(json!({
        "success": true,
        "enabled": updated.enabled,
    })))
}

/// `GET /api/console/config`
pub async fn get_config(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let config = state.settings.snapshot();
    Json(json!({
        "success": true,
        "config": ConsoleConfigView::from(config.as_ref()),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    #[serde(default)]
    allow_sudo: Option<bool>,
    #[serde(default)]
    blocked_commands: Option<Vec<BlockedCommand>>,
    #[serde(default)]
    blocked_paths: Option<Vec<String>>,
}

/// `PUT /api/console/config`
pub async fn put_config(
    State(state): State<Arc<GatewayState>>,
    Json(update): Json<ConfigUpdate>,
) -> ApiResult<Json<Value>> {
    if let Some(rules) = &update.blocked_commands {
        if let Some(rule) = rules.iter().find(|r| r.pattern.trim().is_empty()) {
            return Err(ApiError::BadRequest(format!(
                "Blocked command pattern must not be empty (reason: {:?})",
                rule.reason
            )));
        }
    }
    let blocked_paths = update.blocked_paths.map(|paths| {
        paths
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
    });

    let updated = state.settings.update(|config| {
        if let Some(allow_sudo) = update.allow_sudo {
            config.allow_sudo = allow_sudo;
        }
        if let Some(rules) = update.blocked_commands {
            config.blocked_commands = rules;
        }
        if let Some(paths) = blocked_paths {
            config.blocked_paths = paths;
        }
    })?;

    tracing::info!(
        "Console config updated: allow_sudo={}, {} blocked command rule(s), {} blocked path(s)",
        updated.allow_sudo,
        updated.blocked_commands.len(),
        updated.blocked_paths.len()
    );
    Ok(Json(json!({
        "success": true,
        "config": ConsoleConfigView::from(updated.as_ref()),
    })))
}

fn key_response(identity: &GatewayIdentity) -> Value {
    json!({
        "success": true,
        "publicKey": identity.public_key(),
        "fingerprint": identity.fingerprint(),
        "instructions": "Add this key to ~/.ssh/authorized_keys on every node the console should reach.",
    })
}

/// `GET /api/console/ssh-key`
pub async fn ssh_key(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    Json(key_response(&state.identity.current()))
}

/// `POST /api/console/ssh-key/regenerate`
pub async fn regenerate_ssh_key(
    State(state): State<Arc<GatewayState>>,
) -> ApiResult<Json<Value>> {
    // Key generation does file I/O
    let identity = Arc::clone(&state.identity);
    let regenerated = tokio::task::spawn_blocking(move || identity.regenerate())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(key_response(&regenerated)))
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    #[serde(default)]
    command: Option<String>,
}

/// `POST /api/console/validate`
pub async fn validate(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<ValidateRequest>,
) -> ApiResult<Json<Value>> {
    let command = request
        .command
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Command is required".to_string()))?;

    let result = policy::validate(&command, &state.settings.snapshot());
    Ok(Json(json!({
        "success": true,
        "allowed": result.allowed,
        "reason": result.reason,
    })))
}

/// `GET /api/console/sessions`
pub async fn sessions(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let sessions = state.sessions.list();
    Json(json!({
        "success": true,
        "count": sessions.len(),
        "sessions": sessions,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConsoleNode {
    id: NodeId,
    hostname: String,
    console_enabled: bool,
    /// Runs on the gateway host itself
    combined: bool,
    tunnel_active: bool,
    tunnel: Option<TunnelRecord>,
    system_info: BTreeMap<String, String>,
}

/// `GET /api/console/nodes`
pub async fn nodes(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let nodes: Vec<ConsoleNode> = state
        .nodes
        .list_nodes()
        .await
        .into_iter()
        .map(|node| ConsoleNode {
            combined: node.is_same_host(&state.hostname),
            tunnel_active: state.tunnels.is_active(&node.id),
            tunnel: state.tunnels.get(&node.id),
            id: node.id,
            hostname: node.hostname,
            console_enabled: node.console_enabled,
            system_info: node.system_info,
        })
        .collect();

    Json(json!({
        "success": true,
        "nodes": nodes,
    }))
}
