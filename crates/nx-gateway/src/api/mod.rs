//! Admin HTTP surface and the console WebSocket
//!
//! Callers are authenticated upstream; these handlers do not re-check
//! identity.

mod console;
mod error;
mod tunnels;
mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

pub use error::{ApiError, ApiResult};

use crate::state::GatewayState;

/// Build the HTTP router
pub fn router(state: Arc<GatewayState>) -> Router {
    let console = Router::new()
        .route("/status", get(console::status))
        .route("/toggle", post(console::toggle))
        .route("/config", get(console::get_config).put(console::put_config))
        .route("/ssh-key", get(console::ssh_key))
        .route("/ssh-key/regenerate", post(console::regenerate_ssh_key))
        .route("/validate", post(console::validate))
        .route("/sessions", get(console::sessions))
        .route("/nodes", get(console::nodes))
        .route("/tunnels", get(tunnels::list))
        .route("/tunnels/:node_id/start", post(tunnels::start))
        .route("/tunnels/:node_id/stop", post(tunnels::stop))
        .route("/tunnels/:node_id/setup", get(tunnels::setup));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/ws/console", get(ws::console_socket))
        .nest("/api/console", console)
        .with_state(state)
}
