//! nx-gateway: Remote console gateway
//!
//! Turns one persistent client channel into any number of independent shell
//! sessions. Each session is backed by a local pseudo-terminal, a direct SSH
//! connection, or an SSH connection relayed through a node's reverse tunnel.
//! Every line typed into a session passes the command policy before it is
//! submitted to the shell.

pub mod api;
pub mod auth;
pub mod mux;
pub mod nodes;
pub mod router;
pub mod session;
pub mod settings;
pub mod state;
pub mod tunnel;

pub use mux::ConnectionMux;
pub use router::ChannelRouter;
pub use session::SessionRegistry;
pub use state::GatewayState;
pub use tunnel::TunnelRegistry;
