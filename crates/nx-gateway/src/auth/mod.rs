//! Outbound SSH authentication

mod identity;

pub use identity::{GatewayIdentity, IdentityStore, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};
