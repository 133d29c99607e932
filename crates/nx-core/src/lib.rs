//! nx-core: Core abstractions and configuration for the Nexus console gateway
//!
//! This crate provides shared types, the node registry interface, the
//! configuration structures, and the command policy engine used by the
//! gateway before any input reaches a real shell.

pub mod config;
pub mod error;
pub mod policy;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{ConfigError, ConsoleError, IdentityError, TunnelError};
pub use policy::{validate, CommandValidationResult};
pub use types::{NodeId, NodeInfo};
