//! Core trait definitions

mod node;

pub use node::NodeRegistry;
