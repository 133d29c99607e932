//! Reverse tunnel bookkeeping

mod registry;

pub use registry::{TunnelRecord, TunnelRegistry, TunnelStartOptions};
