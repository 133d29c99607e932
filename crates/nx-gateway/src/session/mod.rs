//! Console session management
//!
//! The [`SessionRegistry`] owns every live session. Each session runs as one
//! task that is the single reader and the single writer of its backend, so
//! output stays in order and a slow session never blocks another.

mod backend;
mod guard;
mod local;
mod registry;
mod ssh;
mod utf8;

pub use backend::Backend;
pub use guard::{GuardedInput, LineGuard, Rejection, LINE_KILL};
pub use local::LocalPty;
pub use registry::{DirectSshRequest, OutboundSender, SessionInfo, SessionRegistry};
pub use ssh::{SshAuth, SshShell, SshTarget};
pub use utf8::Utf8Carry;
