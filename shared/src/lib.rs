//! Definitions shared by the host and the hook engine running inside the
//! target: object names, table geometry, hook records and channel messages.
//! Both sides must agree on every byte here.

pub mod constants;
pub mod hook;
pub mod protocol;

pub use hook::{HookEntry, HookParam};
pub use protocol::{HostCommand, PipeMessage, ProtocolError};
