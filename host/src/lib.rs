// src/lib.rs
// ────────────────────────────────────────────────────────────────────────────
// Public library entry point. Re-export everything for both `main.rs` and
// integration tests.

#[macro_use]
mod macros;

pub mod comms;
pub mod config;
pub mod inject;
pub mod logging;
pub mod registry;
pub mod stream;
pub mod sys;

pub use comms::{ChannelError, PipeServer};
pub use config::HostConfig;
pub use inject::{InjectError, InjectOutcome};
pub use registry::{Host, HostEvents, RegistryError};
pub use stream::{StreamKey, TextStream};
