//! Channel side of the host: commands written to targets and messages
//! received from them.

pub mod channel;
pub mod pipe;

pub use channel::ChannelError;
pub use pipe::{PipeEvent, PipeServer, QueuedPipeServer};
