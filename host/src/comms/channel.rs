//! Commands sent to one target over its channel.
//!
//! Each command is encoded into a `PIPE_BUFFER_SIZE` buffer and written with
//! exactly one blocking write, outside the host lock. A failed write means
//! the target is going away; unregistering it stays the pipe server's job.

use log::Level;
use std::{io, sync::Arc};
use thiserror::Error;

use shared::constants::PIPE_BUFFER_SIZE;
use shared::{HookParam, HostCommand, ProtocolError};

use crate::registry::Host;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("process {0} is not attached")]
    NotAttached(u32),

    #[error("cannot encode command: {0}")]
    Encode(#[from] ProtocolError),

    #[error("write to process {pid} failed: {source}")]
    Write {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

impl Host {
    /// Ask the hook engine of `pid` to remove its hooks and unload.
    pub fn detach_process(&self, pid: u32) -> Result<(), ChannelError> {
        self.send_command(pid, HostCommand::Detach)
    }

    /// Ask `pid` to install a hook. `name` is sent as-is, without terminator.
    pub fn insert_hook(&self, pid: u32, param: HookParam, name: &str) -> Result<(), ChannelError> {
        self.send_command(pid, HostCommand::NewHook { param, name: name.as_bytes() })
    }

    pub fn remove_hook(&self, pid: u32, address: u32) -> Result<(), ChannelError> {
        self.send_command(pid, HostCommand::RemoveHook { address })
    }

    fn send_command(&self, pid: u32, command: HostCommand<'_>) -> Result<(), ChannelError> {
        let mut buf = [0u8; PIPE_BUFFER_SIZE];
        let msg = command.encode(&mut buf)?;
        let channel = self
            .lock()
            .processes
            .get(&pid)
            .map(|entry| Arc::clone(&entry.channel))
            .ok_or(ChannelError::NotAttached(pid))?;

        channel.write_message(msg).map_err(|source| {
            texthost_log!(Level::Warn, "channel", "command {} to pid {} failed: {}", command.tag(), pid, source);
            ChannelError::Write { pid, source }
        })?;
        texthost_log!(Level::Debug, "channel", "sent command {} ({} bytes) to pid {}", command.tag(), msg.len(), pid);
        Ok(())
    }
}
