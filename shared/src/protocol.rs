//! Channel messages
//! ================
//! One message per write, in both directions.
//!
//! Host → target (`HostCommand`):
//!
//!   NEW_HOOK     [tag:u32 = 0][HookParam:36][name bytes, no terminator]
//!   REMOVE_HOOK  [tag:u32 = 1][address:u32]
//!   DETACH       [tag:u32 = 4]
//!
//! Target → host (`PipeMessage`):
//!
//!   text         [hook:u32][retn:u32][split:u32][text bytes]
//!   notification [0xFFFF_FFFF][kind:u32][payload]
//!
//! The length of the trailing variable part is implied by the message size.

use thiserror::Error;

use crate::constants::PIPE_BUFFER_SIZE;
use crate::hook::{check_len, read_u32, HookParam};

pub const HOST_COMMAND_NEW_HOOK:    u32 = 0;
pub const HOST_COMMAND_REMOVE_HOOK: u32 = 1;
pub const HOST_COMMAND_DETACH:      u32 = 4;

/// Value of the `hook` field that marks a notification instead of text.
pub const HOST_NOTIFICATION: u32 = u32::MAX;
/// Notification kind: console text emitted by the hook engine.
pub const NOTIFICATION_TEXT: u32 = 1;

/// `[hook][retn][split]`
pub const TEXT_HEADER_SIZE: usize = 12;

/// Longest hook name a NEW_HOOK command can carry.
pub const MAX_NAME_LEN: usize = PIPE_BUFFER_SIZE - 4 - HookParam::SIZE;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("message truncated: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("hook name of {len} bytes exceeds the {max} byte limit")]
    NameTooLong { len: usize, max: usize },

    #[error("unknown command tag {0}")]
    UnknownCommand(u32),

    #[error("trailing bytes after a fixed-size command: {0}")]
    TrailingBytes(usize),
}

/// Command sent by the host to one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand<'a> {
    NewHook { param: HookParam, name: &'a [u8] },
    RemoveHook { address: u32 },
    Detach,
}

impl<'a> HostCommand<'a> {
    pub fn tag(&self) -> u32 {
        match self {
            HostCommand::NewHook { .. }    => HOST_COMMAND_NEW_HOOK,
            HostCommand::RemoveHook { .. } => HOST_COMMAND_REMOVE_HOOK,
            HostCommand::Detach            => HOST_COMMAND_DETACH,
        }
    }

    /// Encode into `buf` and return the part that must be written.
    pub fn encode<'b>(&self, buf: &'b mut [u8; PIPE_BUFFER_SIZE]) -> Result<&'b [u8], ProtocolError> {
        buf[0..4].copy_from_slice(&self.tag().to_le_bytes());
        let used = match self {
            HostCommand::Detach => 4,
            HostCommand::RemoveHook { address } => {
                buf[4..8].copy_from_slice(&address.to_le_bytes());
                8
            }
            HostCommand::NewHook { param, name } => {
                if name.len() > MAX_NAME_LEN {
                    return Err(ProtocolError::NameTooLong { len: name.len(), max: MAX_NAME_LEN });
                }
                let body = 4 + HookParam::SIZE;
                param.encode_into(&mut buf[4..body])?;
                buf[body..body + name.len()].copy_from_slice(name);
                body + name.len()
            }
        };
        Ok(&buf[..used])
    }

    /// Decode one command as the hook engine receives it.
    pub fn decode(msg: &'a [u8]) -> Result<Self, ProtocolError> {
        check_len(msg.len(), 4)?;
        match read_u32(msg, 0) {
            HOST_COMMAND_DETACH => {
                fixed_size(msg, 4)?;
                Ok(HostCommand::Detach)
            }
            HOST_COMMAND_REMOVE_HOOK => {
                fixed_size(msg, 8)?;
                Ok(HostCommand::RemoveHook { address: read_u32(msg, 4) })
            }
            HOST_COMMAND_NEW_HOOK => {
                let body = 4 + HookParam::SIZE;
                check_len(msg.len(), body)?;
                Ok(HostCommand::NewHook {
                    param: HookParam::decode(&msg[4..body])?,
                    name:  &msg[body..],
                })
            }
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

fn fixed_size(msg: &[u8], size: usize) -> Result<(), ProtocolError> {
    check_len(msg.len(), size)?;
    if msg.len() > size {
        return Err(ProtocolError::TrailingBytes(msg.len() - size));
    }
    Ok(())
}

/// Message sent by a target to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeMessage<'a> {
    Text { hook: u32, retn: u32, split: u32, data: &'a [u8] },
    Notification { kind: u32, payload: &'a [u8] },
}

impl<'a> PipeMessage<'a> {
    pub fn decode(msg: &'a [u8]) -> Result<Self, ProtocolError> {
        check_len(msg.len(), 8)?;
        let hook = read_u32(msg, 0);
        if hook == HOST_NOTIFICATION {
            return Ok(PipeMessage::Notification { kind: read_u32(msg, 4), payload: &msg[8..] });
        }
        check_len(msg.len(), TEXT_HEADER_SIZE)?;
        Ok(PipeMessage::Text {
            hook,
            retn:  read_u32(msg, 4),
            split: read_u32(msg, 8),
            data:  &msg[TEXT_HEADER_SIZE..],
        })
    }

    /// Append the wire form to `out` (hook engine side and tests).
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            PipeMessage::Text { hook, retn, split, data } => {
                out.extend_from_slice(&hook.to_le_bytes());
                out.extend_from_slice(&retn.to_le_bytes());
                out.extend_from_slice(&split.to_le_bytes());
                out.extend_from_slice(data);
            }
            PipeMessage::Notification { kind, payload } => {
                out.extend_from_slice(&HOST_NOTIFICATION.to_le_bytes());
                out.extend_from_slice(&kind.to_le_bytes());
                out.extend_from_slice(payload);
            }
        }
    }
}
