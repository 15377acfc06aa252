//! Pipe server seam.
//! -----------------------------------------------------------------------------
//! Accepting connections is not done here. A **pipe server** owns the
//! listening side and reports three things back to the host:
//!   • a target connected     → `Host::register_process`
//!   • a message arrived      → `Host::receive`
//!   • the channel was closed → `Host::unregister_process`
//!
//! `QueuedPipeServer` is the plain version of that contract: the I/O layer
//! pushes `PipeEvent`s into a crossbeam channel and one dedicated thread
//! applies them to the host in order.

use crossbeam::channel::{unbounded, Receiver, Sender};
use log::Level;
use std::{sync::Arc, thread};

use shared::protocol::NOTIFICATION_TEXT;
use shared::PipeMessage;

use crate::registry::Host;
use crate::stream::StreamKey;
use crate::sys::Channel;

pub trait PipeServer: Send + 'static {
    /// Display name for logs.
    fn name(&self) -> &'static str;

    /// Start accepting connections and feeding them to `host`. Must not
    /// block the caller.
    fn listen(self: Box<Self>, host: Arc<Host>);
}

/// What the I/O layer observed on one channel.
pub enum PipeEvent {
    Connected { pid: u32, channel: Arc<dyn Channel> },
    Message { pid: u32, bytes: Vec<u8> },
    Closed { pid: u32 },
}

/// Pipe server fed through a crossbeam channel.
pub struct QueuedPipeServer {
    rx: Receiver<PipeEvent>,
}

impl QueuedPipeServer {
    /// Build from the receiver end of the I/O layer's queue.
    pub fn new(rx: Receiver<PipeEvent>) -> Self {
        Self { rx }
    }

    /// Fresh queue plus the server reading it.
    pub fn queue() -> (Sender<PipeEvent>, Self) {
        let (tx, rx) = unbounded();
        (tx, Self::new(rx))
    }
}

impl PipeServer for QueuedPipeServer {
    fn name(&self) -> &'static str {
        "queued_pipe"
    }

    fn listen(self: Box<Self>, host: Arc<Host>) {
        let name = self.name();
        let rx = self.rx;
        let spawned = thread::Builder::new().name(name.into()).spawn(move || {
            texthost_log!(Level::Info, "pipe", "'{}' started", name);
            // Ends once every sender is dropped.
            while let Ok(event) = rx.recv() {
                host.handle_pipe_event(event);
            }
            texthost_log!(Level::Info, "pipe", "'{}' exited, queue closed", name);
        });
        if let Err(e) = spawned {
            texthost_log!(Level::Error, "pipe", "cannot spawn '{}': {}", name, e);
        }
    }
}

impl Host {
    /// Apply one event reported by a pipe server.
    pub fn handle_pipe_event(&self, event: PipeEvent) {
        match event {
            PipeEvent::Connected { pid, channel } => {
                if let Err(e) = self.register_process(pid, channel) {
                    texthost_log!(Level::Warn, "pipe", "{}", e);
                }
            }
            PipeEvent::Message { pid, bytes } => self.receive(pid, &bytes),
            PipeEvent::Closed { pid } => self.unregister_process(pid),
        }
    }

    /// Decode one message sent by `pid` and route it.
    pub fn receive(&self, pid: u32, message: &[u8]) {
        match PipeMessage::decode(message) {
            Ok(PipeMessage::Text { hook, retn, split, data }) => {
                self.dispatch_text(StreamKey::new(pid, hook, retn, split), data);
            }
            Ok(PipeMessage::Notification { kind: NOTIFICATION_TEXT, payload }) => {
                let text = self.platform().decode_ansi(payload);
                self.append_console_text(&text);
            }
            Ok(PipeMessage::Notification { kind, .. }) => {
                texthost_log!(Level::Debug, "pipe", "pid {} sent unknown notification {}", pid, kind);
            }
            Err(e) => {
                texthost_log!(Level::Warn, "pipe", "bad message from pid {}: {}", pid, e);
            }
        }
    }
}
