//! Host context
//! ============
//! `Host` owns both registries (attached processes and text streams) behind
//! one mutex, plus the consumer's lifecycle callbacks.
//!
//! Event delivery
//! ──────────────
//!   • Lifecycle events are queued *while* the registry lock is held, so the
//!     queue order is exactly the mutation order and each event carries the
//!     stream handle as it was at that moment.
//!   • The queue is drained *after* the lock is released, by whichever
//!     thread gets there first. Callbacks may call back into the host; an
//!     event raised from inside a callback is delivered once it returns.

use crossbeam::channel::{self, Receiver, Sender};
use log::Level;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, TryLockError},
};
use thiserror::Error;

use crate::comms::PipeServer;
use crate::config::HostConfig;
use crate::stream::{StreamKey, TextStream};
use crate::sys::Platform;

pub mod hook_table;
pub mod process;
pub mod thread;

pub use hook_table::{HookInfo, HookTable};
use process::ProcessEntry;

/// Lifecycle callbacks of the consumer. All default to no-ops.
pub trait HostEvents: Send + Sync {
    fn on_attach(&self, _pid: u32) {}
    fn on_detach(&self, _pid: u32) {}
    fn on_create(&self, _stream: &Arc<TextStream>) {}
    fn on_remove(&self, _stream: &Arc<TextStream>) {}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("process {0} is already registered")]
    AlreadyRegistered(u32),
}

#[derive(Debug)]
enum HostEvent {
    Attach(u32),
    Detach(u32),
    Created(Arc<TextStream>),
    Removed(Arc<TextStream>),
}

/// Everything guarded by the host lock.
#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) processes: HashMap<u32, ProcessEntry>,
    pub(crate) streams:   HashMap<StreamKey, Arc<TextStream>>,
}

pub struct Host {
    platform: Arc<dyn Platform>,
    config:   HostConfig,
    state:    Mutex<Registry>,
    events:   OnceLock<Arc<dyn HostEvents>>,
    queue_tx: Sender<HostEvent>,
    queue_rx: Receiver<HostEvent>,
    draining: Mutex<()>,
}

impl Host {
    /// Build the context. The console stream exists from here on.
    pub fn new(platform: Arc<dyn Platform>, config: HostConfig) -> Self {
        let (queue_tx, queue_rx) = channel::unbounded();
        let mut registry = Registry::default();
        registry.streams.insert(
            StreamKey::CONSOLE,
            Arc::new(TextStream::new(StreamKey::CONSOLE, shared::hook::USING_UNICODE)),
        );
        Self {
            platform,
            config,
            state: Mutex::new(registry),
            events: OnceLock::new(),
            queue_tx,
            queue_rx,
            draining: Mutex::new(()),
        }
    }

    /// Install the callbacks, announce the console stream and hand the host
    /// to the pipe server. Only the first call has any effect.
    pub fn start(self: &Arc<Self>, events: Arc<dyn HostEvents>, server: Box<dyn PipeServer>) -> bool {
        if self.events.set(events).is_err() {
            texthost_log!(Level::Debug, "host", "start called twice, ignoring");
            return false;
        }
        {
            let state = self.lock();
            if let Some(console) = state.streams.get(&StreamKey::CONSOLE) {
                self.notify(HostEvent::Created(Arc::clone(console)));
            }
        }
        self.drain_events();
        texthost_log!(Level::Info, "host", "started, listening through {}", server.name());
        server.listen(Arc::clone(self));
        true
    }

    /// Forcibly detach everything and drop the console stream. Only needed
    /// to check for leaks; a normal exit leaves the cleanup to the OS.
    pub fn shutdown(&self) {
        let pids: Vec<u32> = self.lock().processes.keys().copied().collect();
        for pid in pids {
            self.unregister_process(pid);
        }
        {
            let mut state = self.lock();
            if let Some(console) = state.streams.remove(&StreamKey::CONSOLE) {
                self.notify(HostEvent::Removed(console));
            }
        }
        self.drain_events();
        texthost_log!(Level::Info, "host", "shut down");
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub(crate) fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Registry> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an event. Call with the registry lock held.
    fn notify(&self, event: HostEvent) {
        if self.events.get().is_some() {
            // Both ends live in `self`, so the send cannot fail.
            let _ = self.queue_tx.send(event);
        }
    }

    /// Deliver queued events. Call without the registry lock.
    fn drain_events(&self) {
        let Some(events) = self.events.get() else { return };
        loop {
            let _guard = match self.draining.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                // Another thread (or an outer frame of this one) is draining
                // and will pick our events up.
                Err(TryLockError::WouldBlock) => return,
            };
            while let Ok(event) = self.queue_rx.try_recv() {
                match event {
                    HostEvent::Attach(pid)      => events.on_attach(pid),
                    HostEvent::Detach(pid)      => events.on_detach(pid),
                    HostEvent::Created(stream)  => events.on_create(&stream),
                    HostEvent::Removed(stream)  => events.on_remove(&stream),
                }
            }
            drop(_guard);
            // Something may have been queued between the last receive and
            // the unlock while another drainer backed off.
            if self.queue_rx.is_empty() {
                return;
            }
        }
    }
}
