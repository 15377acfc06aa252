//! Process registry: one entry per attached target.

use log::Level;
use std::sync::Arc;

use shared::HookParam;

use super::hook_table::{HookInfo, HookTable};
use super::{Host, HostEvent, Registry, RegistryError};
use crate::stream::StreamKey;
use crate::sys::Channel;

/// Resources of one attached process.
pub(crate) struct ProcessEntry {
    pub(crate) channel: Arc<dyn Channel>,
    /// `None` until the hook engine has created its section and mutex.
    pub(crate) table:   Option<HookTable>,
}

impl Host {
    /// Called by the pipe server when a target connects.
    ///
    /// A target whose hook engine is still initialising is registered
    /// without a hook table; the table is opened on first use.
    pub fn register_process(&self, pid: u32, channel: Arc<dyn Channel>) -> Result<(), RegistryError> {
        {
            let mut state = self.lock();
            if state.processes.contains_key(&pid) {
                texthost_log!(Level::Warn, "registry", "pid {} connected twice, rejecting", pid);
                return Err(RegistryError::AlreadyRegistered(pid));
            }
            let table = self.open_table(pid);
            state.processes.insert(pid, ProcessEntry { channel, table });
            self.notify(HostEvent::Attach(pid));
        }
        texthost_log!(Level::Info, "registry", "attached pid {}", pid);
        self.drain_events();
        Ok(())
    }

    /// Called by the pipe server when a target's channel closes. Releases
    /// the process's OS objects and removes all of its streams. Does nothing
    /// for a process that is not registered.
    pub fn unregister_process(&self, pid: u32) {
        {
            let mut state = self.lock();
            let Some(entry) = state.processes.remove(&pid) else { return };
            drop(entry);
            let removed = self.remove_streams_locked(&mut state, StreamKey::same_process, &StreamKey::process(pid));
            texthost_log!(Level::Debug, "registry", "pid {} had {} stream(s)", pid, removed);
            self.notify(HostEvent::Detach(pid));
        }
        texthost_log!(Level::Info, "registry", "detached pid {}", pid);
        self.drain_events();
    }

    pub fn is_attached(&self, pid: u32) -> bool {
        self.lock().processes.contains_key(&pid)
    }

    /// Pids of every attached process, ascending.
    pub fn attached_processes(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.lock().processes.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Parameters of the hook at `address` in `pid`; `None` when unknown or
    /// when the process has no readable hook table (yet).
    pub fn hook_param(&self, pid: u32, address: u32) -> Option<HookParam> {
        let mut state = self.lock();
        self.hook_param_locked(&mut state, pid, address)
    }

    /// Name of the hook at `address` in `pid`, converted from the target's
    /// code page.
    pub fn hook_name(&self, pid: u32, address: u32) -> Option<String> {
        if pid == StreamKey::CONSOLE.pid {
            return Some("Console".to_owned());
        }
        let mut state = self.lock();
        let table = self.table_locked(&mut state, pid)?;
        match table.name(address) {
            Ok(name) => name.map(|raw| self.platform().decode_ansi(&raw)),
            Err(e) => {
                texthost_log!(Level::Warn, "registry", "hook name of pid {} @{:#x}: {}", pid, address, e);
                None
            }
        }
    }

    /// Every hook currently installed in `pid`.
    pub fn hooks(&self, pid: u32) -> Vec<HookInfo> {
        let mut state = self.lock();
        let Some(table) = self.table_locked(&mut state, pid) else { return Vec::new() };
        match table.entries() {
            Ok(entries) => entries
                .into_iter()
                .map(|(entry, raw)| HookInfo { param: entry.param, name: self.platform().decode_ansi(&raw) })
                .collect(),
            Err(e) => {
                texthost_log!(Level::Warn, "registry", "hook table of pid {}: {}", pid, e);
                Vec::new()
            }
        }
    }

    pub(crate) fn hook_param_locked(&self, state: &mut Registry, pid: u32, address: u32) -> Option<HookParam> {
        let table = self.table_locked(state, pid)?;
        match table.param(address) {
            Ok(param) => param,
            Err(e) => {
                texthost_log!(Level::Warn, "registry", "hook param of pid {} @{:#x}: {}", pid, address, e);
                None
            }
        }
    }

    /// Hook table of an attached process, opening it if it was not ready at
    /// registration.
    fn table_locked<'a>(&self, state: &'a mut Registry, pid: u32) -> Option<&'a HookTable> {
        let entry = state.processes.get_mut(&pid)?;
        if entry.table.is_none() {
            entry.table = self.open_table(pid);
        }
        entry.table.as_ref()
    }

    fn open_table(&self, pid: u32) -> Option<HookTable> {
        match HookTable::open(self.platform(), pid) {
            Ok(table) => Some(table),
            Err(e) => {
                texthost_log!(Level::Debug, "registry", "hook table of pid {} not ready: {}", pid, e);
                None
            }
        }
    }
}
