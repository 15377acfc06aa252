//! Shared hook table reader
//! ------------------------
//! The hook engine publishes its hooks in a named section
//! (`TEXTHOOK_SECTION_<pid>`) as a fixed array of `HookEntry` slots:
//
//!   ┌──── 0                         MAX_HOOK * 64 ────┐
//!   │ slot 0 │ slot 1 │ …                │ slot 299   │
//!   └─────────────────────────────────────────────────┘
//
//! * The target creates the section at twice that size; the host maps only
//!   the first half, which holds the whole array.
//! * Vacant slots have address 0.
//! * The target rewrites slots while installing hooks, so every read holds
//!   the named mutex `TEXTHOOK_HOOKMAN_<pid>` shared with it.
//! * Slots are copied out and decoded; hook names are fetched from the
//!   target's memory with a bounded cross-process read.

use std::io;
use thiserror::Error;

use shared::constants::{hookman_mutex_name, section_name, HOOK_ENTRY_SIZE, HOOK_SECTION_SIZE, MAX_HOOK};
use shared::protocol::MAX_NAME_LEN;
use shared::{HookEntry, HookParam, ProtocolError};

use crate::sys::{CrossProcessLock, LockGuard, Platform, RemoteMemory, SharedView};

#[derive(Debug, Error)]
pub enum TableError {
    #[error("hook table I/O: {0}")]
    Io(#[from] io::Error),

    #[error("malformed hook slot: {0}")]
    Decode(#[from] ProtocolError),
}

/// One occupied slot with its name resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookInfo {
    pub param: HookParam,
    pub name:  String,
}

/// OS objects needed to read one target's hook table. Dropping it closes
/// the lock, unmaps the view and closes the process handle, in that order.
pub struct HookTable {
    lock:    Box<dyn CrossProcessLock>,
    view:    Box<dyn SharedView>,
    process: Box<dyn RemoteMemory>,
}

impl HookTable {
    /// Open the table of `pid`. Fails while the hook engine has not created
    /// its objects yet.
    pub fn open(platform: &dyn Platform, pid: u32) -> io::Result<Self> {
        let view = platform.map_section(&section_name(pid), HOOK_SECTION_SIZE / 2)?;
        let process = platform.open_process(pid)?;
        let lock = platform.open_mutex(&hookman_mutex_name(pid))?;
        Ok(Self { lock, view, process })
    }

    /// Parameters of the hook at `address`, if one is installed.
    pub fn param(&self, address: u32) -> Result<Option<HookParam>, TableError> {
        let _held = LockGuard::acquire(self.lock.as_ref())?;
        Ok(self.find(address)?.map(|entry| entry.param))
    }

    /// Raw name bytes of the hook at `address`, in the target's encoding.
    pub fn name(&self, address: u32) -> Result<Option<Vec<u8>>, TableError> {
        let _held = LockGuard::acquire(self.lock.as_ref())?;
        match self.find(address)? {
            Some(entry) => Ok(Some(self.read_name(&entry)?)),
            None => Ok(None),
        }
    }

    /// Every occupied slot with its raw name.
    pub fn entries(&self) -> Result<Vec<(HookEntry, Vec<u8>)>, TableError> {
        let _held = LockGuard::acquire(self.lock.as_ref())?;
        let mut out = Vec::new();
        let mut record = [0u8; HOOK_ENTRY_SIZE];
        for slot in 0..self.slots() {
            self.view.copy_out(slot * HOOK_ENTRY_SIZE, &mut record)?;
            let entry = HookEntry::decode(&record)?;
            if entry.is_vacant() {
                continue;
            }
            let name = self.read_name(&entry)?;
            out.push((entry, name));
        }
        Ok(out)
    }

    fn slots(&self) -> usize {
        (self.view.len() / HOOK_ENTRY_SIZE).min(MAX_HOOK)
    }

    /// Linear scan. Caller holds the lock.
    fn find(&self, address: u32) -> Result<Option<HookEntry>, TableError> {
        if address == 0 {
            return Ok(None);
        }
        let mut record = [0u8; HOOK_ENTRY_SIZE];
        for slot in 0..self.slots() {
            self.view.copy_out(slot * HOOK_ENTRY_SIZE, &mut record)?;
            if HookEntry::peek_address(&record)? == address {
                return Ok(Some(HookEntry::decode(&record)?));
            }
        }
        Ok(None)
    }

    fn read_name(&self, entry: &HookEntry) -> io::Result<Vec<u8>> {
        let len = (entry.name_length as usize).min(MAX_NAME_LEN);
        if len == 0 || entry.name_address == 0 {
            return Ok(Vec::new());
        }
        let mut name = vec![0u8; len];
        self.process.read(entry.name_address, &mut name)?;
        if let Some(end) = name.iter().position(|b| *b == 0) {
            name.truncate(end);
        }
        Ok(name)
    }
}
