//! Fake OS for the integration tests.
//!
//! Hook sections are temp files mapped with memmap2, the same way the real
//! backend maps the target's section: the host only ever copies bytes out
//! of the mapping, and rewriting the file is visible through it.

#![allow(dead_code)]

use memmap2::{Mmap, MmapOptions};
use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tempfile::NamedTempFile;

use shared::constants::{hookman_mutex_name, section_name, HOOK_ENTRY_SIZE, HOOK_SECTION_SIZE};
use shared::{HookEntry, HookParam};
use texthost::comms::PipeServer;
use texthost::sys::{
    Channel, CrossProcessLock, InjectionTarget, LoaderWait, Marker, Platform, RemoteMemory,
    SharedView,
};
use texthost::{Host, HostConfig, HostEvents, TextStream};

pub const HOST_PID: u32 = 1;

/// Base of the fake name strings inside a target.
const NAME_BASE: u64 = 0x7ff0_0000_0000;

// ───── channel ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeChannel {
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub broken: AtomicBool,
}

impl FakeChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

impl Channel for FakeChannel {
    fn write_message(&self, msg: &[u8]) -> io::Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        }
        self.sent.lock().unwrap().push(msg.to_vec());
        Ok(())
    }
}

// ───── section / lock / memory ─────────────────────────────────────────────

struct FileView {
    map: Mmap,
}

impl SharedView for FileView {
    fn len(&self) -> usize {
        self.map.len()
    }

    fn copy_out(&self, offset: usize, buf: &mut [u8]) -> io::Result<()> {
        let src = self
            .map
            .get(offset..offset + buf.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "past end of view"))?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

/// Counts acquisitions and catches unbalanced use.
#[derive(Default)]
pub struct LockStats {
    pub acquired: AtomicUsize,
    pub held: AtomicBool,
}

struct FakeLock(Arc<LockStats>);

impl CrossProcessLock for FakeLock {
    fn acquire(&self) -> io::Result<()> {
        assert!(!self.0.held.swap(true, Ordering::SeqCst), "hook table lock taken twice");
        self.0.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        assert!(self.0.held.swap(false, Ordering::SeqCst), "hook table lock released while free");
    }
}

struct FakeMemory(Arc<Mutex<HashMap<u64, Vec<u8>>>>);

impl RemoteMemory for FakeMemory {
    fn read(&self, address: u64, buf: &mut [u8]) -> io::Result<()> {
        let regions = self.0.lock().unwrap();
        match regions.get(&address) {
            Some(bytes) if bytes.len() >= buf.len() => {
                buf.copy_from_slice(&bytes[..buf.len()]);
                Ok(())
            }
            _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "unmapped remote address")),
        }
    }
}

// ───── injection ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open(u32),
    Allocate(usize),
    Write(u64, Vec<u8>),
    RunLoader(u64),
    Free(u64),
    Close(u32),
}

#[derive(Debug, Clone, Copy)]
pub struct TargetSpec {
    pub foreign: bool,
    pub loader: LoaderWait,
    pub fail_write: bool,
}

/// Exit code of a loader thread that loaded the library.
pub const MODULE_BASE: u32 = 0x6a40_0000;

impl Default for TargetSpec {
    fn default() -> Self {
        Self { foreign: false, loader: LoaderWait::Finished(MODULE_BASE), fail_write: false }
    }
}

struct FakeTarget {
    pid: u32,
    spec: TargetSpec,
    calls: Arc<Mutex<Vec<Call>>>,
    objects: NamedObjects,
}

impl FakeTarget {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl InjectionTarget for FakeTarget {
    fn is_foreign_architecture(&self) -> io::Result<bool> {
        Ok(self.spec.foreign)
    }

    fn allocate(&self, len: usize) -> io::Result<u64> {
        self.record(Call::Allocate(len));
        Ok(0x5000_0000)
    }

    fn write(&self, address: u64, data: &[u8]) -> io::Result<()> {
        if self.spec.fail_write {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "access denied"));
        }
        self.record(Call::Write(address, data.to_vec()));
        Ok(())
    }

    fn free(&self, address: u64) {
        self.record(Call::Free(address));
    }

    fn run_loader(&self, argument: u64, _timeout: Duration) -> io::Result<LoaderWait> {
        self.record(Call::RunLoader(argument));
        if let LoaderWait::Finished(code) = self.spec.loader {
            if code != 0 {
                // The loaded engine opens its own mutex.
                open_object(&self.objects, &hookman_mutex_name(self.pid));
            }
        }
        Ok(self.spec.loader)
    }
}

impl Drop for FakeTarget {
    fn drop(&mut self) {
        self.record(Call::Close(self.pid));
    }
}

/// Named kernel objects and how many handles each has open. An object
/// exists while its count is above zero.
type NamedObjects = Arc<Mutex<HashMap<String, usize>>>;

fn open_object(objects: &NamedObjects, name: &str) {
    *objects.lock().unwrap().entry(name.to_owned()).or_default() += 1;
}

fn close_object(objects: &NamedObjects, name: &str) {
    let mut objects = objects.lock().unwrap();
    if let Some(count) = objects.get_mut(name) {
        *count -= 1;
        if *count == 0 {
            objects.remove(name);
        }
    }
}

struct FakeMarker {
    name: String,
    objects: NamedObjects,
}

impl Marker for FakeMarker {}

impl Drop for FakeMarker {
    fn drop(&mut self) {
        close_object(&self.objects, &self.name);
    }
}

// ───── platform ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakePlatform {
    sections: Mutex<HashMap<String, NamedTempFile>>,
    locks: Mutex<HashMap<String, Arc<LockStats>>>,
    memory: Mutex<HashMap<u32, Arc<Mutex<HashMap<u64, Vec<u8>>>>>>,
    objects: NamedObjects,
    targets: Mutex<HashMap<u32, TargetSpec>>,
    pub calls: Arc<Mutex<Vec<Call>>>,
    mapped: Mutex<Vec<(String, usize)>>,
}

impl FakePlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Act like the hook engine of `pid`: create its section and mutex and
    /// publish `hooks` in the table (slot order = slice order).
    pub fn publish_hooks(&self, pid: u32, hooks: &[(HookParam, &str)]) {
        let mut table = vec![0u8; HOOK_SECTION_SIZE];
        let memory = self.memory_of(pid);
        let mut memory = memory.lock().unwrap();
        for (slot, (param, name)) in hooks.iter().enumerate() {
            let name_address = NAME_BASE + slot as u64 * 0x100;
            memory.insert(name_address, name.as_bytes().to_vec());
            let entry = HookEntry { param: *param, name_address, name_length: name.len() as u32 };
            let at = slot * HOOK_ENTRY_SIZE;
            entry.encode_into(&mut table[at..at + HOOK_ENTRY_SIZE]).unwrap();
        }

        let mut sections = self.sections.lock().unwrap();
        let file = sections
            .entry(section_name(pid))
            .or_insert_with(|| NamedTempFile::new().unwrap());
        // Rewrite in place so existing mappings see the new table.
        let mut out = OpenOptions::new().write(true).open(file.path()).unwrap();
        out.write_all(&table).unwrap();
        out.flush().unwrap();

        self.locks
            .lock()
            .unwrap()
            .entry(hookman_mutex_name(pid))
            .or_default();
    }

    pub fn lock_stats(&self, pid: u32) -> Arc<LockStats> {
        Arc::clone(self.locks.lock().unwrap().get(&hookman_mutex_name(pid)).expect("no lock"))
    }

    pub fn add_target(&self, pid: u32, spec: TargetSpec) {
        self.targets.lock().unwrap().insert(pid, spec);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Open handles on the marker name of `pid`, from the host and from
    /// a loaded engine alike.
    pub fn marker_handles(&self, pid: u32) -> usize {
        self.objects.lock().unwrap().get(&hookman_mutex_name(pid)).copied().unwrap_or(0)
    }

    pub fn marker_exists(&self, pid: u32) -> bool {
        self.marker_handles(pid) > 0
    }

    /// The target exits, taking the engine's mutex handle with it.
    pub fn target_exits(&self, pid: u32) {
        close_object(&self.objects, &hookman_mutex_name(pid));
        self.targets.lock().unwrap().remove(&pid);
    }

    /// Every `(section, length)` the host asked to map.
    pub fn mapped(&self) -> Vec<(String, usize)> {
        self.mapped.lock().unwrap().clone()
    }

    fn memory_of(&self, pid: u32) -> Arc<Mutex<HashMap<u64, Vec<u8>>>> {
        Arc::clone(self.memory.lock().unwrap().entry(pid).or_default())
    }
}

fn not_found(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{what} does not exist"))
}

impl Platform for FakePlatform {
    fn current_process_id(&self) -> u32 {
        HOST_PID
    }

    fn map_section(&self, name: &str, len: usize) -> io::Result<Box<dyn SharedView>> {
        let sections = self.sections.lock().unwrap();
        let file = sections.get(name).ok_or_else(|| not_found(name))?;
        self.mapped.lock().unwrap().push((name.to_owned(), len));
        let file = File::open(file.path())?;
        let map = unsafe { MmapOptions::new().len(len).map(&file)? };
        Ok(Box::new(FileView { map }))
    }

    fn open_mutex(&self, name: &str) -> io::Result<Box<dyn CrossProcessLock>> {
        let locks = self.locks.lock().unwrap();
        let stats = locks.get(name).ok_or_else(|| not_found(name))?;
        Ok(Box::new(FakeLock(Arc::clone(stats))))
    }

    fn open_process(&self, pid: u32) -> io::Result<Box<dyn RemoteMemory>> {
        Ok(Box::new(FakeMemory(self.memory_of(pid))))
    }

    fn create_marker(&self, name: &str) -> io::Result<Option<Box<dyn Marker>>> {
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(name) {
            return Ok(None);
        }
        objects.insert(name.to_owned(), 1);
        drop(objects);
        Ok(Some(Box::new(FakeMarker { name: name.to_owned(), objects: Arc::clone(&self.objects) })))
    }

    fn open_target(&self, pid: u32) -> io::Result<Box<dyn InjectionTarget>> {
        let spec = *self.targets.lock().unwrap().get(&pid).ok_or_else(|| not_found("process"))?;
        self.calls.lock().unwrap().push(Call::Open(pid));
        Ok(Box::new(FakeTarget {
            pid,
            spec,
            calls: Arc::clone(&self.calls),
            objects: Arc::clone(&self.objects),
        }))
    }

    fn loader_argument(&self, library: &Path) -> io::Result<Vec<u8>> {
        let full = format!("C:\\hooks\\{}", library.display());
        Ok(full.encode_utf16().chain(Some(0)).flat_map(u16::to_le_bytes).collect())
    }
}

// ───── consumer side ───────────────────────────────────────────────────────

/// Records every lifecycle callback as a line of text.
#[derive(Default)]
pub struct RecordingEvents {
    pub log: Mutex<Vec<String>>,
}

impl RecordingEvents {
    pub fn lines(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn push(&self, line: String) {
        self.log.lock().unwrap().push(line);
    }
}

fn describe(stream: &TextStream) -> String {
    let key = stream.key();
    format!("{}:{:x}:{:x}:{:x}", key.pid, key.hook, key.retn, key.split)
}

impl HostEvents for RecordingEvents {
    fn on_attach(&self, pid: u32) {
        self.push(format!("attach {pid}"));
    }
    fn on_detach(&self, pid: u32) {
        self.push(format!("detach {pid}"));
    }
    fn on_create(&self, stream: &Arc<TextStream>) {
        self.push(format!("create {}", describe(stream)));
    }
    fn on_remove(&self, stream: &Arc<TextStream>) {
        self.push(format!("remove {}", describe(stream)));
    }
}

/// Pipe server that accepts nothing.
pub struct IdleServer;

impl PipeServer for IdleServer {
    fn name(&self) -> &'static str {
        "idle"
    }
    fn listen(self: Box<Self>, _host: Arc<Host>) {}
}

pub fn started_host(platform: &Arc<FakePlatform>) -> (Arc<Host>, Arc<RecordingEvents>) {
    let platform: Arc<dyn Platform> = Arc::clone(platform) as Arc<dyn Platform>;
    let host = Arc::new(Host::new(platform, HostConfig::default()));
    let events = Arc::new(RecordingEvents::default());
    assert!(host.start(Arc::clone(&events) as Arc<dyn HostEvents>, Box::new(IdleServer)));
    (host, events)
}

pub fn param(address: u32, hook_type: u32) -> HookParam {
    HookParam { address, hook_type, ..Default::default() }
}
