//! OS seam.
//!
//! Everything the registries and the launcher need from the operating system
//! goes through `Platform`. Each returned object owns its OS handle and
//! releases it on drop, so an entry is torn down by dropping it.
//!
//! On Windows `native()` returns the `windows-sys` backend; tests plug in
//! their own implementation.

use std::{io, path::Path, time::Duration};

pub mod encoding;
#[cfg(windows)]
pub mod windows;

/// Write side of a target's channel. The handle itself belongs to the pipe
/// server; the host only writes to it.
pub trait Channel: Send + Sync {
    /// One blocking write of the whole message.
    fn write_message(&self, msg: &[u8]) -> io::Result<()>;
}

/// Read-only mapped view of a named section.
pub trait SharedView: Send + Sync {
    fn len(&self) -> usize;

    /// Copy `buf.len()` bytes starting at `offset` out of the view.
    fn copy_out(&self, offset: usize, buf: &mut [u8]) -> io::Result<()>;
}

/// Named mutex shared with the target process.
pub trait CrossProcessLock: Send + Sync {
    fn acquire(&self) -> io::Result<()>;
    fn release(&self);
}

/// Handle to another process that allows reading its memory.
pub trait RemoteMemory: Send + Sync {
    fn read(&self, address: u64, buf: &mut [u8]) -> io::Result<()>;
}

/// Keeps a named kernel object alive while held.
pub trait Marker: Send + Sync {}

/// How the remote loader thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderWait {
    /// The thread returned with this exit code: the low half of the loaded
    /// module's handle, or 0 when the library could not be loaded.
    Finished(u32),
    TimedOut,
}

/// Process opened for injection. Dropping it closes the process handle.
pub trait InjectionTarget {
    /// True when the target cannot load a library built for this host.
    fn is_foreign_architecture(&self) -> io::Result<bool>;
    fn allocate(&self, len: usize) -> io::Result<u64>;
    fn write(&self, address: u64, data: &[u8]) -> io::Result<()>;
    fn free(&self, address: u64);
    /// Start a thread at the target's library loader with `argument` and
    /// wait for it at most `timeout`.
    fn run_loader(&self, argument: u64, timeout: Duration) -> io::Result<LoaderWait>;
}

pub trait Platform: Send + Sync {
    fn current_process_id(&self) -> u32;

    /// Map `len` bytes of an existing named section.
    fn map_section(&self, name: &str, len: usize) -> io::Result<Box<dyn SharedView>>;

    /// Open an existing named mutex.
    fn open_mutex(&self, name: &str) -> io::Result<Box<dyn CrossProcessLock>>;

    fn open_process(&self, pid: u32) -> io::Result<Box<dyn RemoteMemory>>;

    /// Create a named marker; `None` when it already existed.
    fn create_marker(&self, name: &str) -> io::Result<Option<Box<dyn Marker>>>;

    fn open_target(&self, pid: u32) -> io::Result<Box<dyn InjectionTarget>>;

    /// Full path of `library` as the loader expects its argument, including
    /// the terminator, without running the library's initialisation.
    fn loader_argument(&self, library: &Path) -> io::Result<Vec<u8>>;

    /// Convert text in the target's ANSI code page.
    fn decode_ansi(&self, bytes: &[u8]) -> String {
        encoding::decode_ansi(bytes)
    }
}

/// Held cross-process lock, released on drop.
pub struct LockGuard<'a> {
    lock: &'a dyn CrossProcessLock,
}

impl<'a> LockGuard<'a> {
    pub fn acquire(lock: &'a dyn CrossProcessLock) -> io::Result<Self> {
        lock.acquire()?;
        Ok(Self { lock })
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// Upper bound for a Windows long path, in UTF-16 units.
pub(crate) const LONG_PATH_MAX: usize = 32_768;

/// Run `fill` with ever larger buffers until its result fits. `fill` returns
/// how many units it wrote; a full buffer means the result was cut off.
pub(crate) fn read_growing<F>(initial: usize, mut fill: F) -> io::Result<Vec<u16>>
where
    F: FnMut(&mut [u16]) -> io::Result<usize>,
{
    let mut capacity = initial.max(1);
    loop {
        let mut buf = vec![0u16; capacity];
        let len = fill(&mut buf)?;
        if len < capacity {
            buf.truncate(len);
            return Ok(buf);
        }
        if capacity >= LONG_PATH_MAX {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "path longer than any Windows path"));
        }
        capacity = (capacity * 2).min(LONG_PATH_MAX);
    }
}

#[cfg(windows)]
pub fn native() -> std::sync::Arc<dyn Platform> {
    std::sync::Arc::new(windows::NativePlatform)
}
