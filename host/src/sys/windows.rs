//! `windows-sys` backend of the OS seam.
//!
//! Every handle is wrapped in an owner that closes it on drop. Views are
//! mapped READ-ONLY and only ever copied out of, since the target keeps
//! writing to the same section.

use std::{
    ffi::{c_void, OsStr},
    io, mem,
    os::windows::prelude::OsStrExt,
    path::Path,
    ptr,
    time::Duration,
};
use windows_sys::Win32::{
    Foundation::{
        CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, FALSE, HANDLE, HMODULE, MAX_PATH,
        WAIT_ABANDONED, WAIT_OBJECT_0, WAIT_TIMEOUT,
    },
    Storage::FileSystem::WriteFile,
    System::{
        Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory},
        LibraryLoader::{
            FreeLibrary, GetModuleFileNameW, GetModuleHandleW, GetProcAddress, LoadLibraryExW,
            DONT_RESOLVE_DLL_REFERENCES,
        },
        Memory::{
            MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, VirtualAllocEx, VirtualFreeEx,
            FILE_MAP_READ, MEMORY_MAPPED_VIEW_ADDRESS, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE,
            PAGE_READWRITE,
        },
        Threading::{
            CreateMutexW, CreateRemoteThread, GetCurrentProcess, GetCurrentProcessId,
            GetExitCodeThread, IsWow64Process, OpenMutexW, OpenProcess, ReleaseMutex,
            WaitForSingleObject, INFINITE,
            LPTHREAD_START_ROUTINE, MUTEX_ALL_ACCESS, PROCESS_ALL_ACCESS,
        },
    },
};

use super::{
    read_growing, Channel, CrossProcessLock, InjectionTarget, LoaderWait, Marker, Platform,
    RemoteMemory, SharedView,
};

/// Build a NUL-terminated UTF-16 string for the Win32 API.
fn wide(s: impl AsRef<OsStr>) -> Vec<u16> {
    s.as_ref().encode_wide().chain(Some(0)).collect()
}

/// Closes the wrapped handle on drop.
struct OwnedHandle(HANDLE);

// Kernel handles are process-wide values, usable from any thread.
unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}

impl OwnedHandle {
    fn new(handle: HANDLE) -> io::Result<Self> {
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(handle))
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) };
    }
}

impl Marker for OwnedHandle {}

/// Pipe handle owned by the pipe server.
pub struct PipeChannel {
    handle: HANDLE,
}

unsafe impl Send for PipeChannel {}
unsafe impl Sync for PipeChannel {}

impl PipeChannel {
    /// # Safety
    /// `handle` must stay a valid pipe handle for as long as the process is
    /// registered with the host.
    pub unsafe fn from_raw(handle: HANDLE) -> Self {
        Self { handle }
    }
}

impl Channel for PipeChannel {
    fn write_message(&self, msg: &[u8]) -> io::Result<()> {
        let len = u32::try_from(msg.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "message too large"))?;
        let mut written = 0u32;
        let ok = unsafe { WriteFile(self.handle, msg.as_ptr(), len, &mut written, ptr::null_mut()) };
        if ok == FALSE {
            return Err(io::Error::last_os_error());
        }
        if written != len {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short pipe write"));
        }
        Ok(())
    }
}

/// Read-only view of a named section; unmapped before its handle is closed.
struct MappedSection {
    view:    MEMORY_MAPPED_VIEW_ADDRESS,
    len:     usize,
    _handle: OwnedHandle,
}

unsafe impl Send for MappedSection {}
unsafe impl Sync for MappedSection {}

impl SharedView for MappedSection {
    fn len(&self) -> usize {
        self.len
    }

    fn copy_out(&self, offset: usize, buf: &mut [u8]) -> io::Result<()> {
        let end = offset.checked_add(buf.len()).filter(|end| *end <= self.len);
        if end.is_none() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of view"));
        }
        unsafe {
            let src = (self.view.Value as *const u8).add(offset);
            ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }
}

impl Drop for MappedSection {
    fn drop(&mut self) {
        unsafe { UnmapViewOfFile(self.view) };
    }
}

struct NamedMutex(OwnedHandle);

impl CrossProcessLock for NamedMutex {
    fn acquire(&self) -> io::Result<()> {
        match unsafe { WaitForSingleObject(self.0 .0, INFINITE) } {
            // An abandoned mutex is still ours; the table is re-read under it.
            WAIT_OBJECT_0 | WAIT_ABANDONED => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }

    fn release(&self) {
        unsafe { ReleaseMutex(self.0 .0) };
    }
}

struct ProcessHandle(OwnedHandle);

impl RemoteMemory for ProcessHandle {
    fn read(&self, address: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut read = 0usize;
        let ok = unsafe {
            ReadProcessMemory(
                self.0 .0,
                address as usize as *const c_void,
                buf.as_mut_ptr().cast(),
                buf.len(),
                &mut read,
            )
        };
        if ok == FALSE {
            return Err(io::Error::last_os_error());
        }
        if read != buf.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "partial remote read"));
        }
        Ok(())
    }
}

impl InjectionTarget for ProcessHandle {
    fn is_foreign_architecture(&self) -> io::Result<bool> {
        let mut target_wow64 = FALSE;
        if unsafe { IsWow64Process(self.0 .0, &mut target_wow64) } == FALSE {
            return Err(io::Error::last_os_error());
        }
        if cfg!(target_pointer_width = "64") {
            return Ok(target_wow64 != FALSE);
        }
        let mut host_wow64 = FALSE;
        if unsafe { IsWow64Process(GetCurrentProcess(), &mut host_wow64) } == FALSE {
            return Err(io::Error::last_os_error());
        }
        // A 32-bit host on a 64-bit OS can only reach other WOW64 processes.
        Ok(host_wow64 != FALSE && target_wow64 == FALSE)
    }

    fn allocate(&self, len: usize) -> io::Result<u64> {
        let remote = unsafe {
            VirtualAllocEx(self.0 .0, ptr::null(), len, MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE)
        };
        if remote.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(remote as usize as u64)
    }

    fn write(&self, address: u64, data: &[u8]) -> io::Result<()> {
        let mut written = 0usize;
        let ok = unsafe {
            WriteProcessMemory(
                self.0 .0,
                address as usize as *const c_void,
                data.as_ptr().cast(),
                data.len(),
                &mut written,
            )
        };
        if ok == FALSE {
            return Err(io::Error::last_os_error());
        }
        if written != data.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "partial remote write"));
        }
        Ok(())
    }

    fn free(&self, address: u64) {
        unsafe { VirtualFreeEx(self.0 .0, address as usize as *mut c_void, 0, MEM_RELEASE) };
    }

    fn run_loader(&self, argument: u64, timeout: Duration) -> io::Result<LoaderWait> {
        // kernel32 is mapped at the same address in every process of one
        // architecture, so the local LoadLibraryW is the target's as well.
        let kernel32 = unsafe { GetModuleHandleW(wide("kernel32.dll").as_ptr()) };
        if kernel32.is_null() {
            return Err(io::Error::last_os_error());
        }
        let load_library = unsafe { GetProcAddress(kernel32, b"LoadLibraryW\0".as_ptr()) };
        if load_library.is_none() {
            return Err(io::Error::last_os_error());
        }
        let start: LPTHREAD_START_ROUTINE = unsafe { mem::transmute(load_library) };

        let thread = OwnedHandle::new(unsafe {
            CreateRemoteThread(
                self.0 .0,
                ptr::null(),
                0,
                start,
                argument as usize as *const c_void,
                0,
                ptr::null_mut(),
            )
        })?;

        let millis = u32::try_from(timeout.as_millis()).unwrap_or(INFINITE - 1);
        match unsafe { WaitForSingleObject(thread.0, millis) } {
            WAIT_OBJECT_0 => {
                let mut code = 0u32;
                if unsafe { GetExitCodeThread(thread.0, &mut code) } == FALSE {
                    return Err(io::Error::last_os_error());
                }
                Ok(LoaderWait::Finished(code))
            }
            WAIT_TIMEOUT => Ok(LoaderWait::TimedOut),
            _ => Err(io::Error::last_os_error()),
        }
    }
}

/// The running Windows system.
pub struct NativePlatform;

impl Platform for NativePlatform {
    fn current_process_id(&self) -> u32 {
        unsafe { GetCurrentProcessId() }
    }

    fn map_section(&self, name: &str, len: usize) -> io::Result<Box<dyn SharedView>> {
        let name = wide(name);
        let handle = OwnedHandle::new(unsafe { OpenFileMappingW(FILE_MAP_READ, FALSE, name.as_ptr()) })?;
        let view = unsafe { MapViewOfFile(handle.0, FILE_MAP_READ, 0, 0, len) };
        if view.Value.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(Box::new(MappedSection { view, len, _handle: handle }))
    }

    fn open_mutex(&self, name: &str) -> io::Result<Box<dyn CrossProcessLock>> {
        let name = wide(name);
        let handle = OwnedHandle::new(unsafe { OpenMutexW(MUTEX_ALL_ACCESS, FALSE, name.as_ptr()) })?;
        Ok(Box::new(NamedMutex(handle)))
    }

    fn open_process(&self, pid: u32) -> io::Result<Box<dyn RemoteMemory>> {
        let handle = OwnedHandle::new(unsafe { OpenProcess(PROCESS_ALL_ACCESS, FALSE, pid) })?;
        Ok(Box::new(ProcessHandle(handle)))
    }

    fn create_marker(&self, name: &str) -> io::Result<Option<Box<dyn Marker>>> {
        let name = wide(name);
        let handle = OwnedHandle::new(unsafe { CreateMutexW(ptr::null(), FALSE, name.as_ptr()) })?;
        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            return Ok(None);
        }
        Ok(Some(Box::new(handle)))
    }

    fn open_target(&self, pid: u32) -> io::Result<Box<dyn InjectionTarget>> {
        let handle = OwnedHandle::new(unsafe { OpenProcess(PROCESS_ALL_ACCESS, FALSE, pid) })?;
        Ok(Box::new(ProcessHandle(handle)))
    }

    fn loader_argument(&self, library: &Path) -> io::Result<Vec<u8>> {
        let name = wide(library);
        let module = LoadedModule(unsafe {
            LoadLibraryExW(name.as_ptr(), ptr::null_mut(), DONT_RESOLVE_DLL_REFERENCES)
        });
        if module.0.is_null() {
            return Err(io::Error::last_os_error());
        }
        let path = read_growing(MAX_PATH as usize, |buf| {
            let capacity = u32::try_from(buf.len()).unwrap_or(u32::MAX);
            match unsafe { GetModuleFileNameW(module.0, buf.as_mut_ptr(), capacity) } {
                0 => Err(io::Error::last_os_error()),
                len => Ok(len as usize),
            }
        })?;
        Ok(path
            .iter()
            .chain(Some(&0))
            .flat_map(|unit| unit.to_le_bytes())
            .collect())
    }
}

/// Library mapped only to look up its path; freed on drop.
struct LoadedModule(HMODULE);

impl Drop for LoadedModule {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { FreeLibrary(self.0) };
        }
    }
}
