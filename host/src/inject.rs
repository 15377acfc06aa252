//! Injection launcher
//! ==================
//! Loads the hook engine into a target with the classic remote-thread
//! technique:
//!
//!   1. refuse the host's own pid
//!   2. create the pid's marker object; if it exists the target is already
//!      injected (or being injected) and nothing else happens. The marker
//!      has the name of the engine's own mutex, so once the engine is
//!      loaded it keeps the name alive; the host's handle is closed when
//!      this call returns
//!   3. open the target and check it runs the host's architecture
//!   4. resolve the library path without initialising the library
//!   5. copy the path into a buffer allocated in the target and start a
//!      thread at the target's loader routine on it, waiting up to `timeout`
//!
//! A loader thread that returns 0 did not load the library. The remote
//! buffer and the process handle are released on every path. A
//! timed-out loader thread is left running; its buffer is freed anyway, so
//! the target's state is unknown and reported as `TimedOut`.
//!
//! The library registers its hooks and connects back on its own; this does
//! not wait for that.

use log::Level;
use std::{io, time::Duration};
use thiserror::Error;

use shared::constants::hookman_mutex_name;

use crate::registry::Host;
use crate::sys::{InjectionTarget, LoaderWait};

#[derive(Debug, Error)]
pub enum InjectError {
    #[error("refusing to inject into the host itself (pid {0})")]
    SelfInjection(u32),

    #[error("process {0} is already injected")]
    AlreadyInjected(u32),

    #[error("process {0} has a different architecture than the host")]
    ArchitectureMismatch(u32),

    #[error("the loader in process {0} could not load the library")]
    LoaderFailed(u32),

    #[error("{step} failed for process {pid}: {source}")]
    Os {
        pid:  u32,
        step: &'static str,
        #[source]
        source: io::Error,
    },
}

/// How far the bootstrap is known to have got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectOutcome {
    /// The loader thread returned.
    Loaded,
    /// The loader thread was still running when the wait ended.
    TimedOut,
}

fn os(pid: u32, step: &'static str) -> impl FnOnce(io::Error) -> InjectError {
    move |source| InjectError::Os { pid, step, source }
}

/// Buffer inside the target, freed on drop.
struct RemoteBuffer<'a> {
    target:  &'a dyn InjectionTarget,
    address: u64,
}

impl<'a> RemoteBuffer<'a> {
    fn allocate(target: &'a dyn InjectionTarget, len: usize) -> io::Result<Self> {
        let address = target.allocate(len)?;
        Ok(Self { target, address })
    }
}

impl Drop for RemoteBuffer<'_> {
    fn drop(&mut self) {
        self.target.free(self.address);
    }
}

impl Host {
    /// Inject with the configured timeout.
    pub fn inject(&self, pid: u32) -> Result<InjectOutcome, InjectError> {
        self.inject_process(pid, self.config().injection.timeout)
    }

    /// Load the hook engine into `pid`. Failures are also written to the
    /// console stream.
    pub fn inject_process(&self, pid: u32, timeout: Duration) -> Result<InjectOutcome, InjectError> {
        let result = self.try_inject(pid, timeout);
        match &result {
            Ok(InjectOutcome::Loaded) => {
                texthost_log!(Level::Info, "inject", "loader finished in pid {}", pid);
            }
            Ok(InjectOutcome::TimedOut) => {
                texthost_log!(Level::Warn, "inject", "loader in pid {} still running after {:?}", pid, timeout);
                self.append_console_text(&format!("injection into {pid} timed out, target state unknown"));
            }
            Err(e) => {
                texthost_log!(Level::Warn, "inject", "{}", e);
                self.append_console_text(&format!("couldn't inject: {e}"));
            }
        }
        result
    }

    fn try_inject(&self, pid: u32, timeout: Duration) -> Result<InjectOutcome, InjectError> {
        if pid == self.platform().current_process_id() {
            return Err(InjectError::SelfInjection(pid));
        }
        let _marker = self
            .platform()
            .create_marker(&hookman_mutex_name(pid))
            .map_err(os(pid, "create marker"))?
            .ok_or(InjectError::AlreadyInjected(pid))?;

        self.load_library(pid, timeout)
    }

    fn load_library(&self, pid: u32, timeout: Duration) -> Result<InjectOutcome, InjectError> {
        let platform = self.platform();
        let target = platform.open_target(pid).map_err(os(pid, "open process"))?;
        if target.is_foreign_architecture().map_err(os(pid, "query architecture"))? {
            return Err(InjectError::ArchitectureMismatch(pid));
        }

        let library = &self.config().injection.library;
        let argument = platform.loader_argument(library).map_err(os(pid, "resolve library"))?;
        texthost_log!(Level::Debug, "inject", "loading {:?} ({} bytes) into pid {}", library, argument.len(), pid);

        let buffer = RemoteBuffer::allocate(target.as_ref(), argument.len()).map_err(os(pid, "allocate"))?;
        target.write(buffer.address, &argument).map_err(os(pid, "write library path"))?;
        let wait = target.run_loader(buffer.address, timeout).map_err(os(pid, "start loader"))?;

        match wait {
            LoaderWait::Finished(0) => Err(InjectError::LoaderFailed(pid)),
            LoaderWait::Finished(_) => Ok(InjectOutcome::Loaded),
            LoaderWait::TimedOut => Ok(InjectOutcome::TimedOut),
        }
    }
}
