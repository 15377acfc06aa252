//! Object names and sizes. Per-process names are derived from the pid so the
//! host and the target can find each other without a handshake.

/// Prefix of the shared section holding the target's hook table.
pub const SECTION_PREFIX: &str = "TEXTHOOK_SECTION_";
/// Prefix of the mutex guarding the hook table (also the injection marker).
pub const HOOKMAN_MUTEX_PREFIX: &str = "TEXTHOOK_HOOKMAN_";
/// Instrumentation library loaded into the target.
pub const HOOK_DLL: &str = "texthook.dll";

/// Slots in the hook table.
pub const MAX_HOOK: usize = 300;
/// Bytes per hook table slot.
pub const HOOK_ENTRY_SIZE: usize = 64;
pub const HOOK_BUFFER_SIZE: usize = MAX_HOOK * HOOK_ENTRY_SIZE;
/// Size the target creates the section with. The host only maps half of it.
pub const HOOK_SECTION_SIZE: usize = HOOK_BUFFER_SIZE * 2;

/// Largest single message on the channel, in either direction.
pub const PIPE_BUFFER_SIZE: usize = 0x1000;

pub fn section_name(pid: u32) -> String {
    format!("{SECTION_PREFIX}{pid}")
}

pub fn hookman_mutex_name(pid: u32) -> String {
    format!("{HOOKMAN_MUTEX_PREFIX}{pid}")
}
