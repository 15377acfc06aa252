// src/main.rs

//! Command-line front end.
//!
//!   texthost inject <pid> [timeout]   load the hook engine into <pid>
//!   texthost hooks <pid>              print the hook table of <pid>
//!
//! `texthost.toml` next to the executable is read if present.

use anyhow::{Context, Result};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use texthost::config::{load_or_default, HostConfig};
use texthost::logging::setup_logging;

/// Directory that contains the running executable.
fn exe_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot determine exe path")?;
    Ok(exe.parent().map(Path::to_path_buf).unwrap_or_default())
}

fn usage() -> ! {
    eprintln!("usage: texthost inject <pid> [timeout] | texthost hooks <pid>");
    std::process::exit(2);
}

fn parse_pid(arg: Option<&String>) -> Result<u32> {
    let Some(arg) = arg else { usage() };
    arg.parse().with_context(|| format!("invalid pid '{arg}'"))
}

fn main() -> Result<()> {
    let exe_dir = exe_dir()?;
    let config = load_or_default(&exe_dir.join("texthost.toml"))?;
    setup_logging(&exe_dir, &config.logging)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("inject") => {
            let pid = parse_pid(args.get(1))?;
            let timeout = match args.get(2) {
                Some(txt) => humantime::parse_duration(txt).with_context(|| format!("invalid timeout '{txt}'"))?,
                None => config.injection.timeout,
            };
            inject(config, pid, timeout)
        }
        Some("hooks") => hooks(parse_pid(args.get(1))?),
        _ => usage(),
    }
}

#[cfg(windows)]
fn inject(config: HostConfig, pid: u32, timeout: Duration) -> Result<()> {
    use texthost::{Host, InjectOutcome};

    let host = Host::new(texthost::sys::native(), config);
    match host.inject_process(pid, timeout)? {
        InjectOutcome::Loaded => println!("loaded into {pid}"),
        InjectOutcome::TimedOut => println!("loader in {pid} did not finish within {timeout:?}"),
    }
    Ok(())
}

#[cfg(windows)]
fn hooks(pid: u32) -> Result<()> {
    use texthost::registry::HookTable;

    let platform = texthost::sys::native();
    let table = HookTable::open(platform.as_ref(), pid)
        .with_context(|| format!("hook table of {pid} is not available (not injected?)"))?;
    let entries = table.entries()?;
    if entries.is_empty() {
        println!("no hooks in {pid}");
    }
    for (entry, raw_name) in entries {
        println!(
            "{:#010x}  type={:#06x}  {}",
            entry.address(),
            entry.param.hook_type,
            platform.decode_ansi(&raw_name)
        );
    }
    Ok(())
}

#[cfg(not(windows))]
fn inject(_config: HostConfig, _pid: u32, _timeout: Duration) -> Result<()> {
    anyhow::bail!("injection is only supported on Windows")
}

#[cfg(not(windows))]
fn hooks(_pid: u32) -> Result<()> {
    anyhow::bail!("hook tables are only available on Windows")
}
