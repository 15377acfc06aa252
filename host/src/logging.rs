//! Global logging setup driven by the `[logging]` table.

use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::{path::Path, process, thread};

use crate::config::LoggingConfig;

pub fn level_filter(level: &str) -> LevelFilter {
    match level.to_uppercase().as_str() {
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" => LevelFilter::Trace,
        "OFF" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

/// Build the dispatch: stdout always, plus a log file next to `base_dir`
/// when enabled.
pub fn dispatch(base_dir: &Path, cfg: &LoggingConfig) -> Result<Dispatch, fern::InitError> {
    let log_path = cfg
        .enable
        .then(|| base_dir.join(cfg.file.as_deref().unwrap_or("texthost.log")));

    let mut dispatch = Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}][pid={}][tid={:?}] {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                process::id(),
                thread::current().id(),
                msg
            ))
        })
        .level(level_filter(&cfg.level))
        .chain(std::io::stdout());

    if let Some(path) = log_path {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }
    Ok(dispatch)
}

/// Configure global logging as requested in `cfg`.
pub fn setup_logging(base_dir: &Path, cfg: &LoggingConfig) -> Result<(), fern::InitError> {
    dispatch(base_dir, cfg)?.apply()?;
    Ok(())
}
