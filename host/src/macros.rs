/// Logs a line tagged with the component it comes from.
/// Usage:
/// ```ignore
/// texthost_log!(Level::Info, "inject", "loaded into {}", pid);
/// ```
/// Logs like:
/// [2026-04-25T16:32:10+02:00][INFO ][texthost::inject][pid=4568][tid=ThreadId(1)] [inject] loaded into 1234
#[macro_export]
macro_rules! texthost_log {
    ($level:expr, $component:expr, $fmt:expr $(, $($arg:tt)+)?) => {
        log::log!(
            $level,
            concat!("[", $component, "] ", $fmt)
            $(, $($arg)+)?
        )
    };
}
