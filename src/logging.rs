use clap::ValueEnum;
use log::LevelFilter;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

/// Logs an "executing command" line on the dedicated exec target, which the
/// level mapping places one step above plain info.
#[macro_export]
macro_rules! exec_log {
    ($($arg:tt)*) => {
        log::log!(target: $crate::config::EXEC_TARGET, log::Level::Warn, $($arg)*)
    };
}

/// Screen log levels exposed by the front ends. `debug_full` lifts the filter
/// that otherwise restricts logging to this crate's own targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum LogLevel {
    #[value(name = "debug_full")]
    DebugFull,
    Debug,
    #[default]
    Info,
    Exec,
    Warning,
    Error,
}

/// Sets up the terminal logger. Must run before any run starts so the exec
/// target mapping is in place; calling it twice is a no-op.
pub fn init(level: LogLevel) {
    let mut builder = ConfigBuilder::new();
    if level != LogLevel::DebugFull {
        builder.add_filter_allow_str(env!("CARGO_PKG_NAME"));
    }
    let filter = match level {
        LogLevel::DebugFull | LogLevel::Debug => LevelFilter::Debug,
        LogLevel::Info => LevelFilter::Info,
        // exec lines are emitted at warn on their own target, so this keeps
        // them while muting plain command output
        LogLevel::Exec => LevelFilter::Warn,
        LogLevel::Warning => {
            builder.add_filter_ignore_str(crate::config::EXEC_TARGET);
            LevelFilter::Warn
        }
        LogLevel::Error => LevelFilter::Error,
    };
    TermLogger::init(
        filter,
        builder.build(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .ok();
}
