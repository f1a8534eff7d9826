//! Process-wide console logging
//!
//! Used by the "reset global sinks" option: install one subscriber that
//! prints to stderr and feeds the call-graph profiler. `RUST_LOG` still
//! overrides the level when set.

use crate::function_profiler;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Result of trying to install the console subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleInstall {
    /// The console subscriber is now the global default
    Installed,
    /// Another global subscriber was already set and cannot be replaced
    AlreadySet,
}

/// Install a stderr subscriber filtered at `level`, plus the call-graph layer
pub fn install_console(level: Level) -> ConsoleInstall {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(filter),
        )
        .with(function_profiler::layer())
        .try_init();

    match result {
        Ok(()) => {
            tracing::debug!(target: "sniffer", %level, "console subscriber installed");
            ConsoleInstall::Installed
        }
        Err(_) => ConsoleInstall::AlreadySet,
    }
}
