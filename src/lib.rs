//! Sniffer - function-level performance profiling
//!
//! Wrap a function or closure and every call reports its wall-clock time,
//! CPU time, peak heap usage and a call-graph profile, to a log sink and to
//! a report file.
//!
//! Peak memory needs [`memory::TrackingAllocator`] as the global allocator,
//! and the call-graph profile needs [`function_profiler::layer()`] in the
//! active `tracing` subscriber (or `reset_global_sinks`, which installs one).

pub mod benchmark;
pub mod clock;
pub mod config;
pub mod error;
pub mod function_profiler;
pub mod logging;
pub mod memory;
pub mod profiling;
pub mod report;

pub use benchmark::{benchmark, Benchmark, Callable, Profiled, ProfiledAsync};
pub use config::{LogLevel, ProfileConfig, SortKey};
pub use error::{ConfigError, Failure, ReportError};
pub use logging::ConsoleInstall;
pub use memory::TrackingAllocator;
pub use profiling::AnalysisResult;
pub use report::ReportSink;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
#[global_allocator]
static TEST_ALLOCATOR: memory::TrackingAllocator = memory::TrackingAllocator::system();
