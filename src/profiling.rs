//! Per-invocation measurement: begin a trace, end it, get an analysis
//!
//! A [`Trace`] owns everything that has to be released after the profiled
//! call: the enabled call-graph profiler and the running memory session.
//! [`Trace::end`] consumes it and produces an [`AnalysisResult`]; dropping a
//! `Trace` without ending it (an early return, an unwinding panic, a
//! cancelled future) still disables the profiler and stops the session.

use crate::clock::ClockReading;
use crate::config::SortKey;
use crate::function_profiler::{FunctionKey, Profiler};
use crate::memory::{self, MemorySession};
use serde::Serialize;
use std::time::Duration;

/// In-progress measurement of one invocation
#[derive(Debug)]
pub struct Trace {
    profiler: Profiler,
    memory: MemorySession,
    start: ClockReading,
}

impl Trace {
    /// Start memory tracking, enable a fresh profiler, then read the clocks
    pub fn begin() -> Self {
        let memory = memory::start();
        let mut profiler = Profiler::new();
        profiler.enable();
        let start = ClockReading::start();
        tracing::trace!(target: "sniffer", "trace started");

        Self {
            profiler,
            memory,
            start,
        }
    }

    /// Finish measuring and analyse the results
    ///
    /// `root` names the profiled function; it is recorded as the profile's
    /// outermost entry. Entries are ordered by `sort_by` and at most
    /// `lines_to_print` of them are rendered.
    pub fn end(mut self, root: FunctionKey, sort_by: SortKey, lines_to_print: usize) -> AnalysisResult {
        self.profiler.disable();
        let stop = ClockReading::stop();
        let peak_bytes = self.memory.stop();

        let (elapsed, cpu_time) = self.start.elapsed_until(&stop);
        self.profiler.record_root(root, elapsed);

        let mut stats = self.profiler.stats();
        let profile = stats.sort_stats(sort_by).render(lines_to_print);
        tracing::trace!(
            target: "sniffer",
            elapsed_us = elapsed.as_micros() as u64,
            peak_bytes,
            entries = stats.len(),
            "trace ended"
        );

        AnalysisResult {
            elapsed,
            cpu_time,
            peak_memory_kb: memory::bytes_to_kb(peak_bytes),
            profile,
        }
    }
}

/// Finalized measurement of one invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    /// Wall-clock time between begin and end
    pub elapsed: Duration,
    /// Process CPU time between begin and end
    pub cpu_time: Duration,
    /// Peak heap usage above the starting point, in KB
    pub peak_memory_kb: f64,
    /// Rendered call-graph table
    pub profile: String,
}

impl AnalysisResult {
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    pub fn cpu_secs(&self) -> f64 {
        self.cpu_time.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function_profiler::active_profilers;
    use serial_test::serial;
    use std::thread;
    use tracing_subscriber::prelude::*;

    fn root() -> FunctionKey {
        FunctionKey::new(file!(), line!(), "under_test")
    }

    #[test]
    #[serial(profiler, memory)]
    fn test_trace_measures_sleep() {
        let trace = Trace::begin();
        thread::sleep(Duration::from_millis(30));
        let analysis = trace.end(root(), SortKey::Cumulative, 10);

        assert!(analysis.elapsed >= Duration::from_millis(30));
        assert!(analysis.elapsed_secs() >= 0.03);
        assert!(analysis.cpu_secs() >= 0.0);
        assert!(analysis.peak_memory_kb >= 0.0);
        assert!(analysis.profile.contains("(under_test)"));
    }

    #[test]
    #[serial(profiler, memory)]
    fn test_trace_releases_on_end() {
        let before = active_profilers();
        let trace = Trace::begin();
        assert_eq!(active_profilers(), before + 1);
        assert!(memory::is_tracing());

        trace.end(root(), SortKey::Time, 5);
        assert_eq!(active_profilers(), before);
        assert!(!memory::is_tracing());
    }

    #[test]
    #[serial(profiler, memory)]
    fn test_trace_releases_on_drop() {
        let before = active_profilers();
        {
            let _trace = Trace::begin();
        }
        assert_eq!(active_profilers(), before);
        assert!(!memory::is_tracing());
    }

    #[test]
    #[serial(profiler, memory)]
    fn test_trace_releases_on_panic() {
        let before = active_profilers();
        let result = std::panic::catch_unwind(|| {
            let _trace = Trace::begin();
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(active_profilers(), before);
        assert!(!memory::is_tracing());
    }

    #[test]
    #[serial(profiler, memory)]
    fn test_trace_peak_memory() {
        let trace = Trace::begin();
        let data = vec![3u8; 2 * 1024 * 1024];
        let analysis = trace.end(root(), SortKey::Cumulative, 10);
        drop(data);

        assert!(analysis.peak_memory_kb >= 2048.0, "peak {}", analysis.peak_memory_kb);
    }

    #[test]
    #[serial(profiler, memory)]
    fn test_trace_profile_respects_limit() {
        let subscriber = tracing_subscriber::registry().with(crate::function_profiler::layer());
        let analysis = tracing::subscriber::with_default(subscriber, || {
            let trace = Trace::begin();
            for name in ["a", "b", "c", "d"] {
                let _s = tracing::info_span!("step", name).entered();
            }
            let extra = tracing::info_span!("extra").entered();
            drop(extra);
            trace.end(root(), SortKey::Cumulative, 1)
        });

        let rows = analysis
            .profile
            .lines()
            .filter(|line| line.contains(".rs:"))
            .count();
        assert_eq!(rows, 1);
        assert!(analysis.profile.contains("List reduced from 3 to 1"));
    }

    #[test]
    fn test_analysis_serializes() {
        let analysis = AnalysisResult {
            elapsed: Duration::from_millis(1500),
            cpu_time: Duration::from_millis(250),
            peak_memory_kb: 12.5,
            profile: String::from("         0 function calls in 0.000 seconds\n\n"),
        };
        let json = serde_json::to_value(&analysis).unwrap();
        assert_eq!(json["peak_memory_kb"], 12.5);
        assert_eq!(json["elapsed"]["secs"], 1);
    }
}
