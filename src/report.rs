//! Report composition and delivery
//!
//! The report text layout is fixed so that existing log scrapers keep
//! working:
//!
//! ```text
//! 🌟 === Function 'name' Execution Summary ===
//!   - ⏱ Elapsed Time: 0.0012 seconds
//!   - ⚙️ CPU Time: 0.0010 seconds
//!   - 📈 Peak Memory Usage: 1.25 KB
//!
//! 💡 === Function Output ===
//! <call-graph table>
//! ```
//!
//! A report goes to a [`ReportSink`] and, when configured, to a file where
//! each report is preceded by two newlines and followed by an 80-dash
//! separator line.

use crate::error::ReportError;
use crate::profiling::AnalysisResult;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::Level;

/// Width of the separator line written after each report in the file
pub const SEPARATOR_WIDTH: usize = 80;

/// Human-readable summary of one profiled invocation
#[derive(Debug, Clone, Copy)]
pub struct Report<'a> {
    pub function: &'a str,
    pub analysis: &'a AnalysisResult,
}

impl<'a> Report<'a> {
    pub fn new(function: &'a str, analysis: &'a AnalysisResult) -> Self {
        Self { function, analysis }
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "🌟 === Function '{}' Execution Summary ===", self.function)?;
        writeln!(f, "  - ⏱ Elapsed Time: {:.4} seconds", self.analysis.elapsed_secs())?;
        writeln!(f, "  - ⚙️ CPU Time: {:.4} seconds", self.analysis.cpu_secs())?;
        writeln!(f, "  - 📈 Peak Memory Usage: {:.2} KB", self.analysis.peak_memory_kb)?;
        writeln!(f)?;
        writeln!(f, "💡 === Function Output ===")?;
        f.write_str(&self.analysis.profile)
    }
}

/// Compose the report text for `function`
pub fn compose(function: &str, analysis: &AnalysisResult) -> String {
    Report::new(function, analysis).to_string()
}

/// Destination for severity-tagged report text
///
/// Any `Fn(Level, &str)` closure that is `Send + Sync` is a sink.
pub trait ReportSink: Send + Sync {
    fn emit(&self, level: Level, message: &str);
}

impl<F> ReportSink for F
where
    F: Fn(Level, &str) + Send + Sync,
{
    fn emit(&self, level: Level, message: &str) {
        self(level, message)
    }
}

/// Emits reports as `tracing` events under the `sniffer` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn emit(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "sniffer", "{}", message),
            Level::WARN => tracing::warn!(target: "sniffer", "{}", message),
            Level::INFO => tracing::info!(target: "sniffer", "{}", message),
            Level::DEBUG => tracing::debug!(target: "sniffer", "{}", message),
            _ => tracing::trace!(target: "sniffer", "{}", message),
        }
    }
}

/// Writes each message to stderr on its own, accepting only `min_level`
/// and anything more severe
#[derive(Debug, Clone, Copy)]
pub struct ConsoleSink {
    min_level: Level,
}

impl ConsoleSink {
    pub fn new(min_level: Level) -> Self {
        Self { min_level }
    }
}

impl ReportSink for ConsoleSink {
    fn emit(&self, level: Level, message: &str) {
        if level > self.min_level {
            return;
        }
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        let _ = writeln!(handle, "{}", message);
    }
}

/// Write `message` to `path`, appending or truncating
///
/// The file receives two newlines, the message, then the separator line.
pub fn write_to_file(path: &Path, message: &str, append: bool) -> Result<(), ReportError> {
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }

    let mut block = String::with_capacity(message.len() + SEPARATOR_WIDTH + 3);
    block.push_str("\n\n");
    block.push_str(message);
    block.push_str(&"-".repeat(SEPARATOR_WIDTH));
    block.push('\n');

    options
        .open(path)
        .and_then(|mut file| file.write_all(block.as_bytes()))
        .map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    fn analysis() -> AnalysisResult {
        AnalysisResult {
            elapsed: Duration::from_micros(2_001_234),
            cpu_time: Duration::from_micros(1_500),
            peak_memory_kb: 1.5,
            profile: "         1 function calls in 2.001 seconds\n\n".to_string(),
        }
    }

    #[test]
    fn test_compose_exact_layout() {
        let text = compose("sample_function", &analysis());
        let expected = "🌟 === Function 'sample_function' Execution Summary ===\n\
                        \x20 - ⏱ Elapsed Time: 2.0012 seconds\n\
                        \x20 - ⚙️ CPU Time: 0.0015 seconds\n\
                        \x20 - 📈 Peak Memory Usage: 1.50 KB\n\
                        \n\
                        💡 === Function Output ===\n\
                        \x20        1 function calls in 2.001 seconds\n\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_report_display_matches_compose() {
        let a = analysis();
        assert_eq!(Report::new("f", &a).to_string(), compose("f", &a));
    }

    #[test]
    fn test_write_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.log");

        write_to_file(&path, "first\n", true).unwrap();
        write_to_file(&path, "second\n", true).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let separator = "-".repeat(80);
        assert_eq!(
            content,
            format!("\n\nfirst\n{sep}\n\n\nsecond\n{sep}\n", sep = separator)
        );
    }

    #[test]
    fn test_write_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.log");

        write_to_file(&path, "first\n", false).unwrap();
        write_to_file(&path, "second\n", false).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("first"));
        assert!(content.starts_with("\n\nsecond\n"));
        assert!(content.ends_with(&format!("{}\n", "-".repeat(80))));
    }

    #[test]
    fn test_write_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no").join("such").join("profile.log");

        let err = write_to_file(&path, "x", true).unwrap_err();
        match err {
            ReportError::Io { path: failed, .. } => assert_eq!(failed, path),
        }
    }

    #[test]
    fn test_closure_sink() {
        let seen: Arc<Mutex<Vec<(Level, String)>>> = Arc::default();
        let sink = {
            let seen = Arc::clone(&seen);
            move |level: Level, message: &str| seen.lock().push((level, message.to_string()))
        };

        sink.emit(Level::WARN, "hello");
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (Level::WARN, "hello".to_string()));
    }

    #[test]
    fn test_console_and_tracing_sinks_do_not_panic() {
        ConsoleSink::new(Level::INFO).emit(Level::INFO, "console report");
        ConsoleSink::new(Level::INFO).emit(Level::DEBUG, "filtered out");
        TracingSink.emit(Level::TRACE, "tracing report");
    }
}
