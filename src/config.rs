//! Profiling configuration
//!
//! `ProfileConfig` controls how call-graph entries are ordered and truncated,
//! which severity the report is logged at, and where the report file goes.
//! It can be built in code with the `with_*` methods or loaded from TOML.
//!
//! # Example sniffer.toml
//!
//! ```toml
//! sort_by = "time"
//! lines_to_print = 20
//! log_level = "debug"
//! log_file = "target/profile.log"
//! append_log = false
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default report file, relative to the working directory
pub const DEFAULT_LOG_FILE: &str = "profile.log";

/// Default number of call-graph entries rendered
pub const DEFAULT_LINES_TO_PRINT: usize = 10;

/// Ordering applied to call-graph entries before rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Total call count, descending
    Calls,
    /// Cumulative time (own time plus callees), descending
    #[default]
    Cumulative,
    /// Source file, ascending
    Filename,
    /// Line number, ascending
    Line,
    /// Function name, ascending
    Name,
    /// Name, then file, then line
    Nfl,
    /// Primitive (non-recursive) call count, descending
    Pcalls,
    /// `file:line(name)` string, ascending
    Stdname,
    /// Own time, descending
    Time,
}

impl SortKey {
    pub const ALL: [SortKey; 9] = [
        SortKey::Calls,
        SortKey::Cumulative,
        SortKey::Filename,
        SortKey::Line,
        SortKey::Name,
        SortKey::Nfl,
        SortKey::Pcalls,
        SortKey::Stdname,
        SortKey::Time,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Calls => "calls",
            SortKey::Cumulative => "cumulative",
            SortKey::Filename => "filename",
            SortKey::Line => "line",
            SortKey::Name => "name",
            SortKey::Nfl => "nfl",
            SortKey::Pcalls => "pcalls",
            SortKey::Stdname => "stdname",
            SortKey::Time => "time",
        }
    }

    /// Text shown after "Ordered by:" in the rendered profile
    pub fn description(&self) -> &'static str {
        match self {
            SortKey::Calls => "call count",
            SortKey::Cumulative => "cumulative time",
            SortKey::Filename => "file name",
            SortKey::Line => "line number",
            SortKey::Name => "function name",
            SortKey::Nfl => "name/file/line",
            SortKey::Pcalls => "primitive call count",
            SortKey::Stdname => "standard name",
            SortKey::Time => "internal time",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        // "tottime" and "cumtime" are the column names users tend to type
        match wanted.as_str() {
            "tottime" => return Ok(SortKey::Time),
            "cumtime" => return Ok(SortKey::Cumulative),
            _ => {}
        }
        SortKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == wanted)
            .ok_or_else(|| ConfigError::InvalidSortKey(s.to_string()))
    }
}

/// Severity the report is emitted at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    #[serde(alias = "warning")]
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => LogLevel::Error,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::DEBUG => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(ConfigError::InvalidLogLevel(s.to_string())),
        }
    }
}

/// Settings for one [`Benchmark`](crate::benchmark::Benchmark)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileConfig {
    /// Ordering of call-graph entries
    pub sort_by: SortKey,
    /// Maximum number of call-graph entries in the report
    pub lines_to_print: usize,
    /// Severity of the report, and the minimum severity the sink accepts
    pub log_level: LogLevel,
    /// Report file; `None` logs only
    pub log_file: Option<PathBuf>,
    /// Append to `log_file` instead of truncating it on every report
    pub append_log: bool,
    /// Replace process-wide log sinks with a single console sink
    pub reset_global_sinks: bool,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            sort_by: SortKey::default(),
            lines_to_print: DEFAULT_LINES_TO_PRINT,
            log_level: LogLevel::default(),
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            append_log: true,
            reset_global_sinks: false,
        }
    }
}

impl ProfileConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    ///
    /// ```no_run
    /// use sniffer::config::ProfileConfig;
    ///
    /// # fn main() -> Result<(), sniffer::error::ConfigError> {
    /// let config = ProfileConfig::from_file("sniffer.toml")?;
    /// println!("sorting by {}", config.sort_by);
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml_str(&content)
    }

    /// Load configuration from a TOML string; missing keys take defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn with_sort_by(mut self, sort_by: SortKey) -> Self {
        self.sort_by = sort_by;
        self
    }

    pub fn with_lines_to_print(mut self, lines: usize) -> Self {
        self.lines_to_print = lines;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<LogLevel>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Log the report only, never write a file
    pub fn without_log_file(mut self) -> Self {
        self.log_file = None;
        self
    }

    pub fn with_append_log(mut self, append: bool) -> Self {
        self.append_log = append;
        self
    }

    pub fn with_reset_global_sinks(mut self, reset: bool) -> Self {
        self.reset_global_sinks = reset;
        self
    }
}
