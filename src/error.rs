//! Error types for configuration, report delivery and wrapped calls

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building a [`ProfileConfig`](crate::config::ProfileConfig)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unknown sort key: {0}")]
    InvalidSortKey(String),

    #[error("Unknown log level: {0}")]
    InvalidLogLevel(String),
}

/// Errors raised while delivering a report to its sinks
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of a `try_call` that did not produce a value.
///
/// `Raised` carries the wrapped callable's own error untouched. `Report`
/// means the callable may have succeeded but the report could not be
/// delivered, which masks the original result.
#[derive(Debug)]
pub enum Failure<E> {
    Raised(E),
    Report(ReportError),
}

impl<E> Failure<E> {
    /// The wrapped callable's error, if that is what failed
    pub fn into_raised(self) -> Option<E> {
        match self {
            Failure::Raised(e) => Some(e),
            Failure::Report(_) => None,
        }
    }

    pub fn is_raised(&self) -> bool {
        matches!(self, Failure::Raised(_))
    }
}

impl<E> From<ReportError> for Failure<E> {
    fn from(err: ReportError) -> Self {
        Failure::Report(err)
    }
}

impl<E: fmt::Display> fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Raised(e) => write!(f, "{}", e),
            Failure::Report(e) => write!(f, "{}", e),
        }
    }
}

impl<E> std::error::Error for Failure<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Failure::Raised(e) => Some(e),
            Failure::Report(e) => Some(e),
        }
    }
}
