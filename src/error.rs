use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a sanitization call for a split.
///
/// Malformed boxes are not part of this enum: they are recorded on the
/// annotation as [`MalformedBoxError`] values and dropped by the validity filter.
#[derive(Debug, Error)]
pub enum SanitizeError {
    #[error("required directory or file does not exist: {}", path.display())]
    MissingDirectory { path: PathBuf },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse JSON ({}): {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl SanitizeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SanitizeError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A box record that could not be turned into five finite numeric fields.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}: {reason}")]
pub struct MalformedBoxError {
    /// 1-based line (or record) number in the source artifact.
    pub line: usize,
    pub reason: String,
}

impl MalformedBoxError {
    pub fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}
