//! Error types for textsweep.
//!
//! Every failure the engine can hit while reading one file is a [`SearchError`]
//! variant. Workers never let these escape: they are caught at the worker
//! boundary and classified with [`SearchError::failure_kind`] so the aggregated
//! result can tell a missing file from an undecodable one from a pattern that
//! brought the matcher down.
//!
//! ```rust,ignore
//! match engine.search(&request, sink, &NoProgress, &token) {
//!     Ok(outcome) if outcome.is_complete() => // every file was scanned,
//!     Ok(outcome) => // cancelled, or some files failed (see outcome.failures),
//!     Err(e) => // the request itself was unusable,
//! }
//! ```
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for search operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Coarse classification of a per-file failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    /// The file vanished, was unreadable, or an I/O call failed mid-read
    FileAccess,
    /// The declared charset is unknown or the bytes do not decode
    Decode,
    /// The matcher failed catastrophically; fatal for the whole search
    PatternTooComplex,
}

impl FailureKind {
    /// True when a failure of this kind must stop the whole search rather than one file
    pub fn is_fatal(self) -> bool {
        self == FailureKind::PatternTooComplex
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::FileAccess => write!(f, "file access"),
            FailureKind::Decode => write!(f, "decode"),
            FailureKind::PatternTooComplex => write!(f, "pattern too complex"),
        }
    }
}

/// Errors that can occur during search operations
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("I/O error reading {file}: {source}")]
    FileAccess {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot decode {file} as {charset}: {reason}")]
    Decode {
        file: String,
        charset: String,
        reason: String,
    },
    #[error("Unsupported charset '{charset}' for {file}")]
    UnknownCharset { file: String, charset: String },
    #[error("Content of {file} is unavailable after an earlier failure: {reason}")]
    ViewFailed {
        file: String,
        kind: FailureKind,
        reason: String,
    },
    #[error("Index {index} out of bounds for content of length {len}")]
    OutOfBounds { index: usize, len: usize },
    #[error("Pattern too complex: {0}")]
    PatternTooComplex(String),
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Canonicalize the path and strip UNC prefixes so that
/// comparisons on Windows are consistent.
pub fn unify_path(original: &Path) -> PathBuf {
    let canonical = original
        .canonicalize()
        .unwrap_or_else(|_| original.to_path_buf());
    strip_unc_prefix(&canonical)
}

/// Strips the Windows UNC prefix (\\?\) from a path if present
fn strip_unc_prefix(p: &Path) -> PathBuf {
    let s = p.display().to_string();
    if let Some(stripped) = s.strip_prefix(r"\\?\") {
        PathBuf::from(stripped)
    } else {
        p.to_path_buf()
    }
}

impl SearchError {
    pub fn file_not_found(file: impl Into<String>) -> Self {
        Self::FileNotFound(file.into())
    }

    pub fn permission_denied(file: impl Into<String>) -> Self {
        Self::PermissionDenied(file.into())
    }

    pub fn invalid_pattern(pattern: impl Into<String>) -> Self {
        Self::InvalidPattern(pattern.into())
    }

    pub fn pattern_too_complex(msg: impl Into<String>) -> Self {
        Self::PatternTooComplex(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn decode(
        file: impl Into<String>,
        charset: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Decode {
            file: file.into(),
            charset: charset.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_charset(file: impl Into<String>, charset: impl Into<String>) -> Self {
        Self::UnknownCharset {
            file: file.into(),
            charset: charset.into(),
        }
    }

    /// Maps an I/O error raised while reading `file` onto the matching variant.
    pub fn from_io(file: impl Into<String>, err: std::io::Error) -> Self {
        let file = file.into();
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound(file),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(file),
            _ => Self::FileAccess { file, source: err },
        }
    }

    /// Classifies this error for the aggregated failure list.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SearchError::Decode { .. } | SearchError::UnknownCharset { .. } => FailureKind::Decode,
            SearchError::ViewFailed { kind, .. } => *kind,
            SearchError::PatternTooComplex(_) => FailureKind::PatternTooComplex,
            _ => FailureKind::FileAccess,
        }
    }

    /// A reader or view that panicked while producing the content of `file`
    pub fn reader_panicked(file: impl Into<String>, message: &str) -> Self {
        Self::FileAccess {
            file: file.into(),
            source: std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("reader panicked: {}", message),
            ),
        }
    }
}
