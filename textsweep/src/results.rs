//! Search result types.
//!
//! Matches travel through the engine as [`MatchRecord`]s (a file handle plus a
//! char offset and length). Each file ends with a [`ScanStatus`], and the
//! statuses of a whole run fold into one [`SearchResult`].
use serde::Serialize;
use std::fmt;

use crate::errors::{FailureKind, SearchError};
use crate::scope::FileRef;

/// A single match, in characters, against the content view that produced it
#[derive(Debug, Clone)]
pub struct MatchRecord {
    pub file: FileRef,
    /// Char offset of the first matched character
    pub offset: usize,
    /// Number of matched chars, never zero
    pub length: usize,
}

impl MatchRecord {
    pub fn new(file: FileRef, offset: usize, length: usize) -> Self {
        Self {
            file,
            offset,
            length,
        }
    }

    /// Char offset one past the last matched character
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// Why a file was not scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    Binary,
    Filtered,
}

/// A per-file failure as it appears in the aggregated result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub file: String,
    pub kind: FailureKind,
    pub cause: String,
}

impl FileFailure {
    pub fn from_error(file: impl Into<String>, err: &SearchError) -> Self {
        Self {
            file: file.into(),
            kind: err.failure_kind(),
            cause: err.to_string(),
        }
    }
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.file, self.kind, self.cause)
    }
}

/// Final state of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    Ok,
    Skipped(SkipReason),
    Failed(FileFailure),
    Cancelled,
}

/// Status of one file together with the number of matches delivered for it
#[derive(Debug, Clone)]
pub struct FileScan {
    pub file: FileRef,
    pub status: ScanStatus,
    pub matches: usize,
}

impl FileScan {
    pub fn new(file: FileRef, status: ScanStatus) -> Self {
        Self {
            file,
            status,
            matches: 0,
        }
    }

    pub fn with_matches(mut self, matches: usize) -> Self {
        self.matches = matches;
        self
    }
}

/// Overall status of a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SearchStatus {
    /// Every file was scanned (or deliberately skipped)
    Completed,
    /// Cancellation stopped the search; flushed matches are still valid
    Cancelled,
    /// The search ran to the end but some files failed, or the pattern did
    CompletedWithErrors,
}

/// Aggregated outcome of one search call
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub status: SearchStatus,
    /// Files whose processing finished (scanned, skipped or failed)
    pub files_scanned: usize,
    pub total_files: usize,
    pub files_skipped: usize,
    pub total_matches: usize,
    pub files_with_matches: usize,
    pub failures: Vec<FileFailure>,
    /// The failure that stopped dispatch, also first in `failures`
    pub fatal: Option<FileFailure>,
}

impl SearchResult {
    /// Creates a result for a scope of `total_files` files with nothing recorded
    pub fn new(total_files: usize) -> Self {
        Self {
            status: SearchStatus::Completed,
            files_scanned: 0,
            total_files,
            files_skipped: 0,
            total_matches: 0,
            files_with_matches: 0,
            failures: Vec::new(),
            fatal: None,
        }
    }

    /// Adds one file's outcome
    pub fn record(&mut self, scan: &FileScan) {
        match &scan.status {
            ScanStatus::Cancelled => return,
            ScanStatus::Ok => {}
            ScanStatus::Skipped(_) => self.files_skipped += 1,
            ScanStatus::Failed(failure) => self.failures.push(failure.clone()),
        }
        self.files_scanned += 1;
        if scan.matches > 0 {
            self.total_matches += scan.matches;
            self.files_with_matches += 1;
        }
    }

    /// Settles the overall status once every outcome has been recorded.
    ///
    /// `cancelled` means cancellation was observed before any fatal failure.
    pub fn finish(mut self, cancelled: bool, fatal: Option<FileFailure>) -> Self {
        if let Some(failure) = fatal {
            self.failures.retain(|f| *f != failure);
            self.failures.insert(0, failure.clone());
            self.fatal = Some(failure);
        }
        self.status = if cancelled {
            SearchStatus::Cancelled
        } else if self.fatal.is_some() || !self.failures.is_empty() {
            SearchStatus::CompletedWithErrors
        } else {
            SearchStatus::Completed
        };
        self
    }

    /// True when every file in scope was processed without failures
    pub fn is_complete(&self) -> bool {
        self.status == SearchStatus::Completed
    }
}

/// A match as reported to users, optionally with the matched text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Match {
    pub offset: usize,
    pub length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// All matches found in a single file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileResult {
    pub file: String,
    pub matches: Vec<Match>,
}
