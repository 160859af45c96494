//! textsweep searches many files for a pattern on a pool of worker threads.
//!
//! Files that are small enough are decoded in one read; larger ones are
//! scanned through a [`BufferedFileView`](content::BufferedFileView) that keeps
//! only a few fixed-size buffers resident. Files that share a canonical
//! location are read once and their matches reported for every alias, and
//! unsaved content registered in a [`DirtyOverlay`] is searched instead of the
//! bytes on disk.
//!
//! Searches can be cancelled at any time through a [`CancellationToken`];
//! the returned [`SearchOutput`] says whether the run completed, was cancelled
//! or hit per-file failures.
pub mod config;
pub mod content;
pub mod errors;
pub mod filters;
pub mod metrics;
pub mod results;
pub mod scope;
pub mod search;
pub mod sink;

pub use config::{EncodingMode, SearchConfig};
pub use errors::{FailureKind, SearchError, SearchResult};
pub use results::{
    FileFailure, FileResult, FileScan, Match, MatchRecord, ScanStatus, SearchResult as SearchOutput,
    SearchStatus, SkipReason,
};
pub use scope::{DiskFile, FileHandle, FileRef, InMemoryFile, ScopeResolver, WalkScope};
pub use search::{
    search, search_with, CancellationToken, CompiledPattern, DirtyOverlay, EngineOptions,
    PatternOptions, SearchReport, SearchRequest, TextSearchEngine,
};
pub use sink::{CollectingSink, MatchAccess, MatchSink, NoProgress, ProgressSink};
