//! The search engine: grouping, matching and the worker pool that ties them
//! together.
//!
//! Most callers want [`search`], which walks `config.root_path` and collects
//! every match. [`search_with`] takes a custom sink, progress reporter and
//! cancellation token; [`TextSearchEngine`] works on an explicit
//! [`SearchRequest`] for callers that bring their own files.
//!
//! ```rust,ignore
//! let config = SearchConfig { pattern: "TODO".into(), ..SearchConfig::default() };
//! let report = textsweep::search::search(&config)?;
//! for file in &report.file_results {
//!     println!("{}: {} matches", file.file, file.matches.len());
//! }
//! ```
use std::sync::Arc;

pub mod engine;
pub mod grouper;
pub mod locator;
pub mod request;
pub mod worker;

pub use engine::{EngineOptions, TextSearchEngine};
pub use grouper::{group_files, FileGroup, FileIdentity};
pub use locator::{
    CompiledPattern, Locate, LocateSink, Located, LocatedMatch, MatchCollector, MatchLocator,
    PatternOptions,
};
pub use request::{DirtyOverlay, SearchRequest};
pub use worker::{CancellationToken, GroupState, JobGroup, JobState, ProgressState};

use crate::config::SearchConfig;
use crate::errors::SearchResult;
use crate::results::{FileResult, SearchResult as SearchOutput};
use crate::scope::WalkScope;
use crate::sink::{CollectingSink, MatchSink, NoProgress, ProgressSink};

/// Outcome of [`search`]: the summary plus every match, grouped by file
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub outcome: SearchOutput,
    /// Files with at least one match, sorted by file id
    pub file_results: Vec<FileResult>,
}

/// Searches the directory tree described by `config` and collects all matches
pub fn search(config: &SearchConfig) -> SearchResult<SearchReport> {
    let sink = if config.stats_only {
        Arc::new(CollectingSink::new())
    } else {
        Arc::new(CollectingSink::new().with_text())
    };
    let outcome = search_with(config, sink.clone(), &NoProgress, &CancellationToken::new())?;
    Ok(SearchReport {
        outcome,
        file_results: sink.file_results(),
    })
}

/// Searches the directory tree described by `config`, reporting to `sink`
pub fn search_with(
    config: &SearchConfig,
    sink: Arc<dyn MatchSink>,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> SearchResult<SearchOutput> {
    config.validate()?;
    let pattern = CompiledPattern::new(&config.pattern, &PatternOptions::from_config(config))?;
    let scope = WalkScope::new(&config.root_path)
        .with_extensions(config.file_extensions.clone())
        .with_ignore_patterns(config.ignore_patterns.clone())
        .with_charset(config.charset.clone());
    let request = SearchRequest::from_scope(pattern, &scope)?
        .exclude_binary(config.exclude_binary)
        .max_matches_per_file(config.max_matches_per_file);

    TextSearchEngine::new(EngineOptions::from_config(config)).search(&request, sink, progress, cancel)
}
