//! Consumers of search output: matches, binary-file decisions and progress.
//!
//! A [`MatchSink`] is shared by every worker, so it must be `Send + Sync`.
//! Sinks that cannot cope with concurrent calls say so through
//! [`MatchSink::supports_concurrency`] and the engine runs a single worker.
use dashmap::DashMap;
use std::sync::Arc;

use crate::content::CharView;
use crate::errors::SearchResult;
use crate::results::{FileResult, Match, MatchRecord};
use crate::scope::FileRef;

/// A match handed to a [`MatchSink`], with access to the content it was found in
pub struct MatchAccess<'a> {
    record: MatchRecord,
    view: &'a mut dyn CharView,
}

impl<'a> MatchAccess<'a> {
    pub fn new(record: MatchRecord, view: &'a mut dyn CharView) -> Self {
        Self { record, view }
    }

    pub fn record(&self) -> &MatchRecord {
        &self.record
    }

    pub fn file(&self) -> &FileRef {
        &self.record.file
    }

    pub fn offset(&self) -> usize {
        self.record.offset
    }

    pub fn length(&self) -> usize {
        self.record.length
    }

    /// Reads `len` chars of the file content starting at `offset`
    pub fn file_content(&mut self, offset: usize, len: usize) -> SearchResult<String> {
        self.view.substring(offset, len)
    }

    /// The matched characters
    pub fn matched_text(&mut self) -> SearchResult<String> {
        self.view.substring(self.record.offset, self.record.length)
    }
}

/// Receives the files and matches of a search
pub trait MatchSink: Send + Sync {
    /// Called once before any file is processed
    fn begin_reporting(&self) {}

    /// Called once after the last file
    fn end_reporting(&self) {}

    /// Whether `file` should be searched at all
    fn accept_file(&self, _file: &FileRef) -> bool {
        true
    }

    /// Called for a binary file that binary exclusion would skip; return
    /// `true` to search it anyway
    fn report_binary_file(&self, _file: &FileRef) -> bool {
        false
    }

    /// Receives one match; return `false` to stop reporting matches for this file
    fn accept_match(&self, access: &mut MatchAccess<'_>) -> bool;

    /// Whether the sink may be called from several workers at once
    fn supports_concurrency(&self) -> bool {
        true
    }
}

impl<S: MatchSink + ?Sized> MatchSink for Arc<S> {
    fn begin_reporting(&self) {
        (**self).begin_reporting()
    }

    fn end_reporting(&self) {
        (**self).end_reporting()
    }

    fn accept_file(&self, file: &FileRef) -> bool {
        (**self).accept_file(file)
    }

    fn report_binary_file(&self, file: &FileRef) -> bool {
        (**self).report_binary_file(file)
    }

    fn accept_match(&self, access: &mut MatchAccess<'_>) -> bool {
        (**self).accept_match(access)
    }

    fn supports_concurrency(&self) -> bool {
        (**self).supports_concurrency()
    }
}

/// Receives progress from the coordinating thread
pub trait ProgressSink {
    /// `current` is the label of the most recently finished file
    fn report(&self, scanned: usize, total: usize, current: Option<&str>);
}

/// Discards progress updates
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _scanned: usize, _total: usize, _current: Option<&str>) {}
}

/// Collects matches per file, keyed by file id
#[derive(Debug, Default)]
pub struct CollectingSink {
    files: DashMap<String, Vec<Match>>,
    capture_text: bool,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also records the matched text of every match
    pub fn with_text(mut self) -> Self {
        self.capture_text = true;
        self
    }

    /// Matches found so far, one entry per file with matches, sorted by file id
    pub fn file_results(&self) -> Vec<FileResult> {
        let mut results: Vec<FileResult> = self
            .files
            .iter()
            .map(|entry| FileResult {
                file: entry.key().clone(),
                matches: entry.value().clone(),
            })
            .collect();
        results.sort_by(|a, b| a.file.cmp(&b.file));
        results
    }

    /// Matches recorded for one file id
    pub fn matches_for(&self, file: &str) -> Vec<Match> {
        self.files
            .get(file)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

impl MatchSink for CollectingSink {
    fn accept_match(&self, access: &mut MatchAccess<'_>) -> bool {
        let text = if self.capture_text {
            access.matched_text().ok()
        } else {
            None
        };
        self.files
            .entry(access.file().id().to_string())
            .or_default()
            .push(Match {
                offset: access.offset(),
                length: access.length(),
                text,
            });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::StringView;
    use crate::scope::InMemoryFile;

    #[test]
    fn test_match_access_reads_from_view() {
        let file = InMemoryFile::new("a.txt", "xx foo xx").into_ref();
        let mut view = StringView::new("xx foo xx");
        let mut access = MatchAccess::new(MatchRecord::new(file, 3, 3), &mut view);

        assert_eq!(access.offset(), 3);
        assert_eq!(access.length(), 3);
        assert_eq!(access.matched_text().unwrap(), "foo");
        assert_eq!(access.file_content(0, 2).unwrap(), "xx");
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingSink::new().with_text();
        let a = InMemoryFile::new("a.txt", "").into_ref();
        let b = InMemoryFile::new("b.txt", "").into_ref();
        let mut view = StringView::new("foo bar foo");

        for (file, offset) in [(&b, 8), (&a, 0), (&a, 8)] {
            let mut access = MatchAccess::new(MatchRecord::new(file.clone(), offset, 3), &mut view);
            assert!(sink.accept_match(&mut access));
        }

        let results = sink.file_results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].file, "a.txt");
        assert_eq!(
            results[0].matches,
            vec![
                Match {
                    offset: 0,
                    length: 3,
                    text: Some("foo".to_string())
                },
                Match {
                    offset: 8,
                    length: 3,
                    text: Some("foo".to_string())
                },
            ]
        );
        assert_eq!(sink.matches_for("b.txt").len(), 1);
        assert!(sink.matches_for("c.txt").is_empty());
    }

    #[test]
    fn test_sink_defaults() {
        let sink = CollectingSink::new();
        let file = InMemoryFile::new("a.bin", "").into_ref();
        assert!(sink.accept_file(&file));
        assert!(!sink.report_binary_file(&file));
        assert!(sink.supports_concurrency());

        let shared: Arc<CollectingSink> = Arc::new(sink);
        assert!(shared.accept_file(&file));
    }
}
