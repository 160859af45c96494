use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::SearchResult;
use crate::scope::{FileHandle, FileRef, ScopeResolver};
use crate::search::grouper::{paths_case_sensitive, FileIdentity};
use crate::search::locator::CompiledPattern;

/// Unsaved in-memory content that shadows files on disk
#[derive(Debug, Clone, Default)]
pub struct DirtyOverlay {
    entries: HashMap<FileIdentity, Arc<str>>,
}

impl DirtyOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, identity: FileIdentity, text: impl Into<Arc<str>>) {
        self.entries.insert(identity, text.into());
    }

    /// Registers `text` for `file`, keyed the way the host filesystem compares paths
    pub fn insert_for(&mut self, file: &dyn FileHandle, text: impl Into<Arc<str>>) {
        let identity = FileIdentity::of(file, paths_case_sensitive());
        self.insert(identity, text);
    }

    pub fn get(&self, identity: &FileIdentity) -> Option<Arc<str>> {
        self.entries.get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything one search needs: what to look for and where
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pattern: CompiledPattern,
    scope: Vec<FileRef>,
    overlay: DirtyOverlay,
    exclude_binary: bool,
    max_matches_per_file: Option<usize>,
}

impl SearchRequest {
    pub fn new(pattern: CompiledPattern, scope: Vec<FileRef>) -> Self {
        Self {
            pattern,
            scope,
            overlay: DirtyOverlay::new(),
            exclude_binary: true,
            max_matches_per_file: None,
        }
    }

    /// Builds a request over the files `resolver` produces
    pub fn from_scope(pattern: CompiledPattern, resolver: &dyn ScopeResolver) -> SearchResult<Self> {
        Ok(Self::new(pattern, resolver.resolve()?))
    }

    pub fn with_overlay(mut self, overlay: DirtyOverlay) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn exclude_binary(mut self, exclude: bool) -> Self {
        self.exclude_binary = exclude;
        self
    }

    pub fn max_matches_per_file(mut self, limit: Option<usize>) -> Self {
        self.max_matches_per_file = limit;
        self
    }

    pub fn pattern(&self) -> &CompiledPattern {
        &self.pattern
    }

    pub fn scope(&self) -> &[FileRef] {
        &self.scope
    }

    pub fn overlay(&self) -> &DirtyOverlay {
        &self.overlay
    }

    pub fn excludes_binary(&self) -> bool {
        self.exclude_binary
    }

    pub fn match_limit(&self) -> Option<usize> {
        self.max_matches_per_file
    }
}
