//! The file boundary of the engine: what a searchable file looks like and how a
//! list of them is produced.
//!
//! The engine only ever sees [`FileRef`]s. [`DiskFile`] and [`WalkScope`] cover
//! the ordinary "search a directory" case; [`InMemoryFile`] stands in for
//! virtual or remote resources that have no canonical location on disk.
use ignore::WalkBuilder;
use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::errors::{unify_path, SearchResult};
use crate::filters::ScopeFilter;

/// A file that can be searched
pub trait FileHandle: Send + Sync + fmt::Debug {
    /// Stable identifier (a path or URI)
    fn id(&self) -> &str;

    /// Name shown in progress and results
    fn label(&self) -> String {
        self.id().to_string()
    }

    /// Resolved on-disk location; files sharing one have identical content
    fn canonical_location(&self) -> Option<String>;

    /// Size in bytes, when cheaply known
    fn byte_len(&self) -> Option<u64>;

    /// Declared charset label (e.g. "utf-8", "windows-1252")
    fn charset(&self) -> &str;

    /// Opens a fresh byte stream positioned at the start of the content
    fn open(&self) -> std::io::Result<Box<dyn Read + Send>>;

    /// Filesystem path, for files that have one
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// Shared handle to a file in scope
pub type FileRef = Arc<dyn FileHandle>;

/// A regular file on the local filesystem
#[derive(Debug, Clone)]
pub struct DiskFile {
    path: PathBuf,
    id: String,
    charset: String,
}

impl DiskFile {
    pub fn new(path: impl Into<PathBuf>, charset: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: path.display().to_string(),
            path,
            charset: charset.into(),
        }
    }

    /// Creates a UTF-8 disk file
    pub fn utf8(path: impl Into<PathBuf>) -> Self {
        Self::new(path, "utf-8")
    }
}

impl FileHandle for DiskFile {
    fn id(&self) -> &str {
        &self.id
    }

    fn canonical_location(&self) -> Option<String> {
        // Unresolvable paths fall back to their own id
        self.path
            .canonicalize()
            .ok()
            .map(|_| unify_path(&self.path).display().to_string())
    }

    fn byte_len(&self) -> Option<u64> {
        self.path.metadata().ok().map(|m| m.len())
    }

    fn charset(&self) -> &str {
        &self.charset
    }

    fn open(&self) -> std::io::Result<Box<dyn Read + Send>> {
        let file = std::fs::File::open(&self.path)?;
        Ok(Box::new(file))
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// File content held in memory, optionally aliased to a canonical location.
///
/// Counts how many times its stream was opened, which makes it useful for
/// checking that aliased content is read once.
#[derive(Debug)]
pub struct InMemoryFile {
    id: String,
    location: Option<String>,
    charset: String,
    bytes: Arc<[u8]>,
    opens: AtomicUsize,
}

impl InMemoryFile {
    pub fn new(id: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            location: None,
            charset: "utf-8".to_string(),
            bytes: Arc::from(bytes.into()),
            opens: AtomicUsize::new(0),
        }
    }

    /// Sets the canonical location shared with other handles
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Number of times [`FileHandle::open`] has been called
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Wraps this file into a shareable handle
    pub fn into_ref(self) -> FileRef {
        Arc::new(self)
    }
}

impl FileHandle for InMemoryFile {
    fn id(&self) -> &str {
        &self.id
    }

    fn canonical_location(&self) -> Option<String> {
        self.location.clone()
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.bytes.len() as u64)
    }

    fn charset(&self) -> &str {
        &self.charset
    }

    fn open(&self) -> std::io::Result<Box<dyn Read + Send>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Cursor::new(Arc::clone(&self.bytes))))
    }
}

/// Produces the concrete list of files to search
pub trait ScopeResolver {
    fn resolve(&self) -> SearchResult<Vec<FileRef>>;
}

/// A scope that is already known
impl ScopeResolver for Vec<FileRef> {
    fn resolve(&self) -> SearchResult<Vec<FileRef>> {
        Ok(self.clone())
    }
}

/// Walks a directory tree honoring ignore files, glob ignores and an extension list
#[derive(Debug, Clone)]
pub struct WalkScope {
    root: PathBuf,
    file_extensions: Option<Vec<String>>,
    ignore_patterns: Vec<String>,
    charset: String,
}

impl WalkScope {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            file_extensions: None,
            ignore_patterns: Vec::new(),
            charset: "utf-8".to_string(),
        }
    }

    pub fn with_extensions(mut self, extensions: Option<Vec<String>>) -> Self {
        self.file_extensions = extensions;
        self
    }

    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }
}

impl ScopeResolver for WalkScope {
    fn resolve(&self) -> SearchResult<Vec<FileRef>> {
        debug!("Scanning directory: {}", self.root.display());
        let filter = ScopeFilter::new(self.file_extensions.as_deref(), &self.ignore_patterns)?;

        let mut builder = WalkBuilder::new(&self.root);
        // Linked files are listed under their own path and group with their target
        builder
            .hidden(true)
            .standard_filters(true)
            .require_git(false)
            .follow_links(true);

        let mut files: Vec<FileRef> = Vec::new();
        for entry in builder
            .build()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()))
        {
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or_else(|_| entry.path());
            if !filter.includes(relative) {
                trace!("Excluding file: {}", entry.path().display());
                continue;
            }
            trace!("Adding file: {}", entry.path().display());
            files.push(Arc::new(DiskFile::new(entry.into_path(), self.charset.clone())));
        }

        // Walk order depends on the filesystem
        files.sort_by(|a, b| a.id().cmp(b.id()));

        info!("Found {} files to search", files.len());
        Ok(files)
    }
}
