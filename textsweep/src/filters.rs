//! File-name filters used when resolving a search scope and when guessing a
//! content type without reading the file.
use glob::Pattern;
use std::path::Path;

use crate::errors::{SearchError, SearchResult};

/// Extensions treated as binary when a file is too large to classify cheaply.
pub const BINARY_EXTENSIONS: &[&str] = &[
    "exe", "dll", "so", "dylib", "bin", "obj", "o", "a", "lib", "class", "jar", "war", "ear",
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "pdf", "doc", "docx", "xls", "xlsx",
    "zip", "tar", "gz", "7z", "rar", "xz", "bz2", "woff", "woff2", "ttf", "otf", "mp3", "mp4",
    "wav", "avi", "mkv", "mov", "pyc", "pyo",
];

/// Extensions known to hold text regardless of size.
pub const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "rs", "toml", "yaml", "yml", "json", "xml", "html", "css", "js", "ts", "java",
    "c", "h", "cpp", "hpp", "py", "go", "sh", "csv", "log", "properties",
];

fn extension_in(path: &Path, list: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| list.iter().any(|known| known.eq_ignore_ascii_case(ext)))
}

/// Extension and glob filtering applied while walking a search root
#[derive(Debug, Clone, Default)]
pub struct ScopeFilter {
    // Lowercased, without the leading dot
    extensions: Option<Vec<String>>,
    ignore: Vec<Pattern>,
}

impl ScopeFilter {
    /// Compiles `ignore_patterns`; an invalid glob is a configuration error
    pub fn new(extensions: Option<&[String]>, ignore_patterns: &[String]) -> SearchResult<Self> {
        let ignore = ignore_patterns
            .iter()
            .map(|raw| {
                Pattern::new(raw).map_err(|e| {
                    SearchError::config_error(format!("Invalid ignore pattern '{}': {}", raw, e))
                })
            })
            .collect::<SearchResult<Vec<_>>>()?;
        let extensions = extensions.map(|exts| {
            exts.iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect()
        });
        Ok(Self { extensions, ignore })
    }

    /// Whether the extension list admits `path`; no list admits everything
    pub fn extension_allowed(&self, path: &Path) -> bool {
        let Some(allowed) = &self.extensions else {
            return true;
        };
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)))
    }

    /// Whether `path`, relative to the search root, is excluded.
    ///
    /// Build output and VCS metadata (`target/`, `.git/`) are always excluded.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let normalized = path.to_string_lossy().replace('\\', "/");
        let in_dir = |dir: &str| {
            normalized.starts_with(&format!("{}/", dir)) || normalized.contains(&format!("/{}/", dir))
        };
        if in_dir("target") || in_dir(".git") {
            return true;
        }
        self.ignore.iter().any(|p| p.matches(&normalized))
    }

    pub fn includes(&self, path: &Path) -> bool {
        self.extension_allowed(path) && !self.is_ignored(path)
    }
}

/// Checks if a file is likely to be binary judging by its extension
pub fn is_likely_binary(path: &Path) -> bool {
    extension_in(path, BINARY_EXTENSIONS)
}

/// Checks if a file is known to be text judging by its extension
pub fn is_known_text(path: &Path) -> bool {
    extension_in(path, TEXT_EXTENSIONS)
}
