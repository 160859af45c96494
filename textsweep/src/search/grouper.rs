//! Groups files that are known to share content so each group is read once.
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::scope::{FileHandle, FileRef};
use crate::search::request::DirtyOverlay;

/// Key under which files with identical content are grouped
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileIdentity {
    /// Resolved on-disk location
    Location(String),
    /// The file's own id, for files without a location
    Uri(String),
}

impl FileIdentity {
    /// Identity of `file`; locations are lowercased on case-insensitive filesystems
    pub fn of(file: &dyn FileHandle, case_sensitive_paths: bool) -> Self {
        match file.canonical_location() {
            Some(location) if case_sensitive_paths => FileIdentity::Location(location),
            Some(location) => FileIdentity::Location(location.to_lowercase()),
            None => FileIdentity::Uri(file.id().to_string()),
        }
    }
}

/// Whether the host filesystem distinguishes paths by case
pub fn paths_case_sensitive() -> bool {
    !cfg!(any(windows, target_os = "macos"))
}

/// Files sharing one identity: the first is scanned, the rest get its matches
#[derive(Debug, Clone)]
pub struct FileGroup {
    pub identity: FileIdentity,
    pub files: Vec<FileRef>,
    /// Unsaved content that replaces the files' bytes
    pub overlay: Option<Arc<str>>,
}

impl FileGroup {
    pub fn primary(&self) -> &FileRef {
        &self.files[0]
    }

    pub fn aliases(&self) -> &[FileRef] {
        &self.files[1..]
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Partitions `files` by identity.
///
/// Groups come out in order of first occurrence and keep their files in input
/// order; overlay text is attached to the group whose identity it is keyed by.
pub fn group_files(
    files: &[FileRef],
    overlay: &DirtyOverlay,
    case_sensitive_paths: bool,
) -> Vec<FileGroup> {
    let mut groups: Vec<FileGroup> = Vec::new();
    let mut index: HashMap<FileIdentity, usize> = HashMap::with_capacity(files.len());

    for file in files {
        let identity = FileIdentity::of(file.as_ref(), case_sensitive_paths);
        match index.get(&identity) {
            Some(&slot) => groups[slot].files.push(Arc::clone(file)),
            None => {
                index.insert(identity.clone(), groups.len());
                groups.push(FileGroup {
                    overlay: overlay.get(&identity),
                    identity,
                    files: vec![Arc::clone(file)],
                });
            }
        }
    }

    debug!(
        "Grouped {} files into {} groups ({} with overlay content)",
        files.len(),
        groups.len(),
        groups.iter().filter(|g| g.overlay.is_some()).count()
    );
    groups
}
