use anyhow::Result;
use std::io::Read;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use textsweep::content::{CharView, ViewOptions};
use textsweep::search::{Locate, LocateSink, Located, MatchLocator};
use textsweep::{
    search, CancellationToken, CollectingSink, CompiledPattern, DirtyOverlay, EngineOptions,
    FailureKind, FileHandle, FileRef, InMemoryFile, MatchAccess, MatchSink, NoProgress,
    ScopeResolver, SearchConfig, SearchRequest, SearchStatus, TextSearchEngine, WalkScope,
};

/// A PNG header: NULs plus bytes that are not valid UTF-8
const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR foo \xff\xfe";

fn engine(threads: usize) -> TextSearchEngine {
    TextSearchEngine::new(EngineOptions {
        thread_count: NonZeroUsize::new(threads).unwrap(),
        poll_interval: Duration::from_millis(5),
        ..EngineOptions::default()
    })
}

fn run(
    engine: &TextSearchEngine,
    request: &SearchRequest,
    sink: Arc<dyn MatchSink>,
) -> textsweep::SearchOutput {
    engine
        .search(request, sink, &NoProgress, &CancellationToken::new())
        .unwrap()
}

fn offsets(sink: &CollectingSink, file: &str) -> Vec<(usize, usize)> {
    sink.matches_for(file)
        .iter()
        .map(|m| (m.offset, m.length))
        .collect()
}

#[test]
fn test_two_files_one_pattern() {
    let files = vec![
        InMemoryFile::new("A.txt", "foo\nbar\nfoo\n").into_ref(),
        InMemoryFile::new("B.txt", "nope").into_ref(),
    ];
    let request = SearchRequest::new(CompiledPattern::regex("foo").unwrap(), files);
    let sink = Arc::new(CollectingSink::new());

    let result = run(&engine(2), &request, sink.clone());

    assert_eq!(result.status, SearchStatus::Completed);
    assert_eq!(result.files_scanned, 2);
    assert_eq!(offsets(&sink, "A.txt"), vec![(0, 3), (8, 3)]);
    assert!(sink.matches_for("B.txt").is_empty());
}

#[test]
fn test_aliases_are_scanned_once() {
    let primary = Arc::new(InMemoryFile::new("A.txt", "xx foo xx").with_location("id-1"));
    let alias = Arc::new(InMemoryFile::new("A_link.txt", "xx foo xx").with_location("id-1"));
    let files: Vec<FileRef> = vec![primary.clone() as FileRef, alias.clone() as FileRef];
    let request = SearchRequest::new(CompiledPattern::regex("foo").unwrap(), files);
    let sink = Arc::new(CollectingSink::new().with_text());

    let result = run(&engine(4), &request, sink.clone());

    assert_eq!(primary.open_count() + alias.open_count(), 1);
    assert_eq!(offsets(&sink, "A.txt"), vec![(3, 3)]);
    assert_eq!(offsets(&sink, "A_link.txt"), vec![(3, 3)]);
    assert_eq!(
        sink.matches_for("A_link.txt")[0].text.as_deref(),
        Some("foo")
    );
    assert_eq!(result.files_scanned, 2);
    assert_eq!(result.total_matches, 2);
}

#[test]
fn test_dirty_overlay_shadows_disk() {
    let file = Arc::new(InMemoryFile::new("C.txt", "old").with_location("/work/C.txt"));
    let mut overlay = DirtyOverlay::new();
    overlay.insert_for(file.as_ref(), "new foo new");

    let request = SearchRequest::new(
        CompiledPattern::regex("foo").unwrap(),
        vec![file.clone() as FileRef],
    )
    .with_overlay(overlay);
    let sink = Arc::new(CollectingSink::new());

    let result = run(&engine(1), &request, sink.clone());

    assert!(result.is_complete());
    assert_eq!(offsets(&sink, "C.txt"), vec![(4, 3)]);
    assert_eq!(file.open_count(), 0);
}

#[test]
fn test_binary_files_are_skipped() {
    let files = vec![
        InMemoryFile::new("image.bin", b"foo\0\x01\x02foo".to_vec()).into_ref(),
        InMemoryFile::new("notes.txt", "foo").into_ref(),
    ];
    let request = SearchRequest::new(CompiledPattern::regex("foo").unwrap(), files.clone());
    let sink = Arc::new(CollectingSink::new());

    let result = run(&engine(2), &request, sink.clone());
    assert_eq!(result.files_skipped, 1);
    assert!(sink.matches_for("image.bin").is_empty());
    assert_eq!(offsets(&sink, "notes.txt"), vec![(0, 3)]);

    // Opting out of binary exclusion searches the file
    let request = SearchRequest::new(CompiledPattern::regex("foo").unwrap(), files)
        .exclude_binary(false);
    let sink = Arc::new(CollectingSink::new());
    let result = run(&engine(2), &request, sink.clone());
    assert_eq!(result.files_skipped, 0);
    assert_eq!(offsets(&sink, "image.bin"), vec![(0, 3), (6, 3)]);
}

struct SearchBinaries;

impl MatchSink for SearchBinaries {
    fn report_binary_file(&self, _file: &FileRef) -> bool {
        true
    }

    fn accept_match(&self, _access: &mut MatchAccess<'_>) -> bool {
        true
    }
}

#[test]
fn test_sink_can_keep_binary_file() {
    let files = vec![InMemoryFile::new("blob.bin", b"\0foo".to_vec()).into_ref()];
    let request = SearchRequest::new(CompiledPattern::regex("foo").unwrap(), files);

    let result = run(&engine(1), &request, Arc::new(SearchBinaries));
    assert_eq!(result.files_skipped, 0);
    assert_eq!(result.total_matches, 1);
}

#[test]
fn test_undecodable_binary_is_skipped_not_failed() {
    let files = vec![
        InMemoryFile::new("blob.dat", PNG_BYTES.to_vec()).into_ref(),
        InMemoryFile::new("notes.txt", "foo").into_ref(),
    ];
    let request = SearchRequest::new(CompiledPattern::regex("foo").unwrap(), files);

    let result = run(&engine(2), &request, Arc::new(CollectingSink::new()));
    assert_eq!(result.status, SearchStatus::Completed);
    assert_eq!(result.files_skipped, 1);
    assert!(result.failures.is_empty());
    assert_eq!(result.total_matches, 1);

    // Too large for a short read: the raw prefix decides
    let buffered = TextSearchEngine::new(EngineOptions {
        short_read_threshold: 8,
        view: ViewOptions {
            buffer_size: 16,
            buffer_count: 2,
            ..ViewOptions::default()
        },
        ..EngineOptions::default()
    });
    let files = vec![InMemoryFile::new("blob", PNG_BYTES.to_vec()).into_ref()];
    let request = SearchRequest::new(CompiledPattern::regex("foo").unwrap(), files);
    let result = run(&buffered, &request, Arc::new(CollectingSink::new()));
    assert_eq!(result.status, SearchStatus::Completed);
    assert_eq!(result.files_skipped, 1);

    // A sink that keeps it still sees the text around the bad bytes
    let result = run(&buffered, &request, Arc::new(SearchBinaries));
    assert_eq!(result.status, SearchStatus::Completed);
    assert_eq!(result.total_matches, 1);
}

#[test]
fn test_repeated_searches_agree() {
    let files: Vec<FileRef> = (0..30)
        .map(|i| InMemoryFile::new(format!("f{:02}.txt", i), "ab ab\nab".repeat(i % 4)).into_ref())
        .collect();
    let request = SearchRequest::new(CompiledPattern::regex("ab").unwrap(), files);
    let engine = engine(4);

    let first = Arc::new(CollectingSink::new());
    let second = Arc::new(CollectingSink::new());
    let a = run(&engine, &request, first.clone());
    let b = run(&engine, &request, second.clone());

    assert_eq!(a.total_matches, b.total_matches);
    assert_eq!(a.files_with_matches, b.files_with_matches);
    let positions = |sink: &CollectingSink| {
        sink.file_results()
            .into_iter()
            .map(|r| (r.file, r.matches.iter().map(|m| m.offset).collect::<Vec<_>>()))
            .collect::<Vec<_>>()
    };
    assert_eq!(positions(&first), positions(&second));
}

/// Cancels the search once it has seen `after` files
struct CancelAfter {
    token: CancellationToken,
    after: usize,
    seen: AtomicUsize,
    files: Mutex<Vec<String>>,
}

impl MatchSink for CancelAfter {
    fn accept_match(&self, access: &mut MatchAccess<'_>) -> bool {
        let mut files = self.files.lock().unwrap();
        let id = access.file().id().to_string();
        if !files.contains(&id) {
            files.push(id);
            if self.seen.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
                self.token.cancel();
            }
        }
        drop(files);
        // Keep the workers busy long enough for the coordinator to notice
        std::thread::sleep(Duration::from_millis(1));
        true
    }
}

#[test]
fn test_cancellation_stops_the_search() {
    let files: Vec<FileRef> = (0..500)
        .map(|i| InMemoryFile::new(format!("{}.txt", i), "match me").into_ref())
        .collect();
    let request = SearchRequest::new(CompiledPattern::regex("match").unwrap(), files);
    let token = CancellationToken::new();
    let sink = Arc::new(CancelAfter {
        token: token.clone(),
        after: 5,
        seen: AtomicUsize::new(0),
        files: Mutex::new(Vec::new()),
    });

    let result = engine(2)
        .search(&request, sink.clone(), &NoProgress, &token)
        .unwrap();

    assert_eq!(result.status, SearchStatus::Cancelled);
    assert!(result.files_scanned < 500);
    // Every file reported to the sink was fully scanned
    assert_eq!(sink.files.lock().unwrap().len(), result.files_with_matches);
}

#[test]
fn test_empty_matches_are_never_reported() {
    let files = vec![InMemoryFile::new("a.txt", "aaa bbb").into_ref()];
    let request = SearchRequest::new(CompiledPattern::regex("a*").unwrap(), files);
    let sink = Arc::new(CollectingSink::new());

    run(&engine(1), &request, sink.clone());
    let found = sink.matches_for("a.txt");
    assert_eq!(found.len(), 1);
    assert!(found.iter().all(|m| m.length > 0));
}

#[test]
fn test_large_file_uses_bounded_buffers() {
    let text: String = (0..50).map(|i| format!("line {:03} needle\n", i)).collect();
    let file = Arc::new(InMemoryFile::new("big.log", text));
    let engine = TextSearchEngine::new(EngineOptions {
        thread_count: NonZeroUsize::new(1).unwrap(),
        poll_interval: Duration::from_millis(5),
        short_read_threshold: 64,
        view: ViewOptions {
            buffer_size: 16,
            buffer_count: 2,
            ..ViewOptions::default()
        },
        ..EngineOptions::default()
    });
    let request = SearchRequest::new(
        CompiledPattern::literal("needle").unwrap(),
        vec![file.clone() as FileRef],
    );
    let sink = Arc::new(CollectingSink::new().with_text());

    let result = run(&engine, &request, sink.clone());

    assert!(result.is_complete());
    let found = sink.matches_for("big.log");
    assert_eq!(found.len(), 50);
    for (i, m) in found.iter().enumerate() {
        assert_eq!(m.offset, 9 + 16 * i);
        assert_eq!(m.text.as_deref(), Some("needle"));
    }
    let stats = engine.metrics().get_stats();
    assert_eq!(stats.buffered_files, 1);
    assert!(stats.peak_buffer_bytes <= (2 * 16 * std::mem::size_of::<char>()) as u64);
    assert_eq!(stats.buffer_bytes, 0);
}

/// Accepts files whose id starts with a prefix
struct PrefixFilter(&'static str, CollectingSink);

impl MatchSink for PrefixFilter {
    fn accept_file(&self, file: &FileRef) -> bool {
        file.id().starts_with(self.0)
    }

    fn accept_match(&self, access: &mut MatchAccess<'_>) -> bool {
        self.1.accept_match(access)
    }
}

#[test]
fn test_accept_file_filters_scope() {
    let files = vec![
        InMemoryFile::new("src/a.rs", "foo").into_ref(),
        InMemoryFile::new("docs/b.md", "foo").into_ref(),
    ];
    let request = SearchRequest::new(CompiledPattern::regex("foo").unwrap(), files);
    let sink = Arc::new(PrefixFilter("src/", CollectingSink::new()));

    let result = run(&engine(2), &request, sink.clone());

    assert_eq!(result.files_skipped, 1);
    assert_eq!(result.total_matches, 1);
    assert!(sink.1.matches_for("docs/b.md").is_empty());
}

/// Records every file offered to it
#[derive(Default)]
struct FileRecorder(Mutex<Vec<String>>);

impl MatchSink for FileRecorder {
    fn accept_file(&self, file: &FileRef) -> bool {
        self.0.lock().unwrap().push(file.id().to_string());
        true
    }

    fn accept_match(&self, _access: &mut MatchAccess<'_>) -> bool {
        panic!("an empty pattern produces no matches");
    }
}

#[test]
fn test_empty_pattern_reports_every_file() {
    let files: Vec<FileRef> = (0..4)
        .map(|i| InMemoryFile::new(format!("{}.txt", i), "content").into_ref())
        .collect();
    let request = SearchRequest::new(CompiledPattern::empty(), files);
    let sink = Arc::new(FileRecorder::default());

    let result = run(&engine(2), &request, sink.clone());

    assert_eq!(result.status, SearchStatus::Completed);
    assert_eq!(result.files_scanned, 4);
    assert_eq!(result.total_matches, 0);
    let mut seen = sink.0.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["0.txt", "1.txt", "2.txt", "3.txt"]);
}

#[test]
fn test_max_matches_per_file() {
    let files = vec![InMemoryFile::new("a.txt", "x x x x x").into_ref()];
    let request = SearchRequest::new(CompiledPattern::regex("x").unwrap(), files)
        .max_matches_per_file(Some(2));
    let sink = Arc::new(CollectingSink::new());

    let result = run(&engine(1), &request, sink.clone());
    assert_eq!(result.total_matches, 2);
    assert_eq!(offsets(&sink, "a.txt"), vec![(0, 1), (2, 1)]);
}

#[test]
fn test_missing_file_is_a_failure_not_an_error() {
    let files: Vec<FileRef> = vec![
        Arc::new(textsweep::DiskFile::utf8("/no/such/dir/file.txt")) as FileRef,
        InMemoryFile::new("ok.txt", "foo").into_ref(),
    ];
    let request = SearchRequest::new(CompiledPattern::regex("foo").unwrap(), files);

    let result = run(&engine(2), &request, Arc::new(CollectingSink::new()));

    assert_eq!(result.status, SearchStatus::CompletedWithErrors);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].kind, FailureKind::FileAccess);
    assert!(result.fatal.is_none());
    assert_eq!(result.total_matches, 1);
}

/// A large file whose reader panics on first use
#[derive(Debug)]
struct ExplodingFile;

struct ExplodingReader;

impl Read for ExplodingReader {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        panic!("reader exploded");
    }
}

impl FileHandle for ExplodingFile {
    fn id(&self) -> &str {
        "exploding.dat"
    }

    fn canonical_location(&self) -> Option<String> {
        None
    }

    fn byte_len(&self) -> Option<u64> {
        Some(u64::MAX / 2)
    }

    fn charset(&self) -> &str {
        "utf-8"
    }

    fn open(&self) -> std::io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(ExplodingReader))
    }
}

#[test]
fn test_reader_panic_fails_one_file() {
    let files: Vec<FileRef> = vec![
        Arc::new(ExplodingFile) as FileRef,
        InMemoryFile::new("ok.txt", "foo").into_ref(),
    ];
    let request =
        SearchRequest::new(CompiledPattern::regex("foo").unwrap(), files).exclude_binary(false);

    let result = run(&engine(1), &request, Arc::new(CollectingSink::new()));

    assert_eq!(result.status, SearchStatus::CompletedWithErrors);
    assert!(result.fatal.is_none());
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].kind, FailureKind::FileAccess);
    assert!(result.failures[0].cause.contains("reader exploded"));
    assert_eq!(result.files_scanned, 2);
    assert_eq!(result.total_matches, 1);
}

/// A matcher that crashes on content starting with "boom"
struct CrashingLocator;

impl Locate for CrashingLocator {
    fn locate(
        &self,
        view: &mut dyn CharView,
        pattern: &CompiledPattern,
        sink: &mut dyn LocateSink,
        cancel: &CancellationToken,
    ) -> textsweep::SearchResult<Located> {
        if view.substring(0, 4)? == "boom" {
            panic!("matcher exploded");
        }
        MatchLocator::default().locate(view, pattern, sink, cancel)
    }
}

#[test]
fn test_matcher_crash_stops_dispatch() {
    let mut files: Vec<FileRef> = vec![InMemoryFile::new("boom.txt", "boom foo").into_ref()];
    files.extend(
        (0..20).map(|i| InMemoryFile::new(format!("f{:02}.txt", i), "foo").into_ref()),
    );
    let request = SearchRequest::new(CompiledPattern::regex("foo").unwrap(), files);
    let engine = engine(1).with_locator(Arc::new(CrashingLocator));

    let result = run(&engine, &request, Arc::new(CollectingSink::new()));

    assert_eq!(result.status, SearchStatus::CompletedWithErrors);
    let fatal = result.fatal.clone().unwrap();
    assert_eq!(fatal.kind, FailureKind::PatternTooComplex);
    assert_eq!(fatal.file, "boom.txt");
    assert!(fatal.cause.contains("matcher exploded"));
    assert_eq!(result.failures, vec![fatal]);
    assert_eq!(result.files_scanned, 1);
    assert_eq!(result.total_matches, 0);
}

#[cfg(unix)]
#[test]
fn test_symlinked_file_is_read_once() -> Result<()> {
    let dir = tempdir()?;
    std::fs::write(dir.path().join("A.txt"), "xx foo xx")?;
    std::os::unix::fs::symlink(dir.path().join("A.txt"), dir.path().join("A_link.txt"))?;

    let files = WalkScope::new(dir.path()).resolve()?;
    let request = SearchRequest::new(CompiledPattern::regex("foo")?, files);
    let sink = Arc::new(CollectingSink::new());
    let engine = engine(2);

    let result = run(&engine, &request, sink.clone());

    assert_eq!(result.files_scanned, 2);
    assert_eq!(result.total_matches, 2);
    assert_eq!(engine.metrics().get_stats().short_reads, 1);
    let found = sink.file_results();
    assert_eq!(found.len(), 2);
    assert!(found[1].file.ends_with("A_link.txt"));
    assert!(found
        .iter()
        .all(|f| f.matches.len() == 1 && f.matches[0].offset == 3));
    Ok(())
}

#[test]
fn test_search_directory_from_config() -> Result<()> {
    let dir = tempdir()?;
    std::fs::create_dir_all(dir.path().join("src"))?;
    std::fs::write(dir.path().join("src/lib.rs"), "// TODO: one\nfn x() {} // TODO two\n")?;
    std::fs::write(dir.path().join("README.md"), "No todo here, lowercase\n")?;
    std::fs::write(dir.path().join("data.bin"), b"TODO\0\0\0")?;

    let config = SearchConfig {
        pattern: "TODO".to_string(),
        root_path: dir.path().to_path_buf(),
        thread_count: NonZeroUsize::new(2).unwrap(),
        ..SearchConfig::default()
    };
    let report = search(&config)?;

    assert_eq!(report.outcome.status, SearchStatus::Completed);
    assert_eq!(report.outcome.total_files, 3);
    assert_eq!(report.outcome.files_skipped, 1);
    assert_eq!(report.outcome.total_matches, 2);
    assert_eq!(report.file_results.len(), 1);
    assert!(report.file_results[0].file.ends_with("lib.rs"));
    assert_eq!(report.file_results[0].matches[0].offset, 3);

    let insensitive = SearchConfig {
        case_sensitive: false,
        file_extensions: Some(vec!["md".to_string()]),
        ..config
    };
    let report = search(&insensitive)?;
    assert_eq!(report.outcome.total_files, 1);
    assert_eq!(report.outcome.total_matches, 1);
    Ok(())
}

#[test]
fn test_statuses_cover_every_file() {
    let files: Vec<FileRef> = (0..10)
        .map(|i| InMemoryFile::new(format!("{}.txt", i), "abc").into_ref())
        .collect();
    let request = SearchRequest::new(CompiledPattern::regex("b").unwrap(), files);
    let result = run(&engine(3), &request, Arc::new(CollectingSink::new()));

    assert_eq!(result.total_files, 10);
    assert_eq!(result.files_scanned + result.files_skipped, 10);
    assert!(result.failures.is_empty());
}
