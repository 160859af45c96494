//! The worker pool behind one search.
//!
//! A [`JobGroup`] owns a fixed set of named worker threads that pull
//! [`FileGroup`]s from one shared queue until it runs dry, the group is
//! cancelled, or a fatal failure is recorded. Finished groups are sent back to
//! the coordinating thread as lists of [`FileScan`]s.
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::content::{CharView, Classified, ContentClassifier, ContentSource, StringView};
use crate::errors::{SearchError, SearchResult};
use crate::metrics::ScanMetrics;
use crate::results::{FileFailure, FileScan, MatchRecord, ScanStatus, SkipReason};
use crate::scope::FileRef;
use crate::search::grouper::FileGroup;
use crate::search::locator::{CompiledPattern, Locate, Located, MatchCollector};
use crate::sink::{MatchAccess, MatchSink};

/// A shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing flag, e.g. one set from a signal handler
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Scanned-file count and the label of the last file finished
#[derive(Debug, Default)]
pub struct ProgressState {
    inner: Mutex<(usize, Option<String>)>,
}

impl ProgressState {
    fn files_done(&self, count: usize, last: Option<String>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.0 += count;
        if last.is_some() {
            inner.1 = last;
        }
    }

    pub fn snapshot(&self) -> (usize, Option<String>) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Lifecycle of one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Completed,
    /// Finished, but at least one of its files failed
    Failed,
    Cancelled,
}

/// Lifecycle of a whole job group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    NotStarted,
    Running,
    Completed,
    PartiallyFailed,
    Cancelled,
}

/// What every worker needs to scan a group
pub struct ScanContext {
    pub pattern: CompiledPattern,
    pub locator: Arc<dyn Locate>,
    pub classifier: ContentClassifier,
    pub sink: Arc<dyn MatchSink>,
    pub exclude_binary: bool,
    pub max_matches_per_file: Option<usize>,
    pub metrics: ScanMetrics,
}

/// State shared between the workers and the coordinator
#[derive(Default)]
struct Shared {
    token: CancellationToken,
    fatal: Mutex<Option<FileFailure>>,
    has_fatal: AtomicBool,
    progress: ProgressState,
    matches: AtomicUsize,
}

impl Shared {
    fn record_fatal(&self, failure: &FileFailure) {
        let mut slot = self.fatal.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            warn!("Stopping dispatch: {}", failure);
            *slot = Some(failure.clone());
            self.has_fatal.store(true, Ordering::SeqCst);
        }
    }
}

pub struct JobGroup {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<JobState>>,
    outcomes: Receiver<Vec<FileScan>>,
    state: GroupState,
}

impl JobGroup {
    /// Queues `groups` and starts `workers` threads on them
    pub fn spawn(
        groups: Vec<FileGroup>,
        workers: usize,
        context: Arc<ScanContext>,
    ) -> SearchResult<Self> {
        let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
        for group in groups {
            // The receiver is alive, so this cannot fail
            let _ = queue_tx.send(group);
        }
        drop(queue_tx);

        let (results_tx, outcomes) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared::default());
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers.max(1) {
            let queue = queue_rx.clone();
            let results = results_tx.clone();
            let shared = Arc::clone(&shared);
            let context = Arc::clone(&context);
            let handle = thread::Builder::new()
                .name(format!("textsweep-worker-{}", id))
                .spawn(move || run_worker(queue, results, &shared, &context))?;
            handles.push(handle);
        }
        debug!("Started {} workers", handles.len());

        Ok(Self {
            shared,
            handles,
            outcomes,
            state: GroupState::Running,
        })
    }

    /// Asks every worker to stop after its current group
    pub fn cancel(&self) {
        self.shared.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// The first fatal failure, if any
    pub fn fatal(&self) -> Option<FileFailure> {
        self.shared
            .fatal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn progress(&self) -> &ProgressState {
        &self.shared.progress
    }

    /// Matches delivered to the sink so far
    pub fn match_count(&self) -> usize {
        self.shared.matches.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    /// Finished groups; disconnects once every worker has exited
    pub fn outcomes(&self) -> &Receiver<Vec<FileScan>> {
        &self.outcomes
    }

    /// Drains outcomes until every worker exits or `deadline` passes, then
    /// joins the workers that finished. Workers still running are detached.
    pub fn join(&mut self, deadline: Instant, mut on_outcome: impl FnMut(Vec<FileScan>)) -> GroupState {
        loop {
            match self.outcomes.recv_deadline(deadline) {
                Ok(scans) => on_outcome(scans),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    warn!("Timed out waiting for workers to finish");
                    break;
                }
            }
        }

        let mut states = Vec::with_capacity(self.handles.len());
        for handle in self.handles.drain(..) {
            // A worker drops its sender just before its thread ends
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            if !handle.is_finished() {
                let name = handle.thread().name().unwrap_or("worker").to_string();
                warn!("Detaching {} that is still running", name);
                continue;
            }
            match handle.join() {
                Ok(state) => states.push(state),
                Err(_) => states.push(JobState::Failed),
            }
        }

        self.state = if self.is_cancelled() || states.contains(&JobState::Cancelled) {
            GroupState::Cancelled
        } else if states.contains(&JobState::Failed) || self.fatal().is_some() {
            GroupState::PartiallyFailed
        } else {
            GroupState::Completed
        };
        debug!("Job group finished as {:?}", self.state);
        self.state
    }
}

fn run_worker(
    queue: Receiver<FileGroup>,
    results: Sender<Vec<FileScan>>,
    shared: &Shared,
    context: &ScanContext,
) -> JobState {
    let mut state = JobState::Running;
    loop {
        if shared.token.is_cancelled() {
            state = JobState::Cancelled;
            break;
        }
        if shared.has_fatal.load(Ordering::SeqCst) {
            break;
        }
        let Ok(group) = queue.try_recv() else {
            break;
        };

        let scans = scan_group(&group, context, &shared.token);

        let mut finished = 0;
        let mut delivered = 0;
        let mut current = None;
        for scan in &scans {
            delivered += scan.matches;
            match &scan.status {
                ScanStatus::Cancelled => continue,
                ScanStatus::Skipped(SkipReason::Filtered) => {}
                ScanStatus::Failed(failure) => {
                    if failure.kind.is_fatal() {
                        shared.record_fatal(failure);
                    }
                    state = JobState::Failed;
                    current.get_or_insert_with(|| scan.file.label());
                }
                _ => {
                    current.get_or_insert_with(|| scan.file.label());
                }
            }
            finished += 1;
        }
        shared.matches.fetch_add(delivered, Ordering::Relaxed);
        if finished > 0 {
            shared.progress.files_done(finished, current);
        }

        if results.send(scans).is_err() {
            break;
        }
    }

    if state == JobState::Running {
        JobState::Completed
    } else {
        state
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Content access for one scan. A panic while reading (typically inside a
/// file's reader) fails this file alone, and every later call fails the same
/// way, so only panics from the matcher itself reach the fatal path.
struct GuardedView<'a> {
    inner: &'a mut dyn CharView,
    label: String,
    panicked: Option<String>,
}

impl<'a> GuardedView<'a> {
    fn new(inner: &'a mut dyn CharView, label: String) -> Self {
        Self {
            inner,
            label,
            panicked: None,
        }
    }

    fn check(&self) -> SearchResult<()> {
        match &self.panicked {
            Some(message) => Err(SearchError::reader_panicked(&self.label, message)),
            None => Ok(()),
        }
    }

    fn settle<T>(&mut self, outcome: thread::Result<SearchResult<T>>) -> SearchResult<T> {
        outcome.unwrap_or_else(|payload| {
            let message = panic_message(payload);
            debug!("Reading {} panicked: {}", self.label, message);
            let err = SearchError::reader_panicked(&self.label, &message);
            self.panicked = Some(message);
            Err(err)
        })
    }
}

impl CharView for GuardedView<'_> {
    fn len(&mut self) -> SearchResult<usize> {
        self.check()?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.inner.len()));
        self.settle(outcome)
    }

    fn char_at(&mut self, index: usize) -> SearchResult<char> {
        self.check()?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.inner.char_at(index)));
        self.settle(outcome)
    }

    fn substring(&mut self, offset: usize, len: usize) -> SearchResult<String> {
        self.check()?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.inner.substring(offset, len)));
        self.settle(outcome)
    }

    fn as_str(&self) -> Option<&str> {
        self.inner.as_str()
    }
}

fn statuses(files: &[FileRef], status: &ScanStatus) -> Vec<FileScan> {
    files
        .iter()
        .map(|file| FileScan::new(file.clone(), status.clone()))
        .collect()
}

fn failures(files: &[FileRef], err: &SearchError) -> Vec<FileScan> {
    files
        .iter()
        .map(|file| {
            FileScan::new(
                file.clone(),
                ScanStatus::Failed(FileFailure::from_error(file.label(), err)),
            )
        })
        .collect()
}

/// Scans one group and reports its matches, returning a status per file
pub fn scan_group(
    group: &FileGroup,
    context: &ScanContext,
    cancel: &CancellationToken,
) -> Vec<FileScan> {
    let sink = &context.sink;
    let (accepted, filtered): (Vec<FileRef>, Vec<FileRef>) =
        group.files.iter().cloned().partition(|file| sink.accept_file(file));
    let mut scans = statuses(&filtered, &ScanStatus::Skipped(SkipReason::Filtered));

    if accepted.is_empty() {
        return scans;
    }
    if cancel.is_cancelled() {
        scans.extend(statuses(&accepted, &ScanStatus::Cancelled));
        return scans;
    }
    if context.pattern.is_empty() {
        scans.extend(statuses(&accepted, &ScanStatus::Ok));
        return scans;
    }

    let primary = &accepted[0];
    trace!("Scanning {} ({} aliases)", primary.label(), accepted.len() - 1);
    let mut source = match &group.overlay {
        Some(text) => {
            context.metrics.record_overlay_file();
            ContentSource::Loaded(StringView::new(Arc::clone(text)))
        }
        None => {
            let opened = panic::catch_unwind(AssertUnwindSafe(|| {
                context
                    .classifier
                    .open(primary, context.exclude_binary, |file| {
                        sink.report_binary_file(file)
                    })
            }))
            .unwrap_or_else(|payload| {
                Err(SearchError::reader_panicked(
                    primary.label(),
                    &panic_message(payload),
                ))
            });
            match opened {
                Ok(Classified {
                    source: Some(source),
                    ..
                }) => source,
                Ok(Classified { source: None, .. }) => {
                    context.metrics.record_binary_skip();
                    scans.extend(statuses(&accepted, &ScanStatus::Skipped(SkipReason::Binary)));
                    return scans;
                }
                Err(err) => {
                    debug!("Failed to open {}: {}", primary.label(), err);
                    scans.extend(failures(&accepted, &err));
                    return scans;
                }
            }
        }
    };

    let mut view = GuardedView::new(source.view(), primary.label());
    let mut collector = MatchCollector::new(context.max_matches_per_file);
    let located = panic::catch_unwind(AssertUnwindSafe(|| {
        context
            .locator
            .locate(&mut view, &context.pattern, &mut collector, cancel)
    }))
    .unwrap_or_else(|payload| Err(SearchError::pattern_too_complex(panic_message(payload))));

    match located {
        Err(err) => {
            debug!("Failed to scan {}: {}", primary.label(), err);
            scans.extend(failures(&accepted, &err));
        }
        Ok(Located::Aborted) => {
            scans.extend(statuses(&accepted, &ScanStatus::Cancelled));
        }
        Ok(Located::Completed(_)) | Ok(Located::Stopped(_)) => {
            let found = collector.into_matches();
            for file in &accepted {
                if cancel.is_cancelled() {
                    scans.push(FileScan::new(file.clone(), ScanStatus::Cancelled));
                    continue;
                }
                let mut delivered = 0;
                for m in &found {
                    let record = MatchRecord::new(file.clone(), m.offset, m.length);
                    let mut access = MatchAccess::new(record, &mut view);
                    delivered += 1;
                    if !sink.accept_match(&mut access) {
                        break;
                    }
                }
                scans.push(FileScan::new(file.clone(), ScanStatus::Ok).with_matches(delivered));
            }
        }
    }
    scans
}
