use crossbeam_channel::RecvTimeoutError;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{
    default_join_timeout, default_poll_interval, default_short_read_threshold, SearchConfig,
};
use crate::content::{
    ContentClassifier, ContentTypeStrategy, ExtensionContentType, ScratchPool, ViewOptions,
};
use crate::errors::SearchResult;
use crate::metrics::ScanMetrics;
use crate::results::SearchResult as SearchOutput;
use crate::search::grouper::{group_files, paths_case_sensitive};
use crate::search::locator::{Locate, MatchLocator};
use crate::search::request::SearchRequest;
use crate::search::worker::{CancellationToken, JobGroup, ScanContext};
use crate::sink::{MatchSink, ProgressSink};

/// Above this many groups one thread is left to the coordinator
const RESERVE_THRESHOLD: usize = 100;

/// Scratch buffers kept per engine
const RETAINED_SCRATCH_BUFFERS: usize = 8;

/// Tuning for a [`TextSearchEngine`]
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub thread_count: NonZeroUsize,
    pub reserve_threshold: usize,
    pub poll_interval: Duration,
    pub join_timeout: Duration,
    pub view: ViewOptions,
    pub short_read_threshold: u64,
    pub case_sensitive_paths: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            thread_count: NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN),
            reserve_threshold: RESERVE_THRESHOLD,
            poll_interval: default_poll_interval(),
            join_timeout: default_join_timeout(),
            view: ViewOptions::default(),
            short_read_threshold: default_short_read_threshold(),
            case_sensitive_paths: paths_case_sensitive(),
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            thread_count: config.thread_count,
            poll_interval: config.poll_interval,
            join_timeout: config.join_timeout,
            view: ViewOptions::from_config(config),
            short_read_threshold: config.short_read_threshold,
            ..Self::default()
        }
    }
}

/// Runs searches on a pool of worker threads.
///
/// The engine itself holds only reusable resources (scratch buffers and
/// metrics); every call to [`TextSearchEngine::search`] gets its own workers.
pub struct TextSearchEngine {
    options: EngineOptions,
    scratch: Arc<ScratchPool>,
    strategy: Arc<dyn ContentTypeStrategy>,
    locator: Option<Arc<dyn Locate>>,
    metrics: ScanMetrics,
}

impl TextSearchEngine {
    pub fn new(options: EngineOptions) -> Self {
        // Reads of unknown size grow their buffer by doubling up to the threshold
        let largest_read =
            usize::try_from(options.short_read_threshold.saturating_add(1)).unwrap_or(usize::MAX);
        let scratch = ScratchPool::new(RETAINED_SCRATCH_BUFFERS, largest_read.saturating_mul(2));
        Self {
            options,
            scratch: Arc::new(scratch),
            strategy: Arc::new(ExtensionContentType),
            locator: None,
            metrics: ScanMetrics::new(),
        }
    }

    /// Shares a scratch pool with other engines
    pub fn with_scratch_pool(mut self, scratch: Arc<ScratchPool>) -> Self {
        self.scratch = scratch;
        self
    }

    /// Replaces the content-type guess used for files too large to read up front
    pub fn with_content_type(mut self, strategy: Arc<dyn ContentTypeStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Replaces the regex matcher, e.g. with one that instruments or limits it
    pub fn with_locator(mut self, locator: Arc<dyn Locate>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn metrics(&self) -> &ScanMetrics {
        &self.metrics
    }

    /// Number of workers for `groups` groups
    pub fn worker_count(&self, groups: usize, concurrent_sink: bool) -> usize {
        if !concurrent_sink {
            return 1;
        }
        let mut workers = self.options.thread_count.get().min(groups).max(1);
        if groups > self.options.reserve_threshold && workers > 1 {
            workers -= 1;
        }
        workers
    }

    /// Searches every file of `request`, reporting matches to `sink` and
    /// progress to `progress`, until done or `cancel` is set
    pub fn search(
        &self,
        request: &SearchRequest,
        sink: Arc<dyn MatchSink>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> SearchResult<SearchOutput> {
        let total = request.scope().len();
        info!(
            "Starting search for '{}' in {} files",
            request.pattern().source(),
            total
        );
        if total == 0 {
            debug!("Empty scope, nothing to search");
            return Ok(SearchOutput::new(0).finish(false, None));
        }

        let groups = group_files(
            request.scope(),
            request.overlay(),
            self.options.case_sensitive_paths,
        );
        let workers = self.worker_count(groups.len(), sink.supports_concurrency());
        debug!(
            "Using {} workers for {} groups ({} threads configured)",
            workers,
            groups.len(),
            self.options.thread_count
        );

        let context = Arc::new(ScanContext {
            pattern: request.pattern().clone(),
            locator: self
                .locator
                .clone()
                .unwrap_or_else(|| Arc::new(MatchLocator::for_view(&self.options.view))),
            classifier: ContentClassifier::new(
                self.options.view,
                self.options.short_read_threshold,
                Arc::clone(&self.scratch),
                self.metrics.clone(),
            )
            .with_strategy(Arc::clone(&self.strategy)),
            sink: Arc::clone(&sink),
            exclude_binary: request.excludes_binary(),
            max_matches_per_file: request.match_limit(),
            metrics: self.metrics.clone(),
        });

        sink.begin_reporting();
        let mut job = match JobGroup::spawn(groups, workers, context) {
            Ok(job) => job,
            Err(e) => {
                sink.end_reporting();
                return Err(e);
            }
        };

        let mut result = SearchOutput::new(total);
        // Whether cancellation arrived before any fatal failure
        let mut cancelled = false;
        loop {
            if cancel.is_cancelled() && !job.is_cancelled() {
                cancelled = job.fatal().is_none();
                debug!("Cancellation requested, stopping workers");
                job.cancel();
            }
            if job.is_cancelled() {
                break;
            }

            match job.outcomes().recv_timeout(self.options.poll_interval) {
                Ok(scans) => scans.iter().for_each(|scan| result.record(scan)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            let (scanned, current) = job.progress().snapshot();
            progress.report(scanned, total, current.as_deref());
        }

        let deadline = Instant::now() + self.options.join_timeout;
        let state = job.join(deadline, |scans| {
            scans.iter().for_each(|scan| result.record(scan))
        });
        if !cancelled {
            let (scanned, current) = job.progress().snapshot();
            progress.report(scanned, total, current.as_deref());
        }
        sink.end_reporting();

        let fatal = job.fatal();
        let result = result.finish(cancelled, fatal);
        debug!(
            "Job group state {:?}, {} matches delivered",
            state,
            job.match_count()
        );
        if !result.failures.is_empty() {
            warn!("{} files could not be searched", result.failures.len());
        }
        self.metrics.log_stats();
        info!(
            "Search {:?}: {} matches in {} of {} files",
            result.status, result.total_matches, result.files_with_matches, result.files_scanned
        );
        Ok(result)
    }
}

impl Default for TextSearchEngine {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}
