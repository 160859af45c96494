use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Tracks memory usage and content-loading counters for one engine
#[derive(Debug, Clone)]
pub struct ScanMetrics {
    // Buffer memory held by large-file views
    buffer_bytes: Arc<AtomicU64>,
    peak_buffer_bytes: Arc<AtomicU64>,

    // How file content was obtained
    short_reads: Arc<AtomicU64>,
    buffered_files: Arc<AtomicU64>,
    overlay_files: Arc<AtomicU64>,
    binary_skipped: Arc<AtomicU64>,

    // Stream activity
    streams_opened: Arc<AtomicU64>,
    stream_reopens: Arc<AtomicU64>,
    buffer_fills: Arc<AtomicU64>,
}

impl ScanMetrics {
    /// Creates a new ScanMetrics instance
    pub fn new() -> Self {
        Self {
            buffer_bytes: Arc::new(AtomicU64::new(0)),
            peak_buffer_bytes: Arc::new(AtomicU64::new(0)),
            short_reads: Arc::new(AtomicU64::new(0)),
            buffered_files: Arc::new(AtomicU64::new(0)),
            overlay_files: Arc::new(AtomicU64::new(0)),
            binary_skipped: Arc::new(AtomicU64::new(0)),
            streams_opened: Arc::new(AtomicU64::new(0)),
            stream_reopens: Arc::new(AtomicU64::new(0)),
            buffer_fills: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records buffer memory taken by a view
    pub fn record_allocation(&self, bytes: u64) {
        let total = self.buffer_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let mut peak = self.peak_buffer_bytes.load(Ordering::Relaxed);
        while total > peak {
            match self.peak_buffer_bytes.compare_exchange_weak(
                peak,
                total,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => peak = current,
            }
        }
        debug!("Buffer allocated: {} bytes, total: {} bytes", bytes, total);
    }

    /// Records buffer memory released by a view
    pub fn record_deallocation(&self, bytes: u64) {
        let total = self.buffer_bytes.fetch_sub(bytes, Ordering::Relaxed) - bytes;
        debug!("Buffer released: {} bytes, total: {} bytes", bytes, total);
    }

    pub fn record_short_read(&self) {
        self.short_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_buffered_file(&self) {
        self.buffered_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overlay_file(&self) {
        self.overlay_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_binary_skip(&self) {
        self.binary_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records opening a file's byte stream; `reopen` when it was opened before
    pub fn record_stream_open(&self, reopen: bool) {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
        if reopen {
            self.stream_reopens.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_buffer_fill(&self) {
        self.buffer_fills.fetch_add(1, Ordering::Relaxed);
    }

    /// Gets current statistics
    pub fn get_stats(&self) -> ScanStats {
        ScanStats {
            buffer_bytes: self.buffer_bytes.load(Ordering::Relaxed),
            peak_buffer_bytes: self.peak_buffer_bytes.load(Ordering::Relaxed),
            short_reads: self.short_reads.load(Ordering::Relaxed),
            buffered_files: self.buffered_files.load(Ordering::Relaxed),
            overlay_files: self.overlay_files.load(Ordering::Relaxed),
            binary_skipped: self.binary_skipped.load(Ordering::Relaxed),
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            stream_reopens: self.stream_reopens.load(Ordering::Relaxed),
            buffer_fills: self.buffer_fills.load(Ordering::Relaxed),
        }
    }

    /// Logs current statistics
    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Scan stats:\n\
             Buffer memory (live/peak): {}/{} bytes\n\
             Files (short/buffered/overlay): {}/{}/{}\n\
             Binary files skipped: {}\n\
             Streams opened: {} ({} reopens), buffer fills: {}",
            stats.buffer_bytes,
            stats.peak_buffer_bytes,
            stats.short_reads,
            stats.buffered_files,
            stats.overlay_files,
            stats.binary_skipped,
            stats.streams_opened,
            stats.stream_reopens,
            stats.buffer_fills
        );
    }
}

impl Default for ScanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of [`ScanMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub buffer_bytes: u64,
    pub peak_buffer_bytes: u64,
    pub short_reads: u64,
    pub buffered_files: u64,
    pub overlay_files: u64,
    pub binary_skipped: u64,
    pub streams_opened: u64,
    pub stream_reopens: u64,
    pub buffer_fills: u64,
}
