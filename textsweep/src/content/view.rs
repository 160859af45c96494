//! Random-access character views over file content.
//!
//! [`StringView`] wraps text that is already in memory. [`BufferedFileView`]
//! decodes a file on demand into a small ring of fixed-size char buffers, so a
//! view over a file of any size holds at most `buffer_count * buffer_size`
//! chars at a time.
use std::mem::size_of;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::{default_buffer_count, default_buffer_size, EncodingMode, SearchConfig};
use crate::content::decode::DecodedStream;
use crate::errors::{FailureKind, SearchError, SearchResult};
use crate::metrics::ScanMetrics;
use crate::scope::FileRef;

/// Character-indexed access to decoded content
pub trait CharView {
    /// Total number of chars
    fn len(&mut self) -> SearchResult<usize>;

    fn is_empty(&mut self) -> SearchResult<bool> {
        Ok(self.len()? == 0)
    }

    /// The char at `index`; `OutOfBounds` past the end
    fn char_at(&mut self, index: usize) -> SearchResult<char>;

    /// Up to `len` chars starting at `offset`; shorter when the content ends first
    fn substring(&mut self, offset: usize, len: usize) -> SearchResult<String>;

    /// The whole content, when it is held contiguously in memory
    fn as_str(&self) -> Option<&str> {
        None
    }
}

/// A view over text held in memory
#[derive(Debug, Clone)]
pub struct StringView {
    text: Arc<str>,
    // Byte offset of every char; only built for non-ASCII text
    char_offsets: Option<Vec<usize>>,
}

impl StringView {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self {
            text: text.into(),
            char_offsets: None,
        }
    }

    fn is_ascii(&self) -> bool {
        self.text.is_ascii()
    }

    fn offsets(&mut self) -> &[usize] {
        let text = &self.text;
        self.char_offsets
            .get_or_insert_with(|| text.char_indices().map(|(i, _)| i).collect())
    }

    /// Byte offset of char `index`, or the text length when `index` is the end
    fn byte_offset(&mut self, index: usize) -> usize {
        if self.is_ascii() {
            return index.min(self.text.len());
        }
        let total = self.text.len();
        self.offsets().get(index).copied().unwrap_or(total)
    }

    fn char_count(&mut self) -> usize {
        if self.is_ascii() {
            self.text.len()
        } else {
            self.offsets().len()
        }
    }
}

impl CharView for StringView {
    fn len(&mut self) -> SearchResult<usize> {
        Ok(self.char_count())
    }

    fn char_at(&mut self, index: usize) -> SearchResult<char> {
        let len = self.char_count();
        if index >= len {
            return Err(SearchError::OutOfBounds { index, len });
        }
        let start = self.byte_offset(index);
        self.text[start..]
            .chars()
            .next()
            .ok_or(SearchError::OutOfBounds { index, len })
    }

    fn substring(&mut self, offset: usize, len: usize) -> SearchResult<String> {
        let start = self.byte_offset(offset);
        let end = self.byte_offset(offset.saturating_add(len));
        Ok(self.text[start..end].to_string())
    }

    fn as_str(&self) -> Option<&str> {
        Some(&self.text)
    }
}

/// Sizing and decoding options for [`BufferedFileView`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewOptions {
    /// Chars per buffer
    pub buffer_size: usize,
    /// Buffers kept resident
    pub buffer_count: usize,
    pub encoding_mode: EncodingMode,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            buffer_count: default_buffer_count(),
            encoding_mode: EncodingMode::default(),
        }
    }
}

impl ViewOptions {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            buffer_size: config.buffer_size.max(1),
            buffer_count: config.buffer_count.max(1),
            encoding_mode: config.encoding_mode,
        }
    }

    /// Upper bound on the chars a view may hold at once
    pub fn max_resident_chars(&self) -> usize {
        self.buffer_size * self.buffer_count
    }
}

#[derive(Debug)]
struct Buffer {
    start: usize,
    chars: Vec<char>,
}

impl Buffer {
    fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.start + self.chars.len()
    }
}

/// Lazily decoded, bounded-memory view over a file
pub struct BufferedFileView {
    file: FileRef,
    label: String,
    options: ViewOptions,
    // Arena of at most `buffer_count` buffers
    buffers: Vec<Buffer>,
    // Arena indexes, most recently used first
    mru: Vec<usize>,
    stream: Option<DecodedStream>,
    // Chars consumed from `stream`
    stream_pos: usize,
    length: Option<usize>,
    failure: Option<(FailureKind, String)>,
    opens: usize,
    metrics: ScanMetrics,
}

impl BufferedFileView {
    pub fn new(file: FileRef, options: ViewOptions, metrics: ScanMetrics) -> Self {
        let label = file.label();
        Self {
            file,
            label,
            options: ViewOptions {
                buffer_size: options.buffer_size.max(1),
                buffer_count: options.buffer_count.max(1),
                ..options
            },
            buffers: Vec::with_capacity(options.buffer_count.max(1)),
            mru: Vec::with_capacity(options.buffer_count.max(1)),
            stream: None,
            stream_pos: 0,
            length: None,
            failure: None,
            opens: 0,
            metrics,
        }
    }

    pub fn file(&self) -> &FileRef {
        &self.file
    }

    /// Chars currently held in buffers
    pub fn resident_chars(&self) -> usize {
        self.buffers.iter().map(|b| b.chars.len()).sum()
    }

    /// Number of times the underlying stream was opened
    pub fn stream_opens(&self) -> usize {
        self.opens
    }

    /// Starts the view on a stream that is already positioned at char 0
    pub fn with_stream(mut self, stream: DecodedStream) -> Self {
        self.metrics.record_stream_open(false);
        self.opens = 1;
        self.stream = Some(stream);
        self.stream_pos = 0;
        self
    }

    fn check(&self) -> SearchResult<()> {
        match &self.failure {
            Some((kind, reason)) => Err(SearchError::ViewFailed {
                file: self.label.clone(),
                kind: *kind,
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Records the first failure; the view is unusable afterwards
    fn fail(&mut self, err: SearchError) -> SearchError {
        if self.failure.is_none() {
            debug!("Content view for {} failed: {}", self.label, err);
            self.failure = Some((err.failure_kind(), err.to_string()));
            self.stream = None;
        }
        err
    }

    fn promote(&mut self, position: usize) {
        if position > 0 {
            let slot = self.mru.remove(position);
            self.mru.insert(0, slot);
        }
    }

    fn lookup(&mut self, index: usize) -> Option<usize> {
        let position = self
            .mru
            .iter()
            .position(|&slot| self.buffers[slot].contains(index))?;
        self.promote(position);
        Some(self.mru[0])
    }

    /// Loads the buffer-aligned block holding `index`, evicting the least
    /// recently used buffer when the ring is full
    fn load(&mut self, index: usize) -> SearchResult<usize> {
        match self.fill(index) {
            Ok(slot) => Ok(slot),
            Err(err @ SearchError::OutOfBounds { .. }) => Err(err),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn fill(&mut self, index: usize) -> SearchResult<usize> {
        let size = self.options.buffer_size;
        let start = index / size * size;
        if let Some(len) = self.length {
            if start >= len && len > 0 {
                return Err(SearchError::OutOfBounds { index, len });
            }
        }

        let slot = if self.buffers.len() < self.options.buffer_count {
            self.buffers.push(Buffer {
                start: 0,
                chars: Vec::with_capacity(size),
            });
            self.metrics
                .record_allocation((size * size_of::<char>()) as u64);
            self.mru.push(self.buffers.len() - 1);
            self.buffers.len() - 1
        } else {
            // Least recently used
            self.mru[self.mru.len() - 1]
        };
        self.buffers[slot].chars.clear();

        if self.stream.is_none() || self.stream_pos > start {
            trace!("Opening stream for {} at char {}", self.label, start);
            let stream = DecodedStream::open(self.file.as_ref(), self.options.encoding_mode)?;
            self.metrics.record_stream_open(self.opens > 0);
            self.opens += 1;
            self.stream = Some(stream);
            self.stream_pos = 0;
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(SearchError::OutOfBounds { index, len: 0 });
        };

        let gap = start - self.stream_pos;
        let skipped = stream.skip_chars(gap)?;
        self.stream_pos += skipped;
        if skipped < gap {
            self.length = Some(self.stream_pos);
            return Err(SearchError::OutOfBounds {
                index,
                len: self.stream_pos,
            });
        }

        let buffer = &mut self.buffers[slot];
        buffer.start = start;
        let read = stream.read_chars(&mut buffer.chars, size)?;
        self.stream_pos += read;
        if read < size {
            self.length = Some(start + read);
        }
        self.metrics.record_buffer_fill();

        let position = self.mru.iter().position(|&s| s == slot).unwrap_or(0);
        self.promote(position);
        Ok(slot)
    }
}

impl CharView for BufferedFileView {
    fn len(&mut self) -> SearchResult<usize> {
        self.check()?;
        while self.length.is_none() {
            let next = self.stream_pos;
            self.load(next)?;
        }
        Ok(self.length.unwrap_or(0))
    }

    fn char_at(&mut self, index: usize) -> SearchResult<char> {
        self.check()?;
        if let Some(len) = self.length {
            if index >= len {
                return Err(SearchError::OutOfBounds { index, len });
            }
        }
        let slot = match self.lookup(index) {
            Some(slot) => slot,
            None => self.load(index)?,
        };
        let buffer = &self.buffers[slot];
        buffer
            .chars
            .get(index - buffer.start)
            .copied()
            .ok_or(SearchError::OutOfBounds {
                index,
                len: buffer.start + buffer.chars.len(),
            })
    }

    fn substring(&mut self, offset: usize, len: usize) -> SearchResult<String> {
        self.check()?;
        let end = offset.saturating_add(len);
        let mut out = String::with_capacity(len.min(self.options.buffer_size));
        let mut index = offset;
        while index < end {
            if self.length.is_some_and(|total| index >= total) {
                break;
            }
            let slot = match self.lookup(index) {
                Some(slot) => slot,
                None => match self.load(index) {
                    Ok(slot) => slot,
                    Err(SearchError::OutOfBounds { .. }) => break,
                    Err(err) => return Err(err),
                },
            };
            let buffer = &self.buffers[slot];
            if !buffer.contains(index) {
                break;
            }
            let from = index - buffer.start;
            let to = buffer.chars.len().min(end - buffer.start);
            out.extend(&buffer.chars[from..to]);
            index = buffer.start + to;
        }
        Ok(out)
    }
}

impl Drop for BufferedFileView {
    fn drop(&mut self) {
        let bytes = self.buffers.len() * self.options.buffer_size * size_of::<char>();
        if bytes > 0 {
            self.metrics.record_deallocation(bytes as u64);
        }
    }
}
