//! Decides whether a file is binary and hands back the content it loaded to
//! decide, so the caller never reads a file twice.
use memchr::memchr;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

use crate::config::EncodingMode;
use crate::content::decode::{
    decode_bytes, read_prefix, read_within, resolve_encoding, DecodedStream,
};
use crate::content::scratch::ScratchPool;
use crate::content::view::{BufferedFileView, CharView, StringView, ViewOptions};
use crate::errors::{SearchError, SearchResult};
use crate::filters::{is_known_text, is_likely_binary};
use crate::metrics::ScanMetrics;
use crate::scope::{FileHandle, FileRef};

/// Content type of a file as far as a [`ContentTypeStrategy`] can tell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Binary,
    Text,
    Unknown,
}

/// Guesses the content type of files too large to inspect cheaply
pub trait ContentTypeStrategy: Send + Sync {
    fn content_type(&self, file: &dyn FileHandle) -> ContentType;
}

/// Guesses from the file extension
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtensionContentType;

impl ContentTypeStrategy for ExtensionContentType {
    fn content_type(&self, file: &dyn FileHandle) -> ContentType {
        let path = file.path().unwrap_or_else(|| Path::new(file.id()));
        if is_likely_binary(path) {
            ContentType::Binary
        } else if is_known_text(path) {
            ContentType::Text
        } else {
            ContentType::Unknown
        }
    }
}

/// Content loaded while classifying
pub enum ContentSource {
    /// The whole file, decoded into memory
    Loaded(StringView),
    /// A lazily decoded view, possibly with its first buffer already loaded
    Buffered(BufferedFileView),
}

impl ContentSource {
    pub fn view(&mut self) -> &mut dyn CharView {
        match self {
            ContentSource::Loaded(view) => view,
            ContentSource::Buffered(view) => view,
        }
    }
}

/// Result of [`ContentClassifier::open`]
pub struct Classified {
    pub binary: bool,
    /// `None` for a binary file nobody asked to keep
    pub source: Option<ContentSource>,
}

pub struct ContentClassifier {
    short_read_threshold: u64,
    options: ViewOptions,
    strategy: Arc<dyn ContentTypeStrategy>,
    scratch: Arc<ScratchPool>,
    metrics: ScanMetrics,
}

impl ContentClassifier {
    pub fn new(
        options: ViewOptions,
        short_read_threshold: u64,
        scratch: Arc<ScratchPool>,
        metrics: ScanMetrics,
    ) -> Self {
        Self {
            short_read_threshold,
            options,
            strategy: Arc::new(ExtensionContentType),
            scratch,
            metrics,
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn ContentTypeStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Whether `file` looks binary
    pub fn is_binary(&self, file: &FileRef) -> SearchResult<bool> {
        Ok(self.open(file, true, |_| false)?.binary)
    }

    /// Loads `file` for searching.
    ///
    /// With `check_binary`, raw bytes are inspected before anything is
    /// decoded. A binary file is loaded only if `keep_binary` says so, and is
    /// then decoded lossily whatever the configured encoding mode.
    pub fn open(
        &self,
        file: &FileRef,
        check_binary: bool,
        keep_binary: impl FnOnce(&FileRef) -> bool,
    ) -> SearchResult<Classified> {
        let label = file.label();
        let encoding = resolve_encoding(&label, file.charset())?;

        let mut scratch = self.scratch.take();
        if read_within(file.as_ref(), self.short_read_threshold, &mut scratch)? {
            self.metrics.record_short_read();
            let binary = check_binary && memchr(0, &scratch).is_some();
            trace!("Short read of {} (binary: {})", label, binary);
            if binary && !keep_binary(file) {
                return Ok(Classified {
                    binary,
                    source: None,
                });
            }
            let text = decode_bytes(&scratch, encoding, self.mode_for(binary), &label)?;
            return Ok(Classified {
                binary,
                source: Some(ContentSource::Loaded(StringView::new(text))),
            });
        }
        drop(scratch);

        self.metrics.record_buffered_file();
        let mut primed: Option<Box<dyn Read + Send>> = None;
        let binary = check_binary
            && match self.strategy.content_type(file.as_ref()) {
                ContentType::Binary => true,
                ContentType::Text => false,
                ContentType::Unknown => {
                    let mut reader = file.open().map_err(|e| SearchError::from_io(&label, e))?;
                    let prefix = read_prefix(&mut reader, self.options.buffer_size, &label)?;
                    let binary = memchr(0, &prefix).is_some();
                    primed = Some(Box::new(Cursor::new(prefix).chain(reader)));
                    binary
                }
            };
        trace!("Buffered view of {} (binary: {})", label, binary);
        if binary && !keep_binary(file) {
            return Ok(Classified {
                binary,
                source: None,
            });
        }

        let options = ViewOptions {
            encoding_mode: self.mode_for(binary),
            ..self.options
        };
        let mut view = BufferedFileView::new(file.clone(), options, self.metrics.clone());
        if let Some(reader) = primed {
            view = view.with_stream(DecodedStream::new(
                reader,
                encoding,
                options.encoding_mode,
                label,
            ));
        }
        Ok(Classified {
            binary,
            source: Some(ContentSource::Buffered(view)),
        })
    }

    fn mode_for(&self, binary: bool) -> EncodingMode {
        if binary {
            EncodingMode::Lossy
        } else {
            self.options.encoding_mode
        }
    }
}
