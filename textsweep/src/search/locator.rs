//! Pattern compilation and match enumeration over character views.
//!
//! The `regex` crate needs contiguous text, so views that are not held in
//! memory are scanned window by window. Each window carries one char of
//! look-behind and `overlap` chars of look-ahead so that `\b`, `^` and `$`
//! see the same neighbours they would see in the full text. Matches of up to
//! `overlap` chars are found exactly as in a single pass; a longer match that
//! straddles a window edge is cut at `window + overlap` chars or not seen.
use regex::{Regex, RegexBuilder};
use tracing::trace;

use crate::config::{default_regex_size_limit, SearchConfig};
use crate::content::{CharView, ViewOptions};
use crate::errors::{SearchError, SearchResult};
use crate::search::worker::CancellationToken;

/// How a pattern source is turned into a regex
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternOptions {
    /// Treat the source as literal text
    pub fixed_strings: bool,
    pub case_sensitive: bool,
    /// Only match whole words
    pub whole_word: bool,
    /// Compiled program size limit in bytes
    pub size_limit: usize,
}

impl Default for PatternOptions {
    fn default() -> Self {
        Self {
            fixed_strings: false,
            case_sensitive: true,
            whole_word: false,
            size_limit: default_regex_size_limit(),
        }
    }
}

impl PatternOptions {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            fixed_strings: config.fixed_strings,
            case_sensitive: config.case_sensitive,
            whole_word: config.whole_word,
            size_limit: config.regex_size_limit,
        }
    }
}

/// A compiled search pattern. An empty source compiles to no regex at all.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    source: String,
    regex: Option<Regex>,
}

impl CompiledPattern {
    pub fn new(source: &str, options: &PatternOptions) -> SearchResult<Self> {
        if source.is_empty() {
            return Ok(Self::empty());
        }

        let mut expr = if options.fixed_strings {
            regex::escape(source)
        } else {
            source.to_string()
        };
        if options.whole_word {
            expr = format!(r"\b(?:{})\b", expr);
        }

        let regex = RegexBuilder::new(&expr)
            .case_insensitive(!options.case_sensitive)
            .multi_line(true)
            .size_limit(options.size_limit)
            .build()
            .map_err(|e| match e {
                regex::Error::CompiledTooBig(limit) => SearchError::pattern_too_complex(format!(
                    "'{}' exceeds the compiled size limit of {} bytes",
                    source, limit
                )),
                other => SearchError::invalid_pattern(other.to_string()),
            })?;

        Ok(Self {
            source: source.to_string(),
            regex: Some(regex),
        })
    }

    /// Compiles `source` as a case-sensitive regex
    pub fn regex(source: &str) -> SearchResult<Self> {
        Self::new(source, &PatternOptions::default())
    }

    /// Compiles `source` as case-sensitive literal text
    pub fn literal(source: &str) -> SearchResult<Self> {
        Self::new(
            source,
            &PatternOptions {
                fixed_strings: true,
                ..PatternOptions::default()
            },
        )
    }

    /// A pattern that reports files without scanning them
    pub fn empty() -> Self {
        Self {
            source: String::new(),
            regex: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.regex.is_none()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn compiled(&self) -> Option<&Regex> {
        self.regex.as_ref()
    }
}

/// A match position in chars
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatedMatch {
    pub offset: usize,
    pub length: usize,
}

/// Receives matches as they are found
pub trait LocateSink {
    /// Returns false to stop the enumeration
    fn accept(&mut self, found: LocatedMatch) -> bool;
}

/// Collects matches in encounter order, optionally up to a limit
#[derive(Debug, Default)]
pub struct MatchCollector {
    matches: Vec<LocatedMatch>,
    limit: Option<usize>,
}

impl MatchCollector {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            matches: Vec::new(),
            limit,
        }
    }

    pub fn matches(&self) -> &[LocatedMatch] {
        &self.matches
    }

    pub fn into_matches(self) -> Vec<LocatedMatch> {
        self.matches
    }
}

impl LocateSink for MatchCollector {
    fn accept(&mut self, found: LocatedMatch) -> bool {
        self.matches.push(found);
        self.limit.map_or(true, |limit| self.matches.len() < limit)
    }
}

/// How an enumeration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Located {
    /// Reached the end of the content after this many matches
    Completed(usize),
    /// The sink asked to stop after this many matches
    Stopped(usize),
    /// Cancellation was observed
    Aborted,
}

/// Byte offset just past the char starting at `at`, or `None` at the end
fn next_boundary(text: &str, at: usize) -> Option<usize> {
    text[at..].chars().next().map(|c| at + c.len_utf8())
}

/// Byte offset of char `index`, or the text length past the end
fn byte_offset(text: &str, index: usize) -> usize {
    text.char_indices()
        .nth(index)
        .map_or(text.len(), |(byte, _)| byte)
}

/// Enumerates the non-empty matches of a pattern over a [`CharView`].
///
/// A panic escaping `locate` is treated as a matcher crash and stops the
/// whole search; failures of the view itself must come back as errors.
pub trait Locate: Send + Sync {
    fn locate(
        &self,
        view: &mut dyn CharView,
        pattern: &CompiledPattern,
        sink: &mut dyn LocateSink,
        cancel: &CancellationToken,
    ) -> SearchResult<Located>;
}

/// The regex-backed [`Locate`], scanning windows of a view's buffers
#[derive(Debug, Clone, Copy)]
pub struct MatchLocator {
    window: usize,
    overlap: usize,
}

impl Default for MatchLocator {
    fn default() -> Self {
        Self::for_view(&ViewOptions::default())
    }
}

impl MatchLocator {
    pub fn new(window: usize, overlap: usize) -> Self {
        Self {
            window: window.max(1),
            overlap: overlap.max(1),
        }
    }

    /// Sizes windows to one view buffer with half a buffer of look-ahead
    pub fn for_view(options: &ViewOptions) -> Self {
        Self::new(options.buffer_size, options.buffer_size / 2)
    }
}

impl Locate for MatchLocator {
    fn locate(
        &self,
        view: &mut dyn CharView,
        pattern: &CompiledPattern,
        sink: &mut dyn LocateSink,
        cancel: &CancellationToken,
    ) -> SearchResult<Located> {
        let Some(regex) = pattern.compiled() else {
            return Ok(Located::Completed(0));
        };
        if let Some(text) = view.as_str() {
            return Ok(Self::scan_text(regex, text, sink, cancel));
        }
        self.scan_windows(regex, view, sink, cancel)
    }
}

impl MatchLocator {
    fn scan_text(
        regex: &Regex,
        text: &str,
        sink: &mut dyn LocateSink,
        cancel: &CancellationToken,
    ) -> Located {
        let mut count = 0;
        let mut pos = 0;
        // Char offset of byte `counted`
        let mut chars = 0;
        let mut counted = 0;

        loop {
            if cancel.is_cancelled() {
                return Located::Aborted;
            }
            let Some(m) = regex.find_at(text, pos) else {
                break;
            };
            if m.is_empty() {
                match next_boundary(text, m.end()) {
                    Some(next) => pos = next,
                    None => break,
                }
                continue;
            }

            chars += text[counted..m.start()].chars().count();
            counted = m.start();
            count += 1;
            let found = LocatedMatch {
                offset: chars,
                length: m.as_str().chars().count(),
            };
            if !sink.accept(found) {
                return Located::Stopped(count);
            }
            pos = m.end();
        }
        Located::Completed(count)
    }

    fn scan_windows(
        &self,
        regex: &Regex,
        view: &mut dyn CharView,
        sink: &mut dyn LocateSink,
        cancel: &CancellationToken,
    ) -> SearchResult<Located> {
        let span = self.window + self.overlap;
        let mut count = 0;
        // Char offset where the current window starts
        let mut start = 0;
        // Matches must not start before this char offset
        let mut resume = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(Located::Aborted);
            }

            let context = usize::from(start > 0);
            let text = view.substring(start - context, context + span)?;
            let available = text.chars().count().saturating_sub(context);
            if available == 0 {
                break;
            }
            let at_end = available < span;
            let limit = if at_end { available } else { self.window };
            trace!(
                "Scanning window at char {} ({} chars, final: {})",
                start,
                available,
                at_end
            );

            let mut pos = byte_offset(&text, context + (resume - start));
            let mut counted = byte_offset(&text, context);
            let mut chars = start;
            let mut next_start = start + self.window;

            loop {
                if cancel.is_cancelled() {
                    return Ok(Located::Aborted);
                }
                let Some(m) = regex.find_at(&text, pos) else {
                    break;
                };
                if m.is_empty() {
                    match next_boundary(&text, m.end()) {
                        Some(next) => pos = next,
                        None => break,
                    }
                    continue;
                }

                chars += text[counted..m.start()].chars().count();
                counted = m.start();
                let relative = chars - start;
                if relative >= limit {
                    break;
                }
                if !at_end && m.end() == text.len() && relative > 0 {
                    // May continue past the window; rescan from its start
                    next_start = chars;
                    break;
                }

                let length = m.as_str().chars().count();
                count += 1;
                if !sink.accept(LocatedMatch {
                    offset: chars,
                    length,
                }) {
                    return Ok(Located::Stopped(count));
                }
                resume = chars + length;
                pos = m.end();
            }

            if at_end {
                break;
            }
            start = next_start;
            resume = resume.max(start);
        }
        Ok(Located::Completed(count))
    }
}
