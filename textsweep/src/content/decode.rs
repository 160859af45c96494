//! Charset decoding for file content.
//!
//! All decoders strip a leading byte-order mark of the declared encoding, so a
//! UTF-8 file that starts with `EF BB BF` decodes the same whether it went
//! through a one-shot decode or the streamed path.
use encoding_rs::{CoderResult, Decoder, DecoderResult, Encoding};
use std::io::{ErrorKind, Read};
use tracing::warn;

use crate::config::EncodingMode;
use crate::errors::{SearchError, SearchResult};
use crate::scope::FileHandle;

const READ_CHUNK: usize = 8192;

/// Looks up the encoding for a charset label
pub fn resolve_encoding(file: &str, charset: &str) -> SearchResult<&'static Encoding> {
    Encoding::for_label(charset.trim().as_bytes())
        .ok_or_else(|| SearchError::unknown_charset(file, charset))
}

/// Decodes `src` into `dst`; returns whether replacement characters were produced
fn decode_into(
    decoder: &mut Decoder,
    mut src: &[u8],
    dst: &mut String,
    last: bool,
    mode: EncodingMode,
    file: &str,
) -> SearchResult<bool> {
    let mut replaced = false;
    loop {
        match mode {
            EncodingMode::FailFast => {
                let needed = decoder
                    .max_utf8_buffer_length_without_replacement(src.len())
                    .unwrap_or(src.len() * 3 + 16);
                dst.reserve(needed);
                let (result, read) =
                    decoder.decode_to_string_without_replacement(src, dst, last);
                src = &src[read..];
                match result {
                    DecoderResult::InputEmpty => return Ok(false),
                    DecoderResult::OutputFull => continue,
                    DecoderResult::Malformed(_, _) => {
                        return Err(SearchError::decode(
                            file,
                            decoder.encoding().name(),
                            "malformed byte sequence",
                        ))
                    }
                }
            }
            EncodingMode::Lossy => {
                let needed = decoder
                    .max_utf8_buffer_length(src.len())
                    .unwrap_or(src.len() * 3 + 16);
                dst.reserve(needed);
                let (result, read, had_replacements) = decoder.decode_to_string(src, dst, last);
                replaced |= had_replacements;
                src = &src[read..];
                match result {
                    CoderResult::InputEmpty => return Ok(replaced),
                    CoderResult::OutputFull => continue,
                }
            }
        }
    }
}

/// Decodes a complete byte slice in one go
pub fn decode_bytes(
    bytes: &[u8],
    encoding: &'static Encoding,
    mode: EncodingMode,
    file: &str,
) -> SearchResult<String> {
    let mut decoder = encoding.new_decoder_with_bom_removal();
    let mut text = String::new();
    if decode_into(&mut decoder, bytes, &mut text, true, mode, file)? {
        warn!("Invalid {} replaced in file: {}", encoding.name(), file);
    }
    Ok(text)
}

/// Reads the raw bytes of `file` into `scratch` when they fit within
/// `threshold`; returns `false` for a larger file.
///
/// `scratch` is cleared first and left holding at most `threshold + 1` bytes.
/// When the size is known up front the buffer is sized exactly, so it does not
/// grow past what the scratch pool will take back.
pub fn read_within(
    file: &dyn FileHandle,
    threshold: u64,
    scratch: &mut Vec<u8>,
) -> SearchResult<bool> {
    let label = file.label();
    let hint = file.byte_len();
    if hint.is_some_and(|len| len > threshold) {
        return Ok(false);
    }

    let limit = threshold.saturating_add(1);
    scratch.clear();
    if let Some(len) = hint {
        scratch.reserve_exact(usize::try_from(len.saturating_add(1).min(limit)).unwrap_or(0));
    }
    let reader = file.open().map_err(|e| SearchError::from_io(&label, e))?;
    reader
        .take(limit)
        .read_to_end(scratch)
        .map_err(|e| SearchError::from_io(&label, e))?;

    Ok(scratch.len() as u64 <= threshold)
}

/// Reads up to `max` bytes from the start of `reader`
pub fn read_prefix<R: Read + ?Sized>(
    reader: &mut R,
    max: usize,
    file: &str,
) -> SearchResult<Vec<u8>> {
    let mut prefix = Vec::with_capacity(max);
    Read::take(&mut *reader, max as u64)
        .read_to_end(&mut prefix)
        .map_err(|e| SearchError::from_io(file, e))?;
    Ok(prefix)
}

/// A forward-only stream of decoded characters over a file's bytes
pub struct DecodedStream {
    reader: Box<dyn Read + Send>,
    decoder: Decoder,
    mode: EncodingMode,
    file: String,
    raw: Vec<u8>,
    pending: String,
    cursor: usize,
    finished: bool,
    warned: bool,
}

impl DecodedStream {
    /// Opens `file` and prepares to decode it with its declared charset
    pub fn open(file: &dyn FileHandle, mode: EncodingMode) -> SearchResult<Self> {
        let label = file.label();
        let encoding = resolve_encoding(&label, file.charset())?;
        let reader = file.open().map_err(|e| SearchError::from_io(&label, e))?;
        Ok(Self::new(reader, encoding, mode, label))
    }

    pub fn new(
        reader: Box<dyn Read + Send>,
        encoding: &'static Encoding,
        mode: EncodingMode,
        file: String,
    ) -> Self {
        Self {
            reader,
            decoder: encoding.new_decoder_with_bom_removal(),
            mode,
            file,
            raw: vec![0; READ_CHUNK],
            pending: String::new(),
            cursor: 0,
            finished: false,
            warned: false,
        }
    }

    /// Makes sure undecoded-but-pending text is available; false at end of stream
    fn fill(&mut self) -> SearchResult<bool> {
        while self.cursor >= self.pending.len() {
            if self.finished {
                return Ok(false);
            }
            self.pending.clear();
            self.cursor = 0;

            let read = loop {
                match self.reader.read(&mut self.raw) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(SearchError::from_io(&self.file, e)),
                }
            };
            let last = read == 0;
            let replaced = decode_into(
                &mut self.decoder,
                &self.raw[..read],
                &mut self.pending,
                last,
                self.mode,
                &self.file,
            )?;
            if replaced && !self.warned {
                warn!("Invalid byte sequences replaced in file: {}", self.file);
                self.warned = true;
            }
            if last {
                self.finished = true;
            }
        }
        Ok(true)
    }

    /// Consumes up to `max` chars, handing each to `visit`
    fn advance(&mut self, max: usize, mut visit: impl FnMut(char)) -> SearchResult<usize> {
        let mut count = 0;
        while count < max && self.fill()? {
            let mut consumed = self.pending.len() - self.cursor;
            for (i, ch) in self.pending[self.cursor..].char_indices() {
                if count == max {
                    consumed = i;
                    break;
                }
                visit(ch);
                count += 1;
            }
            self.cursor += consumed;
        }
        Ok(count)
    }

    /// Appends up to `max` chars to `out`; fewer means end of stream
    pub fn read_chars(&mut self, out: &mut Vec<char>, max: usize) -> SearchResult<usize> {
        self.advance(max, |ch| out.push(ch))
    }

    /// Discards up to `n` chars; fewer means end of stream
    pub fn skip_chars(&mut self, n: usize) -> SearchResult<usize> {
        self.advance(n, |_| {})
    }

    /// Decodes the rest of the stream into a string
    pub fn read_to_string(&mut self) -> SearchResult<String> {
        let mut text = String::new();
        while self.fill()? {
            text.push_str(&self.pending[self.cursor..]);
            self.cursor = self.pending.len();
        }
        Ok(text)
    }
}
