//! Decoding of the server-sent-event stream returned by chat-completions.
//!
//! The endpoint answers a `stream: true` request with lines such as:
//! ```text
//! data: {"choices":[{"index":0,"delta":{"content":"Hel"}}]}
//!
//! data: {"choices":[{"index":0,"delta":{"content":"lo"}}]}
//!
//! data: [DONE]
//! ```
//!
//! Each line is classified on its own by [`decode_line`]. Lines that are not
//! valid JSON or lack `choices[0].delta` are skipped rather than aborting the
//! stream, and [`StreamDecoder`] counts them so they stay visible.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use log::debug;
use serde_json::Value;
use thiserror::Error;

use crate::error::ChatError;

const DATA_FIELD: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// One decoded unit of the response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// An incremental fragment of assistant text. May be empty.
    Delta(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Why a line produced no chunk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("blank line")]
    Blank,
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
    #[error("payload is not JSON: {0}")]
    Malformed(String),
    #[error("payload has no choices[0].delta")]
    MissingDelta,
}

/// Classifies a single raw line.
pub fn decode_line(raw: &[u8]) -> Result<StreamChunk, SkipReason> {
    let line = std::str::from_utf8(raw).map_err(|_| SkipReason::InvalidUtf8)?.trim();
    if line.is_empty() {
        return Err(SkipReason::Blank);
    }

    let payload = match line.strip_prefix(DATA_FIELD) {
        Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
        None => line,
    };
    if payload == DONE_SENTINEL {
        return Ok(StreamChunk::Done);
    }

    let json: Value =
        serde_json::from_str(payload).map_err(|e| SkipReason::Malformed(e.to_string()))?;
    let delta = json
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("delta"))
        .filter(|delta| delta.is_object())
        .ok_or(SkipReason::MissingDelta)?;

    match delta.get("content") {
        None | Some(Value::Null) => Ok(StreamChunk::Delta(String::new())),
        Some(Value::String(text)) => Ok(StreamChunk::Delta(text.clone())),
        Some(_) => Err(SkipReason::MissingDelta),
    }
}

/// Line counters for one decoded stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub lines: usize,
    pub deltas: usize,
    pub blank: usize,
    pub skipped: usize,
}

/// Push-based decoder state for a single response stream.
///
/// Once the sentinel has been seen every further line is refused.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    stats: DecodeStats,
    finished: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line. Returns `None` for skipped lines and for anything
    /// arriving after the sentinel.
    pub fn push_line(&mut self, raw: &[u8]) -> Option<StreamChunk> {
        if self.finished {
            return None;
        }
        self.stats.lines += 1;

        match decode_line(raw) {
            Ok(StreamChunk::Done) => {
                self.finished = true;
                Some(StreamChunk::Done)
            }
            Ok(chunk) => {
                self.stats.deltas += 1;
                Some(chunk)
            }
            Err(SkipReason::Blank) => {
                self.stats.blank += 1;
                None
            }
            Err(reason) => {
                self.stats.skipped += 1;
                debug!("Skipping stream line {}: {}", self.stats.lines, reason);
                None
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }
}

/// Lazy iterator of text deltas over a sequence of lines.
///
/// Pulls one line per step and never pulls past the sentinel.
pub struct Deltas<I> {
    lines: I,
    decoder: StreamDecoder,
}

pub fn deltas<I>(lines: I) -> Deltas<I::IntoIter>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    Deltas {
        lines: lines.into_iter(),
        decoder: StreamDecoder::new(),
    }
}

impl<I> Deltas<I> {
    pub fn stats(&self) -> DecodeStats {
        self.decoder.stats()
    }

    /// True when the stream ended on the sentinel rather than on exhaustion.
    pub fn saw_sentinel(&self) -> bool {
        self.decoder.is_finished()
    }
}

impl<I> Iterator for Deltas<I>
where
    I: Iterator,
    I::Item: AsRef<[u8]>,
{
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while !self.decoder.is_finished() {
            let line = self.lines.next()?;
            match self.decoder.push_line(line.as_ref()) {
                Some(StreamChunk::Delta(text)) => return Some(text),
                Some(StreamChunk::Done) => return None,
                None => continue,
            }
        }
        None
    }
}

/// Splits arbitrary byte chunks into lines, keeping partial lines between
/// chunks. Trailing `\r` is removed.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Returns the unterminated remainder, if any.
    pub fn finish(self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf)
        }
    }
}

/// Turns a response body byte stream into a stream of lines.
///
/// A body error is yielded once and ends the stream.
pub fn split_lines<S, E>(bytes: S) -> impl Stream<Item = Result<Vec<u8>, ChatError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<ChatError> + Send + 'static,
{
    async_stream::stream! {
        let mut bytes = std::pin::pin!(bytes);
        let mut buffer = LineBuffer::new();

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for line in buffer.push(&chunk) {
                        yield Ok(line);
                    }
                }
                Err(e) => {
                    yield Err(e.into());
                    return;
                }
            }
        }

        if let Some(rest) = buffer.finish() {
            yield Ok(rest);
        }
    }
}
