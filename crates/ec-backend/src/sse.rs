//! Event-stream parser for streamed chat completions.
//!
//! Turns a raw byte stream into an ordered sequence of incremental text
//! deltas. The wire protocol is one event per line: lines prefixed with
//! `data: ` carry a JSON payload whose text fragment sits at
//! `choices[0].delta.content`, and the payload `[DONE]` marks the logical
//! end of the stream. Chunk boundaries may fall mid-line, mid-payload, or
//! mid-UTF-8 sequence; none of those may corrupt or drop text.

use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// Incremental UTF-8 decoder.
///
/// A multi-byte character split across two reads is held back and completed
/// by the next chunk instead of being decoded in isolation. Invalid (not
/// merely incomplete) sequences decode to U+FFFD.
#[derive(Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn decode(&mut self, chunk: &[u8]) -> String {
        let owned;
        let input: &[u8] = if self.pending.is_empty() {
            chunk
        } else {
            let mut bytes = std::mem::take(&mut self.pending);
            bytes.extend_from_slice(chunk);
            owned = bytes;
            &owned
        };

        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(e) => {
                    out.push_str(&String::from_utf8_lossy(&rest[..e.valid_up_to()]));
                    let after = &rest[e.valid_up_to()..];
                    match e.error_len() {
                        Some(bad) => {
                            out.push('\u{FFFD}');
                            rest = &after[bad..];
                        }
                        None => {
                            // Incomplete trailing sequence: carry to next read
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush bytes still held at end of stream. A sequence that never
    /// completed decodes lossily.
    fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let bytes = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

enum LineOutcome {
    /// A non-empty text fragment was extracted.
    Delta(String),
    /// Comment, blank, non-data, or unrecognized-but-complete payload.
    Skip,
    /// The terminal sentinel was seen.
    Finished,
    /// The payload looks truncated: push the line back and wait for bytes.
    Defer,
}

/// Stream adapter that extracts text deltas from a byte stream.
///
/// Yields each fragment in stream order; the concatenation of all yielded
/// fragments equals the full assistant message once the stream ends.
/// Malformed individual frames never error; only a transport read failure
/// surfaces as `Err`.
pub struct DeltaStream<S> {
    inner: S,
    decoder: Utf8Carry,
    /// Residual text not yet resolved into complete lines.
    buf: String,
    /// Extracted deltas not yet yielded.
    ready: Vec<String>,
    /// Terminal sentinel seen; nothing further is parsed.
    finished: bool,
    /// Underlying transport reported end of stream.
    ended: bool,
    /// Line that failed to parse once and was pushed back. If the identical
    /// line fails again on the next read cycle it is dropped, so a
    /// permanently bad frame cannot stall the stream.
    deferred: Option<String>,
}

impl<S> DeltaStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decoder: Utf8Carry::default(),
            buf: String::new(),
            ready: Vec::new(),
            finished: false,
            ended: false,
            deferred: None,
        }
    }

    /// Consume complete lines from the buffer until it runs dry, the
    /// terminal sentinel is seen, or a truncated payload is pushed back.
    fn drain_lines(&mut self) {
        while !self.finished {
            let Some(nl) = self.buf.find('\n') else { break };
            let mut line: String = self.buf.drain(..=nl).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }

            match self.handle_line(&line, false) {
                LineOutcome::Delta(text) => self.ready.push(text),
                LineOutcome::Skip => {}
                LineOutcome::Finished => self.finished = true,
                LineOutcome::Defer => {
                    let rest = std::mem::take(&mut self.buf);
                    self.buf = format!("{line}\n{rest}");
                    break;
                }
            }
        }
    }

    /// One final pass over whatever the buffer still holds when the
    /// transport ends; the last line may lack a trailing newline. Parse
    /// failures here can never be completed by more bytes, so they are
    /// dropped rather than deferred.
    fn flush_remaining(&mut self) {
        let rest = std::mem::take(&mut self.buf);
        for raw in rest.split('\n') {
            if self.finished {
                break;
            }
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            match self.handle_line(line, true) {
                LineOutcome::Delta(text) => self.ready.push(text),
                LineOutcome::Finished => self.finished = true,
                LineOutcome::Skip | LineOutcome::Defer => {}
            }
        }
        self.deferred = None;
    }

    fn handle_line(&mut self, line: &str, final_pass: bool) -> LineOutcome {
        if line.is_empty() || line.starts_with(':') {
            return LineOutcome::Skip;
        }
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return LineOutcome::Skip;
        };
        let payload = payload.trim();
        if payload == DONE_SENTINEL {
            return LineOutcome::Finished;
        }

        match serde_json::from_str::<Value>(payload) {
            Ok(value) => {
                self.deferred = None;
                match delta_content(&value) {
                    Some(text) if !text.is_empty() => LineOutcome::Delta(text.to_string()),
                    _ => LineOutcome::Skip,
                }
            }
            Err(_) if final_pass => {
                debug!("dropping unparsable frame at end of stream");
                LineOutcome::Skip
            }
            Err(_) => {
                if self.deferred.as_deref() == Some(line) {
                    // Same line failed across two consecutive reads
                    debug!("dropping frame that failed to parse twice");
                    self.deferred = None;
                    LineOutcome::Skip
                } else {
                    self.deferred = Some(line.to_string());
                    LineOutcome::Defer
                }
            }
        }
    }
}

/// Extract the incremental text field from an event payload.
fn delta_content(value: &Value) -> Option<&str> {
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
}

impl<S, E> Stream for DeltaStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<String, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            // Drain extracted deltas before touching the transport
            if !this.ready.is_empty() {
                return Poll::Ready(Some(Ok(this.ready.remove(0))));
            }
            if this.finished || this.ended {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let text = this.decoder.decode(&bytes);
                    this.buf.push_str(&text);
                    this.drain_lines();
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.ended = true;
                    let tail = this.decoder.finish();
                    this.buf.push_str(&tail);
                    this.flush_remaining();
                }
                Poll::Pending => {
                    return Poll::Pending;
                }
            }
        }
    }
}

/// Create a delta stream from a byte stream.
pub fn delta_stream<S, E>(stream: S) -> DeltaStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    DeltaStream::new(stream)
}
