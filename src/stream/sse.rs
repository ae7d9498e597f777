/// SSE (Server-Sent Events) frame parser, encoder, and stream utilities.
///
/// Handles the low-level parsing of SSE frames from a byte stream,
/// including buffering partial lines and handling field semantics per the
/// [SSE standard](https://html.spec.whatwg.org/multipage/server-sent-events.html).
use super::SseEvent;
use crate::error::ChatError;
use futures_util::Stream;
use memchr::memchr_iter;

// ---------------------------------------------------------------------------
// SseParser: incremental SSE line parser
// ---------------------------------------------------------------------------

/// Incremental SSE line parser.
///
/// Feed it raw text chunks (potentially arriving in arbitrary byte
/// boundaries) and it yields fully-assembled [`SseEvent`] frames. Any
/// unterminated tail is kept and completed by the next chunk.
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
    last_event_id: Option<String>,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            event_type: None,
            data_buffer: String::new(),
            has_data: false,
            last_event_id: None,
        }
    }

    /// Feed raw text and return any complete events parsed.
    ///
    /// SSE rules:
    /// - Lines starting with `event:` set the event type for the next frame
    /// - Lines starting with `data:` append to the data buffer (strip one
    ///   leading space after the colon)
    /// - Empty lines terminate a frame, which is emitted and reset
    /// - Lines starting with `:` are comments, ignored
    /// - `id:` sets the last event ID
    /// - Multiple `data:` lines are joined with `\n`
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete events into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let bytes = self.buffer.as_bytes();
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                &mut self.last_event_id,
                out,
            );
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Whether a frame has been started but not yet terminated by a blank line.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.read_offset < self.buffer.len() || self.has_data || self.event_type.is_some()
    }

    fn process_line(
        line: &str,
        event_type: &mut Option<String>,
        data_buffer: &mut String,
        has_data: &mut bool,
        last_event_id: &mut Option<String>,
        events: &mut Vec<SseEvent>,
    ) {
        if line.is_empty() {
            // Empty line = dispatch event
            if *has_data {
                events.push(SseEvent {
                    event: event_type.take(),
                    data: std::mem::take(data_buffer),
                    id: last_event_id.clone(),
                });
                *has_data = false;
            } else {
                *event_type = None;
            }
            return;
        }

        // comment
        if line.starts_with(':') {
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if *has_data {
                data_buffer.push('\n');
            } else {
                *has_data = true;
            }
            data_buffer.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            *event_type = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            *last_event_id = Some(value.to_string());
        }
        // `retry:` and unknown field names are ignored
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// UTF-8 reassembly
// ---------------------------------------------------------------------------

/// Reassembles UTF-8 text from byte chunks that may split a multi-byte
/// sequence at an arbitrary boundary.
#[derive(Default)]
pub struct Utf8Reassembler {
    remainder: Vec<u8>,
}

impl Utf8Reassembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk and hand the longest complete UTF-8 prefix to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::MalformedFrame`] when the bytes are not UTF-8 (as
    /// opposed to merely incomplete).
    pub fn push<F>(&mut self, bytes: &[u8], sink: F) -> Result<(), ChatError>
    where
        F: FnOnce(&str),
    {
        if self.remainder.is_empty() {
            return match std::str::from_utf8(bytes) {
                Ok(text) => {
                    sink(text);
                    Ok(())
                }
                Err(e) => {
                    if e.error_len().is_some() {
                        return Err(invalid_utf8());
                    }
                    let valid_up_to = e.valid_up_to();
                    // Safety: valid_up_to is guaranteed to be a valid UTF-8 boundary.
                    let text = unsafe { std::str::from_utf8_unchecked(&bytes[..valid_up_to]) };
                    sink(text);
                    self.remainder.extend_from_slice(&bytes[valid_up_to..]);
                    Ok(())
                }
            };
        }

        self.remainder.extend_from_slice(bytes);
        match std::str::from_utf8(&self.remainder) {
            Ok(text) => {
                sink(text);
                self.remainder.clear();
                Ok(())
            }
            Err(e) => {
                if e.error_len().is_some() {
                    return Err(invalid_utf8());
                }
                let valid_up_to = e.valid_up_to();
                // Safety: valid_up_to is guaranteed to be a valid UTF-8 boundary.
                let text = unsafe { std::str::from_utf8_unchecked(&self.remainder[..valid_up_to]) };
                sink(text);
                self.remainder.drain(..valid_up_to);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.remainder.is_empty()
    }
}

fn invalid_utf8() -> ChatError {
    ChatError::MalformedFrame("stream contains invalid UTF-8".to_string())
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

/// Format a frame with a named event type and a single-line data payload:
/// `event: {event}\ndata: {data}\n\n`.
#[must_use]
pub fn named_sse_frame(event_type: &str, data: &str) -> String {
    let mut out = String::with_capacity(18 + event_type.len() + data.len());
    out.push_str("event: ");
    out.push_str(event_type);
    out.push('\n');
    out.push_str("data: ");
    out.push_str(data);
    out.push_str("\n\n");
    out
}

/// Check if an [`SseEvent`] is an OpenAI-style `[DONE]` sentinel.
#[must_use]
pub fn is_done_event(event: &SseEvent) -> bool {
    event.data.trim() == "[DONE]"
}

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

/// Split a byte stream into SSE events using [`SseParser`].
///
/// Bytes arriving from an HTTP response body are decoded as UTF-8,
/// fed into the parser, and complete [`SseEvent`] frames are yielded.
/// A transport error or invalid UTF-8 is yielded once and ends the stream.
pub fn sse_frame_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseEvent, ChatError>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    use futures_util::StreamExt;
    use std::collections::VecDeque;

    futures_util::stream::unfold(
        (
            Box::pin(byte_stream),
            SseParser::new(),
            Utf8Reassembler::new(),
            VecDeque::<SseEvent>::with_capacity(8),
            false,
        ),
        |(mut stream, mut parser, mut utf8, mut pending, failed)| async move {
            if failed {
                return None;
            }
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((Ok(event), (stream, parser, utf8, pending, false)));
                }

                let chunk = match stream.as_mut().next().await? {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let err = ChatError::Transport(format!("stream read failed: {e}"));
                        return Some((Err(err), (stream, parser, utf8, pending, true)));
                    }
                };
                let mut parsed = Vec::new();
                if let Err(err) = utf8.push(&chunk, |text| parser.feed_into(text, &mut parsed)) {
                    return Some((Err(err), (stream, parser, utf8, pending, true)));
                }
                pending.extend(parsed);
            }
        },
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
