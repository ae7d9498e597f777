//! Canonical wire codec.
//!
//! One canonical event per frame:
//!
//! ```text
//! event: response.output_text.delta
//! data: {"content":"Hel","itemId":"msg_1"}
//!
//! ```

use bytes::Bytes;

use super::sse::{named_sse_frame, SseParser, Utf8Reassembler};
use super::SseEvent;
use crate::error::ChatError;
use crate::protocol::canonical::CanonicalEvent;

/// Encode a canonical event as a wire frame.
///
/// The payload is serialized by `serde_json`, which escapes control
/// characters, so the `data:` line never contains a raw newline.
///
/// # Errors
///
/// Returns [`ChatError::Internal`] if the payload cannot be serialized.
pub fn encode_event(event: &CanonicalEvent) -> Result<String, ChatError> {
    let mut tagged = serde_json::to_value(event)
        .map_err(|e| ChatError::Internal(format!("failed to serialize {}: {e}", event.name())))?;
    let data = tagged
        .get_mut("data")
        .map(serde_json::Value::take)
        .unwrap_or_default();
    Ok(named_sse_frame(event.name(), &data.to_string()))
}

/// [`encode_event`] into a body chunk.
///
/// # Errors
///
/// See [`encode_event`].
pub fn encode_event_bytes(event: &CanonicalEvent) -> Result<Bytes, ChatError> {
    encode_event(event).map(Bytes::from)
}

/// Convert one parsed SSE frame into a canonical event.
///
/// # Errors
///
/// - [`ChatError::MalformedFrame`] when the frame has no event name, the
///   payload is not JSON, or required payload fields are missing.
/// - [`ChatError::UnknownEventType`] when the event name is outside the
///   canonical vocabulary.
pub fn event_from_frame(frame: SseEvent) -> Result<CanonicalEvent, ChatError> {
    let Some(name) = frame.event else {
        return Err(ChatError::MalformedFrame(format!(
            "frame has no event name (data: {})",
            truncate_for_log(&frame.data)
        )));
    };
    if !CanonicalEvent::is_canonical_name(&name) {
        return Err(ChatError::UnknownEventType(name));
    }
    let data: serde_json::Value = serde_json::from_str(&frame.data)
        .map_err(|e| ChatError::MalformedFrame(format!("{name}: payload is not JSON: {e}")))?;
    let mut tagged = serde_json::Map::with_capacity(2);
    tagged.insert("event".to_string(), serde_json::Value::String(name.clone()));
    tagged.insert("data".to_string(), data);
    serde_json::from_value(serde_json::Value::Object(tagged))
        .map_err(|e| ChatError::MalformedFrame(format!("{name}: {e}")))
}

/// Decode every complete frame in `buffer`.
///
/// A trailing incomplete frame is ignored; use [`WireDecoder`] when text
/// arrives in several chunks.
///
/// # Errors
///
/// See [`event_from_frame`].
pub fn decode(buffer: &str) -> Result<Vec<CanonicalEvent>, ChatError> {
    let mut parser = SseParser::new();
    parser
        .feed(buffer)
        .into_iter()
        .map(event_from_frame)
        .collect()
}

/// Incremental decoder for a canonical event stream.
///
/// Carries any unterminated frame (and any split UTF-8 sequence) over to the
/// next chunk, so frames may be split at arbitrary byte boundaries.
#[derive(Default)]
pub struct WireDecoder {
    parser: SseParser,
    utf8: Utf8Reassembler,
    frames: Vec<SseEvent>,
}

impl WireDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a text chunk, returning every event it completes.
    ///
    /// # Errors
    ///
    /// See [`event_from_frame`].
    pub fn decode(&mut self, chunk: &str) -> Result<Vec<CanonicalEvent>, ChatError> {
        let mut out = Vec::new();
        self.decode_into(chunk, &mut out)?;
        Ok(out)
    }

    /// Decode a text chunk into `out`.
    ///
    /// Events preceding a bad frame are still pushed to `out` before the
    /// error is returned, so a caller can apply them in order first.
    ///
    /// # Errors
    ///
    /// See [`event_from_frame`].
    pub fn decode_into(
        &mut self,
        chunk: &str,
        out: &mut Vec<CanonicalEvent>,
    ) -> Result<(), ChatError> {
        self.parser.feed_into(chunk, &mut self.frames);
        self.drain_frames(out)
    }

    /// Decode a byte chunk into `out`.
    ///
    /// # Errors
    ///
    /// Invalid UTF-8 is a [`ChatError::MalformedFrame`]; otherwise see
    /// [`event_from_frame`].
    pub fn decode_bytes_into(
        &mut self,
        chunk: &[u8],
        out: &mut Vec<CanonicalEvent>,
    ) -> Result<(), ChatError> {
        let parser = &mut self.parser;
        let frames = &mut self.frames;
        self.utf8
            .push(chunk, |text| parser.feed_into(text, frames))?;
        self.drain_frames(out)
    }

    /// Signal end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::MalformedFrame`] if a partial frame is still
    /// buffered.
    pub fn finish(&self) -> Result<(), ChatError> {
        if self.parser.has_pending() || self.utf8.has_pending() {
            return Err(ChatError::MalformedFrame(
                "stream ended inside an unterminated frame".to_string(),
            ));
        }
        Ok(())
    }

    fn drain_frames(&mut self, out: &mut Vec<CanonicalEvent>) -> Result<(), ChatError> {
        let mut frames = std::mem::take(&mut self.frames).into_iter();
        for frame in frames.by_ref() {
            match event_from_frame(frame) {
                Ok(event) => out.push(event),
                Err(err) => {
                    // frames after the bad one are dropped with it
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

fn truncate_for_log(text: &str) -> &str {
    const MAX: usize = 64;
    if text.len() <= MAX {
        return text;
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::ResponseUsage;

    fn delta(item_id: &str, content: &str) -> CanonicalEvent {
        CanonicalEvent::OutputTextDelta {
            item_id: item_id.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_encode_delta_frame_shape() {
        let frame = encode_event(&delta("msg_1", "Hel")).unwrap();
        assert_eq!(
            frame,
            "event: response.output_text.delta\ndata: {\"content\":\"Hel\",\"itemId\":\"msg_1\"}\n\n"
        );
    }

    #[test]
    fn test_encode_escapes_newlines() {
        let frame = encode_event(&delta("msg_1", "line1\nline2\r\n")).unwrap();
        assert_eq!(frame.matches('\n').count(), 3);
        assert_eq!(decode(&frame).unwrap(), vec![delta("msg_1", "line1\nline2\r\n")]);
    }

    #[test]
    fn test_encode_done_frame() {
        let frame = encode_event(&CanonicalEvent::ResponseDone {
            usage: ResponseUsage {
                input_tokens: 1,
                output_tokens: 2,
                total_tokens: 3,
            },
        })
        .unwrap();
        assert!(frame.starts_with("event: response.done\ndata: {\"usage\":{"));
        assert!(frame.contains("\"totalTokens\":3"));
    }

    #[test]
    fn test_decode_multiple_frames_in_order() {
        let mut text = encode_event(&CanonicalEvent::ResponseStarted {
            response_id: "r1".to_string(),
        })
        .unwrap();
        text.push_str(&encode_event(&delta("a", "x")).unwrap());
        let events = decode(&text).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            CanonicalEvent::ResponseStarted {
                response_id: "r1".to_string()
            }
        );
    }

    #[test]
    fn test_decode_unknown_event_type_fails_loudly() {
        let err = decode("event: response.reasoning.delta\ndata: {}\n\n").unwrap_err();
        assert!(matches!(err, ChatError::UnknownEventType(name) if name == "response.reasoning.delta"));
    }

    #[test]
    fn test_decode_non_json_payload_is_malformed() {
        let err = decode("event: response.started\ndata: {not json\n\n").unwrap_err();
        assert!(matches!(err, ChatError::MalformedFrame(_)));
    }

    #[test]
    fn test_decode_missing_payload_field_is_malformed() {
        let err = decode("event: response.started\ndata: {\"id\":\"r1\"}\n\n").unwrap_err();
        assert!(matches!(err, ChatError::MalformedFrame(_)));
    }

    #[test]
    fn test_decode_frame_without_event_name_is_malformed() {
        let err = decode("data: {\"responseId\":\"r1\"}\n\n").unwrap_err();
        assert!(matches!(err, ChatError::MalformedFrame(_)));
    }

    #[test]
    fn test_decode_ignores_trailing_partial_frame() {
        let events = decode("event: response.started\ndata: {\"responseId\":\"r1\"}\n\nevent: resp").unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_wire_decoder_carries_partial_frame() {
        let frame = encode_event(&delta("a", "Hello")).unwrap();
        let (head, tail) = frame.split_at(17);
        let mut decoder = WireDecoder::new();
        assert!(decoder.decode(head).unwrap().is_empty());
        assert!(decoder.finish().is_err());
        assert_eq!(decoder.decode(tail).unwrap(), vec![delta("a", "Hello")]);
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn test_wire_decoder_keeps_events_before_bad_frame() {
        let mut text = encode_event(&delta("a", "ok")).unwrap();
        text.push_str("event: bogus\ndata: {}\n\n");
        let mut decoder = WireDecoder::new();
        let mut out = Vec::new();
        let err = decoder.decode_into(&text, &mut out).unwrap_err();
        assert!(matches!(err, ChatError::UnknownEventType(_)));
        assert_eq!(out, vec![delta("a", "ok")]);
    }

    #[test]
    fn test_wire_decoder_bytes_split_inside_multibyte_char() {
        let frame = encode_event(&delta("a", "smørbrød")).unwrap();
        let bytes = frame.as_bytes();
        let split = frame.find('ø').unwrap() + 1;
        let mut decoder = WireDecoder::new();
        let mut out = Vec::new();
        decoder.decode_bytes_into(&bytes[..split], &mut out).unwrap();
        assert!(out.is_empty());
        decoder.decode_bytes_into(&bytes[split..], &mut out).unwrap();
        assert_eq!(out, vec![delta("a", "smørbrød")]);
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundaries() {
        let text = "å".repeat(40);
        let cut = truncate_for_log(&text);
        assert!(cut.len() <= 64);
        assert!(text.starts_with(cut));
    }
}
