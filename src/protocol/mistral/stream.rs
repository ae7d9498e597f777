use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use smallvec::{smallvec, SmallVec};

use super::ConversationUsage;
use crate::error::ChatError;
use crate::protocol::canonical::{CanonicalEvent, ResponseUsage, VendorId};
use crate::stream::adapter::{
    MappedEvents, VendorAdapter, UNKNOWN_ERROR_CODE, UNKNOWN_ERROR_MESSAGE,
};
use crate::stream::SseEvent;

/// Conversations API stream events the adapter understands.
#[derive(Debug, Clone)]
pub enum MistralStreamEvent {
    ResponseStarted { conversation_id: String },
    OutputDelta { id: String, content: String },
    ResponseDone { usage: ConversationUsage },
    ResponseError { code: String, message: String },
    Unhandled { event_type: String },
}

#[derive(Deserialize)]
struct TypeProbe {
    #[serde(rename = "type")]
    event_type: String,
}

#[derive(Deserialize)]
struct StartedPayload {
    conversation_id: String,
}

#[derive(Deserialize)]
struct DeltaPayload {
    id: String,
    #[serde(default)]
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct DonePayload {
    #[serde(default)]
    usage: Option<ConversationUsage>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: serde_json::Value,
}

/// Text of a delta's content: strings pass through, anything else is sent
/// on as its JSON text.
fn delta_text(content: serde_json::Value) -> String {
    match content {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Mistral error codes are numeric on the wire.
fn error_code(code: serde_json::Value) -> String {
    match code {
        serde_json::Value::String(code) => code,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parse one Conversations API SSE `data:` payload.
///
/// # Errors
///
/// Returns [`ChatError::MalformedFrame`] if the payload is not JSON or a
/// known event type is missing its fields.
pub fn parse_mistral_stream_event(data: &str) -> Result<MistralStreamEvent, ChatError> {
    let probe: TypeProbe = serde_json::from_str(data)
        .map_err(|e| ChatError::MalformedFrame(format!("Mistral stream event: {e}")))?;
    let malformed =
        |e: serde_json::Error| ChatError::MalformedFrame(format!("{}: {e}", probe.event_type));
    let event = match probe.event_type.as_str() {
        "conversation.response.started" => {
            let payload: StartedPayload = serde_json::from_str(data).map_err(malformed)?;
            MistralStreamEvent::ResponseStarted {
                conversation_id: payload.conversation_id,
            }
        }
        "message.output.delta" => {
            let payload: DeltaPayload = serde_json::from_str(data).map_err(malformed)?;
            MistralStreamEvent::OutputDelta {
                id: payload.id,
                content: delta_text(payload.content),
            }
        }
        "conversation.response.done" => {
            let payload: DonePayload = serde_json::from_str(data).map_err(malformed)?;
            MistralStreamEvent::ResponseDone {
                usage: payload.usage.unwrap_or_default(),
            }
        }
        "conversation.response.error" => {
            let payload: ErrorPayload = serde_json::from_str(data).map_err(malformed)?;
            MistralStreamEvent::ResponseError {
                code: error_code(payload.code),
                message: payload.message,
            }
        }
        _ => MistralStreamEvent::Unhandled {
            event_type: probe.event_type.clone(),
        },
    };
    Ok(event)
}

/// Turn Conversations API SSE frames into native stream events.
pub fn mistral_event_stream<S>(frames: S) -> impl Stream<Item = Result<MistralStreamEvent, ChatError>> + Send
where
    S: Stream<Item = Result<SseEvent, ChatError>> + Send,
{
    frames.map(|frame| frame.and_then(|frame| parse_mistral_stream_event(&frame.data)))
}

/// Maps Conversations API events onto the canonical vocabulary.
///
/// For a stored conversation, the first time a conversation id shows up that
/// differs from the one the request continued, a `conversation.created`
/// event precedes `response.started`. Mistral forgets unstored
/// conversations, so their ids are never announced.
#[derive(Debug, Default)]
pub struct MistralAdapter {
    conversation_id: Option<String>,
    stored: bool,
}

impl MistralAdapter {
    #[must_use]
    pub fn new(conversation_id: Option<String>, stored: bool) -> Self {
        Self {
            conversation_id,
            stored,
        }
    }
}

impl VendorAdapter for MistralAdapter {
    type NativeEvent = MistralStreamEvent;

    fn vendor(&self) -> VendorId {
        VendorId::Mistral
    }

    fn map_event(&mut self, event: MistralStreamEvent) -> MappedEvents {
        match event {
            MistralStreamEvent::ResponseStarted { conversation_id } => {
                let started = CanonicalEvent::ResponseStarted {
                    response_id: conversation_id.clone(),
                };
                if !self.stored
                    || self.conversation_id.as_deref() == Some(conversation_id.as_str())
                {
                    return smallvec![started];
                }
                self.conversation_id = Some(conversation_id.clone());
                smallvec![
                    CanonicalEvent::ConversationCreated { conversation_id },
                    started
                ]
            }
            MistralStreamEvent::OutputDelta { id, content } => {
                if content.is_empty() {
                    return SmallVec::new();
                }
                smallvec![CanonicalEvent::OutputTextDelta {
                    item_id: id,
                    content,
                }]
            }
            MistralStreamEvent::ResponseDone { usage } => smallvec![CanonicalEvent::ResponseDone {
                usage: ResponseUsage::from_counts(
                    usage.prompt_tokens,
                    usage.completion_tokens,
                    usage.total_tokens,
                ),
            }],
            MistralStreamEvent::ResponseError { code, message } => {
                smallvec![CanonicalEvent::ResponseError {
                    code: if code.is_empty() {
                        UNKNOWN_ERROR_CODE.to_string()
                    } else {
                        code
                    },
                    message: if message.is_empty() {
                        UNKNOWN_ERROR_MESSAGE.to_string()
                    } else {
                        message
                    },
                }]
            }
            MistralStreamEvent::Unhandled { event_type } => {
                tracing::warn!(event_type = %event_type, "unhandled Mistral conversation stream event");
                SmallVec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(adapter: &mut MistralAdapter, data: &str) -> MappedEvents {
        adapter.map_event(parse_mistral_stream_event(data).unwrap())
    }

    #[test]
    fn test_started_announces_new_conversation() {
        let mut adapter = MistralAdapter::new(None, true);
        let events = map(
            &mut adapter,
            r#"{"type":"conversation.response.started","conversation_id":"conv_1","created_at":"2025-01-01T00:00:00Z"}"#,
        );
        assert_eq!(
            events.as_slice(),
            [
                CanonicalEvent::ConversationCreated {
                    conversation_id: "conv_1".to_string()
                },
                CanonicalEvent::ResponseStarted {
                    response_id: "conv_1".to_string()
                }
            ]
        );
    }

    #[test]
    fn test_started_on_known_conversation_only_starts_response() {
        let mut adapter = MistralAdapter::new(Some("conv_1".to_string()), true);
        let events = map(
            &mut adapter,
            r#"{"type":"conversation.response.started","conversation_id":"conv_1"}"#,
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "response.started");
    }

    #[test]
    fn test_unstored_conversation_is_not_announced() {
        let mut adapter = MistralAdapter::new(None, false);
        let events = map(
            &mut adapter,
            r#"{"type":"conversation.response.started","conversation_id":"conv_2"}"#,
        );
        assert_eq!(
            events.as_slice(),
            [CanonicalEvent::ResponseStarted {
                response_id: "conv_2".to_string()
            }]
        );
    }

    #[test]
    fn test_string_delta() {
        let mut adapter = MistralAdapter::default();
        let events = map(
            &mut adapter,
            r#"{"type":"message.output.delta","id":"msg_1","content":"Hei","output_index":0,"role":"assistant"}"#,
        );
        assert_eq!(
            events.as_slice(),
            [CanonicalEvent::OutputTextDelta {
                item_id: "msg_1".to_string(),
                content: "Hei".to_string()
            }]
        );
    }

    #[test]
    fn test_structured_delta_is_forwarded_as_json() {
        let mut adapter = MistralAdapter::default();
        let events = map(
            &mut adapter,
            r#"{"type":"message.output.delta","id":"msg_1","content":{"type":"tool_reference","tool":"web_search"}}"#,
        );
        match &events[0] {
            CanonicalEvent::OutputTextDelta { content, .. } => {
                let value: serde_json::Value = serde_json::from_str(content).unwrap();
                assert_eq!(value["tool"], "web_search");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_done_maps_prompt_and_completion_tokens() {
        let mut adapter = MistralAdapter::default();
        let events = map(
            &mut adapter,
            r#"{"type":"conversation.response.done","usage":{"prompt_tokens":3,"completion_tokens":4,"total_tokens":7}}"#,
        );
        assert_eq!(
            events.as_slice(),
            [CanonicalEvent::ResponseDone {
                usage: ResponseUsage {
                    input_tokens: 3,
                    output_tokens: 4,
                    total_tokens: 7
                }
            }]
        );
    }

    #[test]
    fn test_done_without_usage_defaults_to_zero() {
        let mut adapter = MistralAdapter::default();
        let events = map(&mut adapter, r#"{"type":"conversation.response.done"}"#);
        assert_eq!(
            events.as_slice(),
            [CanonicalEvent::ResponseDone {
                usage: ResponseUsage::default()
            }]
        );
    }

    #[test]
    fn test_numeric_error_code_is_stringified() {
        let mut adapter = MistralAdapter::default();
        let events = map(
            &mut adapter,
            r#"{"type":"conversation.response.error","message":"Rate limit exceeded","code":1300}"#,
        );
        assert_eq!(
            events.as_slice(),
            [CanonicalEvent::ResponseError {
                code: "1300".to_string(),
                message: "Rate limit exceeded".to_string()
            }]
        );
    }

    #[test]
    fn test_error_without_code_or_message_uses_defaults() {
        let mut adapter = MistralAdapter::default();
        let events = map(&mut adapter, r#"{"type":"conversation.response.error"}"#);
        assert_eq!(
            events.as_slice(),
            [CanonicalEvent::ResponseError {
                code: UNKNOWN_ERROR_CODE.to_string(),
                message: UNKNOWN_ERROR_MESSAGE.to_string()
            }]
        );
    }

    #[test]
    fn test_unhandled_event_is_dropped() {
        let mut adapter = MistralAdapter::default();
        let events = map(
            &mut adapter,
            r#"{"type":"tool.execution.started","name":"web_search"}"#,
        );
        assert!(events.is_empty());
    }
}
