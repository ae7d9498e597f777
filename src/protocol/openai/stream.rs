use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use smallvec::{smallvec, SmallVec};

use super::ResponsesObjectRef;
use crate::error::ChatError;
use crate::protocol::canonical::{CanonicalEvent, ResponseUsage, VendorId};
use crate::stream::adapter::{
    MappedEvents, VendorAdapter, UNKNOWN_ERROR_CODE, UNKNOWN_ERROR_MESSAGE,
};
use crate::stream::sse::is_done_event;
use crate::stream::SseEvent;

/// Responses API stream events the adapter understands.
#[derive(Debug, Clone)]
pub enum OpenAiStreamEvent {
    Created { response: ResponsesObjectRef },
    InProgress { response: ResponsesObjectRef },
    OutputTextDelta { item_id: String, delta: String },
    Completed { response: ResponsesObjectRef },
    Failed { response: ResponsesObjectRef },
    Unhandled { event_type: String },
}

#[derive(Deserialize)]
struct TypeProbe {
    #[serde(rename = "type")]
    event_type: String,
}

#[derive(Deserialize)]
struct ResponseEnvelope {
    response: ResponsesObjectRef,
}

#[derive(Deserialize)]
struct TextDeltaPayload {
    item_id: String,
    #[serde(default)]
    delta: String,
}

/// Parse one Responses API SSE `data:` payload.
///
/// The `type` field is probed first so only known event types are decoded
/// in full; every other type becomes [`OpenAiStreamEvent::Unhandled`].
///
/// # Errors
///
/// Returns [`ChatError::MalformedFrame`] if the payload is not JSON or a
/// known event type is missing its fields.
pub fn parse_openai_stream_event(data: &str) -> Result<OpenAiStreamEvent, ChatError> {
    let probe: TypeProbe = serde_json::from_str(data)
        .map_err(|e| ChatError::MalformedFrame(format!("OpenAI stream event: {e}")))?;
    let malformed =
        |e: serde_json::Error| ChatError::MalformedFrame(format!("{}: {e}", probe.event_type));
    let event = match probe.event_type.as_str() {
        "response.created" => OpenAiStreamEvent::Created {
            response: serde_json::from_str::<ResponseEnvelope>(data).map_err(malformed)?.response,
        },
        "response.in_progress" => OpenAiStreamEvent::InProgress {
            response: serde_json::from_str::<ResponseEnvelope>(data).map_err(malformed)?.response,
        },
        "response.output_text.delta" => {
            let payload: TextDeltaPayload = serde_json::from_str(data).map_err(malformed)?;
            OpenAiStreamEvent::OutputTextDelta {
                item_id: payload.item_id,
                delta: payload.delta,
            }
        }
        "response.completed" => OpenAiStreamEvent::Completed {
            response: serde_json::from_str::<ResponseEnvelope>(data).map_err(malformed)?.response,
        },
        "response.failed" => OpenAiStreamEvent::Failed {
            response: serde_json::from_str::<ResponseEnvelope>(data).map_err(malformed)?.response,
        },
        _ => OpenAiStreamEvent::Unhandled {
            event_type: probe.event_type.clone(),
        },
    };
    Ok(event)
}

/// Turn Responses API SSE frames into native stream events.
pub fn openai_event_stream<S>(frames: S) -> impl Stream<Item = Result<OpenAiStreamEvent, ChatError>> + Send
where
    S: Stream<Item = Result<SseEvent, ChatError>> + Send,
{
    frames.filter_map(|frame| async move {
        match frame {
            Ok(frame) if is_done_event(&frame) => None,
            Ok(frame) => Some(parse_openai_stream_event(&frame.data)),
            Err(err) => Some(Err(err)),
        }
    })
}

/// Maps Responses API events onto the canonical vocabulary.
#[derive(Debug, Default)]
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl VendorAdapter for OpenAiAdapter {
    type NativeEvent = OpenAiStreamEvent;

    fn vendor(&self) -> VendorId {
        VendorId::OpenAi
    }

    fn map_event(&mut self, event: OpenAiStreamEvent) -> MappedEvents {
        match event {
            OpenAiStreamEvent::Created { response } | OpenAiStreamEvent::InProgress { response } => {
                smallvec![CanonicalEvent::ResponseStarted {
                    response_id: response.id
                }]
            }
            OpenAiStreamEvent::OutputTextDelta { item_id, delta } => {
                if delta.is_empty() {
                    return SmallVec::new();
                }
                smallvec![CanonicalEvent::OutputTextDelta {
                    item_id,
                    content: delta,
                }]
            }
            OpenAiStreamEvent::Completed { response } => {
                let usage = response.usage.unwrap_or_default();
                smallvec![CanonicalEvent::ResponseDone {
                    usage: ResponseUsage::from_counts(
                        usage.input_tokens,
                        usage.output_tokens,
                        usage.total_tokens,
                    ),
                }]
            }
            OpenAiStreamEvent::Failed { response } => {
                let error = response.error.unwrap_or_default();
                smallvec![CanonicalEvent::ResponseError {
                    code: error
                        .code
                        .filter(|code| !code.is_empty())
                        .unwrap_or_else(|| UNKNOWN_ERROR_CODE.to_string()),
                    message: error
                        .message
                        .filter(|message| !message.is_empty())
                        .unwrap_or_else(|| UNKNOWN_ERROR_MESSAGE.to_string()),
                }]
            }
            OpenAiStreamEvent::Unhandled { event_type } => {
                tracing::warn!(event_type = %event_type, "unhandled OpenAI response stream event");
                SmallVec::new()
            }
        }
    }
}
