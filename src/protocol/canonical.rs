use serde::{Deserialize, Serialize};
use std::fmt;

pub const CONVERSATION_CREATED: &str = "conversation.created";
pub const RESPONSE_STARTED: &str = "response.started";
pub const RESPONSE_OUTPUT_TEXT_DELTA: &str = "response.output_text.delta";
pub const RESPONSE_DONE: &str = "response.done";
pub const RESPONSE_ERROR: &str = "response.error";

/// Every event name in the canonical vocabulary.
pub const CANONICAL_EVENT_NAMES: [&str; 5] = [
    CONVERSATION_CREATED,
    RESPONSE_STARTED,
    RESPONSE_OUTPUT_TEXT_DELTA,
    RESPONSE_DONE,
    RESPONSE_ERROR,
];

/// Vendors a chat config can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VendorId {
    #[serde(rename = "MISTRAL")]
    Mistral,
    #[serde(rename = "OPENAI")]
    OpenAi,
    #[serde(rename = "OLLAMA")]
    Ollama,
}

impl VendorId {
    pub const ALL: [VendorId; 3] = [VendorId::Mistral, VendorId::OpenAi, VendorId::Ollama];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            VendorId::Mistral => "MISTRAL",
            VendorId::OpenAi => "OPENAI",
            VendorId::Ollama => "OLLAMA",
        }
    }
}

impl fmt::Display for VendorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage reported when a response finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl ResponseUsage {
    /// Build usage from optional vendor counts, defaulting missing ones to 0.
    #[must_use]
    pub fn from_counts(input: Option<u64>, output: Option<u64>, total: Option<u64>) -> Self {
        Self {
            input_tokens: input.unwrap_or(0),
            output_tokens: output.unwrap_or(0),
            total_tokens: total.unwrap_or(0),
        }
    }
}

/// A single vendor-independent streaming update.
///
/// Serialized adjacently tagged, so the `event` tag becomes the SSE event
/// name and `data` becomes the single-line JSON payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum CanonicalEvent {
    #[serde(rename = "conversation.created", rename_all = "camelCase")]
    ConversationCreated { conversation_id: String },
    #[serde(rename = "response.started", rename_all = "camelCase")]
    ResponseStarted { response_id: String },
    #[serde(rename = "response.output_text.delta", rename_all = "camelCase")]
    OutputTextDelta { item_id: String, content: String },
    #[serde(rename = "response.done")]
    ResponseDone { usage: ResponseUsage },
    #[serde(rename = "response.error")]
    ResponseError { code: String, message: String },
}

impl CanonicalEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            CanonicalEvent::ConversationCreated { .. } => CONVERSATION_CREATED,
            CanonicalEvent::ResponseStarted { .. } => RESPONSE_STARTED,
            CanonicalEvent::OutputTextDelta { .. } => RESPONSE_OUTPUT_TEXT_DELTA,
            CanonicalEvent::ResponseDone { .. } => RESPONSE_DONE,
            CanonicalEvent::ResponseError { .. } => RESPONSE_ERROR,
        }
    }

    /// `response.done` and `response.error` end a response.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CanonicalEvent::ResponseDone { .. } | CanonicalEvent::ResponseError { .. }
        )
    }

    #[must_use]
    pub fn is_canonical_name(name: &str) -> bool {
        CANONICAL_EVENT_NAMES.contains(&name)
    }
}
