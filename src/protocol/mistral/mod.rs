pub mod stream;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::protocol::chat::{
    ChatInputItem, ChatItem, ChatOutputItem, ChatRequest, InputContent, OutputContent,
};

pub use stream::{mistral_event_stream, parse_mistral_stream_event, MistralAdapter, MistralStreamEvent};

/// Mistral Conversations API request body.
///
/// Starting a conversation names a model or an agent; appending to an
/// existing conversation sends only the new entries.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationRequest {
    pub inputs: Vec<ConversationEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub store: bool,
    pub stream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ConversationEntry {
    #[serde(rename = "message.input")]
    Input {
        role: &'static str,
        content: Vec<ConversationChunk>,
    },
    #[serde(rename = "message.output")]
    Output { role: &'static str, content: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationChunk {
    Text { text: String },
    ImageUrl { image_url: String },
    DocumentUrl { document_url: String, document_name: String },
}

/// Usage block of `conversation.response.done`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

/// Where a Conversations API request is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationTarget {
    Start,
    Append { conversation_id: String },
}

impl ConversationTarget {
    /// Path below the vendor base URL.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            ConversationTarget::Start => "/conversations".to_string(),
            ConversationTarget::Append { conversation_id } => {
                format!("/conversations/{conversation_id}")
            }
        }
    }
}

/// Translate a chat request into a Conversations API request.
///
/// When the request is stored and the config already carries a conversation
/// id, only the inputs after the last assistant output are sent, since the
/// vendor keeps the history. Unstored requests always start a conversation
/// with the full history.
///
/// # Errors
///
/// Returns [`ChatError::InvalidRequest`] when a new conversation names
/// neither a model nor an agent.
pub fn build_conversation_request(
    request: &ChatRequest,
) -> Result<(ConversationTarget, ConversationRequest), ChatError> {
    let config = &request.config;
    let continued = config
        .conversation_id
        .as_deref()
        .filter(|id| request.store && !id.is_empty());
    if let Some(conversation_id) = continued {
        let first_new = request
            .inputs
            .iter()
            .rposition(|item| matches!(item, ChatItem::Output(_)))
            .map_or(0, |idx| idx + 1);
        let body = ConversationRequest {
            inputs: request.inputs[first_new..].iter().filter_map(entry).collect(),
            model: None,
            agent_id: None,
            instructions: None,
            store: request.store,
            stream: request.stream,
        };
        return Ok((
            ConversationTarget::Append {
                conversation_id: conversation_id.to_string(),
            },
            body,
        ));
    }

    config.ensure_chattable()?;
    let agent_id = config.vendor_agent_id().map(str::to_string);
    let body = ConversationRequest {
        inputs: request.inputs.iter().filter_map(entry).collect(),
        model: if agent_id.is_some() {
            None
        } else {
            config.model_name().map(str::to_string)
        },
        instructions: if agent_id.is_some() {
            None
        } else {
            config.instructions.clone()
        },
        agent_id,
        store: request.store,
        stream: request.stream,
    };
    Ok((ConversationTarget::Start, body))
}

fn entry(item: &ChatItem) -> Option<ConversationEntry> {
    match item {
        ChatItem::Input(ChatInputItem::Message(message)) => Some(ConversationEntry::Input {
            role: message.role.as_str(),
            content: message
                .content
                .iter()
                .map(|part| match part {
                    InputContent::Text { text } => ConversationChunk::Text { text: text.clone() },
                    InputContent::Image { image_url } => ConversationChunk::ImageUrl {
                        image_url: image_url.clone(),
                    },
                    InputContent::File { file_name, file_url } => ConversationChunk::DocumentUrl {
                        document_url: file_url.clone(),
                        document_name: file_name.clone(),
                    },
                })
                .collect(),
        }),
        ChatItem::Output(ChatOutputItem::Message(message)) => {
            let text: String = message
                .content
                .iter()
                .filter_map(|block| match block {
                    OutputContent::Text { text } => Some(text.as_str()),
                    OutputContent::Refusal { .. } => None,
                })
                .collect();
            (!text.is_empty()).then(|| ConversationEntry::Output {
                role: "assistant",
                content: text,
            })
        }
    }
}
