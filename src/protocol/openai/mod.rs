pub mod stream;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::protocol::chat::{
    ChatInputItem, ChatItem, ChatOutputItem, ChatRequest, InputContent, OutputContent,
};

pub use stream::{openai_event_stream, parse_openai_stream_event, OpenAiAdapter, OpenAiStreamEvent};

/// `OpenAI` Responses API request wire type.
#[derive(Debug, Clone, Serialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub input: Vec<ResponsesInputMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub store: bool,
    pub stream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponsesInputMessage {
    pub role: &'static str,
    pub content: ResponsesMessageContent,
}

/// Assistant turns are sent back as plain text, user turns as typed parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResponsesMessageContent {
    Text(String),
    Parts(Vec<ResponsesContentPart>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesContentPart {
    InputText { text: String },
    InputImage { image_url: String },
    InputFile { filename: String, file_data: String },
}

/// Usage block of a Responses API response object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsesUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsesError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The subset of the Responses API response object carried by stream events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsesObjectRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub usage: Option<ResponsesUsage>,
    #[serde(default)]
    pub error: Option<ResponsesError>,
}

/// Translate a chat request into a Responses API request body.
///
/// # Errors
///
/// Returns [`ChatError::InvalidRequest`] when the config names no model;
/// the Responses API has no vendor-agent addressing.
pub fn build_responses_request(request: &ChatRequest) -> Result<ResponsesRequest, ChatError> {
    let model = request.config.model_name().ok_or_else(|| {
        ChatError::InvalidRequest("OpenAI chat configs must name a model".to_string())
    })?;
    Ok(ResponsesRequest {
        model: model.to_string(),
        input: request.inputs.iter().filter_map(input_message).collect(),
        instructions: request.config.instructions.clone(),
        store: request.store,
        stream: request.stream,
    })
}

fn input_message(item: &ChatItem) -> Option<ResponsesInputMessage> {
    match item {
        ChatItem::Input(ChatInputItem::Message(message)) => {
            let parts = message
                .content
                .iter()
                .map(|part| match part {
                    InputContent::Text { text } => ResponsesContentPart::InputText { text: text.clone() },
                    InputContent::Image { image_url } => ResponsesContentPart::InputImage {
                        image_url: image_url.clone(),
                    },
                    InputContent::File { file_name, file_url } => ResponsesContentPart::InputFile {
                        filename: file_name.clone(),
                        file_data: file_url.clone(),
                    },
                })
                .collect();
            Some(ResponsesInputMessage {
                role: message.role.as_str(),
                content: ResponsesMessageContent::Parts(parts),
            })
        }
        ChatItem::Output(ChatOutputItem::Message(message)) => {
            let text: String = message
                .content
                .iter()
                .map(|block| match block {
                    OutputContent::Text { text } => text.as_str(),
                    OutputContent::Refusal { refusal } => refusal.as_str(),
                })
                .collect();
            if text.is_empty() {
                return None;
            }
            Some(ResponsesInputMessage {
                role: "assistant",
                content: ResponsesMessageContent::Text(text),
            })
        }
    }
}
