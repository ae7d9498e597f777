//! Chat data model shared by the server dispatcher and the client session.
//!
//! Field names follow the JSON shape the browser client already speaks
//! (`camelCase`, `_id`, `type` tags).

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::protocol::canonical::{ResponseUsage, VendorId};

const DEFAULT_PROJECT: &str = "DEFAULT";
const UNNAMED_CHAT_CONFIG: &str = "Unnamed agent";

fn default_project() -> String {
    DEFAULT_PROJECT.to_string()
}

/// Vendor-side agent a config can delegate to instead of a plain model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorAgent {
    pub id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigVisibility {
    Published,
    #[default]
    Private,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllGroups {
    #[default]
    #[serde(rename = "all")]
    All,
}

/// Either the literal `"all"` or an explicit list of group names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccessGroups {
    All(AllGroups),
    Groups(Vec<String>),
}

impl Default for AccessGroups {
    fn default() -> Self {
        AccessGroups::All(AllGroups::All)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStamp {
    pub at: String,
    pub by: Principal,
}

/// A fully resolved chat configuration (vendor, model, instructions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub vendor_id: VendorId,
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_agent: Option<VendorAgent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(rename = "type", default)]
    pub visibility: ConfigVisibility,
    #[serde(default)]
    pub access_groups: AccessGroups,
    #[serde(default)]
    pub created: ChangeStamp,
    #[serde(default)]
    pub updated: ChangeStamp,
}

impl ChatConfig {
    /// Minimal config for a vendor/model pair.
    #[must_use]
    pub fn for_model(vendor_id: VendorId, model: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            description: String::new(),
            vendor_id,
            project: default_project(),
            vendor_agent: None,
            model: Some(model.into()),
            instructions: None,
            conversation_id: None,
            visibility: ConfigVisibility::default(),
            access_groups: AccessGroups::default(),
            created: ChangeStamp::default(),
            updated: ChangeStamp::default(),
        }
    }

    #[must_use]
    pub fn model_name(&self) -> Option<&str> {
        self.model.as_deref().filter(|model| !model.is_empty())
    }

    #[must_use]
    pub fn vendor_agent_id(&self) -> Option<&str> {
        self.vendor_agent
            .as_ref()
            .map(|agent| agent.id.as_str())
            .filter(|id| !id.is_empty())
    }

    /// A config can only be chatted with when it names a model or an agent.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidRequest`] when neither is set.
    pub fn ensure_chattable(&self) -> Result<(), ChatError> {
        if self.model_name().is_none() && self.vendor_agent_id().is_none() {
            return Err(ChatError::InvalidRequest(
                "chat config must have either a vendorAgent id or a model defined".to_string(),
            ));
        }
        Ok(())
    }

    /// Name shown for the config, falling back to the model id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if !self.name.is_empty() {
            return &self.name;
        }
        self.model_name().unwrap_or(UNNAMED_CHAT_CONFIG)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    #[default]
    User,
    Assistant,
    System,
}

impl ChatRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::System => "system",
        }
    }
}

/// One content part of a user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InputContent {
    #[serde(rename = "input_text")]
    Text { text: String },
    #[serde(rename = "input_image", rename_all = "camelCase")]
    Image { image_url: String },
    #[serde(rename = "input_file", rename_all = "camelCase")]
    File { file_name: String, file_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputMessage {
    #[serde(default)]
    pub role: ChatRole,
    pub content: Vec<InputContent>,
}

impl InputMessage {
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: vec![InputContent::Text { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatInputItem {
    #[serde(rename = "message.input")]
    Message(InputMessage),
}

/// One content block of an assistant output message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutputContent {
    #[serde(rename = "output_text")]
    Text { text: String },
    #[serde(rename = "refusal")]
    Refusal { refusal: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: Vec<OutputContent>,
}

impl OutputMessage {
    /// Concatenated text of every `output_text` block.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if let OutputContent::Text { text } = block {
                out.push_str(text);
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatOutputItem {
    #[serde(rename = "message.output")]
    Message(OutputMessage),
}

impl ChatOutputItem {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            ChatOutputItem::Message(message) => &message.id,
        }
    }
}

/// A leaf item of the flattened request input list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatItem {
    Input(ChatInputItem),
    Output(ChatOutputItem),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    #[default]
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Incomplete,
}

impl ResponseStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, ResponseStatus::Queued | ResponseStatus::InProgress)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseObjectKind {
    #[default]
    #[serde(rename = "chat_response")]
    ChatResponse,
}

/// The structured, possibly partial, response to one chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponseObject {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: ResponseObjectKind,
    pub config: ChatConfig,
    pub created_at: String,
    #[serde(default)]
    pub outputs: Vec<ChatOutputItem>,
    #[serde(default)]
    pub status: ResponseStatus,
    #[serde(default)]
    pub usage: ResponseUsage,
}

impl ChatResponseObject {
    /// A fresh `queued` response with zero usage and no outputs.
    #[must_use]
    pub fn new(id: impl Into<String>, config: ChatConfig, created_at: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ResponseObjectKind::ChatResponse,
            config,
            created_at: created_at.into(),
            outputs: Vec::new(),
            status: ResponseStatus::Queued,
            usage: ResponseUsage::default(),
        }
    }

    #[must_use]
    pub fn output_message(&self, item_id: &str) -> Option<&OutputMessage> {
        self.outputs.iter().find_map(|item| match item {
            ChatOutputItem::Message(message) if message.id == item_id => Some(message),
            ChatOutputItem::Message(_) => None,
        })
    }

    /// Leaf output items as request input items.
    pub fn output_items(&self) -> impl Iterator<Item = ChatItem> + '_ {
        self.outputs.iter().cloned().map(ChatItem::Output)
    }
}

/// One entry of a serialized chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatHistoryItem {
    Input(ChatInputItem),
    Response(ChatResponseObject),
}

/// Request sent from a chat session to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub config: ChatConfig,
    pub inputs: Vec<ChatItem>,
    #[serde(default)]
    pub store: bool,
    #[serde(default)]
    pub stream: bool,
}
