use serde::{Deserialize, Serialize};

use super::cell::{ResponseCell, ResponseView};
use crate::error::ChatError;
use crate::protocol::chat::{
    ChatConfig, ChatHistoryItem, ChatInputItem, ChatItem, ChatResponseObject, Principal,
};
use crate::util::now_rfc3339;

/// One transcript entry: a user input or a (possibly in-flight) response.
#[derive(Debug)]
pub enum TranscriptEntry {
    Input(ChatInputItem),
    Response(ResponseCell),
}

/// Serialized form of a [`Chat`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSnapshot {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub config: ChatConfig,
    #[serde(default)]
    pub history: Vec<ChatHistoryItem>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub owner: Principal,
}

/// A chat transcript. Append-only, except for the response object of the
/// turn currently in flight.
#[derive(Debug)]
pub struct Chat {
    pub id: String,
    pub config: ChatConfig,
    pub(crate) history: Vec<TranscriptEntry>,
    pub created_at: String,
    pub updated_at: String,
    pub owner: Principal,
}

impl Chat {
    /// An empty chat.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidRequest`] if the config names neither a
    /// model nor a vendor agent.
    pub fn new(config: ChatConfig, owner: Principal) -> Result<Self, ChatError> {
        config.ensure_chattable()?;
        let now = now_rfc3339();
        Ok(Self {
            id: String::new(),
            config,
            history: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
            owner,
        })
    }

    /// Rebuild a chat from its serialized form.
    ///
    /// # Errors
    ///
    /// Same as [`Chat::new`].
    pub fn from_snapshot(snapshot: ChatSnapshot) -> Result<Self, ChatError> {
        snapshot.config.ensure_chattable()?;
        let history = snapshot
            .history
            .into_iter()
            .map(|item| match item {
                ChatHistoryItem::Input(input) => TranscriptEntry::Input(input),
                ChatHistoryItem::Response(response) => {
                    TranscriptEntry::Response(ResponseCell::new(response))
                }
            })
            .collect();
        Ok(Self {
            id: snapshot.id,
            config: snapshot.config,
            history,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            owner: snapshot.owner,
        })
    }

    #[must_use]
    pub fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            id: self.id.clone(),
            config: self.config.clone(),
            history: self
                .history
                .iter()
                .map(|entry| match entry {
                    TranscriptEntry::Input(input) => ChatHistoryItem::Input(input.clone()),
                    TranscriptEntry::Response(cell) => ChatHistoryItem::Response(cell.snapshot()),
                })
                .collect(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
            owner: self.owner.clone(),
        }
    }

    /// Start over: drop the history and reset id and timestamps. The config
    /// is kept.
    pub fn new_chat(&mut self) {
        let now = now_rfc3339();
        self.history.clear();
        self.id.clear();
        self.created_at = now.clone();
        self.updated_at = now;
    }

    /// The transcript as a flat request input list: inputs as they are,
    /// each response replaced by its output items.
    #[must_use]
    pub fn flatten(&self) -> Vec<ChatItem> {
        let mut items = Vec::with_capacity(self.history.len());
        for entry in &self.history {
            match entry {
                TranscriptEntry::Input(input) => items.push(ChatItem::Input(input.clone())),
                TranscriptEntry::Response(cell) => items.extend(cell.view().read().output_items()),
            }
        }
        items
    }

    pub fn push_input(&mut self, input: ChatInputItem) {
        self.history.push(TranscriptEntry::Input(input));
    }

    pub fn push_response(&mut self, response: ChatResponseObject) -> ResponseView {
        let cell = ResponseCell::new(response);
        let view = cell.view();
        self.history.push(TranscriptEntry::Response(cell));
        view
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Views of every response in the transcript, oldest first.
    pub fn responses(&self) -> impl Iterator<Item = ResponseView> + '_ {
        self.history.iter().filter_map(|entry| match entry {
            TranscriptEntry::Response(cell) => Some(cell.view()),
            TranscriptEntry::Input(_) => None,
        })
    }

    #[must_use]
    pub fn last_response(&self) -> Option<ResponseView> {
        self.responses().last()
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = now_rfc3339();
    }
}
