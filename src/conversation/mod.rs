//! Conversation types shared by the store, the manager and the HTTP layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest conversation name derived from a first question
const MAX_DERIVED_NAME_CHARS: usize = 40;

/// One question/answer pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    pub question: String,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
}

impl Exchange {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            media_ref: None,
        }
    }

    pub fn with_media(mut self, media_ref: Option<String>) -> Self {
        self.media_ref = media_ref;
        self
    }
}

/// A persisted, named conversation. `id` is its position in the history list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: usize,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Exchange>,
}

impl ConversationSummary {
    pub fn new(id: usize, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }
}

/// The conversation the user is currently talking in.
///
/// `id == None` means nothing has been saved yet; the first appended exchange
/// promotes it into the history list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveConversation {
    #[serde(default)]
    pub id: Option<usize>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub messages: Vec<Exchange>,
}

impl ActiveConversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_unsaved(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl From<&ConversationSummary> for ActiveConversation {
    fn from(summary: &ConversationSummary) -> Self {
        Self {
            id: Some(summary.id),
            name: Some(summary.name.clone()),
            created_at: Some(summary.created_at),
            messages: summary.messages.clone(),
        }
    }
}

/// Reassign positional ids so that `history[i].id == i`
pub fn reindex(history: &mut [ConversationSummary]) {
    for (index, summary) in history.iter_mut().enumerate() {
        summary.id = index;
    }
}

/// Name for a conversation promoted from its first question
pub fn derive_name(question: &str) -> String {
    let trimmed = question.trim();
    if trimmed.chars().count() <= MAX_DERIVED_NAME_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX_DERIVED_NAME_CHARS).collect();
    format!("{}...", cut.trim_end())
}
