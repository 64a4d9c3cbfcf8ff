//! Conversation manager
//!
//! Keeps the `chatHistory` and `currentConversation` documents consistent:
//!
//! - `history[i].id == i` after every mutation; deleting re-indexes what follows.
//! - A saved active conversation points at a valid history entry whose messages
//!   equal its own after every append.
//! - The first append to an unsaved active conversation creates a new history
//!   entry at the end and adopts its id.
//!
//! Every mutation builds the new documents first and persists them with a
//! single `put_all`. Mutations take `&mut self`, so one manager never runs two
//! read-modify-write cycles at once.

use serde::Serialize;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::conversation::{
    derive_name, reindex, ActiveConversation, ConversationSummary, Exchange,
};
use crate::store::{
    load_json, to_document, DocumentStore, StorageError, CHAT_HISTORY_KEY,
    CURRENT_CONVERSATION_KEY,
};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Conversation not found: {0}")]
    NotFound(usize),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Change notifications for whoever renders the conversation list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversationEvent {
    /// The history list (names, ids, messages) changed
    HistoryChanged,
    /// The active conversation was replaced or reset
    ActiveChanged,
}

pub struct ConversationManager {
    store: Arc<dyn DocumentStore>,
    events: broadcast::Sender<ConversationEvent>,
}

impl ConversationManager {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { store, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    /// Current history, read fresh from the store
    pub async fn list_summaries(&self) -> Result<Vec<ConversationSummary>, HistoryError> {
        Ok(self.load_history().await?)
    }

    /// Current active conversation, read fresh from the store
    pub async fn active_conversation(&self) -> Result<ActiveConversation, HistoryError> {
        Ok(self.load_active().await?)
    }

    /// Append a question/answer pair to the active conversation, promoting it
    /// into the history first if it has not been saved yet.
    pub async fn append_exchange(&mut self, exchange: Exchange) -> Result<(), HistoryError> {
        if exchange.question.trim().is_empty() {
            return Err(HistoryError::InvalidInput("question must not be empty".into()));
        }
        if exchange.answer.trim().is_empty() {
            return Err(HistoryError::InvalidInput("answer must not be empty".into()));
        }

        let mut history = self.load_history().await?;
        let mut active = self.load_active().await?;

        let id = match active.id {
            Some(id) if id < history.len() => id,
            stale => {
                if let Some(id) = stale {
                    warn!(id, len = history.len(), "Active conversation points past history; saving it as new");
                }
                let id = history.len();
                let name = active
                    .name
                    .clone()
                    .unwrap_or_else(|| derive_name(&exchange.question));
                let mut summary = ConversationSummary::new(id, name);
                if let Some(created_at) = active.created_at {
                    summary.created_at = created_at;
                }
                active.id = Some(id);
                active.name = Some(summary.name.clone());
                active.created_at = Some(summary.created_at);
                history.push(summary);
                info!(id, "Saved new conversation");
                id
            }
        };

        active.messages.push(exchange);
        history[id].messages = active.messages.clone();

        self.persist(&history, &active).await?;
        debug!(id, messages = active.messages.len(), "Appended exchange");

        self.notify(ConversationEvent::HistoryChanged);
        Ok(())
    }

    /// Make `history[id]` the active conversation and return its messages
    pub async fn load_conversation(&mut self, id: usize) -> Result<Vec<Exchange>, HistoryError> {
        let history = self.load_history().await?;
        let summary = history.get(id).ok_or(HistoryError::NotFound(id))?;

        let active = ActiveConversation::from(summary);
        self.store
            .put(CURRENT_CONVERSATION_KEY, to_document(&active)?)
            .await?;
        debug!(id, "Loaded conversation");

        self.notify(ConversationEvent::ActiveChanged);
        Ok(active.messages)
    }

    pub async fn rename_conversation(&mut self, id: usize, new_name: &str) -> Result<(), HistoryError> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(HistoryError::InvalidInput("name must not be empty".into()));
        }

        let mut history = self.load_history().await?;
        let mut active = self.load_active().await?;

        let summary = history.get_mut(id).ok_or(HistoryError::NotFound(id))?;
        summary.name = new_name.to_string();
        if active.id == Some(id) {
            active.name = Some(new_name.to_string());
        }

        self.persist(&history, &active).await?;
        info!(id, name = new_name, "Renamed conversation");

        self.notify(ConversationEvent::HistoryChanged);
        Ok(())
    }

    /// Remove `history[id]` and re-index what follows.
    ///
    /// Returns `true` when the removed entry was the active conversation, which
    /// is then reset to an unsaved empty one.
    pub async fn delete_conversation(&mut self, id: usize) -> Result<bool, HistoryError> {
        let mut history = self.load_history().await?;
        if id >= history.len() {
            return Err(HistoryError::NotFound(id));
        }
        let mut active = self.load_active().await?;

        history.remove(id);
        reindex(&mut history);

        let cleared = match active.id {
            Some(active_id) if active_id == id => {
                active = ActiveConversation::new();
                true
            }
            Some(active_id) if active_id > id => {
                active.id = Some(active_id - 1);
                false
            }
            _ => false,
        };

        self.persist(&history, &active).await?;
        info!(id, remaining = history.len(), cleared, "Deleted conversation");

        self.notify(ConversationEvent::HistoryChanged);
        if cleared {
            self.notify(ConversationEvent::ActiveChanged);
        }
        Ok(cleared)
    }

    /// Reset the active conversation; history is left alone
    pub async fn start_new_conversation(&mut self) -> Result<(), HistoryError> {
        let active = ActiveConversation::new();
        self.store
            .put(CURRENT_CONVERSATION_KEY, to_document(&active)?)
            .await?;
        debug!("Started new conversation");

        self.notify(ConversationEvent::ActiveChanged);
        Ok(())
    }

    async fn load_history(&self) -> Result<Vec<ConversationSummary>, StorageError> {
        Ok(load_json(self.store.as_ref(), CHAT_HISTORY_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn load_active(&self) -> Result<ActiveConversation, StorageError> {
        Ok(load_json(self.store.as_ref(), CURRENT_CONVERSATION_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn persist(
        &self,
        history: &[ConversationSummary],
        active: &ActiveConversation,
    ) -> Result<(), StorageError> {
        let documents = [
            (CHAT_HISTORY_KEY, to_document(&history)?),
            (CURRENT_CONVERSATION_KEY, to_document(active)?),
        ];
        self.store.put_all(&documents).await
    }

    fn notify(&self, event: ConversationEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
