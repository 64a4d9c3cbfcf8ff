//! Durable document storage
//!
//! The widget keeps a handful of named JSON documents (`chatHistory`,
//! `currentConversation`, ...). Every write replaces whole documents, so a
//! failed write leaves the previous version in place.

mod file;
mod memory;
mod sqlite;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub use file::FileStore;
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Ordered list of conversation summaries
pub const CHAT_HISTORY_KEY: &str = "chatHistory";
/// The active conversation
pub const CURRENT_CONVERSATION_KEY: &str = "currentConversation";
/// Every quiz served to this widget
pub const QUIZ_HISTORY_KEY: &str = "quizHistory";
/// Widget settings
pub const PREFERENCES_KEY: &str = "preferences";
/// Topic list fetched from the answer service, with its fetch time
pub const TOPICS_CACHE_KEY: &str = "topicsCache";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed document '{key}': {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value store of whole JSON documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document, `None` if it was never written
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace every listed document. Either all are written or the call fails.
    async fn put_all(&self, documents: &[(&str, String)]) -> Result<(), StorageError>;

    async fn put(&self, key: &str, value: String) -> Result<(), StorageError> {
        let documents = [(key, value)];
        self.put_all(&documents).await
    }
}

/// Read and decode a document
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| StorageError::Malformed {
            key: key.to_string(),
            source,
        })
}

/// Encode a document for `put_all`
pub fn to_document<T: Serialize>(value: &T) -> Result<String, StorageError> {
    Ok(serde_json::to_string(value)?)
}
