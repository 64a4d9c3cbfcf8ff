//! Topic list fetched from the answer service and its persisted cache

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{load_json, to_document, DocumentStore, StorageError, TOPICS_CACHE_KEY};

/// How long a fetched topic list is served before asking again
pub fn cache_ttl() -> Duration {
    Duration::hours(24)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicCache {
    pub topics: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

impl TopicCache {
    pub fn new(topics: Vec<String>, fetched_at: DateTime<Utc>) -> Self {
        Self { topics, fetched_at }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.fetched_at) < cache_ttl()
    }
}

pub async fn load_cache(store: &dyn DocumentStore) -> Result<Option<TopicCache>, StorageError> {
    load_json(store, TOPICS_CACHE_KEY).await
}

pub async fn save_cache(store: &dyn DocumentStore, cache: &TopicCache) -> Result<(), StorageError> {
    store.put(TOPICS_CACHE_KEY, to_document(cache)?).await
}

/// The cached list, unless it is empty or older than [`cache_ttl`]
pub async fn fresh_topics(
    store: &dyn DocumentStore,
    now: DateTime<Utc>,
) -> Result<Option<Vec<String>>, StorageError> {
    Ok(load_cache(store)
        .await?
        .filter(|cache| cache.is_fresh(now) && !cache.topics.is_empty())
        .map(|cache| cache.topics))
}
