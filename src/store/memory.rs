//! Process-local document storage

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{DocumentStore, StorageError};

/// Document store kept in memory. Writes can be switched off to exercise
/// failure paths.
#[derive(Default)]
pub struct InMemoryStore {
    documents: Mutex<HashMap<String, String>>,
    read_only: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `StorageError::Unavailable`
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn documents(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.documents
            .lock()
            .map_err(|_| StorageError::Unavailable("document map poisoned".into()))
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("store is read-only".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.documents()?.get(key).cloned())
    }

    async fn put_all(&self, documents: &[(&str, String)]) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut map = self.documents()?;
        for (key, value) in documents {
            map.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }
}
