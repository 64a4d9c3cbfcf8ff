//! Document storage in a single JSON snapshot file
//!
//! All documents live together in `<dir>/documents.json`. A write loads the
//! snapshot, applies the changes, writes the result to a temporary file in the
//! same directory, syncs it, and renames it over the snapshot. The rename is
//! the only step that changes what readers see, so a multi-document write
//! lands completely or not at all.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use super::{DocumentStore, StorageError};

const SNAPSHOT_FILE: &str = "documents.json";
const TEMP_FILE: &str = ".documents.json.tmp";

type Snapshot = BTreeMap<String, String>;

pub struct FileStore {
    dir: PathBuf,
    /// Serializes read-modify-write of the snapshot
    write_lock: Mutex<()>,
}

impl FileStore {
    pub async fn new(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(TEMP_FILE)
    }

    async fn read_snapshot(&self) -> Result<Snapshot, StorageError> {
        match fs::read_to_string(self.snapshot_path()).await {
            Ok(content) if content.trim().is_empty() => Ok(Snapshot::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|source| StorageError::Malformed {
                key: SNAPSHOT_FILE.to_string(),
                source,
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Snapshot::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_temp(&self, content: &[u8]) -> Result<(), StorageError> {
        let mut file = fs::File::create(self.temp_path()).await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Move the staged snapshot into place, or drop it if that fails
    async fn commit(&self) -> Result<(), StorageError> {
        if let Err(e) = fs::rename(self.temp_path(), self.snapshot_path()).await {
            self.discard_temp().await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn discard_temp(&self) {
        if let Err(e) = fs::remove_file(self.temp_path()).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(error = %e, "Could not remove staged snapshot");
            }
        }
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_snapshot().await?.remove(key))
    }

    async fn put_all(&self, documents: &[(&str, String)]) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;

        let mut snapshot = self.read_snapshot().await?;
        for (key, value) in documents {
            snapshot.insert((*key).to_string(), value.clone());
        }
        let content = serde_json::to_vec_pretty(&snapshot)?;

        if let Err(e) = self.write_temp(&content).await {
            self.discard_temp().await;
            return Err(e);
        }
        self.commit().await
    }
}
