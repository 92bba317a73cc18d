//! File-backed checkpoint store
//!
//! One JSON document per run (`<run_id>.json`) plus a token index file
//! (`tokens.json`) in the same directory. Writes go through a temp file and
//! an atomic rename, and the record file is always written before the index
//! file, so a reader never resolves a token to a missing checkpoint.
//!
//! A single async mutex serializes writers within this process; readers of
//! the token index go through an in-memory copy rehydrated at open time.

use crate::error::{CheckpointError, Result};
use crate::memory::check_write_rules;
use crate::record::RunCheckpoint;
use crate::store::CheckpointStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

const TOKEN_INDEX_FILE: &str = "tokens.json";

/// Durable checkpoint store persisting JSON files under a directory
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    // Guards both the index map and all file writes.
    index: Arc<Mutex<HashMap<String, Uuid>>>,
}

impl FileCheckpointStore {
    /// Open (or create) a store rooted at `dir`, rehydrating the token
    /// index from disk.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let index_path = dir.join(TOKEN_INDEX_FILE);
        let index = match tokio::fs::read(&index_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(dir = %dir.display(), tokens = index.len(), "opened file checkpoint store");

        Ok(Self {
            dir,
            index: Arc::new(Mutex::new(index)),
        })
    }

    fn record_path(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_record(&self, run_id: Uuid) -> Result<Option<RunCheckpoint>> {
        match tokio::fs::read(self.record_path(run_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &RunCheckpoint) -> Result<()> {
        let mut index = self.index.lock().await;

        let previous = self.read_record(checkpoint.run_id).await?;
        check_write_rules(previous.as_ref(), checkpoint)?;

        let record_bytes = serde_json::to_vec_pretty(checkpoint)?;
        self.write_atomic(&self.record_path(checkpoint.run_id), &record_bytes)
            .await?;

        // Record file first, then the index: tokens never dangle.
        let mut changed = index
            .insert(checkpoint.approval_token.clone(), checkpoint.run_id)
            .map(|prev| prev != checkpoint.run_id)
            .unwrap_or(true);
        if let Some(token) = checkpoint
            .edd_stage
            .as_ref()
            .and_then(|edd| edd.approval_token.clone())
        {
            changed |= index
                .insert(token, checkpoint.run_id)
                .map(|prev| prev != checkpoint.run_id)
                .unwrap_or(true);
        }
        if changed {
            let index_bytes = serde_json::to_vec_pretty(&*index)?;
            self.write_atomic(&self.dir.join(TOKEN_INDEX_FILE), &index_bytes)
                .await?;
        }
        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> Result<Option<RunCheckpoint>> {
        self.read_record(run_id).await
    }

    async fn resolve_token(&self, token: &str) -> Result<Option<Uuid>> {
        Ok(self.index.lock().await.get(token).copied())
    }
}

impl FileCheckpointStore {
    /// Consistency check used by tests and maintenance tooling: every
    /// indexed token must resolve to an existing record file.
    pub async fn verify_index(&self) -> Result<()> {
        let index = self.index.lock().await;
        for (token, run_id) in index.iter() {
            if self.read_record(*run_id).await?.is_none() {
                return Err(CheckpointError::Storage(format!(
                    "token {token} resolves to missing checkpoint {run_id}"
                )));
            }
        }
        Ok(())
    }
}
