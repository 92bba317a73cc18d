//! In-memory checkpoint store for development and testing
//!
//! Reference implementation of [`CheckpointStore`]. Records and the token
//! index live under a single `RwLock`, so index updates are transactional
//! with record creation: no reader can observe a token resolving to a
//! missing checkpoint. Ephemeral: data is lost on restart; production
//! deployments use a file- or database-backed store.

use crate::error::{CheckpointError, Result};
use crate::record::RunCheckpoint;
use crate::store::CheckpointStore;
use crate::validate::validate_checkpoint;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<Uuid, RunCheckpoint>,
    token_index: HashMap<String, Uuid>,
}

/// Thread-safe in-memory checkpoint store
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints
    pub async fn checkpoint_count(&self) -> usize {
        self.inner.read().await.records.len()
    }

    /// Clear all records and the token index (test isolation)
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.records.clear();
        inner.token_index.clear();
    }
}

pub(crate) fn check_write_rules(
    previous: Option<&RunCheckpoint>,
    next: &RunCheckpoint,
) -> Result<()> {
    let violations = validate_checkpoint(next);
    if !violations.is_empty() {
        let joined = violations
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(CheckpointError::Invalid(joined));
    }
    if let Some(prev) = previous {
        if next.event_log.len() < prev.event_log.len() {
            return Err(CheckpointError::AppendOnly(format!(
                "event_log shrank from {} to {} entries",
                prev.event_log.len(),
                next.event_log.len()
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &RunCheckpoint) -> Result<()> {
        let mut inner = self.inner.write().await;
        check_write_rules(inner.records.get(&checkpoint.run_id), checkpoint)?;

        inner
            .token_index
            .insert(checkpoint.approval_token.clone(), checkpoint.run_id);
        if let Some(token) = checkpoint
            .edd_stage
            .as_ref()
            .and_then(|edd| edd.approval_token.clone())
        {
            inner.token_index.insert(token, checkpoint.run_id);
        }
        inner.records.insert(checkpoint.run_id, checkpoint.clone());
        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> Result<Option<RunCheckpoint>> {
        Ok(self.inner.read().await.records.get(&run_id).cloned())
    }

    async fn resolve_token(&self, token: &str) -> Result<Option<Uuid>> {
        Ok(self.inner.read().await.token_index.get(token).copied())
    }
}
