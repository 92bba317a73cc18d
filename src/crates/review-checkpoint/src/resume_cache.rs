//! Short-TTL in-memory resume cache
//!
//! A bounded map in front of the durable store for the legacy non-durable
//! resume path. Entries expire after a fixed TTL (default 15 minutes) and
//! the map is capped; when full, the oldest entry by insertion time is
//! evicted.
//!
//! This cache is NOT part of any correctness guarantee. It does not survive
//! process restarts and may drop entries at any time; the durable
//! [`CheckpointStore`](crate::store::CheckpointStore) is authoritative.

use crate::record::RunCheckpoint;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Configuration for the resume cache
#[derive(Debug, Clone)]
pub struct ResumeCacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for ResumeCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(15 * 60),
            max_entries: 256,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    checkpoint: RunCheckpoint,
    inserted_at: Instant,
}

/// Bounded TTL cache of recently paused checkpoints
#[derive(Debug, Clone)]
pub struct ResumeCache {
    config: ResumeCacheConfig,
    entries: Arc<RwLock<HashMap<Uuid, CacheEntry>>>,
}

impl ResumeCache {
    pub fn new(config: ResumeCacheConfig) -> Self {
        Self {
            config,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn insert(&self, checkpoint: RunCheckpoint) {
        let mut entries = self.entries.write().await;

        // Expired entries go first; if still at capacity, evict oldest.
        let ttl = self.config.ttl;
        entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
        if entries.len() >= self.config.max_entries {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(id, _)| *id)
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            checkpoint.run_id,
            CacheEntry {
                checkpoint,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Fetch a cached checkpoint if present and not expired
    pub async fn get(&self, run_id: Uuid) -> Option<RunCheckpoint> {
        let entries = self.entries.read().await;
        entries.get(&run_id).and_then(|e| {
            (e.inserted_at.elapsed() < self.config.ttl).then(|| e.checkpoint.clone())
        })
    }

    pub async fn remove(&self, run_id: Uuid) {
        self.entries.write().await.remove(&run_id);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop all expired entries. Intended for a periodic background sweep.
    pub async fn sweep(&self) {
        let ttl = self.config.ttl;
        self.entries
            .write()
            .await
            .retain(|_, e| e.inserted_at.elapsed() < ttl);
    }
}

impl Default for ResumeCache {
    fn default() -> Self {
        Self::new(ResumeCacheConfig::default())
    }
}
