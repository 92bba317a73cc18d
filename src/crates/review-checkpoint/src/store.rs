//! The [`CheckpointStore`] trait: durable, token-indexed persistence of
//! paused-run state
//!
//! Backends keep a primary record keyed by `run_id` plus an auxiliary index
//! mapping every approval token (primary and EDD) to its `run_id`. The index
//! is maintained together with record creation: a reader must never observe
//! a token that resolves to a missing checkpoint.
//!
//! `save` always performs a full overwrite, never a partial merge. There is
//! no compare-and-swap primitive; callers that need race detection must
//! read the record back after writing and compare (see the decision
//! finalizer in `review-core`). The store applies no implicit expiry;
//! staleness is a caller policy judged against `paused_at`.

use crate::error::Result;
use crate::record::RunCheckpoint;
use async_trait::async_trait;
use uuid::Uuid;

/// Storage backend contract for run checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist the full record, overwriting any previous version, and keep
    /// the token index in step. Implementations must enforce:
    /// - structural validity (`validate_checkpoint` returns no violations)
    /// - the append-only event log (a save may not shrink it)
    async fn save(&self, checkpoint: &RunCheckpoint) -> Result<()>;

    /// Load the latest saved record for a run, or `None` if unknown
    async fn load(&self, run_id: Uuid) -> Result<Option<RunCheckpoint>>;

    /// Resolve an approval token (primary or EDD) to its run, or `None`
    async fn resolve_token(&self, token: &str) -> Result<Option<Uuid>>;
}
