//! Error types for the review engine
//!
//! Structured review outcomes (finalize statuses, waiting results, degraded
//! responses) are NOT errors; they are returned as values. `EngineError`
//! covers the conditions that genuinely prevent the engine from producing a
//! result, chiefly checkpoint persistence failures at a pause point.

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur during graph execution
#[derive(Error, Debug)]
pub enum EngineError {
    /// Checkpoint persistence failed
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] review_checkpoint::CheckpointError),

    /// A resume call referenced an unknown run
    #[error("Run not found: {0}")]
    RunNotFound(uuid::Uuid),

    /// A resume call targeted a run that is not paused
    #[error("Run {run_id} is not paused (status: {status})")]
    NotPaused { run_id: uuid::Uuid, status: String },

    /// The paused checkpoint exceeded the caller's max-age policy
    #[error("Checkpoint for run {0} is stale")]
    Stale(uuid::Uuid),

    /// Resume reached a gate with no decision available
    #[error("Run {0} is waiting at a gate and no decision was supplied")]
    DecisionRequired(uuid::Uuid),

    /// Serialization of graph state failed
    #[error("State serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stage failed in a way the orchestrator did not absorb
    #[error("Stage '{stage}' failed: {message}")]
    Stage { stage: String, message: String },
}

/// Failures of pluggable capabilities (providers, notifiers, analyzers).
/// Always absorbed locally with a deterministic fallback; these never
/// surface as a run failure.
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("Capability timed out")]
    Timeout,

    #[error("Capability unavailable: {0}")]
    Unavailable(String),

    #[error("Remote call failed: {0}")]
    Remote(String),

    #[error("Malformed capability output: {0}")]
    Malformed(String),
}
