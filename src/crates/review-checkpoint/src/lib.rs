//! Durable checkpoint persistence for the document-review engine
//!
//! This crate owns the persisted shape of a suspended run and the storage
//! contract around it:
//!
//! - [`RunCheckpoint`]: the durable unit of suspended execution, with its
//!   approval tokens, write-once decision fields, nested EDD stage and
//!   append-only event log
//! - [`CheckpointStore`]: save / load / resolve-token, full-overwrite
//!   semantics with a token index maintained transactionally
//! - [`InMemoryCheckpointStore`] and [`FileCheckpointStore`]: the two
//!   shipped backends
//! - [`ResumeCache`]: an explicitly non-durable, bounded TTL cache for the
//!   legacy resume path
//! - [`validate`]: structural validation enforced before any durable write

pub mod error;
pub mod file;
pub mod memory;
pub mod record;
pub mod resume_cache;
pub mod store;
pub mod validate;

pub use error::{CheckpointError, Result};
pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;
pub use record::{
    mint_approval_token, token_hint, CheckpointMetadata, CheckpointStatus, Decision,
    DocumentInput, EddFinding, EddFindings, EddSeverity, EddStage, EddStatus, EventLogEntry,
    FinalDecision, FinalizedVia, ReviewProcessStatus, RunCheckpoint,
};
pub use resume_cache::{ResumeCache, ResumeCacheConfig};
pub use store::CheckpointStore;
pub use validate::{
    is_approval_token, is_plausible_token, validate_checkpoint, FieldViolation,
    MIN_REJECT_COMMENT_LEN,
};
