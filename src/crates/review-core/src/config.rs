//! Engine configuration
//!
//! Everything that used to be ambient (environment strings, build-time
//! gating) is an explicit field here, injected at construction time.
//! Capability implementations (reflection provider, risk analyzer,
//! notifier) are likewise injected as trait objects when the orchestrator
//! is built; there is no global lookup.

use crate::edd::TriggerPolicy;
use chrono::Duration as ChronoDuration;
use review_checkpoint::ResumeCacheConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub graph_id: String,
    pub graph_version: String,

    /// Hard timeout on the reflection provider call; a timeout is treated
    /// exactly like a provider exception.
    pub reflection_timeout: Duration,

    /// Attach graph definition metadata (checksum, version) to run reports.
    /// Explicit flag, previously gated implicitly by build environment.
    pub attach_graph_metadata: bool,

    /// EDD trigger scoring policy (thresholds and category caps)
    pub trigger_policy: TriggerPolicy,

    /// Reminder follow-up interval applied at pause time
    pub reminder_interval: ChronoDuration,

    /// Max age of a paused checkpoint before resume refuses it
    pub checkpoint_max_age: ChronoDuration,

    /// Default recipient for approval notifications
    pub default_recipient: Option<String>,

    /// Legacy non-durable resume path cache
    pub resume_cache: ResumeCacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            graph_id: "document_review".to_string(),
            graph_version: "1".to_string(),
            reflection_timeout: Duration::from_secs(12),
            attach_graph_metadata: false,
            trigger_policy: TriggerPolicy::default(),
            reminder_interval: ChronoDuration::hours(24),
            checkpoint_max_age: ChronoDuration::hours(24),
            default_recipient: None,
            resume_cache: ResumeCacheConfig::default(),
        }
    }
}
