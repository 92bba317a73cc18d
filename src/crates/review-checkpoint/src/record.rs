//! The durable unit of suspended execution: [`RunCheckpoint`]
//!
//! A `RunCheckpoint` is created only when the orchestrator must pause a run
//! for a human decision. It carries everything needed to resume later: the
//! serialized graph state, the input documents, the approval token that acts
//! as the external capability key, and an append-only event log that serves
//! as the audit trail.
//!
//! Checkpoints are mutated exclusively through a store's save path as a full
//! overwrite. Callers must load the latest record, modify it, and save it
//! back; partial patches are not supported.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle status of a checkpointed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    Paused,
    Resumed,
    Completed,
    Failed,
}

/// A human decision on a review gate. Write-once: a recorded decision is
/// never overwritten, only detected and reported on conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

/// Derived overall outcome of the run, including the nested EDD stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalDecision {
    Approved,
    Rejected,
    ApprovedWithEdd,
}

/// Provenance of a finalized decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizedVia {
    EmailLink,
    WebForm,
}

/// Status of the nested Enhanced Due Diligence sub-workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EddStatus {
    Idle,
    Running,
    WaitingEddApproval,
    Approved,
    Rejected,
}

/// Global review status exposed to external consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReviewProcessStatus {
    Running,
    Complete,
    Failed,
}

/// One uploaded document as captured at pause time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInput {
    pub id: String,
    pub filename: String,
    pub text: String,
    /// Content-derived hint (e.g. detected document kind), not parsed here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hint: Option<String>,
}

/// Severity tag on a deterministic EDD finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EddSeverity {
    High,
    Medium,
    Low,
}

/// A single deterministic finding in the EDD bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EddFinding {
    pub severity: EddSeverity,
    pub category: String,
    pub detail: String,
}

/// Deterministic findings synthesized when an EDD sub-review starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EddFindings {
    pub items: Vec<EddFinding>,
    pub evidence_summary: String,
    /// Structural patch describing how the workflow graph is conceptually
    /// extended with an EDD node. Stored as JSON so the checkpoint crate
    /// stays agnostic of the engine's definition types.
    pub graph_patch: Value,
}

/// The nested EDD approval sub-workflow, created at most once per checkpoint.
/// Idempotency key: presence of `approval_token` (or `approval_sent_at`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EddStage {
    pub status: EddStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<EddFindings>,
}

/// One entry in the append-only audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub details: Value,
}

/// Read-projection for external consumers. Recomputed on every save; never
/// used as an input to engine decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub document_count: usize,
    pub event_count: usize,
    pub graph_state_summary: String,
    #[serde(rename = "reviewProcessStatus")]
    pub review_process_status: ReviewProcessStatus,
}

impl Default for CheckpointMetadata {
    fn default() -> Self {
        Self {
            document_count: 0,
            event_count: 0,
            graph_state_summary: String::new(),
            review_process_status: ReviewProcessStatus::Running,
        }
    }
}

/// Durable snapshot of a paused run, sufficient to resume it later
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    // Identity
    pub run_id: Uuid,
    pub graph_id: String,
    pub graph_version: String,

    // Position
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at_node_id: Option<String>,

    // Payload
    pub graph_state: Value,
    pub documents: Vec<DocumentInput>,

    // Lifecycle
    pub status: CheckpointStatus,
    pub created_at: DateTime<Utc>,
    pub paused_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_at: Option<DateTime<Utc>>,

    // Stage-1 approval
    pub approval_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default)]
    pub approval_sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_due_at: Option<DateTime<Utc>>,

    // Decision (write-once)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_via: Option<FinalizedVia>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_hint: Option<String>,

    // Nested sub-workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edd_stage: Option<EddStage>,

    // Derived
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_decision: Option<FinalDecision>,

    // Audit trail (append-only)
    pub event_log: Vec<EventLogEntry>,

    pub checkpoint_metadata: CheckpointMetadata,
}

/// Mint a fresh approval token: 32 lowercase hex characters derived from a
/// v4 UUID's 16 random bytes.
pub fn mint_approval_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// First 8 characters of a token, recorded as decision provenance
pub fn token_hint(token: &str) -> String {
    token.chars().take(8).collect()
}

impl RunCheckpoint {
    /// Create a checkpoint for a run pausing at `paused_at_node_id`
    pub fn new(
        run_id: Uuid,
        graph_id: impl Into<String>,
        graph_version: impl Into<String>,
        graph_state: Value,
        documents: Vec<DocumentInput>,
        paused_at_node_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let mut checkpoint = Self {
            run_id,
            graph_id: graph_id.into(),
            graph_version: graph_version.into(),
            current_node_id: None,
            paused_at_node_id: Some(paused_at_node_id.into()),
            graph_state,
            documents,
            status: CheckpointStatus::Paused,
            created_at: now,
            paused_at: now,
            resumed_at: None,
            approval_token: mint_approval_token(),
            recipient: None,
            approval_sent: false,
            approval_sent_at: None,
            reminder_due_at: None,
            decision: None,
            decision_comment: None,
            decided_at: None,
            decided_by: None,
            finalized_via: None,
            token_hint: None,
            edd_stage: None,
            final_decision: None,
            event_log: Vec::new(),
            checkpoint_metadata: CheckpointMetadata::default(),
        };
        checkpoint.refresh_metadata();
        checkpoint
    }

    pub fn with_current_node(mut self, node_id: impl Into<String>) -> Self {
        self.current_node_id = Some(node_id.into());
        self
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_reminder_in(mut self, interval: Duration) -> Self {
        self.reminder_due_at = Some(self.paused_at + interval);
        self
    }

    /// Append to the audit trail. The event log is never rewritten; stores
    /// reject saves that would shrink it.
    pub fn append_event(&mut self, event: impl Into<String>, details: Value) {
        self.event_log.push(EventLogEntry {
            timestamp: Utc::now(),
            event: event.into(),
            details,
        });
        self.checkpoint_metadata.event_count = self.event_log.len();
    }

    /// Recompute the read-projection from the current record
    pub fn refresh_metadata(&mut self) {
        let process_status = match (self.status, self.final_decision) {
            (CheckpointStatus::Failed, _) => ReviewProcessStatus::Failed,
            (CheckpointStatus::Completed, _) | (_, Some(_)) => ReviewProcessStatus::Complete,
            _ => ReviewProcessStatus::Running,
        };
        self.checkpoint_metadata = CheckpointMetadata {
            document_count: self.documents.len(),
            event_count: self.event_log.len(),
            graph_state_summary: summarize_state(&self.graph_state),
            review_process_status: process_status,
        };
    }

    /// Whether the checkpoint is logically terminal: decision writes after
    /// this point are rejected or treated as idempotent no-ops.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            CheckpointStatus::Completed | CheckpointStatus::Failed
        )
    }

    /// Whether the checkpoint is stale relative to a caller's max-age policy
    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        now - self.paused_at > max_age
    }

    /// Whether the EDD sub-review has already been started on this record
    pub fn edd_started(&self) -> bool {
        self.edd_stage
            .as_ref()
            .map(|edd| edd.approval_token.is_some() || edd.approval_sent_at.is_some())
            .unwrap_or(false)
    }
}

fn summarize_state(state: &Value) -> String {
    let sections = state
        .get("sections")
        .and_then(|v| v.as_array())
        .map(|a| a.len())
        .unwrap_or(0);
    let issues = state
        .get("issues")
        .and_then(|v| v.as_array())
        .map(|a| a.len())
        .unwrap_or(0);
    let score = state
        .get("risk_score")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let route = state
        .get("route")
        .and_then(|v| v.as_str())
        .unwrap_or("unrouted");
    format!(
        "{sections} sections, {issues} issues, risk {score}, route {route}"
    )
}
