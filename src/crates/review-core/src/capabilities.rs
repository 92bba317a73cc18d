//! Capability traits: the seams where excluded collaborators attach
//!
//! The notifier (email delivery), the reflection text provider (LLM) and
//! the risk-signal analyzer are external collaborators. The engine invokes
//! them through these traits and absorbs every failure locally; a
//! capability failure never fails a run.

use crate::error::CapabilityError;
use crate::state::{RiskSignal, SignalSeverity, TopicSection};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use review_checkpoint::DocumentInput;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

/// Which gate an approval request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Primary,
    Edd,
}

/// Everything a notifier needs to deliver an approval request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalContext {
    pub run_id: Uuid,
    pub kind: ApprovalKind,
    pub approval_token: String,
    pub recipient: Option<String>,
    pub risk_score: u8,
    pub issue_count: usize,
    pub reminder_due_at: Option<DateTime<Utc>>,
}

/// Delivery capability for approval requests. Best-effort from the
/// orchestrator's point of view: a send failure does not fail the pause.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, context: &ApprovalContext) -> Result<String, CapabilityError>;
}

/// Notifier that only logs; the default when no delivery channel is wired
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, context: &ApprovalContext) -> Result<String, CapabilityError> {
        let message_id = format!("log-{}", Uuid::new_v4().simple());
        info!(
            run_id = %context.run_id,
            kind = ?context.kind,
            recipient = context.recipient.as_deref().unwrap_or("<unset>"),
            message_id = %message_id,
            "approval notification"
        );
        Ok(message_id)
    }
}

/// Text-generation capability backing the reflection engine
#[async_trait]
pub trait ReflectionProvider: Send + Sync {
    async fn run(&self, payload: &Value, prompt: &str) -> Result<String, CapabilityError>;
}

/// Risk-signal analysis capability. The primary implementation calls an
/// external model; [`PatternRiskAnalyzer`](crate::risk::PatternRiskAnalyzer)
/// is the deterministic fallback.
#[async_trait]
pub trait RiskSignalAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        sections: &[TopicSection],
        documents: &[DocumentInput],
    ) -> Result<Vec<RiskSignal>, CapabilityError>;
}

impl RiskSignal {
    pub fn new(
        severity: SignalSeverity,
        label: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            label: label.into(),
            rationale: rationale.into(),
        }
    }
}
