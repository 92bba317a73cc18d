//! EDD (Enhanced Due Diligence) sub-review starter and trigger detector
//!
//! A rejected run may conditionally open a second, nested approval
//! sub-workflow. Starting it is idempotent (keyed on the presence of the
//! EDD approval token), persists the stage BEFORE attempting notification,
//! and never rolls back on a failed send: the sub-review is started once
//! it is durable.

use crate::capabilities::{ApprovalContext, ApprovalKind, Notifier};
use crate::definition::GraphDefinition;
use crate::error::Result;
use chrono::Utc;
use review_checkpoint::{
    mint_approval_token, CheckpointStore, EddFinding, EddFindings, EddSeverity, EddStage,
    EddStatus, RunCheckpoint,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Explicit legacy markers that trigger EDD regardless of scoring
const LEGACY_MARKERS: &[&str] = &["edd required", "edd_required", "enhanced due diligence required"];

/// Phrases indicating the reason text is an actual rejection
const REJECTION_INDICATORS: &[&str] = &[
    "reject",
    "declin",
    "denied",
    "cannot approve",
    "not approved",
    "refuse",
];

const OWNERSHIP_TERMS: &[&str] = &[
    "ubo",
    "beneficial owner",
    "beneficial ownership",
    "ownership unclear",
    "ownership structure",
    "undisclosed shareholder",
];
const OFFSHORE_TERMS: &[&str] = &[
    "offshore",
    "shell company",
    "bvi",
    "cayman",
    "panama",
    "tax haven",
];
const IDENTITY_TERMS: &[&str] = &[
    "identity mismatch",
    "name mismatch",
    "inconsistent identity",
    "conflicting identity",
];
const FUNDS_TERMS: &[&str] = &[
    "source of funds",
    "unexplained funds",
    "funds inconsistent",
    "unexplained wealth",
];
const POLICY_TERMS: &[&str] = &[
    "policy change",
    "new policy",
    "policy update",
    "regulatory change",
];

/// Scoring policy for the trigger detector. Per-category caps keep
/// synonym stacking within one category from crossing the threshold on
/// its own.
#[derive(Debug, Clone)]
pub struct TriggerPolicy {
    pub threshold: u32,
    pub ownership_cap: u32,
    pub offshore_cap: u32,
    pub identity_cap: u32,
    pub funds_cap: u32,
    pub policy_cap: u32,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            threshold: 4,
            ownership_cap: 3,
            offshore_cap: 3,
            identity_cap: 1,
            funds_cap: 1,
            policy_cap: 1,
        }
    }
}

/// Per-category breakdown of a trigger score
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerScore {
    pub ownership: u32,
    pub offshore: u32,
    pub identity: u32,
    pub funds: u32,
    pub policy: u32,
}

impl TriggerScore {
    pub fn total(&self) -> u32 {
        self.ownership + self.offshore + self.identity + self.funds + self.policy
    }
}

fn count_capped(text: &str, terms: &[&str], cap: u32) -> u32 {
    let hits = terms.iter().filter(|t| text.contains(*t)).count() as u32;
    hits.min(cap)
}

/// Score a reject reason against the weighted signal categories
pub fn score_reason(reason: &str, policy: &TriggerPolicy) -> TriggerScore {
    let text = reason.to_lowercase();
    TriggerScore {
        ownership: count_capped(&text, OWNERSHIP_TERMS, policy.ownership_cap),
        offshore: count_capped(&text, OFFSHORE_TERMS, policy.offshore_cap),
        identity: count_capped(&text, IDENTITY_TERMS, policy.identity_cap),
        funds: count_capped(&text, FUNDS_TERMS, policy.funds_cap),
        policy: count_capped(&text, POLICY_TERMS, policy.policy_cap),
    }
}

/// Whether a reject reason triggers the EDD sub-review
pub fn should_trigger_edd(reason: &str, policy: &TriggerPolicy) -> bool {
    let text = reason.to_lowercase();
    if LEGACY_MARKERS.iter().any(|m| text.contains(m)) {
        return true;
    }
    let is_rejection = REJECTION_INDICATORS.iter().any(|m| text.contains(m));
    is_rejection && score_reason(reason, policy).total() >= policy.threshold
}

/// Outcome of an EDD start attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EddStartOutcome {
    /// The stage already existed; no token minted, no notification sent
    AlreadyStarted,
    Started {
        approval_token: String,
        notified: bool,
    },
}

/// Idempotently initiates the nested EDD approval sub-workflow
pub struct EddStarter {
    store: Arc<dyn CheckpointStore>,
    notifier: Arc<dyn Notifier>,
    policy: TriggerPolicy,
}

impl EddStarter {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        notifier: Arc<dyn Notifier>,
        policy: TriggerPolicy,
    ) -> Self {
        Self {
            store,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> &TriggerPolicy {
        &self.policy
    }

    fn synthesize_findings(&self, checkpoint: &RunCheckpoint, reason: &str) -> EddFindings {
        let score = score_reason(reason, &self.policy);
        let mut items = Vec::new();
        if score.ownership > 0 {
            items.push(EddFinding {
                severity: EddSeverity::High,
                category: "ownership".to_string(),
                detail: "rejection cites unresolved beneficial-ownership questions".to_string(),
            });
        }
        if score.offshore > 0 {
            items.push(EddFinding {
                severity: EddSeverity::High,
                category: "offshore_structure".to_string(),
                detail: "rejection cites offshore or shell-structure concerns".to_string(),
            });
        }
        if score.identity > 0 {
            items.push(EddFinding {
                severity: EddSeverity::Medium,
                category: "identity".to_string(),
                detail: "rejection cites identity inconsistencies".to_string(),
            });
        }
        if score.funds > 0 {
            items.push(EddFinding {
                severity: EddSeverity::Medium,
                category: "source_of_funds".to_string(),
                detail: "rejection cites source-of-funds inconsistencies".to_string(),
            });
        }
        if score.policy > 0 {
            items.push(EddFinding {
                severity: EddSeverity::Low,
                category: "policy".to_string(),
                detail: "rejection cites a policy change".to_string(),
            });
        }
        if items.is_empty() {
            items.push(EddFinding {
                severity: EddSeverity::Medium,
                category: "manual".to_string(),
                detail: "explicit EDD marker in rejection reason".to_string(),
            });
        }

        let definition = GraphDefinition::document_review(&checkpoint.graph_version);
        EddFindings {
            items,
            evidence_summary: format!(
                "trigger score {} across {} documents; reason hint: {}",
                score.total(),
                checkpoint.documents.len(),
                reason.chars().take(80).collect::<String>()
            ),
            graph_patch: definition.edd_patch(),
        }
    }

    /// Start the sub-review on this checkpoint. The caller passes the
    /// loaded record and is responsible for any subsequent decision write;
    /// the starter persists the EDD stage itself (before notifying) and,
    /// on successful delivery, the sent flag as a second save.
    pub async fn start(
        &self,
        checkpoint: &mut RunCheckpoint,
        reason: &str,
    ) -> Result<EddStartOutcome> {
        if checkpoint.edd_started() {
            return Ok(EddStartOutcome::AlreadyStarted);
        }

        let approval_token = mint_approval_token();
        let now = Utc::now();
        checkpoint.edd_stage = Some(EddStage {
            status: EddStatus::WaitingEddApproval,
            approval_token: Some(approval_token.clone()),
            approval_sent_at: None,
            started_at: Some(now),
            decided_at: None,
            decided_by: None,
            decision: None,
            findings: Some(self.synthesize_findings(checkpoint, reason)),
        });
        checkpoint.append_event(
            "edd_started",
            json!({"token_hint": review_checkpoint::token_hint(&approval_token)}),
        );
        checkpoint.refresh_metadata();

        // Durable first: a later poll must see the EDD stage even if the
        // notification never goes out.
        self.store.save(checkpoint).await?;
        info!(run_id = %checkpoint.run_id, "EDD sub-review started");

        let context = ApprovalContext {
            run_id: checkpoint.run_id,
            kind: ApprovalKind::Edd,
            approval_token: approval_token.clone(),
            recipient: checkpoint.recipient.clone(),
            risk_score: 0,
            issue_count: 0,
            reminder_due_at: None,
        };
        let notified = match self.notifier.send(&context).await {
            Ok(message_id) => {
                if let Some(edd) = checkpoint.edd_stage.as_mut() {
                    edd.approval_sent_at = Some(Utc::now());
                }
                checkpoint.append_event("edd_approval_sent", json!({"message_id": message_id}));
                self.store.save(checkpoint).await?;
                true
            }
            Err(e) => {
                warn!(run_id = %checkpoint.run_id, error = %e, "EDD notification failed; stage remains started");
                false
            }
        };

        Ok(EddStartOutcome::Started {
            approval_token,
            notified,
        })
    }
}
