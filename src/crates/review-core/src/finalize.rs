//! Decision finalizer: the single write path for human decisions
//!
//! Every decision, whether it arrives over an email link or a web form,
//! lands here. The finalizer resolves the approval token, enforces the
//! write-once rule, conditionally opens the EDD sub-review on rejection,
//! and verifies its own write by reading the record back. The outcome is
//! always a structured [`FinalizeResult`], never an error: callers render
//! the status, they do not branch on `Err`.

use crate::capabilities::Notifier;
use crate::edd::{should_trigger_edd, EddStartOutcome, EddStarter, TriggerPolicy};
use chrono::Utc;
use review_checkpoint::{
    is_plausible_token, token_hint, validate_checkpoint, CheckpointStatus, CheckpointStore,
    Decision, EddStatus, FinalDecision, FinalizedVia, RunCheckpoint, MIN_REJECT_COMMENT_LEN,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome classification of a finalize attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeStatus {
    Finalized,
    AlreadyFinalized,
    Conflict,
    ConcurrentModification,
    NotFound,
    ValidationFailed,
    WriteFailed,
}

/// Provenance attached to a finalize call
#[derive(Debug, Clone)]
pub struct FinalizeMetadata {
    pub finalized_via: FinalizedVia,
    pub decided_by: Option<String>,
}

/// Structured result of a finalize attempt
#[derive(Debug, Clone, Serialize)]
pub struct FinalizeResult {
    pub status: FinalizeStatus,
    pub run_id: Option<Uuid>,
    pub requested_decision: Decision,
    /// The decision already on record, when one exists
    pub current_decision: Option<Decision>,
    /// Set when a write landed but read-back shows another writer also did
    pub concurrent: bool,
    pub edd_started: bool,
    pub final_decision: Option<FinalDecision>,
    pub messages: Vec<String>,
}

impl FinalizeResult {
    fn rejected(status: FinalizeStatus, requested: Decision, message: impl Into<String>) -> Self {
        Self {
            status,
            run_id: None,
            requested_decision: requested,
            current_decision: None,
            concurrent: false,
            edd_started: false,
            final_decision: None,
            messages: vec![message.into()],
        }
    }
}

/// Applies human decisions to paused runs
pub struct DecisionFinalizer {
    store: Arc<dyn CheckpointStore>,
    edd_starter: EddStarter,
}

impl DecisionFinalizer {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        notifier: Arc<dyn Notifier>,
        policy: TriggerPolicy,
    ) -> Self {
        let edd_starter = EddStarter::new(store.clone(), notifier, policy.clone());
        Self { store, edd_starter }
    }

    /// Finalize a decision identified by its approval token.
    ///
    /// The token may be the run's primary token or the EDD stage token; the
    /// finalizer routes to the matching gate. `reason` is mandatory (and at
    /// least [`MIN_REJECT_COMMENT_LEN`] trimmed characters) for rejections.
    pub async fn finalize(
        &self,
        token: &str,
        decision: Decision,
        reason: Option<&str>,
        metadata: FinalizeMetadata,
    ) -> FinalizeResult {
        if !is_plausible_token(token) {
            return FinalizeResult::rejected(
                FinalizeStatus::ValidationFailed,
                decision,
                "approval token has an implausible shape",
            );
        }
        let token = token.trim();

        let run_id = match self.store.resolve_token(token).await {
            Ok(Some(run_id)) => run_id,
            Ok(None) => {
                return FinalizeResult::rejected(
                    FinalizeStatus::NotFound,
                    decision,
                    "approval token does not resolve to a run",
                )
            }
            Err(e) => {
                return FinalizeResult::rejected(
                    FinalizeStatus::WriteFailed,
                    decision,
                    format!("token lookup failed: {e}"),
                )
            }
        };

        let mut checkpoint = match self.store.load(run_id).await {
            Ok(Some(cp)) => cp,
            Ok(None) => {
                return FinalizeResult::rejected(
                    FinalizeStatus::NotFound,
                    decision,
                    format!("run {run_id} has no checkpoint"),
                )
            }
            Err(e) => {
                return FinalizeResult::rejected(
                    FinalizeStatus::WriteFailed,
                    decision,
                    format!("checkpoint load failed: {e}"),
                )
            }
        };

        let is_edd_token = checkpoint
            .edd_stage
            .as_ref()
            .and_then(|edd| edd.approval_token.as_deref())
            .map(|t| t == token)
            .unwrap_or(false);

        if is_edd_token {
            self.finalize_edd(&mut checkpoint, decision, reason, metadata)
                .await
        } else {
            self.finalize_primary(&mut checkpoint, decision, reason, metadata)
                .await
        }
    }

    async fn finalize_primary(
        &self,
        checkpoint: &mut RunCheckpoint,
        decision: Decision,
        reason: Option<&str>,
        metadata: FinalizeMetadata,
    ) -> FinalizeResult {
        let run_id = checkpoint.run_id;
        let mut result = FinalizeResult {
            status: FinalizeStatus::Finalized,
            run_id: Some(run_id),
            requested_decision: decision,
            current_decision: checkpoint.decision,
            concurrent: false,
            edd_started: false,
            final_decision: checkpoint.final_decision,
            messages: Vec::new(),
        };

        // Write-once: an existing decision is never overwritten.
        if let Some(existing) = checkpoint.decision {
            if existing == decision {
                result.status = FinalizeStatus::AlreadyFinalized;
                result
                    .messages
                    .push("decision already recorded; no write performed".to_string());
            } else {
                result.status = FinalizeStatus::Conflict;
                result.messages.push(format!(
                    "requested {:?} but {:?} is already on record",
                    decision, existing
                ));
            }
            return result;
        }

        let reason_text = reason.map(str::trim).unwrap_or("");
        if decision == Decision::Reject && reason_text.len() < MIN_REJECT_COMMENT_LEN {
            result.status = FinalizeStatus::ValidationFailed;
            result.messages.push(format!(
                "rejection requires a reason of at least {MIN_REJECT_COMMENT_LEN} characters"
            ));
            return result;
        }

        // EDD first, so its stage is durable before the decision write.
        if decision == Decision::Reject && should_trigger_edd(reason_text, self.edd_starter.policy())
        {
            match self.edd_starter.start(checkpoint, reason_text).await {
                Ok(EddStartOutcome::Started { notified, .. }) => {
                    result.edd_started = true;
                    if !notified {
                        result
                            .messages
                            .push("EDD approval notification failed; will be retried on poll".to_string());
                    }
                }
                Ok(EddStartOutcome::AlreadyStarted) => {
                    result
                        .messages
                        .push("EDD sub-review was already started".to_string());
                }
                Err(e) => {
                    result.status = FinalizeStatus::WriteFailed;
                    result
                        .messages
                        .push(format!("starting EDD sub-review failed: {e}"));
                    return result;
                }
            }
        }

        let now = Utc::now();
        checkpoint.decision = Some(decision);
        checkpoint.decision_comment = if reason_text.is_empty() {
            None
        } else {
            Some(reason_text.to_string())
        };
        checkpoint.decided_at = Some(now);
        checkpoint.decided_by = metadata.decided_by.clone();
        checkpoint.finalized_via = Some(metadata.finalized_via);
        checkpoint.token_hint = Some(token_hint(&checkpoint.approval_token));

        // A rejection that opened an EDD stage keeps the run open; the EDD
        // decision completes it.
        if checkpoint.edd_started() && decision == Decision::Reject {
            result
                .messages
                .push("run stays open pending EDD approval".to_string());
        } else {
            checkpoint.status = CheckpointStatus::Completed;
            checkpoint.final_decision = Some(match decision {
                Decision::Approve => FinalDecision::Approved,
                Decision::Reject => FinalDecision::Rejected,
            });
        }
        checkpoint.append_event(
            "decision_finalized",
            json!({
                "decision": decision,
                "via": metadata.finalized_via,
                "token_hint": checkpoint.token_hint,
            }),
        );
        checkpoint.refresh_metadata();
        result.final_decision = checkpoint.final_decision;

        let violations = validate_checkpoint(checkpoint);
        if !violations.is_empty() {
            result.status = FinalizeStatus::ValidationFailed;
            result
                .messages
                .extend(violations.iter().map(|v| v.to_string()));
            return result;
        }

        if let Err(e) = self.store.save(checkpoint).await {
            warn!(run_id = %run_id, error = %e, "decision write failed");
            result.status = FinalizeStatus::WriteFailed;
            result.messages.push(format!("checkpoint save failed: {e}"));
            return result;
        }

        // Read-after-write: no CAS in the store, so a concurrent writer is
        // detected by comparing the persisted record with what we wrote.
        match self.store.load(run_id).await {
            Ok(Some(persisted)) => {
                if persisted.decision != Some(decision) {
                    result.status = FinalizeStatus::ConcurrentModification;
                    result.current_decision = persisted.decision;
                    result.final_decision = persisted.final_decision;
                    result.messages.push(
                        "another decision landed between write and verification".to_string(),
                    );
                } else if persisted.decided_at != checkpoint.decided_at
                    || persisted.decided_by != checkpoint.decided_by
                {
                    result.status = FinalizeStatus::AlreadyFinalized;
                    result.concurrent = true;
                    result.current_decision = persisted.decision;
                    result.final_decision = persisted.final_decision;
                    result.messages.push(
                        "same decision was finalized concurrently by another writer".to_string(),
                    );
                } else {
                    result.current_decision = Some(decision);
                    info!(run_id = %run_id, decision = ?decision, "decision finalized");
                }
            }
            Ok(None) | Err(_) => {
                result.status = FinalizeStatus::WriteFailed;
                result
                    .messages
                    .push("verification read after write failed".to_string());
            }
        }
        result
    }

    async fn finalize_edd(
        &self,
        checkpoint: &mut RunCheckpoint,
        decision: Decision,
        reason: Option<&str>,
        metadata: FinalizeMetadata,
    ) -> FinalizeResult {
        let run_id = checkpoint.run_id;
        let mut result = FinalizeResult {
            status: FinalizeStatus::Finalized,
            run_id: Some(run_id),
            requested_decision: decision,
            current_decision: None,
            concurrent: false,
            edd_started: true,
            final_decision: checkpoint.final_decision,
            messages: Vec::new(),
        };

        let existing = checkpoint.edd_stage.as_ref().and_then(|edd| edd.decision);
        if let Some(existing) = existing {
            result.current_decision = Some(existing);
            if existing == decision {
                result.status = FinalizeStatus::AlreadyFinalized;
                result
                    .messages
                    .push("EDD decision already recorded; no write performed".to_string());
            } else {
                result.status = FinalizeStatus::Conflict;
                result.messages.push(format!(
                    "requested {:?} but EDD stage already decided {:?}",
                    decision, existing
                ));
            }
            return result;
        }

        let reason_text = reason.map(str::trim).unwrap_or("");
        if decision == Decision::Reject && reason_text.len() < MIN_REJECT_COMMENT_LEN {
            result.status = FinalizeStatus::ValidationFailed;
            result.messages.push(format!(
                "EDD rejection requires a reason of at least {MIN_REJECT_COMMENT_LEN} characters"
            ));
            return result;
        }

        let now = Utc::now();
        let decided_by = metadata.decided_by.clone();
        {
            // finalize() only routes here when the stage exists
            let edd = checkpoint.edd_stage.as_mut().unwrap();
            edd.decision = Some(decision);
            edd.decided_at = Some(now);
            edd.decided_by = decided_by;
            edd.status = match decision {
                Decision::Approve => EddStatus::Approved,
                Decision::Reject => EddStatus::Rejected,
            };
        }

        // The EDD verdict completes the whole run. An approved EDD on a
        // rejected primary decision yields the compound outcome.
        checkpoint.status = CheckpointStatus::Completed;
        checkpoint.final_decision = Some(match decision {
            Decision::Approve => FinalDecision::ApprovedWithEdd,
            Decision::Reject => FinalDecision::Rejected,
        });
        checkpoint.append_event(
            "edd_decision_finalized",
            json!({"decision": decision, "via": metadata.finalized_via}),
        );
        checkpoint.refresh_metadata();
        result.final_decision = checkpoint.final_decision;

        let violations = validate_checkpoint(checkpoint);
        if !violations.is_empty() {
            result.status = FinalizeStatus::ValidationFailed;
            result
                .messages
                .extend(violations.iter().map(|v| v.to_string()));
            return result;
        }

        if let Err(e) = self.store.save(checkpoint).await {
            warn!(run_id = %run_id, error = %e, "EDD decision write failed");
            result.status = FinalizeStatus::WriteFailed;
            result.messages.push(format!("checkpoint save failed: {e}"));
            return result;
        }

        match self.store.load(run_id).await {
            Ok(Some(persisted)) => {
                let persisted_decision = persisted.edd_stage.as_ref().and_then(|e| e.decision);
                let persisted_at = persisted.edd_stage.as_ref().and_then(|e| e.decided_at);
                if persisted_decision != Some(decision) {
                    result.status = FinalizeStatus::ConcurrentModification;
                    result.current_decision = persisted_decision;
                    result.final_decision = persisted.final_decision;
                    result.messages.push(
                        "another EDD decision landed between write and verification".to_string(),
                    );
                } else if persisted_at != Some(now) {
                    result.status = FinalizeStatus::AlreadyFinalized;
                    result.concurrent = true;
                    result.current_decision = persisted_decision;
                    result.messages.push(
                        "same EDD decision was finalized concurrently by another writer"
                            .to_string(),
                    );
                } else {
                    result.current_decision = Some(decision);
                    info!(run_id = %run_id, decision = ?decision, "EDD decision finalized");
                }
            }
            Ok(None) | Err(_) => {
                result.status = FinalizeStatus::WriteFailed;
                result
                    .messages
                    .push("verification read after write failed".to_string());
            }
        }
        result
    }
}
