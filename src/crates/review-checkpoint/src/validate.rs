//! Structural validation enforced before any durable write
//!
//! Validation never mutates the record and reports every violation it finds
//! as a field-level message, so callers can reject the whole write without
//! persisting a partially-valid record.

use crate::record::{Decision, RunCheckpoint};

/// A single field-level validation message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Minimum trimmed length of a rejection comment
pub const MIN_REJECT_COMMENT_LEN: usize = 10;

/// Check that a string is exactly 32 lowercase hex characters
pub fn is_approval_token(token: &str) -> bool {
    token.len() == 32
        && token
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Shape check for externally supplied tokens before any lookup:
/// trimmed length 16..=256, printable ASCII only.
pub fn is_plausible_token(raw: &str) -> bool {
    let trimmed = raw.trim();
    (16..=256).contains(&trimmed.len())
        && trimmed.chars().all(|c| c.is_ascii_graphic())
}

/// Validate the fully-merged checkpoint against the structural rules.
/// Returns every violation found; an empty vec means the record may be
/// written.
pub fn validate_checkpoint(checkpoint: &RunCheckpoint) -> Vec<FieldViolation> {
    let mut violations = Vec::new();

    if checkpoint.run_id.get_version_num() != 4 {
        violations.push(FieldViolation::new("run_id", "must be a v4 UUID"));
    }
    if checkpoint.graph_id.trim().is_empty() {
        violations.push(FieldViolation::new("graph_id", "must not be empty"));
    }

    if !is_approval_token(&checkpoint.approval_token) {
        violations.push(FieldViolation::new(
            "approval_token",
            "must be exactly 32 lowercase hex characters",
        ));
    }

    if let Some(hint) = &checkpoint.token_hint {
        if hint.len() != 8 {
            violations.push(FieldViolation::new(
                "token_hint",
                "must be exactly 8 characters",
            ));
        }
    }

    // Cross-field rule: a reject decision requires a substantive comment.
    if checkpoint.decision == Some(Decision::Reject) {
        let comment_len = checkpoint
            .decision_comment
            .as_deref()
            .map(|c| c.trim().len())
            .unwrap_or(0);
        if comment_len < MIN_REJECT_COMMENT_LEN {
            violations.push(FieldViolation::new(
                "decision_comment",
                format!(
                    "rejection requires a comment of at least {MIN_REJECT_COMMENT_LEN} characters"
                ),
            ));
        }
    }

    if checkpoint.decision.is_some() {
        if checkpoint.decided_at.is_none() {
            violations.push(FieldViolation::new(
                "decided_at",
                "required once a decision is recorded",
            ));
        }
        if checkpoint.finalized_via.is_none() {
            violations.push(FieldViolation::new(
                "finalized_via",
                "required once a decision is recorded",
            ));
        }
    }

    if let Some(edd) = &checkpoint.edd_stage {
        if let Some(token) = &edd.approval_token {
            if !is_approval_token(token) {
                violations.push(FieldViolation::new(
                    "edd_stage.approval_token",
                    "must be exactly 32 lowercase hex characters",
                ));
            }
            if *token == checkpoint.approval_token {
                violations.push(FieldViolation::new(
                    "edd_stage.approval_token",
                    "must differ from the primary approval token",
                ));
            }
        }
    }

    violations
}
