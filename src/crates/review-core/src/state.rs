//! Transient, rehydratable execution context for one run
//!
//! [`GraphState`] is everything a run knows between stages. It is serialized
//! into the checkpoint at pause time and rehydrated verbatim on resume; the
//! engine never resumes from anything else.

use review_checkpoint::DocumentInput;
use serde::{Deserialize, Serialize};

/// Route path derived from the triage risk score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutePath {
    Fast,
    Crosscheck,
    Escalate,
    HumanGate,
}

impl RoutePath {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutePath::Fast => "fast",
            RoutePath::Crosscheck => "crosscheck",
            RoutePath::Escalate => "escalate",
            RoutePath::HumanGate => "human_gate",
        }
    }
}

/// Coverage level of a topic across the uploaded documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageLevel {
    Complete,
    Partial,
    Missing,
}

/// A classified slice of document content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSection {
    pub topic_id: String,
    /// Concatenated matching content across documents
    pub content: String,
    /// Evidence snippets (matched lines, truncated)
    pub evidence: Vec<String>,
    pub coverage: CoverageLevel,
}

/// Issue categories the human gate inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    KycRisk,
    Pep,
    Sanctions,
    Contradiction,
    CoverageGap,
    PolicyFlag,
    RiskSignal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueSeverity {
    Fail,
    Warn,
    Info,
}

/// An accumulated finding that may force the human gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub category: IssueCategory,
    pub severity: IssueSeverity,
    pub message: String,
    pub source_node: String,
}

impl Issue {
    /// Whether this issue alone forces a pause at the human gate
    pub fn forces_human_review(&self) -> bool {
        self.severity == IssueSeverity::Fail
            && matches!(
                self.category,
                IssueCategory::KycRisk | IssueCategory::Pep | IssueCategory::Sanctions
            )
    }
}

/// Severity of a pluggable risk-signal analyzer finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSeverity {
    High,
    Medium,
    Low,
}

/// Output of the risk-signal analyzer capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSignal {
    pub severity: SignalSeverity,
    pub label: String,
    pub rationale: String,
}

/// A detected contradiction between statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub topic_id: String,
    pub left: String,
    pub right: String,
    pub detail: String,
}

/// A topic whose coverage falls short
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageGap {
    pub topic_id: String,
    pub level: CoverageLevel,
    pub note: String,
}

/// Feature flags carried through a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default)]
    pub reflection: bool,
    #[serde(default)]
    pub negotiation: bool,
    #[serde(default)]
    pub memory: bool,
    #[serde(default)]
    pub remote_skills: bool,
}

/// Plan actions a reflection may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Skip,
    RerunBatchReview,
    SwitchToSectionReview,
    AskHumanForScope,
    TightenPolicy,
}

/// Reflection loop state; `replan_count` is capped at 1 per run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReflectionState {
    pub enabled: bool,
    pub replan_count: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_should_replan: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_confidence: Option<f64>,
    #[serde(default)]
    pub last_plan: Vec<NextAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<NextAction>,
}

/// Full transient execution context, serialized into checkpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    pub documents: Vec<DocumentInput>,
    pub sections: Vec<TopicSection>,

    pub risk_score: u8,
    pub risk_reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RoutePath>,
    pub risk_signals: Vec<RiskSignal>,

    pub conflicts: Vec<Conflict>,
    pub coverage_gaps: Vec<CoverageGap>,
    pub policy_flags: Vec<String>,
    pub issues: Vec<Issue>,

    pub requires_human_review: bool,
    pub execution_terminated: bool,
    /// Escalation gates opened so far; capped at one per run, tracked
    /// independently of the primary human review gate.
    pub escalation_gates: u8,

    pub flags: FeatureFlags,
    pub reflection: ReflectionState,
}

impl GraphState {
    pub fn new(documents: Vec<DocumentInput>, flags: FeatureFlags) -> Self {
        Self {
            documents,
            flags,
            reflection: ReflectionState {
                enabled: flags.reflection,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn push_issue(
        &mut self,
        category: IssueCategory,
        severity: IssueSeverity,
        message: impl Into<String>,
        source_node: &str,
    ) {
        self.issues.push(Issue {
            category,
            severity,
            message: message.into(),
            source_node: source_node.to_string(),
        });
    }
}
