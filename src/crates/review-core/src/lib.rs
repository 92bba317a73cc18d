//! Document-review workflow engine
//!
//! Executes a fixed review graph over uploaded documents: topic extraction,
//! risk triage with route banding, a parallel check fanout, risk-signal
//! assessment, a durable human review gate, bounded reflection, and a
//! routing decision. Runs pause at the gate into a
//! [`RunCheckpoint`](review_checkpoint::RunCheckpoint) and resume from it;
//! human decisions are applied through the write-once
//! [`DecisionFinalizer`], which may open a nested EDD sub-review on
//! rejection.
//!
//! External collaborators (notification delivery, reflection text
//! generation, risk-signal analysis) attach through the traits in
//! [`capabilities`]; every capability failure degrades to a deterministic
//! local fallback.

pub mod capabilities;
pub mod checks;
pub mod config;
pub mod definition;
pub mod edd;
pub mod error;
pub mod finalize;
pub mod orchestrator;
pub mod reflection;
pub mod risk;
pub mod state;
pub mod topics;
pub mod trace;

pub use capabilities::{
    ApprovalContext, ApprovalKind, LogNotifier, Notifier, ReflectionProvider, RiskSignalAnalyzer,
};
pub use checks::{run_checks, CheckOutcome};
pub use config::EngineConfig;
pub use definition::{DefinitionChange, EdgeDefinition, GraphDefinition, NodeDefinition};
pub use edd::{should_trigger_edd, EddStartOutcome, EddStarter, TriggerPolicy};
pub use error::{CapabilityError, EngineError, Result};
pub use finalize::{DecisionFinalizer, FinalizeMetadata, FinalizeResult, FinalizeStatus};
pub use orchestrator::{
    HumanDecision, ReviewOrchestrator, RunOutcome, RunReport, StartOptions, WaitingHuman,
};
pub use reflection::{MockReflectionProvider, ReflectionEngine, ReflectionOutcome};
pub use risk::{route_for_score, triage, PatternRiskAnalyzer, Triage};
pub use state::{
    Conflict, CoverageGap, CoverageLevel, FeatureFlags, GraphState, Issue, IssueCategory,
    IssueSeverity, NextAction, ReflectionState, RiskSignal, RoutePath, SignalSeverity,
    TopicSection,
};
pub use topics::extract_sections;
pub use trace::{NodeSpan, Trace, TraceEvent, TraceStatus};
