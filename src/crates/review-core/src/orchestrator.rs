//! The review orchestrator: drives a run through the graph
//!
//! `start` executes the pre-gate stages (topic extraction, triage, parallel
//! checks, risk-signal assessment) and either completes immediately or
//! pauses at the human review gate, persisting a [`RunCheckpoint`]. `resume`
//! rehydrates the state from the checkpoint and executes the post-gate
//! stages (reflection, routing, finalize).
//!
//! Capability failures (notifier, analyzer, reflection provider) are
//! absorbed; the only errors that propagate are checkpoint persistence
//! failures and resume-protocol violations.

use crate::capabilities::{
    ApprovalContext, ApprovalKind, LogNotifier, Notifier, RiskSignalAnalyzer,
};
use crate::checks::run_checks;
use crate::config::EngineConfig;
use crate::definition::GraphDefinition;
use crate::error::{EngineError, Result};
use crate::reflection::{MockReflectionProvider, ReflectionEngine};
use crate::risk::{triage, PatternRiskAnalyzer};
use crate::state::{
    FeatureFlags, GraphState, Issue, IssueCategory, IssueSeverity, NextAction, RoutePath,
    SignalSeverity,
};
use crate::topics::extract_sections;
use crate::trace::{NodeSpan, Trace, TraceStatus};
use chrono::Utc;
use review_checkpoint::{
    CheckpointStatus, CheckpointStore, Decision, DocumentInput, ResumeCache, RunCheckpoint,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const NODE_TOPICS: &str = "topic_extractor";
const NODE_RISK: &str = "risk_classifier";
const NODE_CHECKS: &str = "parallel_checks";
const NODE_SIGNALS: &str = "risk_signal_assessment";
const NODE_GATE: &str = "human_review_gate";
const NODE_ESCALATION: &str = "escalation_gate";
const NODE_ROUTING: &str = "routing_decision";
const NODE_FINALIZE: &str = "finalize";

/// Options supplied when starting a run
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub flags: FeatureFlags,
    /// Force the human gate regardless of score and issues
    pub requires_human_review: bool,
    pub recipient: Option<String>,
}

/// A decision supplied directly to `resume` (web-form flow). Used for flow
/// control only; the durable decision fields are written exclusively by the
/// [`DecisionFinalizer`](crate::finalize::DecisionFinalizer).
#[derive(Debug, Clone)]
pub struct HumanDecision {
    pub decision: Decision,
    pub comment: Option<String>,
    pub decided_by: Option<String>,
}

/// Waiting-state handle returned when a run pauses
#[derive(Debug, Clone)]
pub struct WaitingHuman {
    pub run_id: Uuid,
    pub approval_token: String,
    pub paused_at_node: String,
    pub risk_score: u8,
    pub reminder_due_at: Option<chrono::DateTime<Utc>>,
    pub notified: bool,
}

/// Final report of a run that reached the finalize stage
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub risk_score: u8,
    pub route: Option<RoutePath>,
    pub issues: Vec<Issue>,
    pub conflicts: Vec<crate::state::Conflict>,
    pub coverage_gaps: Vec<crate::state::CoverageGap>,
    pub policy_flags: Vec<String>,
    pub execution_terminated: bool,
    /// Set when a pre-gate stage failed and the run produced a best-effort
    /// partial result instead of an error
    pub degraded: bool,
    pub trace: Trace,
    pub graph_metadata: Option<Value>,
}

/// Outcome of `start` or `resume`
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(Box<RunReport>),
    WaitingHuman(WaitingHuman),
}

/// Drives document-review runs through the workflow graph
pub struct ReviewOrchestrator {
    store: Arc<dyn CheckpointStore>,
    notifier: Arc<dyn Notifier>,
    analyzer: Option<Arc<dyn RiskSignalAnalyzer>>,
    fallback_analyzer: PatternRiskAnalyzer,
    reflection: ReflectionEngine,
    config: EngineConfig,
    resume_cache: ResumeCache,
}

impl ReviewOrchestrator {
    pub fn new(store: Arc<dyn CheckpointStore>, config: EngineConfig) -> Self {
        let reflection = ReflectionEngine::new(
            Arc::new(MockReflectionProvider),
            config.reflection_timeout,
        );
        let resume_cache = ResumeCache::new(config.resume_cache.clone());
        Self {
            store,
            notifier: Arc::new(LogNotifier),
            analyzer: None,
            fallback_analyzer: PatternRiskAnalyzer::new(),
            reflection,
            config,
            resume_cache,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn RiskSignalAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn with_reflection_provider(
        mut self,
        provider: Arc<dyn crate::capabilities::ReflectionProvider>,
    ) -> Self {
        self.reflection = ReflectionEngine::new(provider, self.config.reflection_timeout);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a new review run over the supplied documents
    #[instrument(skip_all, fields(documents = documents.len()))]
    pub async fn start(
        &self,
        documents: Vec<DocumentInput>,
        options: StartOptions,
    ) -> Result<RunOutcome> {
        let run_id = Uuid::new_v4();
        let mut state = GraphState::new(documents, options.flags);
        state.requires_human_review = options.requires_human_review;
        let mut trace = Trace::new();

        if let Err(e) = self.run_pre_gate(&mut state, &mut trace).await {
            warn!(run_id = %run_id, error = %e, "pre-gate stage failed; returning degraded result");
            state.execution_terminated = true;
            // Degraded responses carry empty findings; the cause lives in
            // the trace, not in a gate-relevant issue.
            trace.push(
                NodeSpan::begin(NODE_FINALIZE)
                    .reason(format!("review degraded: {e}"))
                    .finish(TraceStatus::Executed),
            );
            return Ok(RunOutcome::Completed(Box::new(
                self.report(run_id, state, trace, true),
            )));
        }

        let forces_gate = state.issues.iter().any(Issue::forces_human_review);
        let should_pause = state.requires_human_review
            || forces_gate
            || state.risk_score > 80
            || state.route == Some(RoutePath::HumanGate);

        if should_pause {
            let reason = if state.requires_human_review {
                "human review requested by caller"
            } else if forces_gate {
                "blocking issue requires human review"
            } else {
                "risk score in the human-gate band"
            };
            let waiting = self
                .pause(run_id, &state, &mut trace, options.recipient, NODE_GATE, reason)
                .await?;
            return Ok(RunOutcome::WaitingHuman(waiting));
        }

        trace.push(
            NodeSpan::begin(NODE_GATE)
                .decision("skip")
                .reason("no gate condition met")
                .finish(TraceStatus::Skipped),
        );
        self.run_post_gate(run_id, state, trace, None, options.recipient)
            .await
    }

    /// Resume a paused run. The decision comes from the checkpoint (email
    /// flow, written by the finalizer) or from `supplied` (web-form flow);
    /// with neither, resume refuses.
    #[instrument(skip_all, fields(run_id = %run_id))]
    pub async fn resume(
        &self,
        run_id: Uuid,
        supplied: Option<HumanDecision>,
    ) -> Result<RunOutcome> {
        // The durable store is authoritative; the cache only rescues the
        // legacy path when the store no longer has the record.
        let cached = self.resume_cache.get(run_id).await;
        let mut checkpoint = match self.store.load(run_id).await? {
            Some(cp) => cp,
            None => cached.ok_or(EngineError::RunNotFound(run_id))?,
        };

        if checkpoint.resumed_at.is_some() || checkpoint.status == CheckpointStatus::Resumed {
            return Err(EngineError::NotPaused {
                run_id,
                status: "resumed".to_string(),
            });
        }
        if checkpoint.status == CheckpointStatus::Failed {
            return Err(EngineError::NotPaused {
                run_id,
                status: "failed".to_string(),
            });
        }
        // Completed is resumable exactly when the finalizer has recorded a
        // decision and the post-gate stages have not run yet.
        if checkpoint.status == CheckpointStatus::Completed && checkpoint.decision.is_none() {
            return Err(EngineError::NotPaused {
                run_id,
                status: "completed".to_string(),
            });
        }
        if checkpoint.is_stale(self.config.checkpoint_max_age, Utc::now()) {
            return Err(EngineError::Stale(run_id));
        }

        let decision = checkpoint
            .decision
            .or(supplied.as_ref().map(|d| d.decision))
            .ok_or(EngineError::DecisionRequired(run_id))?;

        let mut state: GraphState = serde_json::from_value(checkpoint.graph_state.clone())?;
        let mut trace = Trace::new();
        let paused_node = checkpoint
            .paused_at_node_id
            .clone()
            .unwrap_or_else(|| NODE_GATE.to_string());

        checkpoint.resumed_at = Some(Utc::now());
        if checkpoint.status == CheckpointStatus::Paused {
            checkpoint.status = CheckpointStatus::Resumed;
        }
        checkpoint.append_event(
            "run_resumed",
            json!({"node": paused_node, "decision": decision}),
        );
        checkpoint.refresh_metadata();
        self.store.save(&checkpoint).await?;
        self.resume_cache.remove(run_id).await;

        trace.push(
            NodeSpan::begin(paused_node)
                .decision(match decision {
                    Decision::Approve => "approve",
                    Decision::Reject => "reject",
                })
                .finish(TraceStatus::Executed),
        );

        if decision == Decision::Reject {
            info!(run_id = %run_id, "run rejected at the gate; terminating");
            state.execution_terminated = true;
            trace.push(
                NodeSpan::begin(NODE_FINALIZE)
                    .reason("terminated by rejection")
                    .finish(TraceStatus::Executed),
            );
            return Ok(RunOutcome::Completed(Box::new(
                self.report(run_id, state, trace, false),
            )));
        }

        self.run_post_gate(run_id, state, trace, Some(checkpoint), None)
            .await
    }

    /// Stages 1 through 4: extraction, triage, checks, signal assessment
    async fn run_pre_gate(&self, state: &mut GraphState, trace: &mut Trace) -> Result<()> {
        if state.documents.is_empty() {
            trace.push(
                NodeSpan::begin(NODE_TOPICS)
                    .reason("no documents supplied")
                    .finish(TraceStatus::Failed),
            );
            return Err(EngineError::Stage {
                stage: NODE_TOPICS.to_string(),
                message: "no documents supplied".to_string(),
            });
        }

        let span = NodeSpan::begin(NODE_TOPICS);
        state.sections = extract_sections(&state.documents);
        trace.push(
            span.outputs(format!("{} sections", state.sections.len()))
                .finish(TraceStatus::Executed),
        );

        let span = NodeSpan::begin(NODE_RISK);
        let triage = triage(&state.sections, &state.documents);
        state.risk_score = triage.score;
        state.risk_reasons = triage.reasons;
        state.route = Some(triage.route);
        trace.push(
            span.decision(triage.route.as_str())
                .outputs(format!("risk {}", triage.score))
                .finish(TraceStatus::Executed),
        );

        self.run_check_stage(state, trace).await;
        self.run_signal_stage(state, trace).await;
        Ok(())
    }

    async fn run_check_stage(&self, state: &mut GraphState, trace: &mut Trace) {
        let route = state.route.unwrap_or(RoutePath::Escalate);
        let span = NodeSpan::begin(NODE_CHECKS);
        let outcome = run_checks(route, &state.sections, &state.documents).await;

        for conflict in &outcome.conflicts {
            state.push_issue(
                IssueCategory::Contradiction,
                IssueSeverity::Warn,
                conflict.detail.clone(),
                NODE_CHECKS,
            );
        }
        for gap in &outcome.coverage_gaps {
            let severity = match gap.level {
                crate::state::CoverageLevel::Missing => IssueSeverity::Warn,
                _ => IssueSeverity::Info,
            };
            state.push_issue(
                IssueCategory::CoverageGap,
                severity,
                format!("topic '{}': {}", gap.topic_id, gap.note),
                NODE_CHECKS,
            );
        }
        for flag in &outcome.policy_flags {
            state.push_issue(
                IssueCategory::PolicyFlag,
                IssueSeverity::Warn,
                format!("policy term '{flag}' present"),
                NODE_CHECKS,
            );
        }
        let summary = format!(
            "{} conflicts, {} gaps, {} policy flags ({} checks run)",
            outcome.conflicts.len(),
            outcome.coverage_gaps.len(),
            outcome.policy_flags.len(),
            outcome.executed.len(),
        );
        state.conflicts = outcome.conflicts;
        state.coverage_gaps = outcome.coverage_gaps;
        state.policy_flags = outcome.policy_flags;
        trace.push(span.outputs(summary).finish(TraceStatus::Executed));
    }

    async fn run_signal_stage(&self, state: &mut GraphState, trace: &mut Trace) {
        let span = NodeSpan::begin(NODE_SIGNALS);
        let primary = match &self.analyzer {
            Some(analyzer) => analyzer.analyze(&state.sections, &state.documents).await,
            None => self
                .fallback_analyzer
                .analyze(&state.sections, &state.documents)
                .await,
        };
        let signals = match primary {
            Ok(signals) => signals,
            Err(e) => {
                warn!(error = %e, "risk-signal analyzer failed; using pattern fallback");
                self.fallback_analyzer
                    .analyze(&state.sections, &state.documents)
                    .await
                    .unwrap_or_default()
            }
        };

        for signal in &signals {
            match signal.severity {
                SignalSeverity::High => {
                    let category = match signal.label.as_str() {
                        "sanctions_exposure" => IssueCategory::Sanctions,
                        "pep_exposure" => IssueCategory::Pep,
                        _ => IssueCategory::KycRisk,
                    };
                    state.push_issue(
                        category,
                        IssueSeverity::Fail,
                        signal.rationale.clone(),
                        NODE_SIGNALS,
                    );
                }
                SignalSeverity::Medium => {
                    state.push_issue(
                        IssueCategory::RiskSignal,
                        IssueSeverity::Warn,
                        format!("{}: {}", signal.label, signal.rationale),
                        NODE_SIGNALS,
                    );
                }
                SignalSeverity::Low => {
                    state.push_issue(
                        IssueCategory::RiskSignal,
                        IssueSeverity::Info,
                        format!("{}: {}", signal.label, signal.rationale),
                        NODE_SIGNALS,
                    );
                }
            }
        }
        let summary = format!("{} signals", signals.len());
        state.risk_signals = signals;
        trace.push(span.outputs(summary).finish(TraceStatus::Executed));
    }

    /// Persist a checkpoint and send the approval request (best-effort)
    async fn pause(
        &self,
        run_id: Uuid,
        state: &GraphState,
        trace: &mut Trace,
        recipient: Option<String>,
        node: &str,
        reason: &str,
    ) -> Result<WaitingHuman> {
        let recipient = recipient.or_else(|| self.config.default_recipient.clone());
        let mut checkpoint = RunCheckpoint::new(
            run_id,
            self.config.graph_id.clone(),
            self.config.graph_version.clone(),
            serde_json::to_value(state)?,
            state.documents.clone(),
            node,
        )
        .with_current_node(node)
        .with_reminder_in(self.config.reminder_interval);
        if let Some(recipient) = recipient {
            checkpoint = checkpoint.with_recipient(recipient);
        }
        checkpoint.append_event(
            "run_paused",
            json!({"node": node, "reason": reason, "risk_score": state.risk_score}),
        );
        checkpoint.refresh_metadata();
        self.store.save(&checkpoint).await?;
        self.finish_pause(state, trace, checkpoint, node, reason, ApprovalKind::Primary)
            .await
    }

    /// Re-pause an already-checkpointed run at the escalation gate, reusing
    /// its approval token.
    async fn pause_escalation(
        &self,
        state: &GraphState,
        trace: &mut Trace,
        mut checkpoint: RunCheckpoint,
        reason: &str,
    ) -> Result<WaitingHuman> {
        checkpoint.status = CheckpointStatus::Paused;
        checkpoint.paused_at = Utc::now();
        checkpoint.resumed_at = None;
        checkpoint.paused_at_node_id = Some(NODE_ESCALATION.to_string());
        checkpoint.current_node_id = Some(NODE_ESCALATION.to_string());
        checkpoint.graph_state = serde_json::to_value(state)?;
        checkpoint.reminder_due_at = Some(checkpoint.paused_at + self.config.reminder_interval);
        checkpoint.append_event("escalation_gate_opened", json!({"reason": reason}));
        checkpoint.refresh_metadata();
        self.store.save(&checkpoint).await?;
        self.finish_pause(
            state,
            trace,
            checkpoint,
            NODE_ESCALATION,
            reason,
            ApprovalKind::Primary,
        )
        .await
    }

    async fn finish_pause(
        &self,
        state: &GraphState,
        trace: &mut Trace,
        mut checkpoint: RunCheckpoint,
        node: &str,
        reason: &str,
        kind: ApprovalKind,
    ) -> Result<WaitingHuman> {
        let context = ApprovalContext {
            run_id: checkpoint.run_id,
            kind,
            approval_token: checkpoint.approval_token.clone(),
            recipient: checkpoint.recipient.clone(),
            risk_score: state.risk_score,
            issue_count: state.issues.len(),
            reminder_due_at: checkpoint.reminder_due_at,
        };
        let notified = match self.notifier.send(&context).await {
            Ok(message_id) => {
                checkpoint.approval_sent = true;
                checkpoint.approval_sent_at = Some(Utc::now());
                checkpoint.append_event("approval_sent", json!({"message_id": message_id}));
                checkpoint.refresh_metadata();
                self.store.save(&checkpoint).await?;
                true
            }
            Err(e) => {
                warn!(run_id = %checkpoint.run_id, error = %e, "approval notification failed; run stays paused");
                false
            }
        };
        self.resume_cache.insert(checkpoint.clone()).await;

        trace.push(
            NodeSpan::begin(node)
                .decision("pause")
                .reason(reason)
                .finish(TraceStatus::Waiting),
        );
        info!(run_id = %checkpoint.run_id, node, "run paused for human review");

        Ok(WaitingHuman {
            run_id: checkpoint.run_id,
            approval_token: checkpoint.approval_token.clone(),
            paused_at_node: node.to_string(),
            risk_score: state.risk_score,
            reminder_due_at: checkpoint.reminder_due_at,
            notified,
        })
    }

    /// Stages after the gate: reflection, routing decision, finalize.
    /// `recipient` is only consulted when a run that never paused has to
    /// open the escalation gate and mint its first checkpoint.
    async fn run_post_gate(
        &self,
        run_id: Uuid,
        mut state: GraphState,
        mut trace: Trace,
        checkpoint: Option<RunCheckpoint>,
        recipient: Option<String>,
    ) -> Result<RunOutcome> {
        let outcome = self.reflection.evaluate(&mut state, &mut trace).await;

        let span = NodeSpan::begin(NODE_ROUTING);
        match state.reflection.next_action {
            Some(NextAction::RerunBatchReview) if outcome.should_replan => {
                trace.push(
                    span.decision("rerun_batch_review")
                        .reason(outcome.reason.clone())
                        .finish(TraceStatus::Executed),
                );
                // One bounded replan: rerun the check fanout on the same
                // sections and refresh the aggregates.
                state.conflicts.clear();
                state.coverage_gaps.clear();
                state.policy_flags.clear();
                self.run_check_stage(&mut state, &mut trace).await;
            }
            Some(NextAction::AskHumanForScope) => {
                if state.escalation_gates >= 1 {
                    trace.push(
                        span.decision("continue")
                            .reason("escalation gate budget exhausted")
                            .finish(TraceStatus::Executed),
                    );
                } else {
                    state.escalation_gates += 1;
                    trace.push(
                        span.decision("ask_human_for_scope")
                            .reason(outcome.reason.clone())
                            .finish(TraceStatus::Executed),
                    );
                    // A run that paused before reuses its checkpoint and
                    // token; a run that never paused mints its first one.
                    let waiting = match checkpoint {
                        Some(checkpoint) => {
                            self.pause_escalation(&state, &mut trace, checkpoint, &outcome.reason)
                                .await?
                        }
                        None => {
                            self.pause(
                                run_id,
                                &state,
                                &mut trace,
                                recipient,
                                NODE_ESCALATION,
                                &outcome.reason,
                            )
                            .await?
                        }
                    };
                    return Ok(RunOutcome::WaitingHuman(waiting));
                }
            }
            _ => {
                trace.push(span.decision("continue").finish(TraceStatus::Executed));
            }
        }

        trace.push(
            NodeSpan::begin(NODE_FINALIZE)
                .outputs(format!(
                    "{} issues, risk {}",
                    state.issues.len(),
                    state.risk_score
                ))
                .finish(TraceStatus::Executed),
        );
        Ok(RunOutcome::Completed(Box::new(
            self.report(run_id, state, trace, false),
        )))
    }

    fn report(&self, run_id: Uuid, state: GraphState, trace: Trace, degraded: bool) -> RunReport {
        let graph_metadata = self.config.attach_graph_metadata.then(|| {
            let definition = GraphDefinition::document_review(&self.config.graph_version);
            json!({
                "graph_id": definition.graph_id,
                "version": definition.version,
                "checksum": definition.checksum(),
            })
        });
        RunReport {
            run_id,
            risk_score: state.risk_score,
            route: state.route,
            issues: state.issues,
            conflicts: state.conflicts,
            coverage_gaps: state.coverage_gaps,
            policy_flags: state.policy_flags,
            execution_terminated: state.execution_terminated,
            degraded,
            trace,
            graph_metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use review_checkpoint::InMemoryCheckpointStore;

    fn doc(text: &str) -> DocumentInput {
        DocumentInput {
            id: "d1".into(),
            filename: "profile.txt".into(),
            text: text.into(),
            content_hint: None,
        }
    }

    fn clean_corpus() -> Vec<DocumentInput> {
        vec![doc(
            "The beneficial owner and sole shareholder is named with a passport and \
             date of birth on record. Source of funds is salary income from the \
             business, a retail trading company with documented revenue and \
             customers. No sanction or watchlist concerns. The director and \
             registered signatory are listed in the incorporation papers.",
        )]
    }

    fn orchestrator(store: Arc<InMemoryCheckpointStore>) -> ReviewOrchestrator {
        ReviewOrchestrator::new(store, EngineConfig::default())
    }

    #[tokio::test]
    async fn clean_documents_complete_without_pausing() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let outcome = orchestrator(store.clone())
            .start(clean_corpus(), StartOptions::default())
            .await
            .unwrap();

        let report = match outcome {
            RunOutcome::Completed(report) => report,
            RunOutcome::WaitingHuman(w) => panic!("unexpected pause: {w:?}"),
        };
        assert!(!report.degraded);
        assert!(report.risk_score <= 80);
        assert!(report
            .trace
            .events()
            .iter()
            .any(|e| e.node == NODE_FINALIZE));
    }

    #[tokio::test]
    async fn sanction_hits_force_the_human_gate() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let documents = vec![doc(
            "Counterparty is on a sanction watchlist and is a politically exposed \
             person holding bearer shares in an offshore shell company.",
        )];
        let outcome = orchestrator(store.clone())
            .start(documents, StartOptions::default())
            .await
            .unwrap();

        let waiting = match outcome {
            RunOutcome::WaitingHuman(w) => w,
            RunOutcome::Completed(r) => panic!("expected pause, got report: {r:?}"),
        };
        assert_eq!(waiting.paused_at_node, NODE_GATE);
        assert!(waiting.notified);
        assert!(waiting.reminder_due_at.is_some());

        let persisted = store.load(waiting.run_id).await.unwrap().unwrap();
        assert_eq!(persisted.status, CheckpointStatus::Paused);
        assert!(persisted.approval_sent);
        assert!(persisted.event_log.iter().any(|e| e.event == "run_paused"));
    }

    #[tokio::test]
    async fn explicit_review_request_pauses_even_clean_runs() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let outcome = orchestrator(store)
            .start(
                clean_corpus(),
                StartOptions {
                    requires_human_review: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::WaitingHuman(_)));
    }

    #[tokio::test]
    async fn empty_document_set_degrades_instead_of_failing() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let outcome = orchestrator(store)
            .start(vec![], StartOptions::default())
            .await
            .unwrap();
        let report = match outcome {
            RunOutcome::Completed(report) => report,
            RunOutcome::WaitingHuman(w) => panic!("unexpected pause: {w:?}"),
        };
        assert!(report.degraded);
        assert!(report.execution_terminated);
        assert!(report.issues.is_empty());
        assert!(report.conflicts.is_empty());
        assert!(report
            .trace
            .events()
            .iter()
            .any(|e| e.status == TraceStatus::Failed));
        assert!(report.trace.events().iter().any(|e| {
            e.node == NODE_FINALIZE
                && e.reason.as_deref().is_some_and(|r| r.contains("degraded"))
        }));
    }

    #[tokio::test]
    async fn resume_without_a_decision_is_refused() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let orchestrator = orchestrator(store);
        let outcome = orchestrator
            .start(
                clean_corpus(),
                StartOptions {
                    requires_human_review: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let waiting = match outcome {
            RunOutcome::WaitingHuman(w) => w,
            _ => unreachable!(),
        };

        let err = orchestrator.resume(waiting.run_id, None).await.unwrap_err();
        assert!(matches!(err, EngineError::DecisionRequired(_)));
    }

    #[tokio::test]
    async fn resume_with_supplied_rejection_terminates() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let orchestrator = orchestrator(store.clone());
        let waiting = match orchestrator
            .start(
                clean_corpus(),
                StartOptions {
                    requires_human_review: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap()
        {
            RunOutcome::WaitingHuman(w) => w,
            _ => unreachable!(),
        };

        let outcome = orchestrator
            .resume(
                waiting.run_id,
                Some(HumanDecision {
                    decision: Decision::Reject,
                    comment: Some("insufficient documentation for approval".into()),
                    decided_by: Some("reviewer".into()),
                }),
            )
            .await
            .unwrap();
        let report = match outcome {
            RunOutcome::Completed(report) => report,
            _ => unreachable!(),
        };
        assert!(report.execution_terminated);

        // Flow-control decisions leave the durable decision fields alone.
        let persisted = store.load(waiting.run_id).await.unwrap().unwrap();
        assert!(persisted.decision.is_none());
        assert!(persisted.resumed_at.is_some());
        assert!(persisted.event_log.iter().any(|e| e.event == "run_resumed"));
    }

    #[tokio::test]
    async fn resume_twice_is_refused() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let orchestrator = orchestrator(store);
        let waiting = match orchestrator
            .start(
                clean_corpus(),
                StartOptions {
                    requires_human_review: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap()
        {
            RunOutcome::WaitingHuman(w) => w,
            _ => unreachable!(),
        };

        let decision = HumanDecision {
            decision: Decision::Approve,
            comment: None,
            decided_by: None,
        };
        orchestrator
            .resume(waiting.run_id, Some(decision.clone()))
            .await
            .unwrap();
        let err = orchestrator
            .resume(waiting.run_id, Some(decision))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotPaused { .. }));
    }

    #[tokio::test]
    async fn resume_refuses_stale_checkpoints() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let orchestrator = orchestrator(store.clone());
        let waiting = match orchestrator
            .start(
                clean_corpus(),
                StartOptions {
                    requires_human_review: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap()
        {
            RunOutcome::WaitingHuman(w) => w,
            _ => unreachable!(),
        };

        // Age the pause past the default max age.
        let mut checkpoint = store.load(waiting.run_id).await.unwrap().unwrap();
        checkpoint.paused_at = Utc::now() - chrono::Duration::hours(48);
        store.save(&checkpoint).await.unwrap();

        let err = orchestrator
            .resume(
                waiting.run_id,
                Some(HumanDecision {
                    decision: Decision::Approve,
                    comment: None,
                    decided_by: None,
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Stale(_)));
    }

    #[tokio::test]
    async fn resume_unknown_run_is_not_found() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let err = orchestrator(store)
            .resume(Uuid::new_v4(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn graph_metadata_is_attached_when_configured() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let config = EngineConfig {
            attach_graph_metadata: true,
            ..Default::default()
        };
        let outcome = ReviewOrchestrator::new(store, config)
            .start(clean_corpus(), StartOptions::default())
            .await
            .unwrap();
        let report = match outcome {
            RunOutcome::Completed(report) => report,
            _ => unreachable!(),
        };
        let metadata = report.graph_metadata.expect("metadata attached");
        assert_eq!(metadata["graph_id"], "document_review");
        assert_eq!(metadata["checksum"].as_str().unwrap().len(), 64);
    }
}
