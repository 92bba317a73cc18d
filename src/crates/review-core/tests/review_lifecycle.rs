//! End-to-end lifecycle: start, pause at the gate, finalize, resume

use async_trait::async_trait;
use review_checkpoint::{
    CheckpointStatus, CheckpointStore, Decision, DocumentInput, FinalDecision, FinalizedVia,
    InMemoryCheckpointStore,
};
use review_core::{
    CapabilityError, DecisionFinalizer, EngineConfig, FeatureFlags, FinalizeMetadata,
    FinalizeStatus, ReflectionProvider, ReviewOrchestrator, RunOutcome, StartOptions,
    TriggerPolicy,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn doc(text: &str) -> DocumentInput {
    DocumentInput {
        id: "d1".into(),
        filename: "profile.txt".into(),
        text: text.into(),
        content_hint: None,
    }
}

fn risky_corpus() -> Vec<DocumentInput> {
    vec![doc(
        "Counterparty appears on a sanction watchlist. The politically exposed \
         owner holds bearer shares through an offshore shell company.",
    )]
}

fn clean_corpus() -> Vec<DocumentInput> {
    vec![doc(
        "The beneficial owner and sole shareholder is identified with a passport \
         and date of birth. Source of funds is salary income from the business, \
         a retail trading company with documented revenue and customers. The \
         director and signatory appear in the incorporation papers.",
    )]
}

fn via_web() -> FinalizeMetadata {
    FinalizeMetadata {
        finalized_via: FinalizedVia::WebForm,
        decided_by: Some("compliance@example.com".into()),
    }
}

struct ScriptedProvider(String);

#[async_trait]
impl ReflectionProvider for ScriptedProvider {
    async fn run(&self, _payload: &Value, _prompt: &str) -> Result<String, CapabilityError> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn email_link_approval_flow_runs_to_completion() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let orchestrator = ReviewOrchestrator::new(store.clone(), EngineConfig::default());
    let finalizer = DecisionFinalizer::new(
        store.clone(),
        Arc::new(review_core::LogNotifier),
        TriggerPolicy::default(),
    );

    let waiting = match orchestrator
        .start(risky_corpus(), StartOptions::default())
        .await
        .unwrap()
    {
        RunOutcome::WaitingHuman(w) => w,
        RunOutcome::Completed(r) => panic!("expected pause, got {r:?}"),
    };
    assert!(waiting.risk_score > 60);

    let result = finalizer
        .finalize(&waiting.approval_token, Decision::Approve, None, via_web())
        .await;
    assert_eq!(result.status, FinalizeStatus::Finalized);
    assert_eq!(result.final_decision, Some(FinalDecision::Approved));

    // Resume picks up the recorded decision; no decision needs supplying.
    let outcome = orchestrator.resume(waiting.run_id, None).await.unwrap();
    let report = match outcome {
        RunOutcome::Completed(report) => report,
        RunOutcome::WaitingHuman(w) => panic!("unexpected second pause: {w:?}"),
    };
    assert!(!report.execution_terminated);
    assert!(!report.degraded);
    assert!(report
        .trace
        .events()
        .iter()
        .any(|e| e.node == "routing_decision"));

    let persisted = store.load(waiting.run_id).await.unwrap().unwrap();
    assert_eq!(persisted.final_decision, Some(FinalDecision::Approved));
    assert!(persisted.resumed_at.is_some());
}

#[tokio::test]
async fn rejection_flow_terminates_the_run() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let orchestrator = ReviewOrchestrator::new(store.clone(), EngineConfig::default());
    let finalizer = DecisionFinalizer::new(
        store.clone(),
        Arc::new(review_core::LogNotifier),
        TriggerPolicy::default(),
    );

    let waiting = match orchestrator
        .start(risky_corpus(), StartOptions::default())
        .await
        .unwrap()
    {
        RunOutcome::WaitingHuman(w) => w,
        _ => unreachable!(),
    };

    let result = finalizer
        .finalize(
            &waiting.approval_token,
            Decision::Reject,
            Some("documentation quality is insufficient for approval"),
            via_web(),
        )
        .await;
    assert_eq!(result.status, FinalizeStatus::Finalized);
    assert_eq!(result.final_decision, Some(FinalDecision::Rejected));
    assert!(!result.edd_started);

    let report = match orchestrator.resume(waiting.run_id, None).await.unwrap() {
        RunOutcome::Completed(report) => report,
        _ => unreachable!(),
    };
    assert!(report.execution_terminated);
}

#[tokio::test]
async fn escalation_gate_opens_at_most_once_and_reuses_the_token() {
    let ask_human = json!({
        "should_replan": false,
        "reason": "check results are ambiguous; the review scope needs a human call",
        "new_plan": ["ask_human_for_scope"],
        "confidence": 0.9,
    })
    .to_string();

    let store = Arc::new(InMemoryCheckpointStore::new());
    let orchestrator = ReviewOrchestrator::new(store.clone(), EngineConfig::default())
        .with_reflection_provider(Arc::new(ScriptedProvider(ask_human)));
    let finalizer = DecisionFinalizer::new(
        store.clone(),
        Arc::new(review_core::LogNotifier),
        TriggerPolicy::default(),
    );

    let options = StartOptions {
        flags: FeatureFlags {
            reflection: true,
            ..Default::default()
        },
        requires_human_review: true,
        recipient: Some("reviewer@example.com".into()),
    };
    let waiting = match orchestrator.start(clean_corpus(), options).await.unwrap() {
        RunOutcome::WaitingHuman(w) => w,
        _ => unreachable!(),
    };
    let original_token = waiting.approval_token.clone();

    finalizer
        .finalize(&original_token, Decision::Approve, None, via_web())
        .await;

    // First resume escalates back to a human with the same token.
    let escalated = match orchestrator.resume(waiting.run_id, None).await.unwrap() {
        RunOutcome::WaitingHuman(w) => w,
        RunOutcome::Completed(r) => panic!("expected escalation pause, got {r:?}"),
    };
    assert_eq!(escalated.paused_at_node, "escalation_gate");
    assert_eq!(escalated.approval_token, original_token);

    // Second resume exhausts the escalation budget and completes.
    let report = match orchestrator.resume(waiting.run_id, None).await.unwrap() {
        RunOutcome::Completed(report) => report,
        RunOutcome::WaitingHuman(w) => panic!("escalated twice: {w:?}"),
    };
    assert!(!report.execution_terminated);

    let persisted = store.load(waiting.run_id).await.unwrap().unwrap();
    assert!(persisted
        .event_log
        .iter()
        .any(|e| e.event == "escalation_gate_opened"));
}

#[tokio::test]
async fn escalation_on_a_run_that_never_paused_mints_a_checkpoint() {
    let ask_human = json!({
        "should_replan": false,
        "reason": "check results are ambiguous; the review scope needs a human call",
        "new_plan": ["ask_human_for_scope"],
        "confidence": 0.9,
    })
    .to_string();

    let store = Arc::new(InMemoryCheckpointStore::new());
    let orchestrator = ReviewOrchestrator::new(store.clone(), EngineConfig::default())
        .with_reflection_provider(Arc::new(ScriptedProvider(ask_human)));
    let finalizer = DecisionFinalizer::new(
        store.clone(),
        Arc::new(review_core::LogNotifier),
        TriggerPolicy::default(),
    );

    // Clean documents skip the review gate, so the escalation is the run's
    // first pause and has to create the checkpoint itself.
    let options = StartOptions {
        flags: FeatureFlags {
            reflection: true,
            ..Default::default()
        },
        recipient: Some("reviewer@example.com".into()),
        ..Default::default()
    };
    let waiting = match orchestrator.start(clean_corpus(), options).await.unwrap() {
        RunOutcome::WaitingHuman(w) => w,
        RunOutcome::Completed(r) => panic!("run completed past the escalation: {r:?}"),
    };
    assert_eq!(waiting.paused_at_node, "escalation_gate");

    let persisted = store.load(waiting.run_id).await.unwrap().unwrap();
    assert_eq!(persisted.status, CheckpointStatus::Paused);
    assert_eq!(
        persisted.paused_at_node_id.as_deref(),
        Some("escalation_gate")
    );
    assert_eq!(persisted.recipient.as_deref(), Some("reviewer@example.com"));

    // Approving through the minted token completes the run.
    finalizer
        .finalize(&waiting.approval_token, Decision::Approve, None, via_web())
        .await;
    let report = match orchestrator.resume(waiting.run_id, None).await.unwrap() {
        RunOutcome::Completed(report) => report,
        RunOutcome::WaitingHuman(w) => panic!("escalated twice: {w:?}"),
    };
    assert!(!report.execution_terminated);
}

#[tokio::test]
async fn replan_reruns_the_check_fanout_once() {
    let replan = json!({
        "should_replan": true,
        "reason": "coverage gaps suggest the batch review missed material sections",
        "new_plan": ["rerun_batch_review"],
        "confidence": 0.8,
    })
    .to_string();

    let store = Arc::new(InMemoryCheckpointStore::new());
    let orchestrator = ReviewOrchestrator::new(store.clone(), EngineConfig::default())
        .with_reflection_provider(Arc::new(ScriptedProvider(replan)));
    let finalizer = DecisionFinalizer::new(
        store.clone(),
        Arc::new(review_core::LogNotifier),
        TriggerPolicy::default(),
    );

    let options = StartOptions {
        flags: FeatureFlags {
            reflection: true,
            ..Default::default()
        },
        requires_human_review: true,
        ..Default::default()
    };
    let waiting = match orchestrator.start(clean_corpus(), options).await.unwrap() {
        RunOutcome::WaitingHuman(w) => w,
        _ => unreachable!(),
    };

    finalizer
        .finalize(&waiting.approval_token, Decision::Approve, None, via_web())
        .await;

    let report = match orchestrator.resume(waiting.run_id, None).await.unwrap() {
        RunOutcome::Completed(report) => report,
        RunOutcome::WaitingHuman(w) => panic!("unexpected pause: {w:?}"),
    };

    let routing = report
        .trace
        .events()
        .iter()
        .find(|e| e.node == "routing_decision")
        .expect("routing decision traced");
    assert_eq!(routing.decision.as_deref(), Some("rerun_batch_review"));
    let reruns = report
        .trace
        .events()
        .iter()
        .filter(|e| e.node == "parallel_checks")
        .count();
    assert_eq!(reruns, 1);
}
