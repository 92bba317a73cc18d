//! Full EDD sub-review flow driven through the public surface

use async_trait::async_trait;
use review_checkpoint::{
    CheckpointStatus, CheckpointStore, Decision, DocumentInput, EddStatus, FinalDecision,
    FinalizedVia, InMemoryCheckpointStore,
};
use review_core::{
    ApprovalContext, ApprovalKind, CapabilityError, DecisionFinalizer, EngineConfig,
    FinalizeMetadata, FinalizeStatus, Notifier, ReviewOrchestrator, RunOutcome, StartOptions,
    TriggerPolicy,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct CountingNotifier {
    primary: AtomicUsize,
    edd: AtomicUsize,
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn send(&self, context: &ApprovalContext) -> Result<String, CapabilityError> {
        match context.kind {
            ApprovalKind::Primary => self.primary.fetch_add(1, Ordering::SeqCst),
            ApprovalKind::Edd => self.edd.fetch_add(1, Ordering::SeqCst),
        };
        Ok(format!("msg-{:?}", context.kind))
    }
}

fn risky_corpus() -> Vec<DocumentInput> {
    vec![DocumentInput {
        id: "d1".into(),
        filename: "profile.txt".into(),
        text: "Counterparty appears on a sanction watchlist. The politically exposed \
               owner holds bearer shares through an offshore shell company."
            .into(),
        content_hint: None,
    }]
}

fn via_email(who: &str) -> FinalizeMetadata {
    FinalizeMetadata {
        finalized_via: FinalizedVia::EmailLink,
        decided_by: Some(who.to_string()),
    }
}

const TRIGGERING_REASON: &str =
    "Rejected: the UBO chain runs through an offshore shell company in the BVI \
     and the beneficial ownership remains unclear";

#[tokio::test]
async fn rejection_with_edd_trigger_runs_the_nested_approval() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let notifier = Arc::new(CountingNotifier::default());
    let orchestrator = ReviewOrchestrator::new(store.clone(), EngineConfig::default())
        .with_notifier(notifier.clone());
    let finalizer =
        DecisionFinalizer::new(store.clone(), notifier.clone(), TriggerPolicy::default());

    let waiting = match orchestrator
        .start(risky_corpus(), StartOptions::default())
        .await
        .unwrap()
    {
        RunOutcome::WaitingHuman(w) => w,
        RunOutcome::Completed(r) => panic!("expected pause, got {r:?}"),
    };
    assert_eq!(notifier.primary.load(Ordering::SeqCst), 1);

    // Reject with a reason that crosses the trigger threshold.
    let rejected = finalizer
        .finalize(
            &waiting.approval_token,
            Decision::Reject,
            Some(TRIGGERING_REASON),
            via_email("first@example.com"),
        )
        .await;
    assert_eq!(rejected.status, FinalizeStatus::Finalized);
    assert!(rejected.edd_started);
    assert!(rejected.final_decision.is_none());
    assert_eq!(notifier.edd.load(Ordering::SeqCst), 1);

    // Repeating the rejection neither restarts EDD nor resends mail.
    let repeated = finalizer
        .finalize(
            &waiting.approval_token,
            Decision::Reject,
            Some(TRIGGERING_REASON),
            via_email("first@example.com"),
        )
        .await;
    assert_eq!(repeated.status, FinalizeStatus::AlreadyFinalized);
    assert_eq!(notifier.edd.load(Ordering::SeqCst), 1);

    let record = store.load(waiting.run_id).await.unwrap().unwrap();
    let edd = record.edd_stage.clone().unwrap();
    assert_eq!(edd.status, EddStatus::WaitingEddApproval);
    assert!(edd.approval_sent_at.is_some());
    let edd_token = edd.approval_token.unwrap();
    assert_ne!(edd_token, waiting.approval_token);

    // The EDD token resolves to the same run.
    assert_eq!(
        store.resolve_token(&edd_token).await.unwrap(),
        Some(waiting.run_id)
    );

    // EDD approval yields the compound final decision.
    let approved = finalizer
        .finalize(&edd_token, Decision::Approve, None, via_email("senior@example.com"))
        .await;
    assert_eq!(approved.status, FinalizeStatus::Finalized);
    assert_eq!(approved.final_decision, Some(FinalDecision::ApprovedWithEdd));

    let record = store.load(waiting.run_id).await.unwrap().unwrap();
    assert_eq!(record.status, CheckpointStatus::Completed);
    assert_eq!(record.final_decision, Some(FinalDecision::ApprovedWithEdd));
    assert_eq!(
        record.edd_stage.as_ref().unwrap().decided_by.as_deref(),
        Some("senior@example.com")
    );
    assert!(record
        .event_log
        .iter()
        .any(|e| e.event == "edd_decision_finalized"));
}

#[tokio::test]
async fn edd_decisions_are_write_once_too() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let notifier = Arc::new(CountingNotifier::default());
    let orchestrator = ReviewOrchestrator::new(store.clone(), EngineConfig::default())
        .with_notifier(notifier.clone());
    let finalizer =
        DecisionFinalizer::new(store.clone(), notifier.clone(), TriggerPolicy::default());

    let waiting = match orchestrator
        .start(risky_corpus(), StartOptions::default())
        .await
        .unwrap()
    {
        RunOutcome::WaitingHuman(w) => w,
        _ => unreachable!(),
    };
    finalizer
        .finalize(
            &waiting.approval_token,
            Decision::Reject,
            Some(TRIGGERING_REASON),
            via_email("first@example.com"),
        )
        .await;
    let edd_token = store
        .load(waiting.run_id)
        .await
        .unwrap()
        .unwrap()
        .edd_stage
        .unwrap()
        .approval_token
        .unwrap();

    finalizer
        .finalize(
            &edd_token,
            Decision::Reject,
            Some("enhanced review confirms the ownership concerns"),
            via_email("senior@example.com"),
        )
        .await;

    let conflicting = finalizer
        .finalize(&edd_token, Decision::Approve, None, via_email("late@example.com"))
        .await;
    assert_eq!(conflicting.status, FinalizeStatus::Conflict);
    assert_eq!(conflicting.current_decision, Some(Decision::Reject));

    let record = store.load(waiting.run_id).await.unwrap().unwrap();
    assert_eq!(record.final_decision, Some(FinalDecision::Rejected));
}

#[tokio::test]
async fn non_triggering_rejection_skips_edd() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let notifier = Arc::new(CountingNotifier::default());
    let orchestrator = ReviewOrchestrator::new(store.clone(), EngineConfig::default())
        .with_notifier(notifier.clone());
    let finalizer =
        DecisionFinalizer::new(store.clone(), notifier.clone(), TriggerPolicy::default());

    let waiting = match orchestrator
        .start(risky_corpus(), StartOptions::default())
        .await
        .unwrap()
    {
        RunOutcome::WaitingHuman(w) => w,
        _ => unreachable!(),
    };

    let rejected = finalizer
        .finalize(
            &waiting.approval_token,
            Decision::Reject,
            Some("the submitted scans are unreadable, please resubmit"),
            via_email("first@example.com"),
        )
        .await;
    assert_eq!(rejected.status, FinalizeStatus::Finalized);
    assert!(!rejected.edd_started);
    assert_eq!(rejected.final_decision, Some(FinalDecision::Rejected));
    assert_eq!(notifier.edd.load(Ordering::SeqCst), 0);

    let record = store.load(waiting.run_id).await.unwrap().unwrap();
    assert!(record.edd_stage.is_none());
    assert_eq!(record.status, CheckpointStatus::Completed);
}
