//! Bounded reflection/replan engine
//!
//! Inspects a compact summary of the recent execution trace and decides
//! whether the run should replan, capped at one replan per run. Text
//! generation is delegated to a pluggable [`ReflectionProvider`]; the
//! provider's output must satisfy a strict schema, and any failure
//! (transport, timeout, parse, or schema) resolves to a deterministic
//! no-replan fallback. Nothing on this path ever propagates.
//!
//! Every evaluation appends exactly one trace event, regardless of outcome.

use crate::capabilities::ReflectionProvider;
use crate::error::CapabilityError;
use crate::state::{GraphState, NextAction};
use crate::trace::{NodeSpan, Trace, TraceStatus};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const REFLECTION_NODE: &str = "reflection";

/// Trace window fed into the provider summary
const SUMMARY_TRACE_EVENTS: usize = 12;
const SUMMARY_SAMPLE_LEN: usize = 5;
const MAX_REASON_LEN: usize = 240;

const OUTPUT_CONTRACT_PROMPT: &str = "Review the execution summary and answer with a single JSON \
object: {\"should_replan\": bool, \"reason\": string (1-240 chars), \"new_plan\": array of \
\"skip\"|\"rerun_batch_review\"|\"switch_to_section_review\"|\"ask_human_for_scope\"|\
\"tighten_policy\", \"confidence\": number in [0,1]}. No prose outside the JSON object.";

/// Result of one reflection attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectionOutcome {
    pub should_replan: bool,
    pub reason: String,
    pub plan: Vec<NextAction>,
    pub confidence: f64,
    pub next_action: NextAction,
    pub provider_called: bool,
}

impl ReflectionOutcome {
    fn fallback(reason: impl Into<String>, provider_called: bool) -> Self {
        Self {
            should_replan: false,
            reason: reason.into(),
            plan: vec![NextAction::Skip],
            confidence: 0.0,
            next_action: NextAction::Skip,
            provider_called,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawReflection {
    should_replan: bool,
    reason: String,
    new_plan: Vec<String>,
    confidence: f64,
}

fn parse_action(raw: &str) -> Option<NextAction> {
    match raw {
        "skip" => Some(NextAction::Skip),
        "rerun_batch_review" => Some(NextAction::RerunBatchReview),
        "switch_to_section_review" => Some(NextAction::SwitchToSectionReview),
        "ask_human_for_scope" => Some(NextAction::AskHumanForScope),
        "tighten_policy" => Some(NextAction::TightenPolicy),
        _ => None,
    }
}

/// Parse and schema-validate a provider response
fn parse_output(raw: &str) -> Result<(RawReflection, Vec<NextAction>), String> {
    let parsed: RawReflection =
        serde_json::from_str(raw.trim()).map_err(|e| format!("invalid JSON: {e}"))?;

    let reason_len = parsed.reason.trim().len();
    if reason_len == 0 || reason_len > MAX_REASON_LEN {
        return Err(format!(
            "reason length {reason_len} outside 1..={MAX_REASON_LEN}"
        ));
    }
    if !(0.0..=1.0).contains(&parsed.confidence) {
        return Err(format!("confidence {} outside [0,1]", parsed.confidence));
    }
    if parsed.new_plan.is_empty() {
        return Err("new_plan must not be empty".to_string());
    }
    let mut plan = Vec::with_capacity(parsed.new_plan.len());
    for entry in &parsed.new_plan {
        match parse_action(entry) {
            Some(action) => plan.push(action),
            None => return Err(format!("unknown plan action '{entry}'")),
        }
    }
    Ok((parsed, plan))
}

/// Bounded self-correction engine
pub struct ReflectionEngine {
    provider: Arc<dyn ReflectionProvider>,
    timeout: Duration,
}

impl ReflectionEngine {
    pub fn new(provider: Arc<dyn ReflectionProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    fn build_summary(&self, state: &GraphState, trace: &Trace) -> Value {
        let recent: Vec<Value> = trace
            .tail(SUMMARY_TRACE_EVENTS)
            .iter()
            .map(|e| {
                json!({
                    "node": e.node,
                    "status": e.status,
                    "reason": e.reason,
                })
            })
            .collect();
        let gaps: Vec<&str> = state
            .coverage_gaps
            .iter()
            .take(SUMMARY_SAMPLE_LEN)
            .map(|g| g.topic_id.as_str())
            .collect();
        let issues: Vec<&str> = state
            .issues
            .iter()
            .take(SUMMARY_SAMPLE_LEN)
            .map(|i| i.message.as_str())
            .collect();
        json!({
            "recent_trace": recent,
            "coverage_gaps_sample": gaps,
            "issues_sample": issues,
            "current_next_action": state.reflection.next_action,
            "risk_score": state.risk_score,
            "route": state.route,
        })
    }

    /// Evaluate the run. Appends exactly one trace event and updates
    /// `state.reflection`; never returns an error.
    pub async fn evaluate(&self, state: &mut GraphState, trace: &mut Trace) -> ReflectionOutcome {
        let span = NodeSpan::begin(REFLECTION_NODE);

        if !state.reflection.enabled {
            trace.push(
                span.reason("reflection feature disabled")
                    .finish(TraceStatus::Skipped),
            );
            return ReflectionOutcome::fallback("reflection disabled", false);
        }

        // Replan bound: once a run has replanned, the provider is never
        // consulted again. The only remaining move is asking a human.
        if state.reflection.replan_count >= 1 {
            let outcome = ReflectionOutcome {
                should_replan: false,
                reason: "replan budget exhausted; asking human for scope".to_string(),
                plan: vec![NextAction::AskHumanForScope],
                confidence: 1.0,
                next_action: NextAction::AskHumanForScope,
                provider_called: false,
            };
            self.apply(state, &outcome);
            trace.push(
                span.decision("ask_human_for_scope")
                    .reason(outcome.reason.clone())
                    .finish(TraceStatus::Executed),
            );
            return outcome;
        }

        let payload = self.build_summary(state, trace);
        let raw = match tokio::time::timeout(
            self.timeout,
            self.provider.run(&payload, OUTPUT_CONTRACT_PROMPT),
        )
        .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(error = %e, "reflection provider failed; using no-replan fallback");
                let outcome =
                    ReflectionOutcome::fallback(format!("provider failed: {e}"), true);
                self.apply(state, &outcome);
                trace.push(
                    span.reason(outcome.reason.clone())
                        .finish(TraceStatus::Executed),
                );
                return outcome;
            }
            Err(_) => {
                warn!("reflection provider timed out; using no-replan fallback");
                let outcome = ReflectionOutcome::fallback(
                    format!("provider timed out after {:?}", self.timeout),
                    true,
                );
                self.apply(state, &outcome);
                trace.push(
                    span.reason(outcome.reason.clone())
                        .finish(TraceStatus::Executed),
                );
                return outcome;
            }
        };

        let outcome = match parse_output(&raw) {
            Ok((parsed, plan)) => {
                let next_action = plan[0];
                if parsed.should_replan {
                    state.reflection.replan_count += 1;
                }
                ReflectionOutcome {
                    should_replan: parsed.should_replan,
                    reason: parsed.reason.trim().to_string(),
                    plan,
                    confidence: parsed.confidence,
                    next_action,
                    provider_called: true,
                }
            }
            Err(message) => {
                debug!(%message, "reflection output rejected by schema");
                ReflectionOutcome::fallback(format!("schema rejection: {message}"), true)
            }
        };

        self.apply(state, &outcome);
        trace.push(
            span.decision(if outcome.should_replan {
                "replan"
            } else {
                "continue"
            })
            .reason(outcome.reason.clone())
            .finish(TraceStatus::Executed),
        );
        outcome
    }

    fn apply(&self, state: &mut GraphState, outcome: &ReflectionOutcome) {
        state.reflection.last_should_replan = Some(outcome.should_replan);
        state.reflection.last_confidence = Some(outcome.confidence);
        state.reflection.last_plan = outcome.plan.clone();
        state.reflection.next_action = Some(outcome.next_action);
    }
}

/// Deterministic provider used by default; requires no external dependency.
/// Always recommends continuing without a replan.
#[derive(Debug, Clone, Default)]
pub struct MockReflectionProvider;

#[async_trait]
impl ReflectionProvider for MockReflectionProvider {
    async fn run(&self, _payload: &Value, _prompt: &str) -> Result<String, CapabilityError> {
        Ok(json!({
            "should_replan": false,
            "reason": "execution summary shows no correctable deviation",
            "new_plan": ["skip"],
            "confidence": 0.6,
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FeatureFlags;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProvider {
        response: String,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(response: impl Into<String>) -> Self {
            Self {
                response: response.into(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ReflectionProvider for ScriptedProvider {
        async fn run(&self, _payload: &Value, _prompt: &str) -> Result<String, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl ReflectionProvider for FailingProvider {
        async fn run(&self, _payload: &Value, _prompt: &str) -> Result<String, CapabilityError> {
            Err(CapabilityError::Unavailable("model offline".into()))
        }
    }

    fn reflective_state() -> GraphState {
        GraphState::new(
            vec![],
            FeatureFlags {
                reflection: true,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn replan_bound_never_calls_provider() {
        let provider = Arc::new(ScriptedProvider::new("{}"));
        let engine = ReflectionEngine::new(provider.clone(), Duration::from_secs(10));
        let mut state = reflective_state();
        state.reflection.replan_count = 1;
        let mut trace = Trace::new();

        let outcome = engine.evaluate(&mut state, &mut trace).await;

        assert_eq!(outcome.next_action, NextAction::AskHumanForScope);
        assert!(!outcome.provider_called);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(state.reflection.replan_count, 1);
        assert_eq!(trace.len(), 1);
    }

    #[tokio::test]
    async fn successful_replan_increments_counter_once() {
        let response = json!({
            "should_replan": true,
            "reason": "coverage gaps suggest the batch review missed sections",
            "new_plan": ["rerun_batch_review"],
            "confidence": 0.8,
        })
        .to_string();
        let engine = ReflectionEngine::new(
            Arc::new(ScriptedProvider::new(response)),
            Duration::from_secs(10),
        );
        let mut state = reflective_state();
        let mut trace = Trace::new();

        let outcome = engine.evaluate(&mut state, &mut trace).await;
        assert!(outcome.should_replan);
        assert_eq!(outcome.next_action, NextAction::RerunBatchReview);
        assert_eq!(state.reflection.replan_count, 1);

        // Second attempt hits the bound.
        let second = engine.evaluate(&mut state, &mut trace).await;
        assert_eq!(second.next_action, NextAction::AskHumanForScope);
        assert_eq!(state.reflection.replan_count, 1);
        assert_eq!(trace.len(), 2);
    }

    #[tokio::test]
    async fn no_replan_keeps_counter_and_records_plan() {
        let response = json!({
            "should_replan": false,
            "reason": "trace looks healthy",
            "new_plan": ["tighten_policy", "skip"],
            "confidence": 0.4,
        })
        .to_string();
        let engine = ReflectionEngine::new(
            Arc::new(ScriptedProvider::new(response)),
            Duration::from_secs(10),
        );
        let mut state = reflective_state();
        let mut trace = Trace::new();

        let outcome = engine.evaluate(&mut state, &mut trace).await;
        assert!(!outcome.should_replan);
        assert_eq!(outcome.next_action, NextAction::TightenPolicy);
        assert_eq!(state.reflection.replan_count, 0);
        assert_eq!(
            state.reflection.last_plan,
            vec![NextAction::TightenPolicy, NextAction::Skip]
        );
    }

    #[tokio::test]
    async fn provider_failure_resolves_to_fallback() {
        let engine =
            ReflectionEngine::new(Arc::new(FailingProvider), Duration::from_secs(10));
        let mut state = reflective_state();
        let mut trace = Trace::new();

        let outcome = engine.evaluate(&mut state, &mut trace).await;
        assert!(!outcome.should_replan);
        assert!(outcome.reason.contains("provider failed"));
        assert_eq!(state.reflection.replan_count, 0);
        assert_eq!(trace.len(), 1);
    }

    #[tokio::test]
    async fn malformed_output_is_rejected_by_schema() {
        for bad in [
            "not json at all",
            r#"{"should_replan": false, "reason": "", "new_plan": ["skip"], "confidence": 0.5}"#,
            r#"{"should_replan": false, "reason": "ok but bad plan", "new_plan": ["explode"], "confidence": 0.5}"#,
            r#"{"should_replan": false, "reason": "confidence range", "new_plan": ["skip"], "confidence": 1.5}"#,
            r#"{"should_replan": true, "reason": "empty plan", "new_plan": [], "confidence": 0.5}"#,
        ] {
            let engine = ReflectionEngine::new(
                Arc::new(ScriptedProvider::new(bad)),
                Duration::from_secs(10),
            );
            let mut state = reflective_state();
            let mut trace = Trace::new();
            let outcome = engine.evaluate(&mut state, &mut trace).await;
            assert!(!outcome.should_replan, "input: {bad}");
            assert!(outcome.reason.contains("schema rejection") || !outcome.should_replan);
            assert_eq!(state.reflection.replan_count, 0, "input: {bad}");
        }
    }

    #[tokio::test]
    async fn timeout_is_treated_as_provider_failure() {
        struct SlowProvider;

        #[async_trait]
        impl ReflectionProvider for SlowProvider {
            async fn run(&self, _p: &Value, _q: &str) -> Result<String, CapabilityError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(String::new())
            }
        }

        let engine =
            ReflectionEngine::new(Arc::new(SlowProvider), Duration::from_millis(20));
        let mut state = reflective_state();
        let mut trace = Trace::new();

        let outcome = engine.evaluate(&mut state, &mut trace).await;
        assert!(!outcome.should_replan);
        assert!(outcome.reason.contains("timed out"));
    }

    #[tokio::test]
    async fn mock_provider_satisfies_the_contract() {
        let raw = MockReflectionProvider
            .run(&json!({}), OUTPUT_CONTRACT_PROMPT)
            .await
            .unwrap();
        let (parsed, plan) = parse_output(&raw).unwrap();
        assert!(!parsed.should_replan);
        assert_eq!(plan, vec![NextAction::Skip]);
    }
}
