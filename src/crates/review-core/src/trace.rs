//! Append-only execution trace
//!
//! One [`TraceEvent`] per node attempt, in emission order. The trace serves
//! two consumers: the caller-facing run result and the reflection engine's
//! bounded situational summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Executed,
    Skipped,
    Waiting,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub node: String,
    pub status: TraceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs_summary: Option<String>,
}

/// Timed builder for a single trace event
pub struct NodeSpan {
    node: String,
    started_at: DateTime<Utc>,
    decision: Option<String>,
    reason: Option<String>,
    outputs_summary: Option<String>,
}

impl NodeSpan {
    pub fn begin(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            started_at: Utc::now(),
            decision: None,
            reason: None,
            outputs_summary: None,
        }
    }

    pub fn decision(mut self, decision: impl Into<String>) -> Self {
        self.decision = Some(decision.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn outputs(mut self, summary: impl Into<String>) -> Self {
        self.outputs_summary = Some(summary.into());
        self
    }

    pub fn finish(self, status: TraceStatus) -> TraceEvent {
        let ended_at = Utc::now();
        TraceEvent {
            node: self.node,
            status,
            decision: self.decision,
            reason: self.reason,
            started_at: self.started_at,
            ended_at,
            duration_ms: (ended_at - self.started_at).num_milliseconds(),
            outputs_summary: self.outputs_summary,
        }
    }
}

/// Append-only trace of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    events: Vec<TraceEvent>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: TraceEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Last `n` events, oldest first. This is the reflection summary window.
    pub fn tail(&self, n: usize) -> &[TraceEvent] {
        let start = self.events.len().saturating_sub(n);
        &self.events[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_records_order_and_duration() {
        let mut trace = Trace::new();
        trace.push(NodeSpan::begin("topic_extractor").finish(TraceStatus::Executed));
        trace.push(
            NodeSpan::begin("human_review_gate")
                .decision("pause")
                .reason("risk score above threshold")
                .finish(TraceStatus::Waiting),
        );

        assert_eq!(trace.len(), 2);
        assert_eq!(trace.events()[0].node, "topic_extractor");
        assert_eq!(trace.events()[1].status, TraceStatus::Waiting);
        assert!(trace.events()[1].duration_ms >= 0);
    }

    #[test]
    fn tail_is_bounded() {
        let mut trace = Trace::new();
        for i in 0..20 {
            trace.push(NodeSpan::begin(format!("node_{i}")).finish(TraceStatus::Executed));
        }
        let tail = trace.tail(12);
        assert_eq!(tail.len(), 12);
        assert_eq!(tail[0].node, "node_8");
        assert_eq!(trace.tail(50).len(), 20);
    }
}
