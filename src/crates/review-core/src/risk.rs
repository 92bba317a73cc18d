//! Risk classifier: deterministic triage scorer and the fallback
//! risk-signal analyzer
//!
//! Two independent scorers. The triage scorer combines topic coverage and
//! weighted keyword hits into a 0..=100 score and a route band. The
//! [`PatternRiskAnalyzer`] is the deterministic fallback behind the
//! pluggable [`RiskSignalAnalyzer`](crate::capabilities::RiskSignalAnalyzer)
//! capability.

use crate::capabilities::RiskSignalAnalyzer;
use crate::error::CapabilityError;
use crate::state::{CoverageLevel, RiskSignal, RoutePath, SignalSeverity, TopicSection};
use async_trait::async_trait;
use regex::Regex;
use review_checkpoint::DocumentInput;

const MISSING_TOPIC_POINTS: u32 = 12;
const PARTIAL_TOPIC_POINTS: u32 = 6;

/// Weighted risk keywords for the triage scorer
const RISK_KEYWORDS: &[(&str, u32)] = &[
    ("sanction", 20),
    ("politically exposed", 15),
    ("pep", 15),
    ("shell company", 15),
    ("offshore", 10),
    ("nominee", 10),
    ("bearer shares", 12),
    ("cash intensive", 8),
    ("crypto mixing", 15),
];

/// Triage result: score, route band and human-readable reasons
#[derive(Debug, Clone, PartialEq)]
pub struct Triage {
    pub score: u8,
    pub route: RoutePath,
    pub reasons: Vec<String>,
}

/// Map a risk score into its route band
pub fn route_for_score(score: u8) -> RoutePath {
    match score {
        0..=30 => RoutePath::Fast,
        31..=60 => RoutePath::Crosscheck,
        61..=80 => RoutePath::Escalate,
        _ => RoutePath::HumanGate,
    }
}

/// Deterministic coverage/keyword triage over the classified sections
pub fn triage(sections: &[TopicSection], documents: &[DocumentInput]) -> Triage {
    let mut points: u32 = 0;
    let mut reasons = Vec::new();

    for section in sections {
        match section.coverage {
            CoverageLevel::Missing => {
                points += MISSING_TOPIC_POINTS;
                reasons.push(format!("topic '{}' has no coverage", section.topic_id));
            }
            CoverageLevel::Partial => {
                points += PARTIAL_TOPIC_POINTS;
                reasons.push(format!("topic '{}' only partially covered", section.topic_id));
            }
            CoverageLevel::Complete => {}
        }
    }

    let corpus = documents
        .iter()
        .map(|d| d.text.to_lowercase())
        .collect::<Vec<_>>()
        .join("\n");
    for (keyword, weight) in RISK_KEYWORDS {
        if corpus.contains(keyword) {
            points += weight;
            reasons.push(format!("risk keyword '{keyword}' present"));
        }
    }

    let score = points.min(100) as u8;
    Triage {
        score,
        route: route_for_score(score),
        reasons,
    }
}

/// Deterministic pattern-matching risk-signal analyzer. Fallback when the
/// external model is unavailable, and the default in tests.
#[derive(Debug)]
pub struct PatternRiskAnalyzer {
    high: Vec<Regex>,
    medium: Vec<Regex>,
    negation: Regex,
}

impl PatternRiskAnalyzer {
    pub fn new() -> Self {
        // Patterns are fixed; construction cannot fail at runtime.
        let compile = |patterns: &[&str]| {
            patterns
                .iter()
                .map(|p| Regex::new(p).expect("static risk pattern"))
                .collect()
        };
        let high = compile(&[
            r"(?i)sanction(s|ed)?\b",
            r"(?i)politically exposed",
            r"(?i)\bpep\b",
            r"(?i)terror",
        ]);
        let medium = compile(&[
            r"(?i)shell compan(y|ies)",
            r"(?i)offshore",
            r"(?i)nominee (director|shareholder)",
            r"(?i)bearer shares",
        ]);
        let negation =
            Regex::new(r"(?i)\b(no|not|never|without)\b").expect("static negation pattern");
        Self {
            high,
            medium,
            negation,
        }
    }

    // A mention only counts when no negation word precedes it in the same
    // sentence ("no sanction concerns" must stay quiet).
    fn affirmed(&self, pattern: &Regex, text: &str) -> bool {
        text.split(['.', ';', '!', '?', '\n']).any(|sentence| {
            pattern
                .find(sentence)
                .is_some_and(|m| !self.negation.is_match(&sentence[..m.start()]))
        })
    }
}

impl Default for PatternRiskAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

const HIGH_LABELS: &[&str] = &[
    "sanctions_exposure",
    "pep_exposure",
    "pep_exposure",
    "terror_financing",
];
const MEDIUM_LABELS: &[&str] = &[
    "shell_structure",
    "offshore_structure",
    "nominee_arrangement",
    "bearer_shares",
];

#[async_trait]
impl RiskSignalAnalyzer for PatternRiskAnalyzer {
    async fn analyze(
        &self,
        sections: &[TopicSection],
        documents: &[DocumentInput],
    ) -> Result<Vec<RiskSignal>, CapabilityError> {
        let corpus = documents
            .iter()
            .map(|d| d.text.as_str())
            .chain(sections.iter().map(|s| s.content.as_str()))
            .collect::<Vec<_>>()
            .join("\n");

        let mut signals = Vec::new();
        for (pattern, label) in self.high.iter().zip(HIGH_LABELS) {
            if self.affirmed(pattern, &corpus) {
                let signal = RiskSignal::new(
                    SignalSeverity::High,
                    *label,
                    "high-severity pattern matched in submitted documents",
                );
                if !signals.contains(&signal) {
                    signals.push(signal);
                }
            }
        }
        for (pattern, label) in self.medium.iter().zip(MEDIUM_LABELS) {
            if self.affirmed(pattern, &corpus) {
                signals.push(RiskSignal::new(
                    SignalSeverity::Medium,
                    *label,
                    "structure pattern matched in submitted documents",
                ));
            }
        }
        Ok(signals)
    }
}
