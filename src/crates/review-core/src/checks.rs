//! Parallel check executor
//!
//! Runs a route-conditioned subset of independent checks concurrently and
//! joins before proceeding. This is the only intra-run parallelism in the
//! engine; the checks have no ordering requirement between them and their
//! results are aggregated order-independently.
//!
//! Subsets by route:
//! - `fast`: coverage-gap collector
//! - `crosscheck`: contradiction sweep + coverage-gap collector
//! - `escalate` / `human_gate`: all three (adds the policy-flag scanner)

use crate::state::{Conflict, CoverageGap, CoverageLevel, RoutePath, TopicSection};
use regex::Regex;
use review_checkpoint::DocumentInput;
use std::sync::OnceLock;

pub const CHECK_CONTRADICTION: &str = "contradiction_sweep";
pub const CHECK_COVERAGE: &str = "coverage_gap_collector";
pub const CHECK_POLICY: &str = "policy_flag_scanner";

const POLICY_TERMS: &[&str] = &[
    "bearer shares",
    "nominee director",
    "crypto mixing",
    "unlicensed",
    "cash courier",
];

/// Aggregated output of one executor pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckOutcome {
    pub conflicts: Vec<Conflict>,
    pub coverage_gaps: Vec<CoverageGap>,
    pub policy_flags: Vec<String>,
    pub executed: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
}

fn checks_for_route(route: RoutePath) -> (&'static [&'static str], &'static [&'static str]) {
    match route {
        RoutePath::Fast => (&[CHECK_COVERAGE], &[CHECK_CONTRADICTION, CHECK_POLICY]),
        RoutePath::Crosscheck => (&[CHECK_CONTRADICTION, CHECK_COVERAGE], &[CHECK_POLICY]),
        RoutePath::Escalate | RoutePath::HumanGate => {
            (&[CHECK_CONTRADICTION, CHECK_COVERAGE, CHECK_POLICY], &[])
        }
    }
}

/// Run the route-conditioned subset concurrently and join
pub async fn run_checks(
    route: RoutePath,
    sections: &[TopicSection],
    documents: &[DocumentInput],
) -> CheckOutcome {
    let (executed, skipped) = checks_for_route(route);
    let run = |name: &'static str| executed.contains(&name);

    let contradiction = async {
        if run(CHECK_CONTRADICTION) {
            contradiction_sweep(sections)
        } else {
            Vec::new()
        }
    };
    let coverage = async {
        if run(CHECK_COVERAGE) {
            collect_coverage_gaps(sections)
        } else {
            Vec::new()
        }
    };
    let policy = async {
        if run(CHECK_POLICY) {
            scan_policy_flags(documents)
        } else {
            Vec::new()
        }
    };

    let (conflicts, coverage_gaps, policy_flags) = tokio::join!(contradiction, coverage, policy);

    CheckOutcome {
        conflicts,
        coverage_gaps,
        policy_flags,
        executed: executed.to_vec(),
        skipped: skipped.to_vec(),
    }
}

/// Tokens the contradiction sweep pairs negated vs. affirmed statements on
const CONTRADICTION_TOKENS: &[&str] = &["sanction", "offshore", "owner", "pep", "income"];

fn negation_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        CONTRADICTION_TOKENS
            .iter()
            .map(|token| {
                let negated = Regex::new(&format!(r"(?i)\b(no|not|never|without)\b.*{token}"))
                    .expect("static contradiction pattern");
                (*token, negated)
            })
            .collect()
    })
}

fn contradiction_sweep(sections: &[TopicSection]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for section in sections {
        if section.evidence.len() < 2 {
            continue;
        }
        for (token, negated) in negation_patterns() {
            let negations: Vec<&String> = section
                .evidence
                .iter()
                .filter(|line| negated.is_match(line))
                .collect();
            let affirmations: Vec<&String> = section
                .evidence
                .iter()
                .filter(|line| {
                    line.to_lowercase().contains(token) && !negated.is_match(line)
                })
                .collect();
            if let (Some(neg), Some(aff)) = (negations.first(), affirmations.first()) {
                conflicts.push(Conflict {
                    topic_id: section.topic_id.clone(),
                    left: (*neg).clone(),
                    right: (*aff).clone(),
                    detail: format!("negated and affirmed statements about '{token}'"),
                });
            }
        }
    }
    conflicts
}

fn collect_coverage_gaps(sections: &[TopicSection]) -> Vec<CoverageGap> {
    sections
        .iter()
        .filter(|s| s.coverage != CoverageLevel::Complete)
        .map(|s| CoverageGap {
            topic_id: s.topic_id.clone(),
            level: s.coverage,
            note: match s.coverage {
                CoverageLevel::Missing => "no supporting content found".to_string(),
                _ => "coverage is partial".to_string(),
            },
        })
        .collect()
}

fn scan_policy_flags(documents: &[DocumentInput]) -> Vec<String> {
    let corpus = documents
        .iter()
        .map(|d| d.text.to_lowercase())
        .collect::<Vec<_>>()
        .join("\n");
    POLICY_TERMS
        .iter()
        .filter(|term| corpus.contains(*term))
        .map(|term| term.to_string())
        .collect()
}
