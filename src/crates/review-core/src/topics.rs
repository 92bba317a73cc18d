//! Topic extractor: classifies raw document text into fixed topic buckets
//!
//! Deterministic keyword classification. Every bucket yields a
//! [`TopicSection`], including ones nothing matched (coverage `missing`),
//! so downstream gap collection sees the full picture.

use crate::state::{CoverageLevel, TopicSection};
use review_checkpoint::DocumentInput;

const EVIDENCE_SNIPPET_LEN: usize = 120;

/// The fixed set of topic buckets a review covers
pub const TOPIC_BUCKETS: &[(&str, &[&str])] = &[
    (
        "ownership",
        &[
            "owner",
            "ownership",
            "shareholder",
            "ubo",
            "beneficial owner",
            "holding",
            "stake",
        ],
    ),
    (
        "identity",
        &[
            "passport",
            "identity",
            "id card",
            "date of birth",
            "nationality",
            "address",
        ],
    ),
    (
        "source_of_funds",
        &[
            "source of funds",
            "source of wealth",
            "income",
            "salary",
            "proceeds",
            "funding",
        ],
    ),
    (
        "business_activity",
        &[
            "business",
            "trading",
            "services",
            "industry",
            "revenue",
            "customers",
        ],
    ),
    (
        "sanctions_exposure",
        &[
            "sanction",
            "embargo",
            "restricted party",
            "watchlist",
            "pep",
            "politically exposed",
        ],
    ),
    (
        "governance",
        &[
            "director",
            "board",
            "officer",
            "signatory",
            "incorporation",
            "registered",
        ],
    ),
];

fn snippet(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.len() <= EVIDENCE_SNIPPET_LEN {
        trimmed.to_string()
    } else {
        let mut cut = EVIDENCE_SNIPPET_LEN;
        while !trimmed.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &trimmed[..cut])
    }
}

/// Classify documents into one section per topic bucket
pub fn extract_sections(documents: &[DocumentInput]) -> Vec<TopicSection> {
    TOPIC_BUCKETS
        .iter()
        .map(|(topic_id, keywords)| {
            let mut matched_keywords = 0usize;
            let mut content_lines: Vec<String> = Vec::new();
            let mut evidence: Vec<String> = Vec::new();

            for keyword in keywords.iter() {
                let mut keyword_hit = false;
                for doc in documents {
                    for line in doc.text.lines() {
                        if line.to_lowercase().contains(keyword) {
                            keyword_hit = true;
                            let snip = snippet(line);
                            if !evidence.contains(&snip) {
                                evidence.push(snip);
                                content_lines.push(line.trim().to_string());
                            }
                        }
                    }
                }
                if keyword_hit {
                    matched_keywords += 1;
                }
            }

            let coverage = match matched_keywords {
                0 => CoverageLevel::Missing,
                1 => CoverageLevel::Partial,
                _ => CoverageLevel::Complete,
            };

            TopicSection {
                topic_id: topic_id.to_string(),
                content: content_lines.join("\n"),
                evidence,
                coverage,
            }
        })
        .collect()
}
