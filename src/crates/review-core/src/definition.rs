//! Graph definition versioning
//!
//! The review graph's node/edge layout, with a content checksum and a
//! structural diff. The checksum is computed over a canonical (sorted)
//! encoding, so reordering nodes or edges does not change it; the diff
//! reports one entry per changed element.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub graph_id: String,
    pub version: String,
    pub nodes: Vec<NodeDefinition>,
    pub edges: Vec<EdgeDefinition>,
}

/// One structural difference between two definitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "change", content = "id")]
pub enum DefinitionChange {
    NodeAdded(String),
    NodeRemoved(String),
    NodeModified(String),
    EdgeAdded(String),
    EdgeRemoved(String),
}

fn edge_key(edge: &EdgeDefinition) -> String {
    format!(
        "{}->{}[{}]",
        edge.source,
        edge.target,
        edge.condition.as_deref().unwrap_or("")
    )
}

impl GraphDefinition {
    /// The baked-in definition of the document-review graph
    pub fn document_review(version: &str) -> Self {
        let node = |id: &str, kind: &str| NodeDefinition {
            id: id.to_string(),
            kind: kind.to_string(),
            config: json!({}),
        };
        let edge = |source: &str, target: &str| EdgeDefinition {
            source: source.to_string(),
            target: target.to_string(),
            condition: None,
        };
        Self {
            graph_id: "document_review".to_string(),
            version: version.to_string(),
            nodes: vec![
                node("topic_extractor", "stage"),
                node("risk_classifier", "stage"),
                node("parallel_checks", "fanout"),
                node("risk_signal_assessment", "stage"),
                node("human_review_gate", "pause"),
                node("reflection", "stage"),
                node("routing_decision", "router"),
                node("finalize", "stage"),
            ],
            edges: vec![
                edge("topic_extractor", "risk_classifier"),
                edge("risk_classifier", "parallel_checks"),
                edge("parallel_checks", "risk_signal_assessment"),
                edge("risk_signal_assessment", "human_review_gate"),
                edge("human_review_gate", "reflection"),
                edge("reflection", "routing_decision"),
                EdgeDefinition {
                    source: "routing_decision".to_string(),
                    target: "parallel_checks".to_string(),
                    condition: Some("rerun_batch_review".to_string()),
                },
                edge("routing_decision", "finalize"),
            ],
        }
    }

    /// Content hash over a canonical encoding: stable under node/edge
    /// reordering, sensitive to any config change.
    pub fn checksum(&self) -> String {
        let mut node_encodings: Vec<String> = self
            .nodes
            .iter()
            .map(|n| {
                format!(
                    "node:{}:{}:{}",
                    n.id,
                    n.kind,
                    serde_json::to_string(&n.config).unwrap_or_default()
                )
            })
            .collect();
        node_encodings.sort();

        let mut edge_encodings: Vec<String> =
            self.edges.iter().map(|e| format!("edge:{}", edge_key(e))).collect();
        edge_encodings.sort();

        let mut hasher = Sha256::new();
        hasher.update(self.graph_id.as_bytes());
        for encoding in node_encodings.iter().chain(edge_encodings.iter()) {
            hasher.update(encoding.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Structural diff against another definition
    pub fn diff(&self, other: &GraphDefinition) -> Vec<DefinitionChange> {
        let mut changes = Vec::new();

        for node in &other.nodes {
            match self.nodes.iter().find(|n| n.id == node.id) {
                None => changes.push(DefinitionChange::NodeAdded(node.id.clone())),
                Some(existing) if existing != node => {
                    changes.push(DefinitionChange::NodeModified(node.id.clone()))
                }
                Some(_) => {}
            }
        }
        for node in &self.nodes {
            if !other.nodes.iter().any(|n| n.id == node.id) {
                changes.push(DefinitionChange::NodeRemoved(node.id.clone()));
            }
        }

        let self_edges: Vec<String> = self.edges.iter().map(edge_key).collect();
        let other_edges: Vec<String> = other.edges.iter().map(edge_key).collect();
        for key in &other_edges {
            if !self_edges.contains(key) {
                changes.push(DefinitionChange::EdgeAdded(key.clone()));
            }
        }
        for key in &self_edges {
            if !other_edges.contains(key) {
                changes.push(DefinitionChange::EdgeRemoved(key.clone()));
            }
        }
        changes
    }

    /// The conceptual extension applied when an EDD sub-review starts:
    /// an EDD node grafted after the human review gate.
    pub fn edd_patch(&self) -> Value {
        let mut extended = self.clone();
        extended.nodes.push(NodeDefinition {
            id: "edd_review".to_string(),
            kind: "pause".to_string(),
            config: json!({"nested": true}),
        });
        extended.edges.push(EdgeDefinition {
            source: "human_review_gate".to_string(),
            target: "edd_review".to_string(),
            condition: Some("edd_triggered".to_string()),
        });
        json!({
            "base_checksum": self.checksum(),
            "extended_checksum": extended.checksum(),
            "changes": self.diff(&extended),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_order_independent() {
        let def = GraphDefinition::document_review("1");
        let mut shuffled = def.clone();
        shuffled.nodes.reverse();
        shuffled.edges.reverse();
        assert_eq!(def.checksum(), shuffled.checksum());
    }

    #[test]
    fn config_change_alters_checksum_and_diffs_once() {
        let def = GraphDefinition::document_review("1");
        let mut modified = def.clone();
        modified
            .nodes
            .iter_mut()
            .find(|n| n.id == "human_review_gate")
            .unwrap()
            .config = json!({"reminder_hours": 48});

        assert_ne!(def.checksum(), modified.checksum());
        let changes = def.diff(&modified);
        assert_eq!(
            changes,
            vec![DefinitionChange::NodeModified("human_review_gate".into())]
        );
    }

    #[test]
    fn diff_reports_additions_and_removals() {
        let def = GraphDefinition::document_review("1");
        let mut next = def.clone();
        next.nodes.push(NodeDefinition {
            id: "edd_review".into(),
            kind: "pause".into(),
            config: json!({}),
        });
        next.edges.retain(|e| e.target != "finalize");

        let changes = def.diff(&next);
        assert!(changes.contains(&DefinitionChange::NodeAdded("edd_review".into())));
        assert!(changes
            .iter()
            .any(|c| matches!(c, DefinitionChange::EdgeRemoved(_))));
    }

    #[test]
    fn edd_patch_describes_the_extension() {
        let def = GraphDefinition::document_review("1");
        let patch = def.edd_patch();
        assert_eq!(patch["base_checksum"], json!(def.checksum()));
        let changes = patch["changes"].as_array().unwrap();
        assert_eq!(changes.len(), 2);
    }
}
