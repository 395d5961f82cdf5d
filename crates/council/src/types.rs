//! Result and transcript types for one council turn.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One successful Stage 1 proposal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stage1Result {
    pub model: String,
    pub response: String,
    pub personality_id: String,
    pub personality_name: String,
}

/// One Stage 2 ranking: the voter, its raw output, and the parsed labels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stage2Result {
    pub model: String,
    pub personality_id: String,
    pub personality_name: String,
    /// Full text returned by the voter, kept for audit and feedback.
    pub ranking: String,
    /// Labels (`Response A`, …) in ranked order, best first.
    pub parsed_ranking: Vec<String>,
}

/// The synthesized final answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stage3Result {
    pub model: String,
    pub response: String,
    /// Contributor attribution, populated only by the consensus strategy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contributors: Vec<serde_json::Value>,
}

/// What an anonymized label stands for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelTarget {
    pub name: String,
    pub id: String,
    pub model: String,
}

/// Bijection from anonymized labels onto Stage 1 entries for one turn.
/// Labels share the `Response ` prefix, so the BTreeMap order is the label
/// order.
pub type LabelMap = BTreeMap<String, LabelTarget>;

/// One league-row of the Borda aggregation for a single turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateRanking {
    pub personality_id: String,
    pub name: String,
    /// Mean rank across voters, lower is better, rounded to 2 decimals.
    pub average_rank: f64,
    pub rankings_count: usize,
}

/// A stored conversation message. User messages carry only content;
/// assistant messages carry all three stages verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum TranscriptMessage {
    User {
        content: String,
    },
    Assistant {
        stage1: Vec<Stage1Result>,
        stage2: Vec<Stage2Result>,
        stage3: Stage3Result,
    },
}

impl TranscriptMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_messages_round_trip_with_role_tag() {
        let user = TranscriptMessage::user("hello");
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");

        let assistant = TranscriptMessage::Assistant {
            stage1: vec![],
            stage2: vec![],
            stage3: Stage3Result {
                model: "m".into(),
                response: "r".into(),
                contributors: vec![],
            },
        };
        let json = serde_json::to_value(&assistant).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json.get("contributors").is_none());

        let back: TranscriptMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, assistant);
    }

    #[test]
    fn label_map_iterates_in_label_order() {
        let mut map = LabelMap::new();
        for label in ["Response C", "Response A", "Response B"] {
            map.insert(
                label.into(),
                LabelTarget {
                    name: label.into(),
                    id: label.into(),
                    model: "m".into(),
                },
            );
        }
        let labels: Vec<&String> = map.keys().collect();
        assert_eq!(labels, ["Response A", "Response B", "Response C"]);
    }
}
