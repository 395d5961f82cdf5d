//! Ranking parse and Borda-style aggregation.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::types::{AggregateRanking, LabelMap, Stage2Result};

/// Marker the ranking prompt instructs voters to emit.
pub const FINAL_RANKING_MARKER: &str = "FINAL RANKING:";
/// Prefix of every anonymized label.
pub const RESPONSE_LABEL_PREFIX: &str = "Response ";

fn numbered_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+\.\s*Response [A-Z]").expect("static regex"))
}

fn label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Response [A-Z]").expect("static regex"))
}

/// Parse the ranked labels out of a voter's response.
///
/// After the first `FINAL RANKING:` occurrence, numbered entries
/// (`1. Response A`) win; without numbering, every `Response X` token in
/// order. When the marker is absent entirely, fall back to every
/// `Response X` over the whole text.
pub fn parse_ranking_from_text(ranking_text: &str) -> Vec<String> {
    if let Some((_, section)) = ranking_text.split_once(FINAL_RANKING_MARKER) {
        let numbered: Vec<String> = numbered_re()
            .find_iter(section)
            .filter_map(|m| label_re().find(m.as_str()))
            .map(|m| m.as_str().to_owned())
            .collect();
        if !numbered.is_empty() {
            return numbered;
        }
        return label_re()
            .find_iter(section)
            .map(|m| m.as_str().to_owned())
            .collect();
    }

    label_re()
        .find_iter(ranking_text)
        .map(|m| m.as_str().to_owned())
        .collect()
}

/// Mean-rank aggregation over all voters' parsed rankings; lower is better.
/// Labels missing from the bijection are discarded silently.
pub fn calculate_aggregate_rankings(
    stage2_results: &[Stage2Result],
    label_map: &LabelMap,
) -> Vec<AggregateRanking> {
    // candidate personality id → (name, rank positions)
    let mut positions: HashMap<&str, (&str, Vec<usize>)> = HashMap::new();

    for result in stage2_results {
        for (position, label) in result.parsed_ranking.iter().enumerate() {
            if let Some(target) = label_map.get(label) {
                positions
                    .entry(&target.id)
                    .or_insert_with(|| (&target.name, Vec::new()))
                    .1
                    .push(position + 1);
            }
        }
    }

    let mut aggregate: Vec<AggregateRanking> = positions
        .into_iter()
        .map(|(id, (name, ranks))| {
            let avg = ranks.iter().sum::<usize>() as f64 / ranks.len() as f64;
            AggregateRanking {
                personality_id: id.to_owned(),
                name: name.to_owned(),
                average_rank: round2(avg),
                rankings_count: ranks.len(),
            }
        })
        .collect();

    // Ascending by average rank; ties keep a stable secondary order.
    aggregate.sort_by(|a, b| {
        a.average_rank
            .partial_cmp(&b.average_rank)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.personality_id.cmp(&b.personality_id))
    });
    aggregate
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
