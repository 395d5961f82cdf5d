//! Normalized vote rows and the derived league tables.
//!
//! Every Stage 2 completion writes one row per (voter, rank position,
//! resolved label) into the tenant's `votes` table. The league table groups
//! those rows per candidate personality; the instance table sums the
//! per-tenant tables by personality id.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use concord_config::Personality;
use concord_council::{LabelMap, Stage2Result};
use concord_domain::Result;

use crate::tenant_db::{db_err, TenantDb};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One league-table row for a candidate personality.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeagueRow {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    /// Distinct conversations the candidate was ranked in.
    pub sessions: usize,
    pub votes_received: usize,
    /// Times ranked first.
    pub wins: usize,
    pub average_rank: f64,
    /// `wins / sessions * 100`, one decimal.
    pub win_rate: f64,
}

#[derive(Debug, Clone)]
struct CandidateStats {
    id: String,
    fallback_name: String,
    sessions: usize,
    votes_received: usize,
    wins: usize,
    rank_sum: f64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct VoteStore {
    db: Arc<TenantDb>,
}

impl VoteStore {
    pub fn new(db: Arc<TenantDb>) -> Self {
        Self { db }
    }

    /// Persist the normalized vote rows for one turn. Positions whose label
    /// has no mapping are dropped. Returns the number of rows written.
    pub fn record_votes(
        &self,
        org_id: &str,
        conversation_id: &str,
        turn_number: usize,
        stage2_results: &[Stage2Result],
        label_map: &LabelMap,
    ) -> Result<usize> {
        let conn = self.db.connection(org_id)?;
        let mut conn = conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let timestamp = Utc::now().to_rfc3339();

        let mut written = 0usize;
        for result in stage2_results {
            let reasoning = if result.ranking.is_empty() {
                None
            } else {
                Some(result.ranking.as_str())
            };
            for (position, label) in result.parsed_ranking.iter().enumerate() {
                let Some(target) = label_map.get(label) else {
                    continue;
                };
                tx.execute(
                    "INSERT INTO votes (id, conversation_id, turn_number, voter_model,
                     candidate_personality_id, candidate_model, rank, label, reasoning, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    rusqlite::params![
                        uuid::Uuid::new_v4().to_string(),
                        conversation_id,
                        turn_number as i64,
                        result.model,
                        target.id,
                        target.model,
                        (position + 1) as i64,
                        label,
                        reasoning,
                        timestamp,
                    ],
                )
                .map_err(db_err)?;
                written += 1;
            }
        }

        tx.commit().map_err(db_err)?;
        tracing::info!(org_id, conversation_id, turn_number, rows = written, "votes recorded");
        Ok(written)
    }

    /// Per-tenant league table. Currently active personalities appear even
    /// with zero votes.
    pub fn league_table(&self, org_id: &str, active: &[Personality]) -> Result<Vec<LeagueRow>> {
        let mut stats = self.candidate_stats(org_id)?;

        for p in active {
            if !stats.iter().any(|s| s.id == p.id) {
                stats.push(CandidateStats {
                    id: p.id.clone(),
                    fallback_name: p.name.clone(),
                    sessions: 0,
                    votes_received: 0,
                    wins: 0,
                    rank_sum: 0.0,
                });
            }
        }

        let mut rows: Vec<LeagueRow> = stats
            .into_iter()
            .map(|s| {
                let (name, is_active) = match active.iter().find(|p| p.id == s.id) {
                    Some(p) => (p.name.clone(), true),
                    None => (s.fallback_name.clone(), false),
                };
                finish_row(s, name, is_active)
            })
            .collect();

        sort_rows(&mut rows);
        Ok(rows)
    }

    fn candidate_stats(&self, org_id: &str) -> Result<Vec<CandidateStats>> {
        let conn = self.db.connection(org_id)?;
        let conn = conn.lock();

        let mut statement = conn
            .prepare(
                "SELECT candidate_personality_id,
                        MIN(candidate_model),
                        COUNT(id),
                        SUM(rank),
                        COUNT(DISTINCT conversation_id)
                 FROM votes
                 GROUP BY candidate_personality_id",
            )
            .map_err(db_err)?;

        let mut stats: Vec<CandidateStats> = statement
            .query_map([], |row| {
                Ok(CandidateStats {
                    id: row.get(0)?,
                    fallback_name: row.get(1)?,
                    votes_received: row.get::<_, i64>(2)? as usize,
                    rank_sum: row.get::<_, i64>(3)? as f64,
                    sessions: row.get::<_, i64>(4)? as usize,
                    wins: 0,
                })
            })
            .map_err(db_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(db_err)?;

        let mut wins_statement = conn
            .prepare(
                "SELECT candidate_personality_id, COUNT(id)
                 FROM votes WHERE rank = 1
                 GROUP BY candidate_personality_id",
            )
            .map_err(db_err)?;
        let wins: Vec<(String, i64)> = wins_statement
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(db_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(db_err)?;

        for (id, count) in wins {
            if let Some(s) = stats.iter_mut().find(|s| s.id == id) {
                s.wins = count as usize;
            }
        }
        Ok(stats)
    }

    /// The last 50 reasoned votes against a candidate, rendered as feedback
    /// log snippets for the synthesis prompt.
    pub fn feedback_snippets(
        &self,
        org_id: &str,
        candidate_id: Option<&str>,
        personality_name: &str,
    ) -> Result<Vec<String>> {
        let conn = self.db.connection(org_id)?;
        let conn = conn.lock();

        let (filter, value) = match candidate_id {
            Some(id) => ("candidate_personality_id = ?1", id),
            None => ("candidate_model = ?1", personality_name),
        };
        let sql = format!(
            "SELECT voter_model, conversation_id, reasoning
             FROM votes
             WHERE reasoning IS NOT NULL AND {filter}
             ORDER BY timestamp DESC
             LIMIT 50"
        );

        let mut statement = conn.prepare(&sql).map_err(db_err)?;
        let snippets = statement
            .query_map([value], |row| {
                let voter: String = row.get(0)?;
                let conversation: String = row.get(1)?;
                let reasoning: String = row.get(2)?;
                Ok(format!(
                    "Voter ({voter}) on Session {conversation}:\n{reasoning}\n---"
                ))
            })
            .map_err(db_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(db_err)?;
        Ok(snippets)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Aggregation helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sum per-tenant league tables into the instance-wide table, keyed by
/// personality id. Names come from the first tenant that knows one; rank
/// sums are recovered from each table's averages.
pub fn aggregate_instance(org_tables: &[Vec<LeagueRow>]) -> Vec<LeagueRow> {
    let mut merged: Vec<CandidateStats> = Vec::new();
    let mut names: Vec<(String, String)> = Vec::new();

    for table in org_tables {
        for row in table {
            if row.id.is_empty() {
                continue;
            }
            if !names.iter().any(|(id, _)| id == &row.id) {
                names.push((row.id.clone(), row.name.clone()));
            }
            let stats = match merged.iter_mut().find(|s| s.id == row.id) {
                Some(s) => s,
                None => {
                    merged.push(CandidateStats {
                        id: row.id.clone(),
                        fallback_name: row.name.clone(),
                        sessions: 0,
                        votes_received: 0,
                        wins: 0,
                        rank_sum: 0.0,
                    });
                    merged.last_mut().expect("just pushed")
                }
            };
            stats.sessions += row.sessions;
            stats.votes_received += row.votes_received;
            stats.wins += row.wins;
            stats.rank_sum += row.average_rank * row.votes_received as f64;
        }
    }

    let mut rows: Vec<LeagueRow> = merged
        .into_iter()
        .map(|s| {
            let name = names
                .iter()
                .find(|(id, _)| id == &s.id)
                .map(|(_, n)| n.clone())
                .unwrap_or_else(|| s.fallback_name.clone());
            finish_row(s, name, false)
        })
        .collect();
    sort_rows(&mut rows);
    rows
}

fn finish_row(stats: CandidateStats, name: String, is_active: bool) -> LeagueRow {
    let average_rank = if stats.votes_received > 0 {
        round2(stats.rank_sum / stats.votes_received as f64)
    } else {
        0.0
    };
    let win_rate = if stats.sessions > 0 {
        round1(stats.wins as f64 / stats.sessions as f64 * 100.0)
    } else {
        0.0
    };
    LeagueRow {
        id: stats.id,
        name,
        is_active,
        sessions: stats.sessions,
        votes_received: stats.votes_received,
        wins: stats.wins,
        average_rank,
        win_rate,
    }
}

fn sort_rows(rows: &mut [LeagueRow]) {
    rows.sort_by(|a, b| {
        b.win_rate
            .partial_cmp(&a.win_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                a.average_rank
                    .partial_cmp(&b.average_rank)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
