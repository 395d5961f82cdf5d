//! Append-only voting-session log.
//!
//! Every Stage 2 completion appends one session record to the tenant's
//! `voting_history.json`. Writes are best-effort by contract: the caller
//! logs failures and the turn proceeds.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use concord_council::{LabelMap, Stage2Result};
use concord_domain::{paths, Result, Settings};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedCandidate {
    pub rank: usize,
    pub candidate: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionVote {
    pub voter_model: String,
    pub voter_personality: String,
    pub rankings: Vec<RankedCandidate>,
    /// The voter's full Stage 2 text, kept as qualitative feedback.
    pub reasoning: String,
}

/// One voting session: all votes cast in a single turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VotingSession {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub conversation_id: String,
    pub conversation_title: String,
    pub turn_number: usize,
    #[serde(default)]
    pub user_id: Option<String>,
    pub votes: Vec<SessionVote>,
}

/// A session enriched with the display name of its user.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedSession {
    #[serde(flatten)]
    pub session: VotingSession,
    pub username: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct VotingLog {
    data_dir: PathBuf,
}

impl VotingLog {
    pub fn new(settings: &Settings) -> Self {
        Self {
            data_dir: settings.data_dir.clone(),
        }
    }

    fn path(&self, org_id: &str) -> Result<PathBuf> {
        paths::resolve_under(&self.data_dir, &format!("organizations/{org_id}/voting_history.json"))
    }

    /// Derive a session record from Stage 2 results and append it. Voters
    /// whose parsed ranking resolves to nothing are dropped; an all-empty
    /// session is not recorded.
    #[allow(clippy::too_many_arguments)]
    pub fn record_votes(
        &self,
        org_id: &str,
        conversation_id: &str,
        conversation_title: &str,
        turn_number: usize,
        user_id: Option<&str>,
        stage2_results: &[Stage2Result],
        label_map: &LabelMap,
    ) -> Result<Option<VotingSession>> {
        let votes: Vec<SessionVote> = stage2_results
            .iter()
            .filter_map(|result| {
                let rankings: Vec<RankedCandidate> = result
                    .parsed_ranking
                    .iter()
                    .enumerate()
                    .filter_map(|(i, label)| {
                        label_map.get(label).map(|target| RankedCandidate {
                            rank: i + 1,
                            candidate: target.name.clone(),
                            label: label.clone(),
                        })
                    })
                    .collect();
                if rankings.is_empty() {
                    return None;
                }
                Some(SessionVote {
                    voter_model: result.model.clone(),
                    voter_personality: result.personality_name.clone(),
                    rankings,
                    reasoning: result.ranking.clone(),
                })
            })
            .collect();

        if votes.is_empty() {
            tracing::warn!(conversation_id, "no valid votes to record");
            return Ok(None);
        }

        let session = VotingSession {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            conversation_id: conversation_id.to_owned(),
            conversation_title: conversation_title.to_owned(),
            turn_number,
            user_id: user_id.map(str::to_owned),
            votes,
        };

        let mut history = self.load(org_id)?;
        history.push(session.clone());
        self.save(org_id, &history)?;

        tracing::info!(
            conversation_id,
            turn_number,
            votes = session.votes.len(),
            "voting session recorded"
        );
        Ok(Some(session))
    }

    /// The raw log, oldest first (append order).
    pub fn load(&self, org_id: &str) -> Result<Vec<VotingSession>> {
        let path = self.path(org_id)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Sessions newest first, with usernames resolved through the caller's
    /// directory. Sessions without a user id predate per-user attribution.
    pub fn history(
        &self,
        org_id: &str,
        usernames: &HashMap<String, String>,
    ) -> Result<Vec<EnrichedSession>> {
        let mut sessions = self.load(org_id)?;
        sessions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        Ok(sessions
            .into_iter()
            .map(|session| {
                let username = match &session.user_id {
                    None => "Anonymous/Legacy".to_owned(),
                    Some(id) => usernames
                        .get(id)
                        .cloned()
                        .unwrap_or_else(|| "Unknown User".to_owned()),
                };
                EnrichedSession { session, username }
            })
            .collect())
    }

    fn save(&self, org_id: &str, history: &[VotingSession]) -> Result<()> {
        let path = self.path(org_id)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(history)?)?;
        Ok(())
    }
}
