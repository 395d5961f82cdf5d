//! The streaming session: one council turn driven as an event stream.
//!
//! Per request, a driver task runs the three stages and a second task
//! generates the title (first message only); both publish onto a single
//! bounded channel the transport drains. Dropping the [`SessionHandle`]
//! (client disconnect) aborts both tasks and releases the conversation's
//! turn guard; no assistant message is appended in that case, while the
//! already-appended user message persists so the turn is retryable.

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use concord_council::engine::{anonymize, ALL_MODELS_FAILED};
use concord_council::ranking::calculate_aggregate_rankings;
use concord_council::{LabelMap, Stage3Result, SynthesisMode, TenantContext};
use concord_domain::{Caller, Result};
use concord_store::Conversation;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One SSE record. Serialized as `{"type": ..., "data": {...}}` with
/// `complete` and `error` carrying no data envelope.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StageStart {
        stage: u8,
        name: &'static str,
    },
    Stage1Complete {
        results: Vec<concord_council::Stage1Result>,
    },
    Stage2Complete {
        results: Vec<concord_council::Stage2Result>,
        label_map: LabelMap,
        aggregate_rankings: Vec<concord_council::AggregateRanking>,
    },
    Stage3Complete {
        result: Stage3Result,
    },
    TitleComplete {
        title: String,
    },
    Complete,
    Error {
        message: String,
    },
}

impl SessionEvent {
    pub fn to_json(&self) -> Value {
        match self {
            Self::StageStart { stage, name } => json!({
                "type": "stage_start",
                "data": { "stage": stage, "name": name },
            }),
            Self::Stage1Complete { results } => json!({
                "type": "stage1_complete",
                "data": { "results": results },
            }),
            Self::Stage2Complete {
                results,
                label_map,
                aggregate_rankings,
            } => json!({
                "type": "stage2_complete",
                "data": {
                    "results": results,
                    "metadata": {
                        "label_to_model": label_map,
                        "aggregate_rankings": aggregate_rankings,
                    },
                },
            }),
            Self::Stage3Complete { result } => json!({
                "type": "stage3_complete",
                "data": { "results": result },
            }),
            Self::TitleComplete { title } => json!({
                "type": "title_complete",
                "data": { "title": title },
            }),
            Self::Complete => json!({ "type": "complete" }),
            Self::Error { message } => json!({ "type": "error", "message": message }),
        }
    }

    /// Terminal events close the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error { .. })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handle & guard
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Receiver side of a running session plus its cleanup guard. Drop it to
/// cancel everything.
pub struct SessionHandle {
    pub rx: mpsc::Receiver<SessionEvent>,
    pub guard: SessionGuard,
}

/// Aborts the session's tasks and resets the conversation's turn guard on
/// drop. Cleanup runs on every exit path: normal drain, client disconnect,
/// or a handler error after `begin_processing`.
pub struct SessionGuard {
    state: AppState,
    caller: Caller,
    conversation_id: String,
    aborts: Vec<AbortHandle>,
}

impl SessionGuard {
    fn new(state: AppState, caller: Caller, conversation_id: String) -> Self {
        Self {
            state,
            caller,
            conversation_id,
            aborts: Vec::new(),
        }
    }

    fn track(&mut self, handle: AbortHandle) {
        self.aborts.push(handle);
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        for handle in &self.aborts {
            handle.abort();
        }
        if let Err(e) = self
            .state
            .conversations
            .end_processing(&self.caller, &self.conversation_id)
        {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                error = %e,
                "failed to reset processing state"
            );
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Start one council turn. Validates access, takes the conversation's turn
/// guard, appends the user message, and spawns the driver + title tasks.
///
/// The returned handle's channel yields events in the contract order:
/// `stage_start(1) → stage1_complete → stage_start(2) → stage2_complete →
/// stage_start(3) → stage3_complete [→ title_complete] → complete`, with
/// `error` terminal on failure.
pub fn run_session(
    state: &AppState,
    caller: &Caller,
    conversation_id: &str,
    content: &str,
) -> Result<SessionHandle> {
    // Access checks happen before the turn guard so a 404/403 never leaves
    // the conversation locked.
    state.conversations.get(caller, conversation_id)?;
    state.conversations.begin_processing(caller, conversation_id)?;
    let mut guard = SessionGuard::new(state.clone(), caller.clone(), conversation_id.to_owned());

    // Append the user message and keep the post-append snapshot: the engine
    // must see a history that already includes it.
    let conversation = state
        .conversations
        .append_user_message(caller, conversation_id, content)?;
    let ctx = state.tenant_context(&caller.org_id)?;
    let is_first_message = conversation.messages.len() == 1;

    let (tx, rx) = mpsc::channel::<SessionEvent>(64);

    let title_task = is_first_message.then(|| {
        let state = state.clone();
        let ctx = ctx.clone();
        let query = content.to_owned();
        tokio::spawn(async move { state.engine.generate_title(&query, &ctx).await })
    });
    if let Some(task) = &title_task {
        guard.track(task.abort_handle());
    }

    let driver = tokio::spawn(drive(
        state.clone(),
        caller.clone(),
        conversation,
        content.to_owned(),
        ctx,
        title_task,
        tx,
    ));
    guard.track(driver.abort_handle());

    Ok(SessionHandle { rx, guard })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Driver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn drive(
    state: AppState,
    caller: Caller,
    conversation: Conversation,
    user_query: String,
    ctx: TenantContext,
    title_task: Option<tokio::task::JoinHandle<String>>,
    tx: mpsc::Sender<SessionEvent>,
) {
    if let Err(e) = drive_inner(&state, &caller, &conversation, &user_query, &ctx, title_task, &tx).await
    {
        tracing::error!(conversation_id = %conversation.id, error = %e, "session failed");
        let _ = tx
            .send(SessionEvent::Error {
                message: e.to_string(),
            })
            .await;
    }
}

/// Send an event, or bail out quietly when the client is gone.
macro_rules! emit {
    ($tx:expr, $event:expr) => {
        if $tx.send($event).await.is_err() {
            return Ok(());
        }
    };
}

async fn drive_inner(
    state: &AppState,
    caller: &Caller,
    conversation: &Conversation,
    user_query: &str,
    ctx: &TenantContext,
    title_task: Option<tokio::task::JoinHandle<String>>,
    tx: &mpsc::Sender<SessionEvent>,
) -> Result<()> {
    let history = concord_council::history::build_llm_history(&conversation.messages);

    // ── Stage 1: Propose ──────────────────────────────────────────
    emit!(tx, SessionEvent::StageStart { stage: 1, name: "Individual Responses" });
    let stage1 = state.engine.stage1_collect(user_query, &history, ctx).await?;
    emit!(tx, SessionEvent::Stage1Complete { results: stage1.clone() });

    // ── Stage 2: Rank ─────────────────────────────────────────────
    emit!(tx, SessionEvent::StageStart { stage: 2, name: "Peer Ranking" });
    let (stage2, label_map, aggregate_rankings) = if stage1.is_empty() {
        // Short-circuit: no proposals means nothing to rank and nothing to
        // vote on; the stage events still flow so clients see the sequence.
        (Vec::new(), LabelMap::new(), Vec::new())
    } else {
        let label_map = anonymize(&stage1);
        let stage2 = state
            .engine
            .stage2_collect(user_query, &stage1, &label_map, &history, ctx)
            .await?;
        let aggregate = calculate_aggregate_rankings(&stage2, &label_map);

        record_votes(state, caller, conversation, &stage2, &label_map);

        (stage2, label_map, aggregate)
    };
    emit!(
        tx,
        SessionEvent::Stage2Complete {
            results: stage2.clone(),
            label_map: label_map.clone(),
            aggregate_rankings,
        }
    );

    // ── Stage 3: Synthesize ───────────────────────────────────────
    emit!(tx, SessionEvent::StageStart { stage: 3, name: "Final Synthesis" });
    let stage3 = if stage1.is_empty() {
        Stage3Result {
            model: "error".into(),
            response: ALL_MODELS_FAILED.into(),
            contributors: Vec::new(),
        }
    } else {
        match synthesis_mode(state, caller) {
            SynthesisMode::Chairman => {
                state
                    .engine
                    .stage3_synthesize(user_query, &stage1, &stage2, &label_map, &history, ctx)
                    .await?
            }
            SynthesisMode::Consensus { strategy } => {
                concord_council::consensus::synthesize_consensus(
                    &state.upstream,
                    &state.config,
                    &stage1,
                    &stage2,
                    ctx,
                    strategy.as_deref(),
                )
                .await?
            }
        }
    };
    emit!(tx, SessionEvent::Stage3Complete { result: stage3.clone() });

    // ── Title (first message only) ────────────────────────────────
    if let Some(task) = title_task {
        match task.await {
            Ok(title) => {
                if let Err(e) = state.conversations.update_title(caller, &conversation.id, &title) {
                    tracing::warn!(error = %e, "failed to store conversation title");
                }
                emit!(tx, SessionEvent::TitleComplete { title });
            }
            Err(e) => tracing::warn!(error = %e, "title task aborted"),
        }
    }

    // ── Transcript append ─────────────────────────────────────────
    state.conversations.append_assistant_message(
        caller,
        &conversation.id,
        stage1,
        stage2,
        stage3,
    )?;

    emit!(tx, SessionEvent::Complete);
    Ok(())
}

/// Both vote stores are best-effort: failures are logged and the turn
/// proceeds.
fn record_votes(
    state: &AppState,
    caller: &Caller,
    conversation: &Conversation,
    stage2: &[concord_council::Stage2Result],
    label_map: &LabelMap,
) {
    // The snapshot includes the just-appended user message, so its length
    // is odd: turn N has 2(N-1)+1 messages.
    let turn_number = (conversation.messages.len() + 1) / 2;

    if let Err(e) = state.votes.record_votes(
        &caller.org_id,
        &conversation.id,
        turn_number,
        stage2,
        label_map,
    ) {
        tracing::error!(error = %e, "failed to record vote rows");
    }
    if let Err(e) = state.voting_log.record_votes(
        &caller.org_id,
        &conversation.id,
        &conversation.title,
        turn_number,
        Some(&caller.user_id),
        stage2,
        label_map,
    ) {
        tracing::error!(error = %e, "failed to append voting session");
    }
}

/// The caller's Stage 3 mode: a consensus strategy when their active
/// configuration names one, else the chairman.
fn synthesis_mode(state: &AppState, caller: &Caller) -> SynthesisMode {
    match state.packs.active_config(&caller.org_id, &caller.user_id) {
        Ok(Some(active)) => match active.strategy_id {
            Some(strategy) => SynthesisMode::Consensus {
                strategy: Some(strategy),
            },
            None => SynthesisMode::Chairman,
        },
        Ok(None) => SynthesisMode::Chairman,
        Err(e) => {
            tracing::warn!(error = %e, "active configuration unreadable, using chairman");
            SynthesisMode::Chairman
        }
    }
}
