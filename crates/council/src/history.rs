//! Conversation history preparation for LLM calls.
//!
//! Storage messages carry the full three-stage record; the models only ever
//! see plain user/assistant text. Assistant turns are reduced to the Stage 3
//! final answer, and a sliding window keeps the context bounded.

use concord_domain::ChatMessage;

use crate::types::TranscriptMessage;

/// Marker splitting the chairman's council report from the final answer.
pub const FINAL_ANSWER_MARKER: &str = "PART 2: FINAL ANSWER";

/// Turns of history kept in the LLM window (a turn is a user + assistant
/// message pair).
pub const MAX_HISTORY_TURNS: usize = 10;

// ── Time anchoring ─────────────────────────────────────────────────

/// The system- and user-side time notes. This is the only authoritative
/// time signal sent to the models.
pub fn time_instructions() -> (String, String) {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    let system = format!(
        "Current System Time: {now}. You are operating in the present. Use this as your \
         temporal anchor."
    );
    let user = format!(
        "[SYSTEM NOTE: The current date and time is {now}. Answer the following query using \
         this as the present moment.]"
    );
    (system, user)
}

// ── History shaping ────────────────────────────────────────────────

/// Convert storage messages to LLM-facing history with a sliding window.
///
/// Assistant messages contribute only `stage3.response`; when that text
/// contains the final-answer marker, only the trailing section survives
/// (leading colon and whitespace stripped).
pub fn build_llm_history(messages: &[TranscriptMessage]) -> Vec<ChatMessage> {
    build_llm_history_with_window(messages, MAX_HISTORY_TURNS)
}

pub fn build_llm_history_with_window(
    messages: &[TranscriptMessage],
    max_turns: usize,
) -> Vec<ChatMessage> {
    let window = max_turns * 2;
    let start = messages.len().saturating_sub(window);

    messages[start..]
        .iter()
        .map(|msg| match msg {
            TranscriptMessage::User { content } => ChatMessage::user(content.clone()),
            TranscriptMessage::Assistant { stage3, .. } => {
                ChatMessage::assistant(extract_final_answer(&stage3.response))
            }
        })
        .collect()
}

/// Keep only the text after `PART 2: FINAL ANSWER`, when present.
fn extract_final_answer(stage3_response: &str) -> String {
    match stage3_response.split_once(FINAL_ANSWER_MARKER) {
        Some((_, tail)) => {
            let tail = tail.trim_start();
            let tail = tail.strip_prefix(':').map(str::trim_start).unwrap_or(tail);
            tail.to_string()
        }
        None => stage3_response.to_string(),
    }
}

/// Drop a trailing user message so the current query is never duplicated
/// when it is appended separately.
fn without_trailing_user(history: &[ChatMessage]) -> &[ChatMessage] {
    match history.last() {
        Some(last) if last.role == concord_domain::Role::User => &history[..history.len() - 1],
        _ => history,
    }
}

/// Assemble the message chain for one upstream call:
/// `[system, …history…, user]`.
pub fn build_message_chain(
    system_prompt: &str,
    history: &[ChatMessage],
    user_query: &str,
) -> Vec<ChatMessage> {
    let mut chain = Vec::with_capacity(history.len() + 2);
    chain.push(ChatMessage::system(system_prompt));
    chain.extend_from_slice(without_trailing_user(history));
    chain.push(ChatMessage::user(user_query));
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Stage3Result, TranscriptMessage};
    use concord_domain::Role;

    fn assistant(response: &str) -> TranscriptMessage {
        TranscriptMessage::Assistant {
            stage1: vec![],
            stage2: vec![],
            stage3: Stage3Result {
                model: "m".into(),
                response: response.into(),
                contributors: vec![],
            },
        }
    }

    #[test]
    fn assistant_history_reduced_to_final_answer() {
        let messages = vec![
            TranscriptMessage::user("q1"),
            assistant("## PART 1: COUNCIL REPORT\ntable\n## PART 2: FINAL ANSWER:\n  The answer."),
        ];
        let history = build_llm_history(&messages);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, "The answer.");
    }

    #[test]
    fn marker_absent_keeps_whole_response() {
        let history = build_llm_history(&[assistant("plain answer")]);
        assert_eq!(history[0].content, "plain answer");
    }

    #[test]
    fn sliding_window_keeps_last_ten_turns() {
        let mut messages = Vec::new();
        for i in 0..15 {
            messages.push(TranscriptMessage::user(format!("q{i}")));
            messages.push(assistant(&format!("a{i}")));
        }
        let history = build_llm_history(&messages);
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].content, "q5");
        assert_eq!(history[19].content, "a14");
    }

    #[test]
    fn chain_drops_duplicate_trailing_user_message() {
        let history = vec![
            ChatMessage::user("q1"),
            ChatMessage::assistant("a1"),
            ChatMessage::user("current question"),
        ];
        let chain = build_message_chain("sys", &history, "current question");
        assert_eq!(chain.len(), 4);
        assert_eq!(chain[0].role, Role::System);
        assert_eq!(chain[1].content, "q1");
        assert_eq!(chain[2].content, "a1");
        assert_eq!(chain[3].content, "current question");
    }

    #[test]
    fn chain_keeps_history_ending_in_assistant() {
        let history = vec![ChatMessage::user("q1"), ChatMessage::assistant("a1")];
        let chain = build_message_chain("sys", &history, "q2");
        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn time_instructions_carry_a_timestamp() {
        let (system, user) = time_instructions();
        assert!(system.starts_with("Current System Time: "));
        assert!(user.starts_with("[SYSTEM NOTE: "));
        // YYYY-MM-DD HH:MM:SS shape.
        let ts = &system["Current System Time: ".len()..][..19];
        assert_eq!(ts.as_bytes()[4], b'-');
        assert_eq!(ts.as_bytes()[13], b':');
    }
}
