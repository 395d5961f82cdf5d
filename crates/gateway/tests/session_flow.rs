//! Streaming-session behavior: event ordering, transcript append rules,
//! the concurrent-turn guard, history freshness, and cancellation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::Value;

use concord_domain::{Caller, Error, Settings};
use concord_gateway::runtime::{run_session, SessionEvent};
use concord_gateway::AppState;

const CHAIRMAN_MODEL: &str = "google/gemini-2.5-pro";

// ── Scripted mock endpoint ─────────────────────────────────────────

#[derive(Clone)]
enum Reply {
    Content(&'static str),
    Fail,
    /// Sleep long enough that the test can cancel mid-flight.
    Hang,
}

#[derive(Clone, Default)]
struct Script {
    replies: Arc<Mutex<HashMap<String, VecDeque<Reply>>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl Script {
    fn queue(&self, model: &str, replies: &[Reply]) {
        self.replies
            .lock()
            .insert(model.to_owned(), replies.iter().cloned().collect());
    }

    fn requests_for(&self, model: &str) -> Vec<Value> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r["model"] == model)
            .cloned()
            .collect()
    }
}

async fn completions(State(script): State<Script>, Json(body): Json<Value>) -> impl IntoResponse {
    script.requests.lock().push(body.clone());
    let model = body["model"].as_str().unwrap_or_default().to_owned();
    let reply = script.replies.lock().get_mut(&model).and_then(VecDeque::pop_front);

    match reply {
        Some(Reply::Content(text)) => Json(serde_json::json!({
            "choices": [{"message": {"content": text}}]
        }))
        .into_response(),
        Some(Reply::Hang) => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            (StatusCode::GONE, Json(serde_json::json!({}))).into_response()
        }
        Some(Reply::Fail) | None => {
            (StatusCode::BAD_REQUEST, Json(serde_json::json!({}))).into_response()
        }
    }
}

async fn spawn_mock(script: Script) -> String {
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(script);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v1/chat/completions")
}

// ── Fixtures ───────────────────────────────────────────────────────

struct Fixture {
    _tmp: tempfile::TempDir,
    state: AppState,
    script: Script,
    caller: Caller,
}

async fn fixture(personalities: &[(&str, &str, &str)]) -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let script = Script::default();
    let base_url = spawn_mock(script.clone()).await;

    let settings = Settings {
        data_dir: tmp.path().to_path_buf(),
        llm_api_key: Some("test-key".into()),
        llm_api_url: base_url,
        llm_max_retries: 1,
        llm_request_timeout: 5.0,
        ..Settings::default()
    };

    // A dedicated title model keeps the title task's scripted replies
    // separate from the chairman's.
    std::fs::create_dir_all(settings.defaults_dir()).unwrap();
    std::fs::write(
        settings.defaults_dir().join("system-prompts.yaml"),
        "title_generation:\n  model: title-model\n",
    )
    .unwrap();

    let personalities_dir = settings.defaults_dir().join("personalities");
    std::fs::create_dir_all(&personalities_dir).unwrap();
    for (id, name, model) in personalities {
        std::fs::write(
            personalities_dir.join(format!("{id}.yaml")),
            format!(
                "id: {id}\nname: {name}\nmodel: {model}\npersonality_prompt:\n  identity_and_role: You are {name}.\n"
            ),
        )
        .unwrap();
    }

    let state = AppState::from_settings(settings).unwrap();
    let caller = Caller::member("u1", "alice", "org-1");

    Fixture {
        _tmp: tmp,
        state,
        script,
        caller,
    }
}

fn nominal_script(script: &Script) {
    script.queue("m1", &[Reply::Content("R1"), Reply::Content("FINAL RANKING:\n1. Response B")]);
    script.queue("m2", &[Reply::Content("R2"), Reply::Content("FINAL RANKING:\n1. Response A")]);
    script.queue("title-model", &[Reply::Content("A Fine Title")]);
    script.queue(CHAIRMAN_MODEL, &[Reply::Content("final answer")]);
}

fn event_types(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .map(|e| e.to_json()["type"].as_str().unwrap().to_owned())
        .collect()
}

async fn drain(
    handle: concord_gateway::runtime::SessionHandle,
) -> Vec<SessionEvent> {
    let concord_gateway::runtime::SessionHandle { mut rx, guard } = handle;
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    drop(guard);
    events
}

// ── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn nominal_turn_emits_events_in_contract_order() {
    let f = fixture(&[("p1", "Analyst", "m1"), ("p2", "Skeptic", "m2")]).await;
    nominal_script(&f.script);

    let conversation = f.state.conversations.create(&f.caller).unwrap();
    let handle = run_session(&f.state, &f.caller, &conversation.id, "why rust?").unwrap();
    let events = drain(handle).await;

    assert_eq!(
        event_types(&events),
        [
            "stage_start",
            "stage1_complete",
            "stage_start",
            "stage2_complete",
            "stage_start",
            "stage3_complete",
            "title_complete",
            "complete",
        ]
    );

    // Stage 2 metadata carries the bijection and the aggregation.
    let stage2 = events[3].to_json();
    assert_eq!(stage2["data"]["metadata"]["label_to_model"]["Response A"]["id"], "p1");
    assert_eq!(
        stage2["data"]["metadata"]["aggregate_rankings"]
            .as_array()
            .unwrap()
            .len(),
        2
    );

    // Transcript: user + assistant, all three stages verbatim.
    let loaded = f.state.conversations.get(&f.caller, &conversation.id).unwrap();
    assert_eq!(loaded.messages.len(), 2);
    assert_eq!(loaded.title, "A Fine Title");

    // Votes landed in both stores.
    let active = f.state.config.active_personalities("org-1").unwrap();
    let table = f.state.votes.league_table("org-1", &active).unwrap();
    assert!(table.iter().any(|r| r.id == "p1" && r.votes_received == 1));
    let log = f.state.voting_log.load("org-1").unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].turn_number, 1);
    assert_eq!(log[0].user_id.as_deref(), Some("u1"));
}

#[tokio::test]
async fn second_turn_sees_fresh_full_history() {
    let f = fixture(&[("p1", "Analyst", "m1")]).await;

    // Turn 1.
    f.script.queue("m1", &[Reply::Content("R1"), Reply::Content("no peers")]);
    f.script.queue("title-model", &[Reply::Content("Title")]);
    f.script.queue(CHAIRMAN_MODEL, &[Reply::Content("first answer")]);
    let conversation = f.state.conversations.create(&f.caller).unwrap();
    let handle = run_session(&f.state, &f.caller, &conversation.id, "first question").unwrap();
    drain(handle).await;

    // Turn 2.
    f.script.queue("m1", &[Reply::Content("R1b"), Reply::Content("no peers")]);
    f.script.queue(CHAIRMAN_MODEL, &[Reply::Content("second answer")]);
    let handle = run_session(&f.state, &f.caller, &conversation.id, "second question").unwrap();
    let events = drain(handle).await;
    assert!(event_types(&events).contains(&"complete".to_owned()));

    // Turn N history: 2(N-1) prior messages + the new user message; the
    // chain re-appends the query after dropping the trailing user message,
    // so stage 1 of turn 2 sees [system, q1, a1, q2].
    let m1_requests = f.script.requests_for("m1");
    let turn2_stage1 = &m1_requests[2];
    let messages = turn2_stage1["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 4);
    assert!(messages[1]["content"].as_str().unwrap().contains("first question"));
    assert_eq!(messages[2]["content"], "first answer");
    assert!(messages[3]["content"].as_str().unwrap().contains("second question"));
}

#[tokio::test]
async fn concurrent_turn_is_a_conflict() {
    let f = fixture(&[("p1", "Analyst", "m1")]).await;
    f.script.queue("m1", &[Reply::Hang]);
    f.script.queue(CHAIRMAN_MODEL, &[Reply::Hang]);

    let conversation = f.state.conversations.create(&f.caller).unwrap();
    let first = run_session(&f.state, &f.caller, &conversation.id, "q1").unwrap();

    let second = run_session(&f.state, &f.caller, &conversation.id, "q2");
    assert!(matches!(second, Err(Error::Conflict(_))));

    drop(first);
}

#[tokio::test]
async fn disconnect_after_stage1_discards_the_turn() {
    let f = fixture(&[("p1", "Analyst", "m1"), ("p2", "Skeptic", "m2")]).await;
    // Stage 1 succeeds; stage 2 hangs so cancellation lands mid-stage.
    f.script.queue("m1", &[Reply::Content("R1"), Reply::Hang]);
    f.script.queue("m2", &[Reply::Content("R2"), Reply::Hang]);
    f.script.queue("title-model", &[Reply::Content("Title")]);
    f.script.queue(CHAIRMAN_MODEL, &[Reply::Content("never used")]);

    let conversation = f.state.conversations.create(&f.caller).unwrap();
    let mut handle = run_session(&f.state, &f.caller, &conversation.id, "q").unwrap();

    // Read until stage1_complete, then drop the handle (client closed).
    loop {
        let event = handle.rx.recv().await.unwrap();
        if event.to_json()["type"] == "stage1_complete" {
            break;
        }
    }
    drop(handle);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // No stage2/3 events were produced, no assistant message was appended,
    // and the user message persists for a retry.
    let loaded = f.state.conversations.get(&f.caller, &conversation.id).unwrap();
    assert_eq!(loaded.messages.len(), 1);
    // No votes from the cancelled stage 2.
    assert!(f.state.voting_log.load("org-1").unwrap().is_empty());

    // The turn guard was released: a retry with the same query starts.
    f.script.queue("m1", &[Reply::Content("R1"), Reply::Content("no peers")]);
    f.script.queue("m2", &[Reply::Fail, Reply::Content("FINAL RANKING:\n1. Response A")]);
    f.script.queue(CHAIRMAN_MODEL, &[Reply::Content("retry answer")]);
    let handle = run_session(&f.state, &f.caller, &conversation.id, "q again").unwrap();
    let events = drain(handle).await;
    assert!(event_types(&events).contains(&"complete".to_owned()));
}

#[tokio::test]
async fn all_failed_stage1_short_circuits_without_votes() {
    let f = fixture(&[("p1", "Analyst", "m1"), ("p2", "Skeptic", "m2")]).await;
    f.script.queue("m1", &[Reply::Fail, Reply::Fail]);
    f.script.queue("m2", &[Reply::Fail, Reply::Fail]);
    f.script.queue("title-model", &[Reply::Content("Title")]);
    f.script.queue(CHAIRMAN_MODEL, &[Reply::Content("unused")]);

    let conversation = f.state.conversations.create(&f.caller).unwrap();
    let handle = run_session(&f.state, &f.caller, &conversation.id, "q").unwrap();
    let events = drain(handle).await;

    let types = event_types(&events);
    assert!(types.contains(&"stage3_complete".to_owned()));
    assert!(types.contains(&"complete".to_owned()));

    let stage3 = events
        .iter()
        .find(|e| e.to_json()["type"] == "stage3_complete")
        .unwrap()
        .to_json();
    assert_eq!(
        stage3["data"]["results"]["response"],
        "All models failed to respond. Please try again."
    );

    // No votes recorded anywhere.
    assert!(f.state.voting_log.load("org-1").unwrap().is_empty());
    let table = f.state.votes.league_table("org-1", &[]).unwrap();
    assert!(table.is_empty());
}

#[tokio::test]
async fn unknown_conversation_is_not_found_without_locking() {
    let f = fixture(&[("p1", "Analyst", "m1")]).await;
    assert!(matches!(
        run_session(&f.state, &f.caller, "missing-id", "q"),
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn wire_format_matches_the_sse_contract() {
    let event = SessionEvent::StageStart { stage: 1, name: "Individual Responses" };
    assert_eq!(
        event.to_json(),
        serde_json::json!({"type": "stage_start", "data": {"stage": 1, "name": "Individual Responses"}})
    );

    let complete = SessionEvent::Complete;
    assert_eq!(complete.to_json(), serde_json::json!({"type": "complete"}));
    assert!(complete.is_terminal());

    let error = SessionEvent::Error { message: "boom".into() };
    assert_eq!(
        error.to_json(),
        serde_json::json!({"type": "error", "message": "boom"})
    );
    assert!(error.is_terminal());
}
