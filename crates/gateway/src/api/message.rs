//! Turn endpoints: full-response JSON and SSE streaming.
//!
//! Both run the same streaming session; the JSON endpoint drains the event
//! channel and assembles the final payload, the SSE endpoint forwards each
//! event as one `data: {json}` record.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::json;

use crate::auth::Identity;
use crate::errors::ApiError;
use crate::runtime::{run_session, SessionEvent, SessionHandle};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

// ── POST /api/conversations/:id/message ────────────────────────────

pub async fn send(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Path(id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Response {
    let handle = match run_session(&state, &caller, &id, &body.content) {
        Ok(h) => h,
        Err(e) => return ApiError(e).into_response(),
    };

    let SessionHandle { mut rx, guard } = handle;
    let mut stage1 = json!([]);
    let mut stage2 = json!([]);
    let mut stage3 = json!(null);
    let mut metadata = json!({});

    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::Stage1Complete { results } => stage1 = json!(results),
            SessionEvent::Stage2Complete {
                results,
                label_map,
                aggregate_rankings,
            } => {
                stage2 = json!(results);
                metadata = json!({
                    "label_to_model": label_map,
                    "aggregate_rankings": aggregate_rankings,
                });
            }
            SessionEvent::Stage3Complete { result } => stage3 = json!(result),
            SessionEvent::Error { message } => {
                drop(guard);
                return ApiError(concord_domain::Error::Other(message)).into_response();
            }
            SessionEvent::StageStart { .. }
            | SessionEvent::TitleComplete { .. }
            | SessionEvent::Complete => {}
        }
    }
    drop(guard);

    Json(json!({
        "stage1": stage1,
        "stage2": stage2,
        "stage3": stage3,
        "metadata": metadata,
    }))
    .into_response()
}

// ── POST /api/conversations/:id/message/stream ─────────────────────

pub async fn send_stream(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Path(id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Response {
    let handle = match run_session(&state, &caller, &id, &body.content) {
        Ok(h) => h,
        Err(e) => return ApiError(e).into_response(),
    };

    let mut response = Sse::new(event_stream(handle))
        .keep_alive(KeepAlive::default())
        .into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache"),
    );
    response.headers_mut().insert(
        header::CONNECTION,
        header::HeaderValue::from_static("keep-alive"),
    );
    response
}

fn event_stream(
    handle: SessionHandle,
) -> impl Stream<Item = std::result::Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        let SessionHandle { mut rx, guard } = handle;
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            yield Ok(Event::default().data(event.to_json().to_string()));
            if terminal {
                break;
            }
        }
        // guard drops here: tasks aborted (no-ops when finished) and the
        // conversation's turn guard released — on disconnect too.
        drop(guard);
    }
}
