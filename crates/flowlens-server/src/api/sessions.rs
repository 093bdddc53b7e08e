use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAliveStream};
use axum::response::Sse;
use axum::{Json, Router, routing::{get, post}};
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use flowlens_core::event::decode_events;

use crate::api::session_slot;
use crate::error::AppError;
use crate::sse::{sse_event, sse_response};
use crate::state::AppState;
use crate::types::{
    ConnectionRequest, CreateSessionRequest, CreateSessionResponse, ExpandRequest, ExpandResponse,
    IngestRequest, IngestResponse, SelectRequest, SessionSummary, ViewSnapshot, WatchRequest,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/{id}", get(get_view).delete(delete_session))
        .route("/sessions/{id}/watch", post(watch))
        .route("/sessions/{id}/events", post(ingest_events))
        .route("/sessions/{id}/view", get(get_view))
        .route("/sessions/{id}/stream", get(stream_view))
        .route("/sessions/{id}/select", post(select_step))
        .route("/sessions/{id}/expand", post(expand_step))
        .route("/sessions/{id}/connection", post(set_connection))
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), AppError> {
    let target = req.target.trim();
    if target.is_empty() {
        return Err(AppError::BadRequest("target must not be empty".into()));
    }
    let session_id = Uuid::new_v4().to_string();
    let catalog = req.catalog();
    tracing::info!(%session_id, watch_target = target, nodes = catalog.len(), "session created");
    state
        .sessions
        .create(session_id.clone(), target.to_string(), catalog, state.config.ledger.clone())
        .await;
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { session_id })))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    let mut summaries = Vec::new();
    for slot in state.sessions.list().await {
        summaries.push(slot.summary().await);
    }
    Json(summaries)
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    match state.sessions.delete(&id).await {
        Some(_) => {
            tracing::info!(session_id = %id, "session deleted");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(AppError::session_not_found(&id)),
    }
}

async fn watch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<WatchRequest>,
) -> Result<Json<ViewSnapshot>, AppError> {
    let target = req.target.trim();
    if target.is_empty() {
        return Err(AppError::BadRequest("target must not be empty".into()));
    }
    let slot = session_slot(&state, &id).await?;
    let ((), snapshot) = slot
        .update(|locked| {
            locked.session.watch(target);
            locked.outbox.clear();
            Ok::<_, AppError>(())
        })
        .await?;
    Ok(Json(snapshot))
}

async fn ingest_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, AppError> {
    let slot = session_slot(&state, &id).await?;
    let batch = decode_events(req.events);
    let events = batch.events;
    let (summary, _) = slot
        .update(|locked| Ok::<_, AppError>(locked.session.ingest_all(events)))
        .await?;
    if summary.rejected > 0 {
        tracing::warn!(session_id = %id, rejected = summary.rejected, "events rejected by frozen session");
    }
    Ok(Json(IngestResponse {
        accepted: summary.accepted,
        skipped: batch.skipped,
        rejected: summary.rejected,
        resets: summary.resets,
    }))
}

async fn get_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ViewSnapshot>, AppError> {
    let slot = session_slot(&state, &id).await?;
    Ok(Json(slot.snapshot().await))
}

/// Current snapshot first, then one event per change until the session is
/// deleted.
async fn stream_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<KeepAliveStream<impl Stream<Item = Result<Event, Infallible>>>>, AppError> {
    let slot = session_slot(&state, &id).await?;
    let (initial, mut updates) = slot.subscribe().await;
    drop(slot);

    let stream = async_stream::stream! {
        yield sse_event("view", &initial);
        loop {
            match updates.recv().await {
                Ok(snapshot) => {
                    yield sse_event("view", snapshot.as_ref());
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(session_id = %id, missed, "view stream lagged, skipping to latest");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };
    Ok(sse_response(stream))
}

async fn select_step(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SelectRequest>,
) -> Result<Json<ViewSnapshot>, AppError> {
    let slot = session_slot(&state, &id).await?;
    let ((), snapshot) = slot
        .update(|locked| {
            if locked.session.select(&req.step_id) {
                Ok(())
            } else {
                Err(AppError::NotFound(format!("Step {} not found", req.step_id)))
            }
        })
        .await?;
    Ok(Json(snapshot))
}

async fn expand_step(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ExpandRequest>,
) -> Result<Json<ExpandResponse>, AppError> {
    let slot = session_slot(&state, &id).await?;
    let (expanded, _) = slot
        .update(|locked| {
            let expanded = match req.expanded {
                Some(expanded) => locked.session.set_expanded(&req.step_id, expanded).then_some(expanded),
                None => locked.session.toggle_expanded(&req.step_id),
            };
            expanded.ok_or_else(|| AppError::NotFound(format!("Step {} not found", req.step_id)))
        })
        .await?;
    Ok(Json(ExpandResponse {
        step_id: req.step_id,
        expanded,
    }))
}

async fn set_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ConnectionRequest>,
) -> Result<Json<ViewSnapshot>, AppError> {
    let slot = session_slot(&state, &id).await?;
    let ((), snapshot) = slot
        .update(|locked| {
            if req.connected {
                locked.session.mark_connected();
            } else {
                locked.session.mark_disconnected(req.error);
            }
            Ok::<_, AppError>(())
        })
        .await?;
    Ok(Json(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::api_routes;
    use crate::api::test_support::{create_session, json_body, send};
    use serde_json::json;

    fn test_app() -> Router {
        api_routes().with_state(AppState::default())
    }

    #[tokio::test]
    async fn create_list_delete() {
        let app = test_app();
        let id = create_session(&app, json!({"target": "wf-1"})).await;

        let resp = send(&app, "GET", "/api/sessions", None).await;
        assert_eq!(resp.status(), 200);
        let list = json_body(resp).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert_eq!(list[0]["session_id"], id.as_str());
        assert_eq!(list[0]["target"], "wf-1");
        assert_eq!(list[0]["status"], "idle");

        let resp = send(&app, "DELETE", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(resp.status(), 204);
        let resp = send(&app, "DELETE", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn empty_target_is_rejected() {
        let app = test_app();
        let resp = send(&app, "POST", "/api/sessions", Some(json!({"target": "  "}))).await;
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn ingest_then_view() {
        let app = test_app();
        let id = create_session(&app, json!({"target": "wf"})).await;
        let events = json!({"events": [
            {"type": "flow_start", "run_id": "r"},
            {"type": "node_start", "run_id": "r", "node_id": "a"},
            "garbage",
            {"type": "node_complete", "run_id": "r", "node_id": "a", "result": {"message": "hi"}}
        ]});
        let resp = send(&app, "POST", &format!("/api/sessions/{id}/events"), Some(events)).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(
            json_body(resp).await,
            json!({"accepted": 3, "skipped": 1, "rejected": 0, "resets": 0})
        );

        let resp = send(&app, "GET", &format!("/api/sessions/{id}/view"), None).await;
        let snapshot = json_body(resp).await;
        assert_eq!(snapshot["view"]["root_run_id"], "r");
        assert_eq!(snapshot["view"]["steps"][0]["status"], "completed");
        assert_eq!(snapshot["selected"], "r:a:1");
        assert_eq!(snapshot["connection"]["connected"], true);
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let app = test_app();
        let resp = send(&app, "GET", "/api/sessions/nope/view", None).await;
        assert_eq!(resp.status(), 404);
        let resp = send(&app, "POST", "/api/sessions/nope/events", Some(json!({"events": []}))).await;
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn select_and_expand() {
        let app = test_app();
        let id = create_session(&app, json!({"target": "wf"})).await;
        let events = json!({"events": [
            {"type": "node_start", "run_id": "r", "node_id": "call"},
            {"type": "subworkflow_update", "run_id": "r", "node_id": "call", "sub_run_id": "c"},
            {"type": "node_start", "run_id": "c", "node_id": "x"}
        ]});
        send(&app, "POST", &format!("/api/sessions/{id}/events"), Some(events)).await;

        let resp = send(&app, "POST", &format!("/api/sessions/{id}/select"), Some(json!({"step_id": "c:x:2"}))).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(json_body(resp).await["selected"], "c:x:2");

        let resp = send(&app, "POST", &format!("/api/sessions/{id}/select"), Some(json!({"step_id": "zzz"}))).await;
        assert_eq!(resp.status(), 404);

        // Running root row starts expanded; toggling collapses it.
        let resp = send(&app, "POST", &format!("/api/sessions/{id}/expand"), Some(json!({"step_id": "r:call:0"}))).await;
        assert_eq!(json_body(resp).await, json!({"step_id": "r:call:0", "expanded": false}));
        let resp = send(
            &app,
            "POST",
            &format!("/api/sessions/{id}/expand"),
            Some(json!({"step_id": "r:call:0", "expanded": true})),
        )
        .await;
        assert_eq!(json_body(resp).await["expanded"], true);

        let resp = send(&app, "GET", &format!("/api/sessions/{id}/view"), None).await;
        assert_eq!(json_body(resp).await["expanded"], json!(["r:call:0"]));
    }

    #[tokio::test]
    async fn disconnected_session_rejects_events() {
        let app = test_app();
        let id = create_session(&app, json!({"target": "wf"})).await;
        let resp = send(
            &app,
            "POST",
            &format!("/api/sessions/{id}/connection"),
            Some(json!({"connected": false, "error": "socket closed"})),
        )
        .await;
        let snapshot = json_body(resp).await;
        assert_eq!(snapshot["connection"], json!({"connected": false, "error": "socket closed"}));

        let events = json!({"events": [{"type": "flow_start", "run_id": "r"}]});
        let resp = send(&app, "POST", &format!("/api/sessions/{id}/events"), Some(events.clone())).await;
        assert_eq!(json_body(resp).await["rejected"], 1);

        send(&app, "POST", &format!("/api/sessions/{id}/connection"), Some(json!({"connected": true}))).await;
        let resp = send(&app, "POST", &format!("/api/sessions/{id}/events"), Some(events)).await;
        assert_eq!(json_body(resp).await["accepted"], 1);
    }

    #[tokio::test]
    async fn watch_resets_session() {
        let app = test_app();
        let id = create_session(&app, json!({"target": "wf"})).await;
        let events = json!({"events": [{"type": "node_start", "run_id": "r", "node_id": "a"}]});
        send(&app, "POST", &format!("/api/sessions/{id}/events"), Some(events)).await;

        let resp = send(&app, "POST", &format!("/api/sessions/{id}/watch"), Some(json!({"target": "wf-2"}))).await;
        let snapshot = json_body(resp).await;
        assert_eq!(snapshot["view"]["steps"], json!([]));
        assert_eq!(snapshot["generation"], 2);
    }
}
