use axum::extract::{Path, State};
use axum::{Json, Router, routing::{get, post}};

use flowlens_core::control::ControlMessage;

use crate::api::session_slot;
use crate::error::AppError;
use crate::state::AppState;
use crate::types::{ControlResponse, OutboxResponse};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sessions/{id}/control", post(queue_message))
        .route("/sessions/{id}/outbox", get(drain_outbox))
}

/// Queue a message for the runtime. A `run` message resets the session
/// first; a `control` message without a run id targets the current root run.
async fn queue_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(message): Json<ControlMessage>,
) -> Result<Json<ControlResponse>, AppError> {
    let slot = session_slot(&state, &id).await?;
    let (response, _) = slot
        .update(|locked| -> Result<ControlResponse, AppError> {
            let queued = match message {
                ControlMessage::Run { input_data } => {
                    locked.session.begin_run();
                    locked.session.run_message(input_data)
                }
                ControlMessage::Resume { response } => locked.session.resume_message(response),
                ControlMessage::Control { action, run_id } if run_id.is_empty() => {
                    locked.session.control_message(action)?
                }
                control @ ControlMessage::Control { .. } => control,
            };
            tracing::info!(session_id = %id, message = ?queued, "control message queued");
            locked.outbox.push(queued.clone());
            Ok(ControlResponse {
                queued,
                pending: locked.outbox.len(),
            })
        })
        .await?;
    Ok(Json(response))
}

async fn drain_outbox(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OutboxResponse>, AppError> {
    let slot = session_slot(&state, &id).await?;
    let messages = std::mem::take(&mut slot.write().await.outbox);
    Ok(Json(OutboxResponse { messages }))
}
