use axum::extract::{Path, State};
use axum::{Json, Router, routing::get};

use flowlens_core::error::ArtifactError;

use crate::api::session_slot;
use crate::error::AppError;
use crate::state::AppState;
use crate::types::PreviewResponse;

pub fn routes() -> Router<AppState> {
    Router::new().route("/sessions/{id}/steps/{step_id}/preview", get(step_preview))
}

/// Interpreted output of one step, plus the referenced artifact when the
/// runtime can supply it.
async fn step_preview(
    State(state): State<AppState>,
    Path((id, step_id)): Path<(String, String)>,
) -> Result<Json<PreviewResponse>, AppError> {
    let slot = session_slot(&state, &id).await?;
    let preview = {
        let guard = slot.read().await;
        let view = guard.session.view();
        if !view.contains(&step_id) {
            return Err(AppError::NotFound(format!("Step {step_id} not found")));
        }
        view.preview(&step_id)
    };

    let artifact_id = preview.as_ref().and_then(|p| p.artifact_id.clone());
    let artifact = match artifact_id {
        Some(artifact_id) => match state.artifacts.fetch(&artifact_id).await {
            Ok(artifact) => artifact,
            Err(ArtifactError::NotConfigured) => None,
            Err(err) => {
                tracing::warn!(%artifact_id, error = %err, "artifact fetch failed");
                return Err(err.into());
            }
        },
        None => None,
    };

    Ok(Json(PreviewResponse {
        step_id,
        preview,
        artifact,
    }))
}
