pub mod control;
pub mod preview;
pub mod sessions;

use std::sync::Arc;

use axum::{Router, routing::get};

use crate::error::AppError;
use crate::session::SessionSlot;
use crate::state::AppState;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest(
            "/api",
            sessions::routes()
                .merge(control::routes())
                .merge(preview::routes()),
        )
}

pub(crate) async fn session_slot(state: &AppState, session_id: &str) -> Result<Arc<SessionSlot>, AppError> {
    state
        .sessions
        .get(session_id)
        .await
        .ok_or_else(|| AppError::session_not_found(session_id))
}
