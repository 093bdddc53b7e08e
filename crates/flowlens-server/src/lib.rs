pub mod api;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod retry;
pub mod session;
pub mod sse;
pub mod state;
pub mod types;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api::api_routes().layer(cors).with_state(state)
}
