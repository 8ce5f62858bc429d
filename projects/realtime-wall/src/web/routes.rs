use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

use super::handlers;

pub fn build_router(state: Arc<AppState>) -> Router {
    let wall_routes = Router::new()
        .route("/", get(handlers::wall))
        .route("/visibility", post(handlers::visibility))
        .route("/refresh", post(handlers::refresh))
        .route("/start-all", post(handlers::start_all))
        .route("/stop-all", post(handlers::stop_all))
        .route("/fullscreen", delete(handlers::exit_fullscreen))
        .route("/{index}/fullscreen", post(handlers::toggle_fullscreen))
        .route("/{index}/stream", get(handlers::stream))
        .route("/{index}/snapshot", get(handlers::snapshot));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/wall", wall_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
