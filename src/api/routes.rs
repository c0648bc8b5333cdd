//! API route definitions.

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer();

    // Tracing layer with per-request spans and timing
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        // Conversation management
        .route("/chats", get(handlers::list_chats))
        .route("/chats", post(handlers::create_chat))
        .route("/chats/{chat_id}", get(handlers::get_messages))
        .route("/chats/{chat_id}", put(handlers::update_chat))
        .route("/chats/{chat_id}", delete(handlers::delete_chat))
        // Streaming relay and title generation
        .route("/chat", post(handlers::relay_chat))
        .route("/generate_title", post(handlers::generate_title))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(cors)
        .layer(trace_layer)
}

/// Build the CORS layer.
///
/// The service fronts a local browser UI served from whatever port the
/// frontend dev server picked, so any origin may call it.
fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
