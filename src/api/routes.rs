//! API Routes
//!
//! Configures the Axum router with all cache server endpoints.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    add_user_tags_handler, clear_handler, delete_handler, entity_keys_handler, get_handler,
    get_or_create_handler, health_handler, remember_handler, remove_entity_handler,
    remove_entity_keys_handler, remove_prefix_handler, remove_user_tags_handler, set_handler,
    stats_handler, user_tags_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/set", put(set_handler))
        .route("/get/:key", get(get_handler))
        .route("/get-or-create", post(get_or_create_handler))
        .route("/del/:key", delete(delete_handler))
        .route("/prefix/:prefix", delete(remove_prefix_handler))
        .route("/remember", post(remember_handler))
        .route("/clear", post(clear_handler))
        .route(
            "/users/:id/tags",
            get(user_tags_handler)
                .post(add_user_tags_handler)
                .delete(remove_user_tags_handler),
        )
        .route("/entities/:entity", delete(remove_entity_handler))
        .route(
            "/entities/:entity/keys",
            get(entity_keys_handler).delete(remove_entity_keys_handler),
        )
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
