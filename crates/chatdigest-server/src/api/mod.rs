pub mod conversations;
pub mod daily;
pub mod response;
pub mod state;

pub use response::ApiResponse;

use axum::{
    Router,
    http::{Method, header},
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use conversations::*;
use daily::*;
use state::AppState;

#[derive(serde::Serialize)]
struct Health {
    status: String,
}

async fn health() -> axum::Json<Health> {
    axum::Json(Health {
        status: "chatdigest is working!".to_string(),
    })
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health))
        // Conversations
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/{id}/events", post(add_event))
        .route("/api/conversations/{id}/digest", get(get_digest))
        .route("/api/conversations/{id}/history", get(get_history))
        .route(
            "/api/conversations/{id}/preferences",
            get(get_preferences).put(update_preference),
        )
        .route("/api/conversations/{id}/pending-filter", post(add_pending_filter))
        .route(
            "/api/conversations/{id}/pending-filter/{author}",
            delete(remove_pending_filter),
        )
        // Daily cycle
        .route("/api/daily-cycle", post(run_daily_cycle))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
