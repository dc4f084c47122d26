pub mod auth;
pub mod feedback;
pub mod interviews;
pub mod session;

use crate::state::SharedState;
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn routes(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/auth", auth::router(state.clone()))
        .nest("/api/interviews", interviews::router(state.clone()))
        .nest("/api/feedback", feedback::router(state))
}
