use axum::{routing::get, Json, Router};

use brio_core::AppState;

pub mod workflows;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/campaigns", workflows::campaign_router())
        .nest("/workflows", workflows::workflow_router())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
