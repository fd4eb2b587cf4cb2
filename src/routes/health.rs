use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;

use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let storage_configured = state.documents.storage().bucket().is_some();
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "storage_configured": storage_configured })),
    )
}
