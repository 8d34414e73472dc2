use axum::{
    extract::State,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

use crate::AppState;

#[axum::debug_handler]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let db_ok = sqlx::query("SELECT 1")
        .execute(&state.pool)
        .await
        .is_ok();
    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "database": db_ok,
    }))
    .into_response()
}
