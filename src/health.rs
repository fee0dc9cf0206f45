use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use mysql::prelude::Queryable;
use serde_json::json;

use crate::database::AppState;
use crate::error::AppError;

/// Liveness plus a round trip through the pool.
pub async fn health_check_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    tracing::trace!("health_check started");
    let mut conn = state.conn()?;
    let probe: Option<u8> = conn.query_first("SELECT 1")?;
    if probe != Some(1) {
        return Err(AppError::Internal(
            "database probe returned an unexpected result".to_string(),
        ));
    }
    Ok(Json(json!({
        "status": "ok",
        "message": "newsdesk is up and the database is reachable"
    })))
}
