//! Attempt ledger endpoint.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use berqenas_core::AttemptEntry;

use crate::error::AppError;
use crate::json::{HistoryParams, SuccessResponse};
use crate::AppState;

/// History routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/history", get(query_history))
}

async fn query_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<SuccessResponse<Vec<AttemptEntry>>>, AppError> {
    let query = params.into_query(None)?;
    Ok(Json(SuccessResponse::new(state.engine.history(&query)?)))
}
