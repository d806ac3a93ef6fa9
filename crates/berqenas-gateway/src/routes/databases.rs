//! Per-database batch endpoints.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use berqenas_core::{RecoveredMigration, RunReport};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::json::SuccessResponse;
use crate::AppState;

/// Database routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/databases/:db/migrations/run", post(run_pending))
        .route("/databases/:db/migrations/cancel", post(cancel_batch))
        .route("/databases/:db/migrations/recover", post(recover))
}

/// Apply every pending migration of the database.
async fn run_pending(
    State(state): State<AppState>,
    Path(db): Path<String>,
) -> Result<Json<SuccessResponse<RunReport>>, AppError> {
    let report = state.engine.run_pending(&db).await?;
    Ok(Json(SuccessResponse::new(report)))
}

/// Ask the running batch to stop before its next migration.
async fn cancel_batch(State(state): State<AppState>, Path(db): Path<String>) -> Json<Value> {
    let signalled = state.engine.cancel(&db);
    Json(json!({
        "success": true,
        "database": db,
        "signalled": signalled,
    }))
}

async fn recover(
    State(state): State<AppState>,
    Path(db): Path<String>,
) -> Result<Json<SuccessResponse<Vec<RecoveredMigration>>>, AppError> {
    let recovered = state.engine.recover(&db)?;
    Ok(Json(SuccessResponse::new(recovered)))
}
