//! Migration endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use berqenas_core::{
    AttemptEntry, ExecutionRecord, MigrationOutcome, MigrationStats, MigrationView, Registration,
    RunReport,
};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::json::{HistoryParams, ListParams, RegisterRequest, StatsParams, SuccessResponse};
use crate::AppState;

/// Migration routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/migrations", get(list_migrations).post(register_migration))
        .route("/migrations/stats", get(migration_stats))
        .route("/migrations/:id", get(get_migration).delete(obsolete_migration))
        .route("/migrations/:id/run", post(run_migration))
        .route("/migrations/:id/rollback", post(rollback_migration))
        .route("/migrations/:id/requeue", post(requeue_migration))
        .route("/migrations/:id/history", get(migration_history))
}

async fn register_migration(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<SuccessResponse<Registration>>), AppError> {
    let registration = state.engine.register(request.into())?;
    let status = match registration {
        Registration::Created { .. } => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(SuccessResponse::new(registration))))
}

async fn list_migrations(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<SuccessResponse<Vec<MigrationView>>>, AppError> {
    let filter = params.into_filter()?;
    Ok(Json(SuccessResponse::new(state.engine.list(&filter)?)))
}

async fn migration_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Result<Json<SuccessResponse<MigrationStats>>, AppError> {
    let stats = state.engine.stats(params.database.as_deref())?;
    Ok(Json(SuccessResponse::new(stats)))
}

async fn get_migration(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse<MigrationView>>, AppError> {
    Ok(Json(SuccessResponse::new(state.engine.get(&id)?)))
}

/// Deleting a migration marks it obsolete; its history is kept.
async fn obsolete_migration(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let changed = state.engine.mark_obsolete(&id)?;
    Ok(Json(json!({
        "success": true,
        "migrationId": id,
        "changed": changed,
    })))
}

async fn run_migration(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse<RunReport>>, AppError> {
    let report = state.engine.run_migration(&id).await?;
    Ok(Json(SuccessResponse::new(report)))
}

async fn rollback_migration(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse<MigrationOutcome>>, AppError> {
    let outcome = state.engine.rollback(&id).await?;
    Ok(Json(SuccessResponse::new(outcome)))
}

async fn requeue_migration(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse<ExecutionRecord>>, AppError> {
    let record = state.engine.requeue(&id)?;
    Ok(Json(SuccessResponse::new(record)))
}

async fn migration_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<SuccessResponse<Vec<AttemptEntry>>>, AppError> {
    // Unknown ids are a 404 rather than an empty ledger.
    state.engine.get(&id)?;
    let query = params.into_query(Some(id))?;
    Ok(Json(SuccessResponse::new(state.engine.history(&query)?)))
}
