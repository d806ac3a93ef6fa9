//! JSON request and response types for the HTTP gateway.

use berqenas_core::{
    AttemptOutcome, Direction, HistoryQuery, MigrationDefinition, MigrationFilter,
    MigrationStatus, SortKey, SortOrder,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::AppError;

/// Generic success response wrapper.
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T: Serialize> {
    /// Success flag.
    pub success: bool,
    /// Response data.
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    /// Create a new success response.
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Health status.
    pub status: String,
    /// Gateway version.
    pub version: String,
    /// Whether migration bodies are executed.
    pub dry_run: bool,
}

/// Body of `POST /migrations`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub id: String,
    pub version: String,
    pub target_database: String,
    pub body: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub affected_table: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl From<RegisterRequest> for MigrationDefinition {
    fn from(req: RegisterRequest) -> Self {
        let mut definition =
            MigrationDefinition::new(req.id, req.version, req.target_database, req.body)
                .with_dependencies(req.dependencies);
        if let Some(name) = req.name {
            definition = definition.with_name(name);
        }
        if let Some(description) = req.description {
            definition = definition.with_description(description);
        }
        if let Some(direction) = req.direction {
            definition = definition.with_direction(direction);
        }
        if let Some(table) = req.affected_table {
            definition = definition.with_table(table);
        }
        definition
    }
}

fn parse<T>(field: &str, value: Option<&str>) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| AppError::BadRequest(format!("invalid {field}: {e}"))),
    }
}

/// Query string of `GET /migrations`.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub database: Option<String>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub direction: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

impl ListParams {
    /// Convert into an engine filter, rejecting unknown values.
    pub fn into_filter(self) -> Result<MigrationFilter, AppError> {
        let mut filter = MigrationFilter::new();
        if let Some(database) = self.database.filter(|d| !d.is_empty()) {
            filter = filter.with_database(database);
        }
        if let Some(status) = parse::<MigrationStatus>("status", self.status.as_deref())? {
            filter = filter.with_status(status);
        }
        if let Some(direction) = parse::<Direction>("type", self.direction.as_deref())? {
            filter = filter.with_direction(direction);
        }
        if let Some(search) = self.search.filter(|s| !s.trim().is_empty()) {
            filter = filter.with_search(search);
        }
        let sort = parse::<SortKey>("sort", self.sort.as_deref())?.unwrap_or_default();
        let order = parse::<SortOrder>("order", self.order.as_deref())?.unwrap_or_default();
        Ok(filter.sorted_by(sort, order))
    }
}

/// Query string of `GET /migrations/stats`.
#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    pub database: Option<String>,
}

/// Query string of the history endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub database: Option<String>,
    pub outcome: Option<String>,
    pub action: Option<String>,
    pub from: Option<u64>,
    pub to: Option<u64>,
    pub limit: Option<usize>,
}

impl HistoryParams {
    /// Convert into a ledger query, optionally scoped to one migration.
    pub fn into_query(self, migration_id: Option<String>) -> Result<HistoryQuery, AppError> {
        let mut query = match migration_id {
            Some(id) => HistoryQuery::for_migration(id),
            None => HistoryQuery::new(),
        };
        if let Some(database) = self.database.filter(|d| !d.is_empty()) {
            query = query.database(database);
        }
        if let Some(outcome) = parse::<AttemptOutcome>("outcome", self.outcome.as_deref())? {
            query = query.outcome(outcome);
        }
        if let Some(action) = parse::<Direction>("action", self.action.as_deref())? {
            query = query.action(action);
        }
        if self.from.is_some() || self.to.is_some() {
            query = query.between(self.from, self.to);
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        Ok(query)
    }
}
