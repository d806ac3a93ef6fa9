//! Listing, filtering and summarizing migrations.

use super::definition::{Direction, MigrationDefinition};
use super::error::MigrationError;
use super::state::{ExecutionRecord, MigrationStatus};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A definition joined with its execution record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationView {
    /// The immutable definition.
    pub definition: MigrationDefinition,
    /// Its lifecycle record.
    pub record: ExecutionRecord,
}

impl MigrationView {
    /// Current status.
    pub fn status(&self) -> MigrationStatus {
        self.record.status
    }

    /// Migration id.
    pub fn id(&self) -> &str {
        &self.definition.id
    }
}

/// Field to sort listings by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    /// Display name.
    Name,
    /// Version token.
    Version,
    /// Registration time.
    #[default]
    CreatedAt,
    /// Status name.
    Status,
}

impl std::str::FromStr for SortKey {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "").as_str() {
            "name" => Ok(SortKey::Name),
            "version" => Ok(SortKey::Version),
            "createdat" | "created" => Ok(SortKey::CreatedAt),
            "status" => Ok(SortKey::Status),
            other => Err(MigrationError::invalid(format!("unknown sort key: {other}"))),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Smallest first.
    Asc,
    /// Largest first.
    #[default]
    Desc,
}

impl std::str::FromStr for SortOrder {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(MigrationError::invalid(format!("unknown sort order: {other}"))),
        }
    }
}

/// Listing criteria. All set criteria must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationFilter {
    /// Only this database.
    pub database: Option<String>,
    /// Only this status.
    pub status: Option<MigrationStatus>,
    /// Only this direction.
    pub direction: Option<Direction>,
    /// Case-insensitive substring of name or description.
    pub search: Option<String>,
    /// Sort field.
    pub sort: SortKey,
    /// Sort direction.
    pub order: SortOrder,
}

impl MigrationFilter {
    /// Filter matching everything, newest first.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Restrict to a status.
    pub fn with_status(mut self, status: MigrationStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restrict to a direction.
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Free-text search over name and description.
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Sort field and direction.
    pub fn sorted_by(mut self, sort: SortKey, order: SortOrder) -> Self {
        self.sort = sort;
        self.order = order;
        self
    }

    /// Whether a view satisfies every criterion.
    pub fn matches(&self, view: &MigrationView) -> bool {
        let def = &view.definition;
        if let Some(database) = &self.database {
            if &def.target_database != database {
                return false;
            }
        }
        if let Some(status) = self.status {
            if view.record.status != status {
                return false;
            }
        }
        if let Some(direction) = self.direction {
            if def.direction != direction {
                return false;
            }
        }
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            if !def.name.to_lowercase().contains(&needle)
                && !def.description.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }

    /// Filter and sort views.
    pub fn apply(&self, views: Vec<MigrationView>) -> Vec<MigrationView> {
        let mut selected: Vec<MigrationView> =
            views.into_iter().filter(|v| self.matches(v)).collect();
        selected.sort_by(|a, b| {
            let ordering = self.compare(a, b);
            match self.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
        selected
    }

    fn compare(&self, a: &MigrationView, b: &MigrationView) -> Ordering {
        let primary = match self.sort {
            SortKey::Name => a.definition.name.cmp(&b.definition.name),
            SortKey::Version => a.definition.version.cmp(&b.definition.version),
            SortKey::CreatedAt => a.definition.created_at.cmp(&b.definition.created_at),
            SortKey::Status => a.record.status.as_str().cmp(b.record.status.as_str()),
        };
        primary.then_with(|| a.definition.id.cmp(&b.definition.id))
    }
}

/// Count of migrations per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStats {
    /// All migrations.
    pub total: usize,
    /// Waiting to run.
    pub pending: usize,
    /// Being applied.
    pub running: usize,
    /// Applied.
    pub completed: usize,
    /// Failed.
    pub failed: usize,
    /// Being reversed.
    pub rolling_back: usize,
    /// Reversed.
    pub rolled_back: usize,
    /// Removed from scheduling.
    pub obsolete: usize,
}

impl MigrationStats {
    /// Tally records.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ExecutionRecord>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.total += 1;
            match record.status {
                MigrationStatus::Pending => stats.pending += 1,
                MigrationStatus::Running => stats.running += 1,
                MigrationStatus::Completed => stats.completed += 1,
                MigrationStatus::Failed => stats.failed += 1,
                MigrationStatus::RollingBack => stats.rolling_back += 1,
                MigrationStatus::RolledBack => stats.rolled_back += 1,
                MigrationStatus::Obsolete => stats.obsolete += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(id: &str, name: &str, version: &str, status: MigrationStatus, created_at: u64) -> MigrationView {
        let definition = MigrationDefinition::new(id, version, "production", "SELECT 1;")
            .with_name(name)
            .with_description(format!("{name} description"))
            .with_created_at(created_at);
        let mut record = ExecutionRecord::pending(&definition);
        record.status = status;
        MigrationView { definition, record }
    }

    fn sample() -> Vec<MigrationView> {
        vec![
            view("1", "Create users table", "001", MigrationStatus::Completed, 10),
            view("2", "Add user roles", "002", MigrationStatus::Pending, 20),
            view("3", "Create products table", "003", MigrationStatus::Failed, 30),
        ]
    }

    fn ids(views: &[MigrationView]) -> Vec<&str> {
        views.iter().map(MigrationView::id).collect()
    }

    #[test]
    fn test_default_is_newest_first() {
        let result = MigrationFilter::new().apply(sample());
        assert_eq!(ids(&result), vec!["3", "2", "1"]);
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let result = MigrationFilter::new().with_search("CREATE").apply(sample());
        assert_eq!(ids(&result), vec!["3", "1"]);

        let result = MigrationFilter::new().with_search("roles description").apply(sample());
        assert_eq!(ids(&result), vec!["2"]);
    }

    #[test]
    fn test_filters_combine() {
        let result = MigrationFilter::new()
            .with_search("table")
            .with_status(MigrationStatus::Failed)
            .apply(sample());
        assert_eq!(ids(&result), vec!["3"]);

        let result = MigrationFilter::new()
            .with_direction(Direction::Down)
            .apply(sample());
        assert!(result.is_empty());

        let result = MigrationFilter::new().with_database("staging").apply(sample());
        assert!(result.is_empty());
    }

    #[test]
    fn test_sort_by_name_ascending() {
        let result = MigrationFilter::new()
            .sorted_by(SortKey::Name, SortOrder::Asc)
            .apply(sample());
        assert_eq!(ids(&result), vec!["2", "3", "1"]);
    }

    #[test]
    fn test_parse_sort_options() {
        assert_eq!("createdAt".parse::<SortKey>().unwrap(), SortKey::CreatedAt);
        assert_eq!("created_at".parse::<SortKey>().unwrap(), SortKey::CreatedAt);
        assert_eq!("ASC".parse::<SortOrder>().unwrap(), SortOrder::Asc);
        assert!("sideways".parse::<SortOrder>().is_err());
    }

    #[test]
    fn test_stats() {
        let views = sample();
        let stats = MigrationStats::from_records(views.iter().map(|v| &v.record));
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.obsolete, 0);
    }
}
