//! Where migration definitions come from.

use crate::migration::{Direction, MigrationDefinition, MigrationError};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Supplies the authoritative set of definitions for some databases.
///
/// Stored migrations of a covered database that the source no longer lists
/// are marked obsolete on sync.
pub trait MigrationSource: Send + Sync {
    /// Databases the source is authoritative for.
    fn databases(&self) -> Vec<String>;

    /// Read every definition.
    fn load(&self) -> Result<Vec<MigrationDefinition>, MigrationError>;
}

/// A fixed list of definitions.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    definitions: Vec<MigrationDefinition>,
    extra_databases: BTreeSet<String>,
}

impl StaticSource {
    /// Source over `definitions`.
    pub fn new(definitions: Vec<MigrationDefinition>) -> Self {
        Self {
            definitions,
            extra_databases: BTreeSet::new(),
        }
    }

    /// Also claim `database`, even with no definitions for it.
    pub fn covering(mut self, database: impl Into<String>) -> Self {
        self.extra_databases.insert(database.into());
        self
    }
}

impl MigrationSource for StaticSource {
    fn databases(&self) -> Vec<String> {
        let mut databases = self.extra_databases.clone();
        databases.extend(self.definitions.iter().map(|d| d.target_database.clone()));
        databases.into_iter().collect()
    }

    fn load(&self) -> Result<Vec<MigrationDefinition>, MigrationError> {
        Ok(self.definitions.clone())
    }
}

const UP_SUFFIX: &str = ".up.sql";
const DOWN_SUFFIX: &str = ".down.sql";

/// Migration files in one directory, all targeting one database.
///
/// Files are named `<version>_<name>.up.sql` or `<version>_<name>.down.sql`,
/// where `<version>` is all digits.
/// Leading comment lines may carry headers:
///
/// ```text
/// -- description: Add role column to users
/// -- table: users
/// -- depends: 001_create_users
/// ALTER TABLE users ADD COLUMN role TEXT;
/// ```
///
/// The up migration's id is `<version>_<name>`; the down migration's id
/// appends `.down`. The whole file is the body, headers included.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    path: PathBuf,
    database: String,
}

impl DirectorySource {
    /// Source reading `path` for `database`.
    pub fn new(path: impl Into<PathBuf>, database: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            database: database.into(),
        }
    }

    /// The directory read.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn source_error(&self, message: impl std::fmt::Display) -> MigrationError {
        MigrationError::Source {
            message: format!("{}: {message}", self.path.display()),
        }
    }

    fn parse_file(
        &self,
        file_name: &str,
        path: &Path,
    ) -> Result<Option<MigrationDefinition>, MigrationError> {
        let (stem, direction) = if let Some(stem) = file_name.strip_suffix(UP_SUFFIX) {
            (stem, Direction::Up)
        } else if let Some(stem) = file_name.strip_suffix(DOWN_SUFFIX) {
            (stem, Direction::Down)
        } else {
            return Ok(None);
        };

        let (version, name) = stem
            .split_once('_')
            .filter(|(version, name)| {
                !version.is_empty()
                    && version.chars().all(|c| c.is_ascii_digit())
                    && !name.is_empty()
            })
            .ok_or_else(|| {
                self.source_error(format!(
                    "{file_name}: expected <version>_<name>{UP_SUFFIX} or {DOWN_SUFFIX}"
                ))
            })?;

        let body = std::fs::read_to_string(path).map_err(|e| self.source_error(e))?;
        let headers = Headers::parse(&body);

        let id = match direction {
            Direction::Up => stem.to_string(),
            Direction::Down => format!("{stem}.down"),
        };
        let mut definition = MigrationDefinition::new(id, version, &self.database, body)
            .with_name(name)
            .with_direction(direction);
        if let Some(description) = headers.description {
            definition = definition.with_description(description);
        }
        if let Some(table) = headers.table {
            definition = definition.with_table(table);
        }
        if direction == Direction::Up {
            definition = definition.with_dependencies(headers.depends);
        }
        if let Some(created_at) = modified_micros(path) {
            definition = definition.with_created_at(created_at);
        }
        Ok(Some(definition))
    }
}

impl MigrationSource for DirectorySource {
    fn databases(&self) -> Vec<String> {
        vec![self.database.clone()]
    }

    fn load(&self) -> Result<Vec<MigrationDefinition>, MigrationError> {
        let entries = std::fs::read_dir(&self.path).map_err(|e| self.source_error(e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| self.source_error(e))?;
            if !entry.file_type().map_err(|e| self.source_error(e))?.is_file() {
                continue;
            }
            if let Some(file_name) = entry.file_name().to_str() {
                files.push((file_name.to_string(), entry.path()));
            }
        }
        files.sort();

        let mut definitions = Vec::new();
        for (file_name, path) in &files {
            if let Some(definition) = self.parse_file(file_name, path)? {
                definitions.push(definition);
            }
        }

        tracing::debug!(
            path = %self.path.display(),
            database = %self.database,
            count = definitions.len(),
            "loaded migration directory"
        );
        Ok(definitions)
    }
}

#[derive(Debug, Default)]
struct Headers {
    description: Option<String>,
    table: Option<String>,
    depends: Vec<String>,
}

impl Headers {
    /// Read `-- key: value` lines up to the first statement line.
    fn parse(body: &str) -> Self {
        let mut headers = Headers::default();
        for line in body.lines().map(str::trim) {
            if line.is_empty() {
                continue;
            }
            let Some(comment) = line.strip_prefix("--") else {
                break;
            };
            let Some((key, value)) = comment.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "description" => headers.description = Some(value.to_string()),
                "table" => headers.table = Some(value.to_string()),
                "depends" | "depends-on" | "dependencies" => headers.depends.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|dep| !dep.is_empty())
                        .map(String::from),
                ),
                _ => {}
            }
        }
        headers
    }
}

fn modified_micros(path: &Path) -> Option<u64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    modified
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_micros() as u64)
}
