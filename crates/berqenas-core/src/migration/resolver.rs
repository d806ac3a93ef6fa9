//! Dependency ordering for migrations.
//!
//! Produces a total order in which every migration follows all of its
//! dependencies. Ties between migrations that become ready at the same time
//! are broken by ascending `version`, then by `id`, so the same candidate set
//! always yields the same order regardless of input order.

use super::definition::MigrationDefinition;
use super::error::MigrationError;
use std::collections::{BTreeMap, BTreeSet};

/// Orders migrations by their declared dependencies.
pub struct DependencyResolver;

type SortKey<'a> = (&'a str, &'a str);

fn sort_key(def: &MigrationDefinition) -> SortKey<'_> {
    (def.version.as_str(), def.id.as_str())
}

impl DependencyResolver {
    /// Topologically order `candidates`.
    ///
    /// Every dependency must be present in the candidate set. Fails with
    /// [`MigrationError::UnknownDependency`] or
    /// [`MigrationError::DependencyCycle`] without producing a partial order.
    pub fn resolve(
        candidates: &[MigrationDefinition],
    ) -> Result<Vec<&MigrationDefinition>, MigrationError> {
        let mut by_id: BTreeMap<&str, &MigrationDefinition> = BTreeMap::new();
        for def in candidates {
            if by_id.insert(def.id.as_str(), def).is_some() {
                return Err(MigrationError::invalid(format!(
                    "duplicate migration id: {}",
                    def.id
                )));
            }
        }

        let mut sorted: Vec<&MigrationDefinition> = by_id.values().copied().collect();
        sorted.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

        // Missing dependencies are reported in a stable order.
        for def in &sorted {
            let deps: BTreeSet<&str> = def.dependencies.iter().map(String::as_str).collect();
            if let Some(missing) = deps.into_iter().find(|dep| !by_id.contains_key(dep)) {
                return Err(MigrationError::UnknownDependency {
                    migration_id: def.id.clone(),
                    dependency: missing.to_string(),
                });
            }
        }

        let mut pending_deps: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&MigrationDefinition>> = BTreeMap::new();
        for def in sorted.iter().copied() {
            let deps: BTreeSet<&str> = def.dependencies.iter().map(String::as_str).collect();
            pending_deps.insert(def.id.as_str(), deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(def);
            }
        }

        let mut ready: BTreeSet<SortKey<'_>> = sorted
            .iter()
            .filter(|def| pending_deps[def.id.as_str()] == 0)
            .map(|def| sort_key(*def))
            .collect();

        let mut order = Vec::with_capacity(sorted.len());
        while let Some(key) = ready.pop_first() {
            let def = by_id[key.1];
            order.push(def);
            for dependent in dependents.get(def.id.as_str()).into_iter().flatten() {
                if let Some(count) = pending_deps.get_mut(dependent.id.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(sort_key(*dependent));
                    }
                }
            }
        }

        if order.len() < sorted.len() {
            let blocked: BTreeSet<&str> = pending_deps
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(id, _)| *id)
                .collect();
            return Err(MigrationError::DependencyCycle {
                members: Self::find_cycle(&sorted, &by_id, &blocked),
            });
        }

        Ok(order)
    }

    /// Walk unresolved dependencies from the lowest blocked migration until a
    /// node repeats. Every blocked node has at least one blocked dependency,
    /// so the walk always closes a cycle.
    fn find_cycle(
        sorted: &[&MigrationDefinition],
        by_id: &BTreeMap<&str, &MigrationDefinition>,
        blocked: &BTreeSet<&str>,
    ) -> Vec<String> {
        let Some(start) = sorted.iter().find(|def| blocked.contains(def.id.as_str())) else {
            return Vec::new();
        };

        let mut path: Vec<&str> = Vec::new();
        let mut current = *start;
        loop {
            if let Some(pos) = path.iter().position(|id| *id == current.id) {
                return path[pos..].iter().map(|id| id.to_string()).collect();
            }
            path.push(current.id.as_str());

            let next = current
                .dependencies
                .iter()
                .filter(|dep| blocked.contains(dep.as_str()))
                .filter_map(|dep| by_id.get(dep.as_str()).copied())
                .min_by(|a, b| sort_key(a).cmp(&sort_key(b)));
            match next {
                Some(def) => current = def,
                None => return path.iter().map(|id| id.to_string()).collect(),
            }
        }
    }
}
