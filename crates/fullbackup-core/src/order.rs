//! Table ordering over foreign-key dependencies.
//!
//! Both functions take a map from each table to the tables it references.
//! References to tables outside the map are ignored.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{BackupError, Result};

pub type DependencyMap = BTreeMap<String, BTreeSet<String>>;

/// Order tables so that every table comes after the tables it references.
///
/// Starting from the tables nothing references, in sorted order, each table
/// is emitted after its dependencies (post-order), so replaying `CREATE` and
/// `INSERT` statements in this order lands parent rows before the rows that
/// reference them. Tables only reachable through a cycle follow in sorted order.
pub fn export_order(dependencies: &DependencyMap) -> Vec<String> {
    fn visit<'a>(
        table: &'a str,
        dependencies: &'a DependencyMap,
        visited: &mut BTreeSet<&'a str>,
        order: &mut Vec<String>,
    ) {
        if !visited.insert(table) {
            return;
        }
        if let Some(parents) = dependencies.get(table) {
            for parent in parents {
                if dependencies.contains_key(parent) {
                    visit(parent, dependencies, visited, order);
                }
            }
        }
        order.push(table.to_string());
    }

    let referenced: BTreeSet<&str> = dependencies
        .iter()
        .flat_map(|(table, parents)| {
            parents
                .iter()
                .filter(move |parent| *parent != table)
                .map(String::as_str)
        })
        .collect();
    let roots = dependencies
        .keys()
        .filter(|table| !referenced.contains(table.as_str()));

    let mut visited = BTreeSet::new();
    let mut order = Vec::with_capacity(dependencies.len());
    for table in roots.chain(dependencies.keys()) {
        visit(table, dependencies, &mut visited, &mut order);
    }
    order
}

/// Order tables so that every table is dropped after all tables that reference it.
///
/// Starts from the tables nothing references, in sorted order, and walks
/// breadth-first through their dependencies. A table reached again at a
/// greater depth is moved to the end, behind its latest dependent; one
/// already queued at that depth is not queued twice.
///
/// # Errors
///
/// [`BackupError::Schema`] if the dependencies contain a cycle.
pub fn drop_order(dependencies: &DependencyMap) -> Result<Vec<String>> {
    let tables: BTreeSet<&str> = dependencies.keys().map(String::as_str).collect();

    let edges: BTreeMap<&str, Vec<&str>> = dependencies
        .iter()
        .map(|(table, parents)| {
            let parents = parents
                .iter()
                .map(String::as_str)
                .filter(|parent| *parent != table.as_str() && tables.contains(parent))
                .collect();
            (table.as_str(), parents)
        })
        .collect();

    let referenced: BTreeSet<&str> = edges.values().flatten().copied().collect();
    let mut queue: VecDeque<(&str, usize)> = tables
        .iter()
        .filter(|table| !referenced.contains(*table))
        .map(|table| (*table, 0))
        .collect();
    let mut deepest: BTreeMap<&str, usize> = queue.iter().copied().collect();

    let mut order: Vec<&str> = Vec::with_capacity(tables.len());
    while let Some((table, depth)) = queue.pop_front() {
        if depth > tables.len() {
            return Err(BackupError::Schema(format!(
                "Foreign key cycle involving table {}",
                table
            )));
        }
        order.retain(|existing| *existing != table);
        order.push(table);
        if let Some(parents) = edges.get(table) {
            for parent in parents {
                if deepest.get(parent).is_some_and(|seen| *seen > depth) {
                    continue;
                }
                deepest.insert(*parent, depth + 1);
                queue.push_back((*parent, depth + 1));
            }
        }
    }

    if order.len() != tables.len() {
        let placed: BTreeSet<&str> = order.iter().copied().collect();
        let unplaced: Vec<&str> = tables.difference(&placed).copied().collect();
        return Err(BackupError::Schema(format!(
            "Foreign key cycle among tables {}",
            unplaced.join(", ")
        )));
    }

    Ok(order.into_iter().map(str::to_string).collect())
}
