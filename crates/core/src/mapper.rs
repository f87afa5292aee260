#![forbid(unsafe_code)]

use crate::catalog::EntitySchema;
use crate::detect::detect_duplicates;
use crate::error::ReconcileError;
use crate::remap::{RemapEntry, RemapLedger, RemapSet};
use crate::snapshot::{Cell, EntityRow, NaturalKey, StoreSnapshot};

/// A stored row next to the row it becomes once every embedded id is resolved
/// through the upstream remap sets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedRow {
    pub id: i64,
    pub current: Vec<Cell>,
    pub resolved: Vec<Cell>,
}

impl ResolvedRow {
    pub fn changed_columns(&self) -> Vec<usize> {
        self.current
            .iter()
            .zip(self.resolved.iter())
            .enumerate()
            .filter(|(_, (before, after))| before != after)
            .map(|(index, _)| index)
            .collect()
    }

    pub fn is_changed(&self) -> bool {
        self.current != self.resolved
    }

    pub fn current_tuple(&self, indices: &[usize]) -> Vec<Cell> {
        project(&self.current, indices)
    }

    pub fn resolved_tuple(&self, indices: &[usize]) -> Vec<Cell> {
        project(&self.resolved, indices)
    }
}

fn project(cells: &[Cell], indices: &[usize]) -> Vec<Cell> {
    indices
        .iter()
        .map(|index| cells.get(*index).cloned().unwrap_or(Cell::Null))
        .collect()
}

#[derive(Clone, Debug)]
pub struct MappedTable {
    pub rows: Vec<ResolvedRow>,
    pub remap: RemapSet,
    /// Groups where the higher id already held the resolved tuple and was kept.
    pub inversions: usize,
}

/// Builds the remap set of one entity type from a snapshot and the remap sets of
/// every entity it references.
pub fn map_entity(
    schema: &EntitySchema,
    snapshot: &StoreSnapshot,
    upstream: &RemapLedger,
) -> Result<MappedTable, ReconcileError> {
    let rows = match snapshot.table(schema.kind) {
        Some(table) => table
            .rows()
            .iter()
            .map(|row| resolve_row(schema, row, snapshot, upstream))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    let key_indices = schema.natural_key_indices();
    let keyed = rows
        .iter()
        .map(|row| (row.id, NaturalKey::new(row.resolved_tuple(&key_indices))))
        .collect::<Vec<_>>();
    let groups = detect_duplicates(schema.kind, keyed.iter().map(|(id, key)| (*id, key)))?;

    let mut entries = Vec::with_capacity(groups.len());
    let mut inversions = 0usize;
    for group in groups {
        let holds = |id: i64| {
            rows.iter()
                .find(|row| row.id == id)
                .is_some_and(|row| row.current_tuple(&key_indices) == group.natural_key.cells())
        };

        let (canonical_id, duplicate_id) = if holds(group.max_id) && !holds(group.min_id) {
            inversions += 1;
            tracing::warn!(
                entity = %schema.kind,
                natural_key = %group.natural_key,
                kept = group.max_id,
                dropped = group.min_id,
                "higher id already holds the resolved tuple; keeping it as canonical"
            );
            (group.max_id, group.min_id)
        } else {
            (group.min_id, group.max_id)
        };

        entries.push(RemapEntry {
            natural_key: group.natural_key,
            canonical_id,
            duplicate_id,
        });
    }

    Ok(MappedTable {
        rows,
        remap: RemapSet::new(schema.kind, entries),
        inversions,
    })
}

fn resolve_row(
    schema: &EntitySchema,
    row: &EntityRow,
    snapshot: &StoreSnapshot,
    upstream: &RemapLedger,
) -> Result<ResolvedRow, ReconcileError> {
    let mut resolved = row.cells.clone();
    for (index, column, target) in schema.references() {
        let Some(target_id) = row.cells.get(index).and_then(Cell::as_id) else {
            continue;
        };
        let unresolved = |reason: &'static str| ReconcileError::UnresolvedTransitiveReference {
            entity: schema.kind,
            row_id: row.id,
            column: column.name,
            target,
            target_id,
            reason,
        };

        let Some(set) = upstream.get(target) else {
            return Err(unresolved("upstream remap has not been computed"));
        };
        if !snapshot.contains(target, target_id) {
            return Err(unresolved("referenced row does not exist"));
        }
        resolved[index] = Cell::Integer(set.resolve(target_id));
    }

    Ok(ResolvedRow {
        id: row.id,
        current: row.cells.clone(),
        resolved,
    })
}
