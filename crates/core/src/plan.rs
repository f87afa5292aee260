#![forbid(unsafe_code)]

use crate::catalog::{Catalog, EntityKind};
use crate::classify::{ColumnAssignment, Verdict, classify, first_fatal};
use crate::error::ReconcileError;
use crate::graph::EntityGraph;
use crate::mapper::map_entity;
use crate::remap::{RemapLedger, RemapSet};
use crate::snapshot::{Cell, StoreSnapshot};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RowRewrite {
    pub row_id: i64,
    pub assignments: Vec<ColumnAssignment>,
    /// Duplicates deleted right before this row is written.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub displaces: Vec<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Redirect {
    pub duplicate_id: i64,
    pub canonical_id: i64,
    /// The duplicate only collided after its own references were resolved.
    pub rewrite_attempted: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct TablePlan {
    pub entity: EntityKind,
    pub table: &'static str,
    pub remap: RemapSet,
    pub rewrites: Vec<RowRewrite>,
    pub redirects: Vec<Redirect>,
    pub inversions: usize,
}

impl TablePlan {
    pub fn purge_ids(&self) -> Vec<i64> {
        self.remap.duplicate_ids().collect()
    }

    /// Duplicates already deleted by the rewrite stage.
    pub fn displaced_ids(&self) -> BTreeSet<i64> {
        self.rewrites
            .iter()
            .flat_map(|rewrite| rewrite.displaces.iter().copied())
            .collect()
    }

    pub fn conflicts_redirected(&self) -> usize {
        self.redirects
            .iter()
            .filter(|redirect| redirect.rewrite_attempted)
            .count()
    }

    pub fn is_noop(&self) -> bool {
        self.remap.is_empty() && self.rewrites.is_empty()
    }
}

/// Everything a run will change, computed from one snapshot without touching the store.
#[derive(Clone, Debug, Serialize)]
pub struct RepairPlan {
    pub order: Vec<EntityKind>,
    pub tables: Vec<TablePlan>,
}

impl RepairPlan {
    pub fn table(&self, kind: EntityKind) -> Option<&TablePlan> {
        self.tables.iter().find(|table| table.entity == kind)
    }

    pub fn is_noop(&self) -> bool {
        self.tables.iter().all(TablePlan::is_noop)
    }

    pub fn duplicates_detected(&self) -> usize {
        self.tables.iter().map(|table| table.remap.len()).sum()
    }

    pub fn is_purged(&self, kind: EntityKind, id: i64) -> bool {
        self.table(kind)
            .is_some_and(|table| table.remap.is_duplicate(id))
    }

    /// Tables in the order their duplicates can be deleted without an
    /// intermediate dangling reference: downstream first.
    pub fn purge_order(&self) -> impl Iterator<Item = &TablePlan> + '_ {
        self.order.iter().rev().filter_map(|kind| self.table(*kind))
    }
}

/// Runs detect, map and classify for every entity type in dependency order.
pub fn plan_repair(
    catalog: &Catalog,
    snapshot: &StoreSnapshot,
) -> Result<RepairPlan, ReconcileError> {
    let order = EntityGraph::from_catalog(catalog).topological_order()?;
    let mut ledger = RemapLedger::new();
    let mut tables = Vec::with_capacity(order.len());

    for kind in &order {
        let Some(schema) = catalog.schema(*kind) else {
            continue;
        };
        let mapped = map_entity(schema, snapshot, &ledger)?;
        let classified = classify(schema, &mapped);
        if let Some(err) = first_fatal(schema, &classified) {
            return Err(err);
        }

        let mut rewrites = Vec::new();
        let mut redirects = Vec::new();
        let mut displaced = BTreeSet::new();
        for item in classified {
            match item.verdict {
                Verdict::Safe {
                    assignments,
                    mut displaces,
                } => {
                    displaces.retain(|id| displaced.insert(*id));
                    rewrites.push(RowRewrite {
                        row_id: item.row_id,
                        assignments,
                        displaces,
                    });
                }
                Verdict::ConflictRedirectToCanonical {
                    canonical_id,
                    rewrite_attempted,
                } => redirects.push(Redirect {
                    duplicate_id: item.row_id,
                    canonical_id,
                    rewrite_attempted,
                }),
                Verdict::Fatal { .. } => {}
            }
        }

        tracing::debug!(
            entity = %kind,
            duplicates = mapped.remap.len(),
            rewrites = rewrites.len(),
            redirects = redirects.len(),
            displaced = displaced.len(),
            "entity planned"
        );

        ledger.insert(mapped.remap.clone());
        tables.push(TablePlan {
            entity: *kind,
            table: schema.table,
            remap: mapped.remap,
            rewrites,
            redirects,
            inversions: mapped.inversions,
        });
    }

    let plan = RepairPlan { order, tables };
    check_purge_safety(catalog, snapshot, &plan)?;
    Ok(plan)
}

/// Replays the plan over the snapshot and confirms that no surviving row still
/// references a row the purge would delete.
pub fn check_purge_safety(
    catalog: &Catalog,
    snapshot: &StoreSnapshot,
    plan: &RepairPlan,
) -> Result<(), ReconcileError> {
    for schema in catalog.schemas() {
        let Some(table) = snapshot.table(schema.kind) else {
            continue;
        };
        let rewrites = plan
            .table(schema.kind)
            .map(|table_plan| {
                table_plan
                    .rewrites
                    .iter()
                    .map(|rewrite| (rewrite.row_id, &rewrite.assignments))
                    .collect::<BTreeMap<_, _>>()
            })
            .unwrap_or_default();

        for row in table.rows() {
            if plan.is_purged(schema.kind, row.id) {
                continue;
            }
            let mut cells = row.cells.clone();
            if let Some(assignments) = rewrites.get(&row.id) {
                for assignment in assignments.iter() {
                    cells[assignment.index] = assignment.to.clone();
                }
            }

            for (index, column, target) in schema.references() {
                let Some(target_id) = cells.get(index).and_then(Cell::as_id) else {
                    continue;
                };
                if plan.is_purged(target, target_id) || !snapshot.contains(target, target_id) {
                    return Err(ReconcileError::ReferentialIntegrityViolation {
                        table: schema.table,
                        column: column.name,
                        row_id: row.id,
                        target,
                        target_id,
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
