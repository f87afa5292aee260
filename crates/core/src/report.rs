#![forbid(unsafe_code)]

use crate::catalog::EntityKind;
use crate::plan::{RepairPlan, TablePlan};
use crate::remap::RemapEntry;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Run every stage, verify, then roll back instead of committing.
    pub dry_run: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntityReport {
    pub entity: EntityKind,
    pub table: &'static str,
    pub duplicates_detected: usize,
    pub rows_rewritten: usize,
    pub rows_purged: usize,
    pub conflicts_redirected: usize,
    pub canonical_inversions: usize,
    pub remaps: Vec<RemapEntry>,
}

impl EntityReport {
    fn from_table_plan(table: &TablePlan) -> Self {
        Self {
            entity: table.entity,
            table: table.table,
            duplicates_detected: table.remap.len(),
            rows_rewritten: table.rewrites.len(),
            rows_purged: table.remap.len(),
            conflicts_redirected: table.conflicts_redirected(),
            canonical_inversions: table.inversions,
            remaps: table.remap.entries().to_vec(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub entities: Vec<EntityReport>,
    pub dry_run: bool,
    pub committed: bool,
}

impl ReconciliationReport {
    pub fn from_plan(plan: &RepairPlan, options: ReconcileOptions) -> Self {
        Self {
            entities: plan
                .tables
                .iter()
                .map(EntityReport::from_table_plan)
                .collect(),
            dry_run: options.dry_run,
            committed: false,
        }
    }

    pub fn entity(&self, kind: EntityKind) -> Option<&EntityReport> {
        self.entities.iter().find(|report| report.entity == kind)
    }

    pub fn duplicates_detected(&self) -> usize {
        self.entities
            .iter()
            .map(|report| report.duplicates_detected)
            .sum()
    }

    pub fn rows_rewritten(&self) -> usize {
        self.entities.iter().map(|report| report.rows_rewritten).sum()
    }

    pub fn rows_purged(&self) -> usize {
        self.entities.iter().map(|report| report.rows_purged).sum()
    }

    /// A run on an already repaired store finds nothing to do.
    pub fn is_noop(&self) -> bool {
        self.duplicates_detected() == 0 && self.rows_rewritten() == 0
    }
}
