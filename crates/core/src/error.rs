#![forbid(unsafe_code)]

use crate::catalog::EntityKind;
use thiserror::Error;

/// Every reconciliation failure aborts the run; nothing here is recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("{entity}: natural key {natural_key} is shared by {} ids {ids:?}", .ids.len())]
    AmbiguousNaturalKey {
        entity: EntityKind,
        natural_key: String,
        ids: Vec<i64>,
    },

    #[error(
        "{entity} row {row_id}: column {column} points at {target} id {target_id} which cannot be resolved ({reason})"
    )]
    UnresolvedTransitiveReference {
        entity: EntityKind,
        row_id: i64,
        column: &'static str,
        target: EntityKind,
        target_id: i64,
        reason: &'static str,
    },

    #[error(
        "{entity} row {row_id}: rewrite collides with row {collides_with} on {scope} and no canonical survivor exists"
    )]
    UnsafeRewriteWithoutCanonicalTarget {
        entity: EntityKind,
        row_id: i64,
        scope: &'static str,
        collides_with: i64,
    },

    #[error(
        "{table}.{column} of row {row_id} points at {target} id {target_id} which does not survive the repair"
    )]
    ReferentialIntegrityViolation {
        table: &'static str,
        column: &'static str,
        row_id: i64,
        target: EntityKind,
        target_id: i64,
    },

    #[error("{entity}: natural key {natural_key} is still duplicated after the repair")]
    ResidualDuplicate {
        entity: EntityKind,
        natural_key: String,
    },

    #[error("entity dependency graph has a cycle through {entities:?}")]
    DependencyCycle { entities: Vec<EntityKind> },
}

impl ReconcileError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AmbiguousNaturalKey { .. } => "AMBIGUOUS_NATURAL_KEY",
            Self::UnresolvedTransitiveReference { .. } => "UNRESOLVED_TRANSITIVE_REFERENCE",
            Self::UnsafeRewriteWithoutCanonicalTarget { .. } => {
                "UNSAFE_REWRITE_WITHOUT_CANONICAL_TARGET"
            }
            Self::ReferentialIntegrityViolation { .. } => "REFERENTIAL_INTEGRITY_VIOLATION",
            Self::ResidualDuplicate { .. } => "RESIDUAL_DUPLICATE",
            Self::DependencyCycle { .. } => "DEPENDENCY_CYCLE",
        }
    }
}
