#![forbid(unsafe_code)]

use crate::catalog::EntitySchema;
use crate::error::ReconcileError;
use crate::mapper::{MappedTable, ResolvedRow};
use crate::snapshot::Cell;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ColumnAssignment {
    pub column: &'static str,
    #[serde(skip)]
    pub index: usize,
    pub from: Cell,
    pub to: Cell,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Every changed column of the row is written in one statement. `displaces`
    /// lists duplicates of the same table that still hold the target tuple and
    /// must be deleted before the write.
    Safe {
        assignments: Vec<ColumnAssignment>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        displaces: Vec<i64>,
    },
    /// The row folds into `canonical_id`; dependents follow it and the row is purged.
    ConflictRedirectToCanonical {
        canonical_id: i64,
        rewrite_attempted: bool,
    },
    Fatal {
        scope: &'static str,
        collides_with: i64,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Classified {
    pub row_id: i64,
    #[serde(flatten)]
    pub verdict: Verdict,
}

/// Scope tuples as they are stored now and as they will be after the repair.
/// Rows scheduled for purge only appear in `vacated`.
struct ScopeIndex {
    name: &'static str,
    indices: Vec<usize>,
    occupied: BTreeMap<Vec<Cell>, Vec<i64>>,
    vacated: BTreeMap<Vec<Cell>, Vec<i64>>,
    after_repair: BTreeMap<Vec<Cell>, Vec<i64>>,
}

impl ScopeIndex {
    fn build(
        name: &'static str,
        indices: Vec<usize>,
        rows: &[ResolvedRow],
        purged: &BTreeSet<i64>,
    ) -> Self {
        let mut occupied = BTreeMap::<Vec<Cell>, Vec<i64>>::new();
        let mut vacated = BTreeMap::<Vec<Cell>, Vec<i64>>::new();
        let mut after_repair = BTreeMap::<Vec<Cell>, Vec<i64>>::new();
        for row in rows {
            if purged.contains(&row.id) {
                vacated
                    .entry(row.current_tuple(&indices))
                    .or_default()
                    .push(row.id);
                continue;
            }
            occupied
                .entry(row.current_tuple(&indices))
                .or_default()
                .push(row.id);
            after_repair
                .entry(row.resolved_tuple(&indices))
                .or_default()
                .push(row.id);
        }
        Self {
            name,
            indices,
            occupied,
            vacated,
            after_repair,
        }
    }

    fn touches(&self, changed: &[usize]) -> bool {
        self.indices.iter().any(|index| changed.contains(index))
    }

    fn collider(&self, row: &ResolvedRow) -> Option<i64> {
        let target = row.resolved_tuple(&self.indices);
        let others = |ids: Option<&Vec<i64>>| {
            ids.into_iter()
                .flatten()
                .copied()
                .find(|other| *other != row.id)
        };
        others(self.occupied.get(&target)).or_else(|| others(self.after_repair.get(&target)))
    }

    /// Purged rows currently holding the tuple `row` moves into.
    fn blockers<'a>(&'a self, row: &ResolvedRow) -> impl Iterator<Item = i64> + 'a {
        self.vacated
            .get(&row.resolved_tuple(&self.indices))
            .into_iter()
            .flatten()
            .copied()
    }
}

/// Assigns a verdict to every row of a mapped table that needs an action.
///
/// Rows whose references are unchanged and which are not duplicates get none. A
/// rewrite is only safe when it is safe for every uniqueness scope the row
/// touches, measured both against the stored tuples of the surviving rows and
/// against the tuples they will hold once the repair is done. A tuple held only
/// by a purged row is free; that row is listed as displaced by the rewrite.
pub fn classify(schema: &EntitySchema, mapped: &MappedTable) -> Vec<Classified> {
    let purged = mapped.remap.duplicate_ids().collect::<BTreeSet<_>>();
    let survivors = mapped
        .rows
        .iter()
        .filter(|row| !purged.contains(&row.id))
        .map(|row| row.id)
        .collect::<BTreeSet<_>>();
    let scopes = schema
        .scopes()
        .map(|scope| {
            ScopeIndex::build(
                scope.name,
                schema.scope_indices(scope),
                &mapped.rows,
                &purged,
            )
        })
        .collect::<Vec<_>>();

    let mut out = Vec::new();
    for row in &mapped.rows {
        if let Some(canonical_id) = mapped.remap.canonical_of(row.id) {
            let verdict = if survivors.contains(&canonical_id) {
                Verdict::ConflictRedirectToCanonical {
                    canonical_id,
                    rewrite_attempted: row.is_changed(),
                }
            } else {
                Verdict::Fatal {
                    scope: schema.natural_key.name,
                    collides_with: canonical_id,
                }
            };
            out.push(Classified {
                row_id: row.id,
                verdict,
            });
            continue;
        }

        let changed = row.changed_columns();
        if changed.is_empty() {
            continue;
        }

        let fatal = scopes
            .iter()
            .filter(|scope| scope.touches(&changed))
            .find_map(|scope| scope.collider(row).map(|other| (scope.name, other)));

        let verdict = match fatal {
            Some((scope, collides_with)) => Verdict::Fatal {
                scope,
                collides_with,
            },
            None => Verdict::Safe {
                displaces: scopes
                    .iter()
                    .filter(|scope| scope.touches(&changed))
                    .flat_map(|scope| scope.blockers(row))
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect(),
                assignments: changed
                    .iter()
                    .map(|index| ColumnAssignment {
                        column: schema.columns[*index].name,
                        index: *index,
                        from: row.current[*index].clone(),
                        to: row.resolved[*index].clone(),
                    })
                    .collect(),
            },
        };
        out.push(Classified {
            row_id: row.id,
            verdict,
        });
    }
    out
}

/// The first fatal verdict of a table, as the error that aborts the run.
pub fn first_fatal(schema: &EntitySchema, classified: &[Classified]) -> Option<ReconcileError> {
    classified.iter().find_map(|item| match item.verdict {
        Verdict::Fatal {
            scope,
            collides_with,
        } => Some(ReconcileError::UnsafeRewriteWithoutCanonicalTarget {
            entity: schema.kind,
            row_id: item.row_id,
            scope,
            collides_with,
        }),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, EntityKind};
    use crate::remap::{RemapEntry, RemapSet};
    use crate::snapshot::NaturalKey;

    fn resolved(id: i64, current: Vec<Cell>, resolved: Vec<Cell>) -> ResolvedRow {
        ResolvedRow {
            id,
            current,
            resolved,
        }
    }

    fn link(context: i64, key: i64, target: i64, position: i64) -> Vec<Cell> {
        vec![
            Cell::from(context),
            Cell::from(key),
            Cell::from(target),
            Cell::from(position),
        ]
    }

    #[test]
    fn duplicate_rows_redirect_to_their_canonical() {
        let catalog = Catalog::standard();
        let schema = catalog.schema(EntityKind::Value).expect("value schema");
        let mapped = MappedTable {
            rows: vec![
                resolved(
                    5,
                    vec![Cell::Integer(1), Cell::Integer(10)],
                    vec![Cell::Integer(1), Cell::Integer(10)],
                ),
                resolved(
                    40,
                    vec![Cell::Integer(21), Cell::Integer(10)],
                    vec![Cell::Integer(1), Cell::Integer(10)],
                ),
            ],
            remap: RemapSet::new(
                EntityKind::Value,
                vec![RemapEntry {
                    natural_key: NaturalKey::new(vec![Cell::Integer(1), Cell::Integer(10)]),
                    canonical_id: 5,
                    duplicate_id: 40,
                }],
            ),
            inversions: 0,
        };

        let classified = classify(schema, &mapped);
        assert_eq!(
            classified,
            vec![Classified {
                row_id: 40,
                verdict: Verdict::ConflictRedirectToCanonical {
                    canonical_id: 5,
                    rewrite_attempted: true,
                },
            }]
        );
        assert!(first_fatal(schema, &classified).is_none());
    }

    #[test]
    fn changed_row_without_collision_is_safe_and_rewrites_together() {
        let catalog = Catalog::standard();
        let schema = catalog.schema(EntityKind::UniqueContext).expect("context schema");
        let mapped = MappedTable {
            rows: vec![resolved(
                3,
                vec![Cell::Integer(40), Cell::Integer(41), Cell::Null, Cell::Integer(7)],
                vec![Cell::Integer(5), Cell::Integer(6), Cell::Null, Cell::Integer(7)],
            )],
            remap: RemapSet::empty(EntityKind::UniqueContext),
            inversions: 0,
        };

        let classified = classify(schema, &mapped);
        let Verdict::Safe { assignments, .. } = &classified[0].verdict else {
            panic!("expected safe verdict, got {:?}", classified[0].verdict);
        };
        let columns = assignments.iter().map(|a| a.column).collect::<Vec<_>>();
        assert_eq!(columns, vec!["value1_id", "value2_id"]);
    }

    #[test]
    fn collision_on_a_secondary_scope_is_fatal() {
        let catalog = Catalog::standard();
        let schema = catalog.schema(EntityKind::Link).expect("link schema");
        // Both links land on context 1 position 0 but under different keys, so
        // neither is a natural-key duplicate of the other.
        let mapped = MappedTable {
            rows: vec![
                resolved(1, link(1, 5, 8, 0), link(1, 5, 8, 0)),
                resolved(2, link(30, 6, 8, 0), link(1, 6, 8, 0)),
            ],
            remap: RemapSet::empty(EntityKind::Link),
            inversions: 0,
        };

        let classified = classify(schema, &mapped);
        let err = first_fatal(schema, &classified).expect("position clash must be fatal");
        assert_eq!(
            err,
            ReconcileError::UnsafeRewriteWithoutCanonicalTarget {
                entity: EntityKind::Link,
                row_id: 2,
                scope: "quicklinks_context_position",
                collides_with: 1,
            }
        );
    }

    #[test]
    fn slot_held_only_by_a_purged_duplicate_is_displaced() {
        let catalog = Catalog::standard();
        let schema = catalog.schema(EntityKind::Link).expect("link schema");
        // 101 folds into 100; 102 moves from context 8 into the position 101 vacates.
        let mapped = MappedTable {
            rows: vec![
                resolved(100, link(3, 6, 6, 0), link(3, 6, 6, 0)),
                resolved(101, link(3, 40, 6, 1), link(3, 6, 6, 1)),
                resolved(102, link(8, 5, 5, 1), link(3, 5, 5, 1)),
            ],
            remap: RemapSet::new(
                EntityKind::Link,
                vec![RemapEntry {
                    natural_key: NaturalKey::new(vec![Cell::Integer(3), Cell::Integer(6)]),
                    canonical_id: 100,
                    duplicate_id: 101,
                }],
            ),
            inversions: 0,
        };

        let classified = classify(schema, &mapped);
        assert!(first_fatal(schema, &classified).is_none());
        let moved = classified
            .iter()
            .find(|item| item.row_id == 102)
            .expect("verdict for 102");
        let Verdict::Safe {
            assignments,
            displaces,
        } = &moved.verdict
        else {
            panic!("expected safe verdict, got {:?}", moved.verdict);
        };
        assert_eq!(assignments[0].column, "context_id");
        assert_eq!(displaces, &vec![101]);
    }

    #[test]
    fn rewrite_of_columns_outside_every_scope_ignores_scope_twins() {
        let catalog = Catalog::standard();
        let schema = catalog.schema(EntityKind::Link).expect("link schema");
        let mapped = MappedTable {
            rows: vec![
                resolved(1, link(1, 5, 40, 0), link(1, 5, 8, 0)),
                resolved(2, link(1, 6, 9, 1), link(1, 6, 9, 1)),
            ],
            remap: RemapSet::empty(EntityKind::Link),
            inversions: 0,
        };

        let classified = classify(schema, &mapped);
        assert_eq!(classified.len(), 1);
        assert!(matches!(classified[0].verdict, Verdict::Safe { .. }));
    }

    #[test]
    fn redirect_to_a_missing_canonical_is_fatal() {
        let catalog = Catalog::standard();
        let schema = catalog.schema(EntityKind::Application).expect("application schema");
        let mapped = MappedTable {
            rows: vec![resolved(9, vec![Cell::Integer(40)], vec![Cell::Integer(5)])],
            remap: RemapSet::new(
                EntityKind::Application,
                vec![RemapEntry {
                    natural_key: NaturalKey::new(vec![Cell::Integer(5)]),
                    canonical_id: 2,
                    duplicate_id: 9,
                }],
            ),
            inversions: 0,
        };

        let err = first_fatal(schema, &classify(schema, &mapped)).expect("fatal");
        assert_eq!(err.code(), "UNSAFE_REWRITE_WITHOUT_CANONICAL_TARGET");
    }
}
