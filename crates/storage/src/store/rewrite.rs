#![forbid(unsafe_code)]

use super::{StoreError, cell_to_sql, is_constraint_violation};
use rk_core::{RepairPlan, RowRewrite, TablePlan};
use rusqlite::{Transaction, params_from_iter};

/// Applies every safe rewrite in dependency order. Each UPDATE is guarded by the
/// values the plan was computed from, so a row that moved since the snapshot
/// fails the run instead of being overwritten. Duplicates still holding a
/// rewrite's target tuple are deleted just before it.
pub(super) fn apply_rewrites_tx(
    tx: &Transaction<'_>,
    plan: &RepairPlan,
) -> Result<usize, StoreError> {
    let mut applied = 0;
    for kind in &plan.order {
        let Some(table) = plan.table(*kind) else {
            continue;
        };
        for rewrite in &table.rewrites {
            rewrite_row_tx(tx, table, rewrite)?;
            applied += 1;
        }
        if !table.rewrites.is_empty() {
            tracing::info!(
                entity = %table.entity,
                rows = table.rewrites.len(),
                "references rewritten"
            );
        }
    }
    Ok(applied)
}

fn rewrite_row_tx(
    tx: &Transaction<'_>,
    table: &TablePlan,
    rewrite: &RowRewrite,
) -> Result<(), StoreError> {
    if rewrite.assignments.is_empty() {
        return Ok(());
    }
    for id in &rewrite.displaces {
        let deleted = tx.execute(&format!("DELETE FROM {} WHERE id = ?1", table.table), [id])?;
        if deleted != 1 {
            return Err(StoreError::StaleSnapshot {
                table: table.table,
                id: *id,
            });
        }
        tracing::debug!(
            table = table.table,
            id = *id,
            by = rewrite.row_id,
            "duplicate displaced"
        );
    }
    let count = rewrite.assignments.len();
    let set = rewrite
        .assignments
        .iter()
        .enumerate()
        .map(|(n, a)| format!("{} = ?{}", a.column, n + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let guard = rewrite
        .assignments
        .iter()
        .enumerate()
        .map(|(n, a)| format!("{} IS ?{}", a.column, count + n + 2))
        .collect::<Vec<_>>()
        .join(" AND ");
    let sql = format!(
        "UPDATE {} SET {set} WHERE id = ?{} AND {guard}",
        table.table,
        count + 1
    );

    let mut values = rewrite
        .assignments
        .iter()
        .map(|a| cell_to_sql(&a.to))
        .collect::<Vec<_>>();
    values.push(rusqlite::types::Value::Integer(rewrite.row_id));
    values.extend(rewrite.assignments.iter().map(|a| cell_to_sql(&a.from)));

    let changed = match tx.execute(&sql, params_from_iter(values)) {
        Ok(changed) => changed,
        Err(err) if is_constraint_violation(&err) => {
            return Err(StoreError::ConstraintViolation { table: table.table });
        }
        Err(err) => return Err(err.into()),
    };
    if changed != 1 {
        return Err(StoreError::StaleSnapshot {
            table: table.table,
            id: rewrite.row_id,
        });
    }
    tracing::debug!(
        table = table.table,
        id = rewrite.row_id,
        columns = count,
        "row rewritten"
    );
    Ok(())
}
