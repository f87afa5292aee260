#![forbid(unsafe_code)]

use super::StoreError;
use rk_core::{Catalog, ReconcileError, RepairPlan, TablePlan};
use rusqlite::{OptionalExtension, Transaction, params};

/// Deletes duplicate rows, downstream tables first. Before a table is touched,
/// every referrer is checked against the staged remap so a surviving pointer to
/// a duplicate aborts the run with the offending row named. Duplicates the
/// rewrite stage already displaced are counted but not deleted again.
pub(super) fn purge_duplicates_tx(
    tx: &Transaction<'_>,
    catalog: &Catalog,
    plan: &RepairPlan,
) -> Result<usize, StoreError> {
    let mut purged = 0;
    for table in plan.purge_order() {
        if table.remap.is_empty() {
            continue;
        }
        ensure_unreferenced_tx(tx, catalog, table)?;

        let displaced = table.displaced_ids();
        purged += displaced.len();
        let mut stmt = tx.prepare(&format!("DELETE FROM {} WHERE id = ?1", table.table))?;
        for id in table.remap.duplicate_ids().filter(|id| !displaced.contains(id)) {
            if stmt.execute([id])? != 1 {
                return Err(StoreError::StaleSnapshot {
                    table: table.table,
                    id,
                });
            }
            tracing::debug!(table = table.table, id, "duplicate purged");
            purged += 1;
        }
        tracing::info!(
            entity = %table.entity,
            rows = table.remap.len(),
            "duplicates purged"
        );
    }
    Ok(purged)
}

fn ensure_unreferenced_tx(
    tx: &Transaction<'_>,
    catalog: &Catalog,
    table: &TablePlan,
) -> Result<(), StoreError> {
    for (referrer, index) in catalog.referrers(table.entity) {
        let column = referrer.columns[index].name;
        let hit = tx
            .query_row(
                &format!(
                    "SELECT r.id, r.{column} FROM {} AS r \
                     WHERE r.{column} IN \
                       (SELECT duplicate_id FROM temp.rekey_remap WHERE entity = ?1) \
                     ORDER BY r.id LIMIT 1",
                    referrer.table
                ),
                params![table.entity.as_str()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        if let Some((row_id, target_id)) = hit {
            return Err(ReconcileError::ReferentialIntegrityViolation {
                table: referrer.table,
                column,
                row_id,
                target: table.entity,
                target_id,
            }
            .into());
        }
    }
    Ok(())
}
