#![forbid(unsafe_code)]

use super::StoreError;
use rk_core::RepairPlan;
use rusqlite::{Transaction, params};

/// Connection-local table holding the remap entries of the running repair.
/// The purge and verify stages check the live tables against it in SQL.
pub(super) fn stage_remaps_tx(
    tx: &Transaction<'_>,
    plan: &RepairPlan,
) -> Result<usize, StoreError> {
    tx.execute_batch(
        r#"
        CREATE TEMP TABLE IF NOT EXISTS rekey_remap (
          entity TEXT NOT NULL,
          natural_key TEXT NOT NULL,
          canonical_id INTEGER NOT NULL,
          duplicate_id INTEGER NOT NULL,
          PRIMARY KEY(entity, duplicate_id)
        );
        DELETE FROM temp.rekey_remap;
        "#,
    )?;

    let mut stmt = tx.prepare(
        "INSERT INTO temp.rekey_remap(entity, natural_key, canonical_id, duplicate_id) \
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    let mut staged = 0;
    for table in &plan.tables {
        for entry in table.remap.entries() {
            let natural_key = serde_json::to_string(&entry.natural_key)
                .map_err(|_| StoreError::InvalidInput("natural key is not serializable"))?;
            stmt.execute(params![
                table.entity.as_str(),
                natural_key,
                entry.canonical_id,
                entry.duplicate_id,
            ])?;
            staged += 1;
        }
    }
    Ok(staged)
}

pub(super) fn drop_tx(tx: &Transaction<'_>) -> Result<(), StoreError> {
    tx.execute_batch("DROP TABLE IF EXISTS temp.rekey_remap;")?;
    Ok(())
}
