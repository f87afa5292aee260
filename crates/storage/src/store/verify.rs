#![forbid(unsafe_code)]

use super::{StoreError, cell_from_sql};
use rk_core::{Catalog, Cell, EntitySchema, NaturalKey, ReconcileError};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Transaction};

/// Post-repair checks run before commit: no natural key is held twice, no
/// catalog reference dangles, and SQLite's own foreign key check is clean.
pub(super) fn verify_tx(tx: &Transaction<'_>, catalog: &Catalog) -> Result<(), StoreError> {
    for schema in catalog.schemas() {
        residual_duplicate_tx(tx, schema)?;
        for (_, column, target) in schema.references() {
            let Some(target_schema) = catalog.schema(target) else {
                continue;
            };
            let name = column.name;
            let hit = tx
                .query_row(
                    &format!(
                        "SELECT r.id, r.{name} FROM {} AS r \
                         LEFT JOIN {} AS t ON t.id = r.{name} \
                         WHERE r.{name} IS NOT NULL AND t.id IS NULL \
                         ORDER BY r.id LIMIT 1",
                        schema.table, target_schema.table
                    ),
                    [],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()?;
            if let Some((row_id, target_id)) = hit {
                return Err(ReconcileError::ReferentialIntegrityViolation {
                    table: schema.table,
                    column: name,
                    row_id,
                    target,
                    target_id,
                }
                .into());
            }
        }
    }
    foreign_key_check_tx(tx)
}

fn residual_duplicate_tx(tx: &Transaction<'_>, schema: &EntitySchema) -> Result<(), StoreError> {
    let columns = schema.natural_key.columns;
    let width = columns.len();
    let list = columns.join(", ");
    let values = tx
        .query_row(
            &format!(
                "SELECT {list} FROM {} GROUP BY {list} HAVING COUNT(*) > 1 LIMIT 1",
                schema.table
            ),
            [],
            |row| {
                (0..width)
                    .map(|index| row.get::<_, Value>(index))
                    .collect::<Result<Vec<_>, _>>()
            },
        )
        .optional()?;
    let Some(values) = values else {
        return Ok(());
    };
    let cells = values
        .into_iter()
        .map(cell_from_sql)
        .collect::<Result<Vec<Cell>, _>>()?;
    Err(ReconcileError::ResidualDuplicate {
        entity: schema.kind,
        natural_key: NaturalKey::new(cells).to_string(),
    }
    .into())
}

fn foreign_key_check_tx(tx: &Transaction<'_>) -> Result<(), StoreError> {
    let mut stmt = tx.prepare("PRAGMA foreign_key_check")?;
    let mut rows = stmt.query([])?;
    if let Some(row) = rows.next()? {
        return Err(StoreError::ForeignKeyViolation {
            table: row.get::<_, String>(0)?,
            rowid: row.get::<_, Option<i64>>(1)?.unwrap_or_default(),
            parent: row.get::<_, String>(2)?,
        });
    }
    Ok(())
}
