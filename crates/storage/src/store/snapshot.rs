#![forbid(unsafe_code)]

use super::{StoreError, cell_from_sql, select_list};
use rk_core::{Catalog, EntityRow, StoreSnapshot, TableSnapshot};
use rusqlite::Connection;
use rusqlite::types::Value;

/// Loads every catalog table ordered by id. Inside a transaction this is the
/// single read the whole plan is computed from.
pub(super) fn load_snapshot(
    conn: &Connection,
    catalog: &Catalog,
) -> Result<StoreSnapshot, StoreError> {
    let mut snapshot = StoreSnapshot::new();
    for schema in catalog.schemas() {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} ORDER BY id",
            select_list(schema),
            schema.table
        ))?;
        let width = schema.columns.len();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let id = row.get::<_, i64>(0)?;
            let mut cells = Vec::with_capacity(width);
            for index in 0..width {
                cells.push(cell_from_sql(row.get::<_, Value>(index + 1)?)?);
            }
            out.push(EntityRow::new(id, cells));
        }
        tracing::debug!(table = schema.table, rows = out.len(), "table loaded");
        snapshot.insert(schema.kind, TableSnapshot::new(out));
    }
    Ok(snapshot)
}
