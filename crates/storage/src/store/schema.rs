#![forbid(unsafe_code)]

use super::StoreError;
use rk_core::{Catalog, EntitySchema};
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};

/// Refuses to run against a store whose layout differs from the catalog:
/// missing tables or columns, reference columns with the wrong NULL-ability,
/// enforced scopes without a UNIQUE index, missing lookup indexes. Tables
/// outside the catalog are left alone.
pub(super) fn preflight_gate(
    conn: &Connection,
    catalog: &Catalog,
    allow_missing_tables: bool,
) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let mut rows = stmt.query([])?;
    let mut tables = BTreeSet::new();
    while let Some(row) = rows.next()? {
        tables.insert(row.get::<_, String>(0)?);
    }

    for schema in catalog.schemas() {
        if !tables.contains(schema.table) {
            if allow_missing_tables {
                continue;
            }
            return Err(mismatch(schema, "table is missing".to_string()));
        }

        let columns = table_columns(conn, schema.table)?;
        let expected = std::iter::once("id").chain(schema.columns.iter().map(|c| c.name));
        for column in expected {
            if !columns.contains_key(column) {
                return Err(mismatch(schema, format!("column {column} is missing")));
            }
        }
        for (_, column, _) in schema.references() {
            let not_null = columns.get(column.name).copied().unwrap_or_default();
            if not_null == column.nullable() {
                let expected = if column.nullable() { "NULL" } else { "NOT NULL" };
                return Err(mismatch(
                    schema,
                    format!("column {} must be {expected}", column.name),
                ));
            }
        }

        let indexes = table_indexes(conn, schema.table)?;
        for scope in schema.enforced_scopes() {
            if !indexes
                .iter()
                .any(|index| index.unique && index.covers(scope.columns))
            {
                return Err(mismatch(
                    schema,
                    format!("unique scope {} is not enforced", scope.name),
                ));
            }
        }
        for (name, columns) in schema.lookup_indexes {
            if !indexes
                .iter()
                .any(|index| index.name == *name && index.covers(columns))
            {
                return Err(mismatch(schema, format!("lookup index {name} is missing")));
            }
        }
    }
    Ok(())
}

fn mismatch(schema: &EntitySchema, detail: String) -> StoreError {
    StoreError::SchemaMismatch {
        table: schema.table.to_string(),
        detail,
    }
}

/// Column name to its NOT NULL flag.
fn table_columns(conn: &Connection, table: &str) -> Result<BTreeMap<String, bool>, StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, bool>(3)?)))?
        .collect::<Result<BTreeMap<_, _>, _>>()?;
    Ok(columns)
}

struct IndexShape {
    name: String,
    unique: bool,
    columns: Vec<String>,
}

impl IndexShape {
    fn covers(&self, columns: &[&str]) -> bool {
        self.columns.iter().map(String::as_str).eq(columns.iter().copied())
    }
}

fn table_indexes(conn: &Connection, table: &str) -> Result<Vec<IndexShape>, StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA index_list({table})"))?;
    let listed = stmt
        .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, bool>(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(listed.len());
    for (name, unique) in listed {
        let mut info = conn.prepare(&format!("PRAGMA index_info({name})"))?;
        let columns = info
            .query_map([], |row| row.get::<_, Option<String>>(2))?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect();
        out.push(IndexShape {
            name,
            unique,
            columns,
        });
    }
    Ok(out)
}

pub(super) fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS class_descriptors (
          id INTEGER PRIMARY KEY,
          name TEXT NOT NULL,
          name_crc INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_class_descriptors_crc
          ON class_descriptors(name_crc);

        CREATE TABLE IF NOT EXISTS string_values (
          id INTEGER PRIMARY KEY,
          content TEXT NOT NULL,
          content_crc INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_string_values_crc
          ON string_values(content_crc);

        CREATE TABLE IF NOT EXISTS composite_values (
          id INTEGER PRIMARY KEY,
          class_id INTEGER NOT NULL REFERENCES class_descriptors(id),
          string_id INTEGER NOT NULL REFERENCES string_values(id),
          CONSTRAINT composite_values_type_payload UNIQUE(class_id, string_id)
        );
        CREATE INDEX IF NOT EXISTS idx_composite_values_string
          ON composite_values(string_id);

        CREATE TABLE IF NOT EXISTS unique_contexts (
          id INTEGER PRIMARY KEY,
          value1_id INTEGER NOT NULL REFERENCES composite_values(id),
          value2_id INTEGER REFERENCES composite_values(id),
          value3_id INTEGER REFERENCES composite_values(id),
          owner_id INTEGER NOT NULL,
          CONSTRAINT unique_contexts_tuple UNIQUE(value1_id, value2_id, value3_id, owner_id)
        );

        CREATE TABLE IF NOT EXISTS quicklinks (
          id INTEGER PRIMARY KEY,
          context_id INTEGER NOT NULL REFERENCES unique_contexts(id),
          key_id INTEGER NOT NULL REFERENCES composite_values(id),
          target_id INTEGER NOT NULL REFERENCES composite_values(id),
          position INTEGER NOT NULL,
          CONSTRAINT quicklinks_context_key UNIQUE(context_id, key_id),
          CONSTRAINT quicklinks_context_position UNIQUE(context_id, position)
        );
        CREATE INDEX IF NOT EXISTS idx_quicklinks_target
          ON quicklinks(target_id);

        CREATE TABLE IF NOT EXISTS audit_applications (
          id INTEGER PRIMARY KEY,
          descriptor_id INTEGER NOT NULL REFERENCES composite_values(id),
          CONSTRAINT audit_applications_descriptor UNIQUE(descriptor_id)
        );

        CREATE TABLE IF NOT EXISTS audit_entries (
          id INTEGER PRIMARY KEY,
          application_id INTEGER NOT NULL REFERENCES audit_applications(id),
          user_id INTEGER NOT NULL REFERENCES composite_values(id),
          context_id INTEGER REFERENCES unique_contexts(id),
          recorded_at_ms INTEGER NOT NULL,
          action TEXT NOT NULL,
          CONSTRAINT audit_entries_event UNIQUE(application_id, user_id, recorded_at_ms, action)
        );
        CREATE INDEX IF NOT EXISTS idx_audit_entries_user
          ON audit_entries(user_id);
        "#,
    )?;
    Ok(())
}
