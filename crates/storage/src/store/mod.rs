#![forbid(unsafe_code)]

mod error;
mod purge;
mod reconcile;
mod rewrite;
mod schema;
mod scratch;
mod snapshot;
mod verify;

pub use error::StoreError;

use rk_core::{Catalog, Cell, EntityKind, EntityRow, EntitySchema, StoreSnapshot};
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, params_from_iter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    catalog: Catalog,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Opens an existing store. The file must already exist and carry every
    /// catalog table; nothing is created on a path that holds no database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no store at {}", path.display()),
            )));
        }
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        configure(&conn)?;

        let catalog = Catalog::standard();
        schema::preflight_gate(&conn, &catalog, false)?;
        Ok(Self {
            conn,
            catalog,
            path: Some(path),
        })
    }

    /// Opens or creates a store file and installs any missing catalog tables.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        configure(&conn)?;

        let catalog = Catalog::standard();
        schema::preflight_gate(&conn, &catalog, true)?;
        schema::install_schema(&conn)?;
        schema::preflight_gate(&conn, &catalog, false)?;
        Ok(Self {
            conn,
            catalog,
            path: Some(path),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        let catalog = Catalog::standard();
        schema::install_schema(&conn)?;
        schema::preflight_gate(&conn, &catalog, false)?;
        Ok(Self {
            conn,
            catalog,
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Creates any catalog table or index that is missing. Existing rows are kept.
    pub fn install_schema(&self) -> Result<(), StoreError> {
        schema::install_schema(&self.conn)
    }

    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<(), StoreError> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    /// Inserts one row. `id = None` lets SQLite assign the next rowid.
    pub fn insert_row(
        &mut self,
        kind: EntityKind,
        id: Option<i64>,
        cells: &[Cell],
    ) -> Result<i64, StoreError> {
        let schema = self.schema(kind)?;
        if cells.len() != schema.columns.len() {
            return Err(StoreError::InvalidInput("cell count does not match the table"));
        }

        let columns = schema
            .columns
            .iter()
            .map(|column| column.name)
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=cells.len() + 1)
            .map(|n| format!("?{n}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {}(id, {columns}) VALUES ({placeholders})",
            schema.table
        );

        let mut values = Vec::with_capacity(cells.len() + 1);
        values.push(id.map_or(Value::Null, Value::Integer));
        values.extend(cells.iter().map(cell_to_sql));

        if let Err(err) = self.conn.execute(&sql, params_from_iter(values)) {
            return Err(map_insert_conflict(err, schema.table));
        }
        Ok(self.conn.last_insert_rowid())
    }

    pub fn row(&self, kind: EntityKind, id: i64) -> Result<Option<EntityRow>, StoreError> {
        let schema = self.schema(kind)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1",
            select_list(schema),
            schema.table
        );
        let values = self
            .conn
            .query_row(&sql, [id], |row| {
                (0..schema.columns.len())
                    .map(|index| row.get::<_, Value>(index + 1))
                    .collect::<Result<Vec<_>, _>>()
            })
            .optional()?;
        let Some(values) = values else {
            return Ok(None);
        };
        let cells = values
            .into_iter()
            .map(cell_from_sql)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(EntityRow::new(id, cells)))
    }

    pub fn count_rows(&self, kind: EntityKind) -> Result<usize, StoreError> {
        let schema = self.schema(kind)?;
        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", schema.table),
            [],
            |row| row.get::<_, i64>(0),
        )?;
        usize::try_from(count).map_err(|_| StoreError::InvalidInput("row count out of range"))
    }

    /// Ids of every row whose natural key equals `key`, NULL matching NULL.
    pub fn find_ids_by_natural_key(
        &self,
        kind: EntityKind,
        key: &[Cell],
    ) -> Result<Vec<i64>, StoreError> {
        let schema = self.schema(kind)?;
        if key.len() != schema.natural_key.columns.len() {
            return Err(StoreError::InvalidInput(
                "natural key arity does not match the table",
            ));
        }
        let predicate = schema
            .natural_key
            .columns
            .iter()
            .enumerate()
            .map(|(n, column)| format!("{column} IS ?{}", n + 1))
            .collect::<Vec<_>>()
            .join(" AND ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id FROM {} WHERE {predicate} ORDER BY id",
            schema.table
        ))?;
        let ids = stmt
            .query_map(params_from_iter(key.iter().map(cell_to_sql)), |row| {
                row.get::<_, i64>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Reads every catalog table as it is right now.
    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        snapshot::load_snapshot(&self.conn, &self.catalog)
    }

    fn schema(&self, kind: EntityKind) -> Result<&'static EntitySchema, StoreError> {
        self.catalog
            .schema(kind)
            .ok_or(StoreError::InvalidInput("entity is not in the catalog"))
    }
}

fn configure(conn: &Connection) -> Result<(), StoreError> {
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

fn select_list(schema: &EntitySchema) -> String {
    std::iter::once("id")
        .chain(schema.columns.iter().map(|column| column.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn cell_to_sql(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Integer(value) => Value::Integer(*value),
        Cell::Text(value) => Value::Text(value.clone()),
    }
}

fn cell_from_sql(value: Value) -> Result<Cell, StoreError> {
    match value {
        Value::Null => Ok(Cell::Null),
        Value::Integer(value) => Ok(Cell::Integer(value)),
        Value::Text(value) => Ok(Cell::Text(value)),
        Value::Real(_) | Value::Blob(_) => Err(StoreError::InvalidInput(
            "catalog columns hold only integers and text",
        )),
    }
}

fn map_insert_conflict(err: rusqlite::Error, table: &'static str) -> StoreError {
    if is_constraint_violation(&err) {
        return StoreError::ConstraintViolation { table };
    }
    StoreError::Sql(err)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("FOREIGN KEY constraint failed")
                })
        }
        _ => false,
    }
}
