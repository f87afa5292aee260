#![forbid(unsafe_code)]

use rk_core::ReconcileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("schema mismatch on {table}: {detail}")]
    SchemaMismatch { table: String, detail: String },

    #[error("{table}: constraint violated")]
    ConstraintViolation { table: &'static str },

    #[error("{table} row {id} changed while the repair was running")]
    StaleSnapshot { table: &'static str, id: i64 },

    #[error("foreign key check failed: {table} row {rowid} references missing {parent} row")]
    ForeignKeyViolation {
        table: String,
        rowid: i64,
        parent: String,
    },

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO",
            Self::Sql(_) => "SQLITE",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::SchemaMismatch { .. } => "SCHEMA_MISMATCH",
            Self::ConstraintViolation { .. } => "CONSTRAINT_VIOLATION",
            Self::StaleSnapshot { .. } => "STALE_SNAPSHOT",
            Self::ForeignKeyViolation { .. } => "FOREIGN_KEY_VIOLATION",
            Self::Reconcile(err) => err.code(),
        }
    }

    pub fn as_reconcile(&self) -> Option<&ReconcileError> {
        match self {
            Self::Reconcile(err) => Some(err),
            _ => None,
        }
    }
}
