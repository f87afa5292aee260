#![forbid(unsafe_code)]

//! Pure stages of the identifier-remap repair: duplicate detection, identifier
//! mapping, conflict classification and planning over an immutable snapshot.

pub mod catalog;
mod classify;
mod detect;
mod error;
mod graph;
mod mapper;
mod plan;
mod remap;
mod report;
mod snapshot;

pub use catalog::{Catalog, ColumnDef, ColumnKind, EntityKind, EntitySchema, UniqueScope};
pub use classify::{Classified, ColumnAssignment, Verdict, classify, first_fatal};
pub use detect::{DuplicateGroup, detect_duplicates};
pub use error::ReconcileError;
pub use graph::EntityGraph;
pub use mapper::{MappedTable, ResolvedRow, map_entity};
pub use plan::{Redirect, RepairPlan, RowRewrite, TablePlan, check_purge_safety, plan_repair};
pub use remap::{RemapEntry, RemapLedger, RemapSet};
pub use report::{EntityReport, ReconcileOptions, ReconciliationReport};
pub use snapshot::{Cell, EntityRow, NaturalKey, StoreSnapshot, TableSnapshot};
