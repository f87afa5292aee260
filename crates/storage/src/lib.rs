#![forbid(unsafe_code)]

mod store;

pub use rk_core::{
    Cell, EntityKind, EntityRow, ReconcileError, ReconcileOptions, ReconciliationReport,
    RepairPlan, StoreSnapshot,
};
pub use store::*;
