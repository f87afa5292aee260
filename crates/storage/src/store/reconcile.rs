#![forbid(unsafe_code)]

use super::{SqliteStore, StoreError, purge, rewrite, scratch, snapshot, verify};
use rk_core::{ReconcileOptions, ReconciliationReport, RepairPlan, plan_repair};
use rusqlite::TransactionBehavior;

impl SqliteStore {
    /// Computes the repair plan from the current store state without writing.
    pub fn plan(&self) -> Result<RepairPlan, StoreError> {
        let snapshot = snapshot::load_snapshot(&self.conn, &self.catalog)?;
        Ok(plan_repair(&self.catalog, &snapshot)?)
    }

    pub fn reconcile(&mut self) -> Result<ReconciliationReport, StoreError> {
        self.reconcile_with(ReconcileOptions::default())
    }

    /// Detects, rewrites, purges and verifies inside one exclusive transaction.
    /// Any failure drops the transaction, leaving the store exactly as it was.
    pub fn reconcile_with(
        &mut self,
        options: ReconcileOptions,
    ) -> Result<ReconciliationReport, StoreError> {
        let span = tracing::info_span!("reconcile", dry_run = options.dry_run);
        let _guard = span.enter();

        let catalog = self.catalog;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Exclusive)?;
        // Displaced duplicates go before their referrers are rewritten; foreign
        // keys are checked at commit and by the verify stage instead.
        tx.pragma_update(None, "defer_foreign_keys", 1)?;

        let snapshot = snapshot::load_snapshot(&tx, &catalog)?;
        let plan = plan_repair(&catalog, &snapshot)?;
        let mut report = ReconciliationReport::from_plan(&plan, options);
        tracing::info!(
            duplicates = plan.duplicates_detected(),
            entities = plan.order.len(),
            "plan computed"
        );

        let staged = scratch::stage_remaps_tx(&tx, &plan)?;
        let rewritten = rewrite::apply_rewrites_tx(&tx, &plan)?;
        let purged = purge::purge_duplicates_tx(&tx, &catalog, &plan)?;
        verify::verify_tx(&tx, &catalog)?;
        scratch::drop_tx(&tx)?;

        if options.dry_run {
            tx.rollback()?;
            tracing::info!(staged, rewritten, purged, "dry run rolled back");
        } else {
            tx.commit()?;
            report.committed = true;
            tracing::info!(staged, rewritten, purged, "repair committed");
        }
        Ok(report)
    }
}
