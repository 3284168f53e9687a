use async_trait::async_trait;

use crate::error::AppResult;
use crate::ledger::models::{LedgerCounts, LogEntry, LogState, NewPayment, Payment};

/// Persistence seam for one side's private store: the payments table,
/// the reconciliation log, and (on the mirror) the invalid-record log.
///
/// Every mutation that matters to the protocol is an insert-if-absent
/// or a guarded update, so redelivered messages resolve as no-ops.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append new payments, letting the store assign ids. Seeding only.
    async fn insert_payments(&self, rows: &[NewPayment]) -> AppResult<u64>;

    /// Fetch up to `limit` payments that have no reconciliation-log
    /// entry yet (never exported before).
    async fn fetch_unlogged_payments(&self, limit: i64) -> AppResult<Vec<Payment>>;

    /// Fetch full payment rows for an id set. Used by the republisher
    /// to recover record content for stale log entries.
    async fn fetch_payments_by_ids(&self, ids: &[i64]) -> AppResult<Vec<Payment>>;

    /// Insert a payment keyed by its origin-assigned id. Returns false
    /// when the id already exists (idempotent re-delivery).
    async fn insert_payment_if_absent(&self, payment: &Payment) -> AppResult<bool>;

    /// Insert a reconciliation-log entry unless one exists for the id.
    /// Returns false on the no-op path.
    async fn insert_log_if_absent(
        &self,
        payment_id: i64,
        iban: &str,
        state: LogState,
    ) -> AppResult<bool>;

    /// Insert an invalid-record-log entry unless one exists for the id.
    async fn insert_invalid_log_if_absent(&self, payment_id: i64, iban: &str) -> AppResult<bool>;

    /// All log entries currently in `pending` state.
    async fn pending_log_entries(&self) -> AppResult<Vec<LogEntry>>;

    /// The pending backlog joined against the payments table, ordered
    /// by payment id. This is what a side reports to the reconciler.
    async fn pending_report(&self) -> AppResult<Vec<Payment>>;

    /// Transition a pending log entry to `validated`. Returns false if
    /// the id is unknown or the entry already left `pending`.
    async fn mark_validated(&self, payment_id: i64) -> AppResult<bool>;

    /// Aggregate counts for the monitoring surface.
    async fn counts(&self) -> AppResult<LedgerCounts>;
}
