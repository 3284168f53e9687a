//! In-process ledger store.
//!
//! Backs a side's payments table and logs with plain maps so the whole
//! pipeline can run embedded (and be tested) without Postgres. Mutation
//! semantics match [`PgLedgerStore`](crate::ledger::PgLedgerStore)
//! exactly: insert-if-absent everywhere, guarded state transitions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::AppResult;
use crate::ledger::models::{LedgerCounts, LogEntry, LogState, NewPayment, Payment};
use crate::ledger::store::LedgerStore;

#[derive(Default)]
struct Inner {
    payments: BTreeMap<i64, Payment>,
    recon_log: BTreeMap<i64, LogEntry>,
    invalid_log: BTreeMap<i64, LogEntry>,
    next_id: i64,
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: Mutex<Inner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payment(&self, id: i64) -> Option<Payment> {
        self.inner.lock().payments.get(&id).cloned()
    }

    pub fn log_entry(&self, payment_id: i64) -> Option<LogEntry> {
        self.inner.lock().recon_log.get(&payment_id).cloned()
    }

    pub fn invalid_entry(&self, payment_id: i64) -> Option<LogEntry> {
        self.inner.lock().invalid_log.get(&payment_id).cloned()
    }

    /// Insert a log entry with an explicit timestamp. Lets tests place
    /// entries on either side of the republish cool-down window.
    pub fn insert_log_entry_at(
        &self,
        payment_id: i64,
        iban: &str,
        state: LogState,
        inserted_at: DateTime<Utc>,
    ) {
        self.inner.lock().recon_log.entry(payment_id).or_insert(LogEntry {
            payment_id,
            iban: iban.to_string(),
            state,
            inserted_at,
        });
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert_payments(&self, rows: &[NewPayment]) -> AppResult<u64> {
        let mut inner = self.inner.lock();
        for row in rows {
            inner.next_id += 1;
            let id = inner.next_id;
            inner.payments.insert(
                id,
                Payment {
                    id,
                    amount: row.amount,
                    iban: row.iban.clone(),
                    date: row.date,
                },
            );
        }
        Ok(rows.len() as u64)
    }

    async fn fetch_unlogged_payments(&self, limit: i64) -> AppResult<Vec<Payment>> {
        let inner = self.inner.lock();
        Ok(inner
            .payments
            .values()
            .filter(|p| !inner.recon_log.contains_key(&p.id))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn fetch_payments_by_ids(&self, ids: &[i64]) -> AppResult<Vec<Payment>> {
        let inner = self.inner.lock();
        let mut sorted: Vec<i64> = ids.to_vec();
        sorted.sort_unstable();
        Ok(sorted
            .into_iter()
            .filter_map(|id| inner.payments.get(&id).cloned())
            .collect())
    }

    async fn insert_payment_if_absent(&self, payment: &Payment) -> AppResult<bool> {
        let mut inner = self.inner.lock();
        if inner.payments.contains_key(&payment.id) {
            return Ok(false);
        }
        inner.payments.insert(payment.id, payment.clone());
        inner.next_id = inner.next_id.max(payment.id);
        Ok(true)
    }

    async fn insert_log_if_absent(
        &self,
        payment_id: i64,
        iban: &str,
        state: LogState,
    ) -> AppResult<bool> {
        let mut inner = self.inner.lock();
        if inner.recon_log.contains_key(&payment_id) {
            return Ok(false);
        }
        inner.recon_log.insert(
            payment_id,
            LogEntry {
                payment_id,
                iban: iban.to_string(),
                state,
                inserted_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn insert_invalid_log_if_absent(&self, payment_id: i64, iban: &str) -> AppResult<bool> {
        let mut inner = self.inner.lock();
        if inner.invalid_log.contains_key(&payment_id) {
            return Ok(false);
        }
        inner.invalid_log.insert(
            payment_id,
            LogEntry {
                payment_id,
                iban: iban.to_string(),
                state: LogState::Pending,
                inserted_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn pending_log_entries(&self) -> AppResult<Vec<LogEntry>> {
        Ok(self
            .inner
            .lock()
            .recon_log
            .values()
            .filter(|e| e.state == LogState::Pending)
            .cloned()
            .collect())
    }

    async fn pending_report(&self) -> AppResult<Vec<Payment>> {
        let inner = self.inner.lock();
        Ok(inner
            .recon_log
            .values()
            .filter(|e| e.state == LogState::Pending)
            .filter_map(|e| inner.payments.get(&e.payment_id).cloned())
            .collect())
    }

    async fn mark_validated(&self, payment_id: i64) -> AppResult<bool> {
        let mut inner = self.inner.lock();
        match inner.recon_log.get_mut(&payment_id) {
            Some(entry) if entry.state == LogState::Pending => {
                entry.state = LogState::Validated;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn counts(&self) -> AppResult<LedgerCounts> {
        let inner = self.inner.lock();
        let mut counts = LedgerCounts {
            payments: inner.payments.len() as i64,
            invalid: inner.invalid_log.len() as i64,
            ..Default::default()
        };
        for entry in inner.recon_log.values() {
            match entry.state {
                LogState::Pending => counts.pending += 1,
                LogState::Validated => counts.validated += 1,
                LogState::Faulty => counts.faulty += 1,
            }
        }
        Ok(counts)
    }
}
