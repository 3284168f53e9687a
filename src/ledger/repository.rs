use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppResult;
use crate::ledger::models::{LedgerCounts, LogEntry, LogState, NewPayment, Payment};
use crate::ledger::store::LedgerStore;

/// Postgres-backed store for one side's ledger.
///
/// Each side owns its own database; two instances of this type never
/// point at the same pool.
pub struct PgLedgerStore {
    pub pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn insert_payments(&self, rows: &[NewPayment]) -> AppResult<u64> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO payments (amount, iban, payment_date)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(row.amount)
            .bind(&row.iban)
            .bind(row.date)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    async fn fetch_unlogged_payments(&self, limit: i64) -> AppResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, amount, iban, payment_date AS date
            FROM payments
            WHERE id NOT IN (SELECT payment_id FROM recon_log)
            ORDER BY id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    async fn fetch_payments_by_ids(&self, ids: &[i64]) -> AppResult<Vec<Payment>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, amount, iban, payment_date AS date
            FROM payments
            WHERE id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    async fn insert_payment_if_absent(&self, payment: &Payment) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO payments (id, amount, iban, payment_date)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(payment.id)
        .bind(payment.amount)
        .bind(&payment.iban)
        .bind(payment.date)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_log_if_absent(
        &self,
        payment_id: i64,
        iban: &str,
        state: LogState,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO recon_log (payment_id, iban, state, inserted_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (payment_id) DO NOTHING
            "#,
        )
        .bind(payment_id)
        .bind(iban)
        .bind(state)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_invalid_log_if_absent(&self, payment_id: i64, iban: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO invalid_log (payment_id, iban, state, inserted_at)
            VALUES ($1, $2, 'pending', now())
            ON CONFLICT (payment_id) DO NOTHING
            "#,
        )
        .bind(payment_id)
        .bind(iban)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn pending_log_entries(&self) -> AppResult<Vec<LogEntry>> {
        let entries = sqlx::query_as::<_, LogEntry>(
            r#"
            SELECT payment_id, iban, state, inserted_at
            FROM recon_log
            WHERE state = 'pending'
            ORDER BY payment_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn pending_report(&self) -> AppResult<Vec<Payment>> {
        let report = sqlx::query_as::<_, Payment>(
            r#"
            SELECT p.id, p.amount, p.iban, p.payment_date AS date
            FROM recon_log l
            JOIN payments p ON p.id = l.payment_id
            WHERE l.state = 'pending'
            ORDER BY p.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(report)
    }

    async fn mark_validated(&self, payment_id: i64) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE recon_log
            SET state = 'validated'
            WHERE payment_id = $1 AND state = 'pending'
            "#,
        )
        .bind(payment_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn counts(&self) -> AppResult<LedgerCounts> {
        let payments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments")
            .fetch_one(&self.pool)
            .await?;

        let by_state = sqlx::query_as::<_, (LogState, i64)>(
            r#"
            SELECT state, COUNT(*)
            FROM recon_log
            GROUP BY state
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let invalid: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invalid_log")
            .fetch_one(&self.pool)
            .await?;

        let mut counts = LedgerCounts {
            payments,
            invalid,
            ..Default::default()
        };
        for (state, count) in by_state {
            match state {
                LogState::Pending => counts.pending = count,
                LogState::Validated => counts.validated = count,
                LogState::Faulty => counts.faulty = count,
            }
        }

        Ok(counts)
    }
}
