//! Origin-side exporter.
//!
//! On every tick it pulls a randomly sized batch of payments that have
//! never been exported (no reconciliation-log entry), writes a log entry
//! per payment, and publishes the batch as one message on the ingest
//! queue. The origin validates IBANs once, here: a payment with bad
//! check digits gets a `faulty` log entry and is thereby excluded from
//! republishing, though it still travels to the mirror in the batch.
//!
//! Log insert and publish are not atomic. A crash between the two
//! leaves entries pending with no message in flight; the anti-entropy
//! republisher picks those up after the cool-down.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use crate::broker::MessageBroker;
use crate::error::AppResult;
use crate::iban;
use crate::ledger::models::LogState;
use crate::ledger::store::LedgerStore;
use crate::messages;

#[derive(Clone)]
pub struct Exporter {
    store: Arc<dyn LedgerStore>,
    broker: Arc<dyn MessageBroker>,
    ingest_queue: String,
    batch_min: i64,
    batch_max: i64,
    export_interval: Duration,
}

impl Exporter {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        broker: Arc<dyn MessageBroker>,
        ingest_queue: String,
        batch_min: i64,
        batch_max: i64,
        export_interval: Duration,
    ) -> Self {
        Self {
            store,
            broker,
            ingest_queue,
            batch_min,
            batch_max,
            export_interval,
        }
    }

    /// Start the export loop (runs in background)
    pub fn start(&self) -> JoinHandle<()> {
        let exporter = self.clone();

        tokio::spawn(async move {
            let mut ticker = interval(exporter.export_interval);
            loop {
                ticker.tick().await;

                match exporter.export_batch().await {
                    Ok(0) => info!("📭 No unexported payments on the origin"),
                    Ok(count) => info!("📤 Exported {} payments to the ingest queue", count),
                    Err(e) => error!("❌ Export cycle failed: {:?}", e),
                }
            }
        })
    }

    /// Export one batch. Returns the number of payments published.
    pub async fn export_batch(&self) -> AppResult<usize> {
        let batch_size = rand::random_range(self.batch_min..=self.batch_max);
        let batch = self.store.fetch_unlogged_payments(batch_size).await?;

        if batch.is_empty() {
            return Ok(0);
        }

        let mut faulty = 0usize;
        for payment in &batch {
            let state = if iban::is_valid(&payment.iban) {
                LogState::Pending
            } else {
                faulty += 1;
                LogState::Faulty
            };
            self.store
                .insert_log_if_absent(payment.id, &payment.iban, state)
                .await?;
        }

        if faulty > 0 {
            info!("⚠️  Marked {} exported payments faulty (bad IBAN)", faulty);
        }

        let payload = messages::encode_rows(&batch)?;
        self.broker.publish(&self.ingest_queue, payload).await?;

        Ok(batch.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::ledger::models::NewPayment;
    use crate::ledger::MemoryLedgerStore;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn new_payment(iban: &str) -> NewPayment {
        NewPayment {
            amount: dec!(10.00),
            iban: iban.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        }
    }

    fn exporter(store: Arc<MemoryLedgerStore>, broker: Arc<MemoryBroker>) -> Exporter {
        Exporter::new(
            store,
            broker,
            "ingest".to_string(),
            100,
            100,
            Duration::from_secs(600),
        )
    }

    #[tokio::test]
    async fn export_logs_and_publishes_one_message() {
        let store = Arc::new(MemoryLedgerStore::new());
        let broker = Arc::new(MemoryBroker::new());
        broker.declare_queue("ingest").await.unwrap();

        store
            .insert_payments(&[
                new_payment("DE89370400440532013000"),
                new_payment("GB82WEST12345698765432"),
            ])
            .await
            .unwrap();

        let exporter = exporter(store.clone(), broker.clone());
        assert_eq!(exporter.export_batch().await.unwrap(), 2);

        assert_eq!(store.log_entry(1).unwrap().state, LogState::Pending);
        assert_eq!(store.log_entry(2).unwrap().state, LogState::Pending);
        assert_eq!(broker.ready_len("ingest"), 1);

        let delivery = broker.get("ingest").await.unwrap().unwrap();
        let rows = messages::decode_rows(&delivery.payload).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn invalid_iban_is_logged_faulty_but_still_published() {
        let store = Arc::new(MemoryLedgerStore::new());
        let broker = Arc::new(MemoryBroker::new());
        broker.declare_queue("ingest").await.unwrap();

        store
            .insert_payments(&[new_payment("DE00000000000000000000")])
            .await
            .unwrap();

        let exporter = exporter(store.clone(), broker.clone());
        assert_eq!(exporter.export_batch().await.unwrap(), 1);

        assert_eq!(store.log_entry(1).unwrap().state, LogState::Faulty);
        assert_eq!(broker.ready_len("ingest"), 1);
    }

    #[tokio::test]
    async fn second_export_skips_already_logged_payments() {
        let store = Arc::new(MemoryLedgerStore::new());
        let broker = Arc::new(MemoryBroker::new());
        broker.declare_queue("ingest").await.unwrap();

        store
            .insert_payments(&[new_payment("DE89370400440532013000")])
            .await
            .unwrap();

        let exporter = exporter(store.clone(), broker.clone());
        assert_eq!(exporter.export_batch().await.unwrap(), 1);
        assert_eq!(exporter.export_batch().await.unwrap(), 0);
        assert_eq!(broker.ready_len("ingest"), 1);
    }
}
