//! Per-side validation trigger/responder.
//!
//! One instance runs for each ledger. It consumes that side's
//! reconciliation queue, where two message kinds share the channel and
//! are told apart by payload shape: an empty body is the reconciler's
//! trigger and makes the side report its pending backlog; a non-empty
//! body is the reconciler's confirmed match set and makes the side
//! flip those log entries to `validated`.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use crate::broker::MessageBroker;
use crate::error::AppResult;
use crate::ledger::models::{Payment, Side};
use crate::ledger::store::LedgerStore;
use crate::messages::{self, ReconMessage};

#[derive(Clone)]
pub struct ValidationResponder {
    side: Side,
    store: Arc<dyn LedgerStore>,
    broker: Arc<dyn MessageBroker>,
    recon_queue: String,
    report_queue: String,
    poll: Duration,
}

impl ValidationResponder {
    pub fn new(
        side: Side,
        store: Arc<dyn LedgerStore>,
        broker: Arc<dyn MessageBroker>,
        recon_queue: String,
        report_queue: String,
        poll: Duration,
    ) -> Self {
        Self {
            side,
            store,
            broker,
            recon_queue,
            report_queue,
            poll,
        }
    }

    /// Start the consumer loop (runs in background)
    pub fn start(&self) -> JoinHandle<()> {
        let responder = self.clone();

        tokio::spawn(async move {
            let mut ticker = interval(responder.poll);
            loop {
                ticker.tick().await;

                if let Err(e) = responder.consume_available().await {
                    error!("❌ {} responder cycle failed: {:?}", responder.side, e);
                }
            }
        })
    }

    /// Drain and dispatch every ready message on this side's
    /// reconciliation queue.
    pub async fn consume_available(&self) -> AppResult<usize> {
        let mut processed = 0usize;

        while let Some(delivery) = self.broker.get(&self.recon_queue).await? {
            match ReconMessage::parse(&delivery.payload) {
                Ok(ReconMessage::Trigger) => {
                    let reported = self.report_pending().await?;
                    if reported > 0 {
                        info!("📋 {} reported {} pending entries", self.side, reported);
                    }
                }
                Ok(ReconMessage::Confirm(rows)) => {
                    let updated = self.apply_confirmation(&rows).await?;
                    info!(
                        "✅ {} validated {} of {} confirmed entries",
                        self.side,
                        updated,
                        rows.len()
                    );
                }
                Err(e) => {
                    warn!("⚠️  {} discarding undecodable message: {}", self.side, e);
                }
            }

            self.broker
                .ack(&self.recon_queue, delivery.delivery_tag)
                .await?;
            processed += 1;
        }

        Ok(processed)
    }

    /// Report mode: publish the pending backlog, joined against the
    /// payments table. An empty backlog publishes nothing at all.
    pub async fn report_pending(&self) -> AppResult<usize> {
        let report = self.store.pending_report().await?;
        if report.is_empty() {
            return Ok(0);
        }

        let payload = messages::encode_rows(&report)?;
        self.broker.publish(&self.report_queue, payload).await?;
        Ok(report.len())
    }

    /// Apply mode: mark every confirmed payment id validated. Unknown
    /// and already-validated ids are no-ops, which makes redelivered
    /// confirmations harmless.
    pub async fn apply_confirmation(&self, rows: &[Payment]) -> AppResult<usize> {
        let mut updated = 0usize;
        for row in rows {
            if self.store.mark_validated(row.id).await? {
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::ledger::models::LogState;
    use crate::ledger::{LedgerStore, MemoryLedgerStore};
    use crate::messages::TRIGGER;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    const IBAN: &str = "DE89370400440532013000";

    fn payment(id: i64) -> Payment {
        Payment {
            id,
            amount: dec!(10.00),
            iban: IBAN.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        }
    }

    async fn responder_with_store() -> (ValidationResponder, Arc<MemoryLedgerStore>, Arc<MemoryBroker>) {
        let store = Arc::new(MemoryLedgerStore::new());
        let broker = Arc::new(MemoryBroker::new());
        broker.declare_queue("recon.mirror").await.unwrap();
        broker.declare_queue("reports.mirror").await.unwrap();

        let responder = ValidationResponder::new(
            Side::Mirror,
            store.clone(),
            broker.clone(),
            "recon.mirror".to_string(),
            "reports.mirror".to_string(),
            Duration::from_millis(10),
        );
        (responder, store, broker)
    }

    #[tokio::test]
    async fn trigger_publishes_the_pending_backlog() {
        let (responder, store, broker) = responder_with_store().await;

        let p = payment(1);
        store.insert_payment_if_absent(&p).await.unwrap();
        store
            .insert_log_if_absent(1, IBAN, LogState::Pending)
            .await
            .unwrap();

        broker.publish("recon.mirror", TRIGGER.to_vec()).await.unwrap();
        assert_eq!(responder.consume_available().await.unwrap(), 1);

        let delivery = broker.get("reports.mirror").await.unwrap().unwrap();
        assert_eq!(messages::decode_rows(&delivery.payload).unwrap(), vec![p]);
    }

    #[tokio::test]
    async fn empty_backlog_publishes_no_report() {
        let (responder, _store, broker) = responder_with_store().await;

        broker.publish("recon.mirror", TRIGGER.to_vec()).await.unwrap();
        assert_eq!(responder.consume_available().await.unwrap(), 1);

        assert_eq!(broker.ready_len("reports.mirror"), 0);
    }

    #[tokio::test]
    async fn invalid_log_records_never_appear_in_reports() {
        let (responder, store, broker) = responder_with_store().await;

        store
            .insert_invalid_log_if_absent(9, "DE00000000000000000000")
            .await
            .unwrap();

        broker.publish("recon.mirror", TRIGGER.to_vec()).await.unwrap();
        responder.consume_available().await.unwrap();

        assert_eq!(broker.ready_len("reports.mirror"), 0);
    }

    #[tokio::test]
    async fn confirmation_marks_entries_validated() {
        let (responder, store, broker) = responder_with_store().await;

        let p = payment(1);
        store.insert_payment_if_absent(&p).await.unwrap();
        store
            .insert_log_if_absent(1, IBAN, LogState::Pending)
            .await
            .unwrap();

        let payload = messages::encode_rows(&[p]).unwrap();
        broker.publish("recon.mirror", payload).await.unwrap();
        responder.consume_available().await.unwrap();

        assert_eq!(store.log_entry(1).unwrap().state, LogState::Validated);
    }

    #[tokio::test]
    async fn confirmation_is_a_noop_for_unknown_and_settled_ids() {
        let (responder, store, _broker) = responder_with_store().await;

        store
            .insert_log_if_absent(1, IBAN, LogState::Validated)
            .await
            .unwrap();

        let updated = responder
            .apply_confirmation(&[payment(1), payment(404)])
            .await
            .unwrap();
        assert_eq!(updated, 0);
    }

    #[tokio::test]
    async fn redelivered_confirmation_is_harmless() {
        let (responder, store, _broker) = responder_with_store().await;

        let p = payment(1);
        store.insert_payment_if_absent(&p).await.unwrap();
        store
            .insert_log_if_absent(1, IBAN, LogState::Pending)
            .await
            .unwrap();

        assert_eq!(responder.apply_confirmation(&[p.clone()]).await.unwrap(), 1);
        assert_eq!(responder.apply_confirmation(&[p]).await.unwrap(), 0);
        assert_eq!(store.log_entry(1).unwrap().state, LogState::Validated);
    }
}
