//! Mirror-side ingestor.
//!
//! Consumes exported batches from the ingest queue and lands each record
//! in the mirror's payments table plus exactly one of the two logs:
//! the reconciliation log for well-formed records, the invalid-record
//! log for bad IBANs. Every write is insert-if-absent, so redelivered
//! batches resolve as no-ops. A message is acked only after the whole
//! batch has been processed; per-record problems are tallied, never
//! raised past the batch boundary.
//!
//! Two failure simulations are built in: a small random delay per
//! record models processing latency, and a configurable probability
//! silently skips an insertion altogether — no ledger row, no log row.
//! A skipped record is only ever discovered through its absence from
//! the mirror's reports.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use crate::broker::MessageBroker;
use crate::error::AppResult;
use crate::iban;
use crate::ledger::models::{LogState, Payment};
use crate::ledger::store::LedgerStore;
use crate::messages;

/// Per-batch outcome tally.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub invalid_iban: usize,
    pub malformed: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn LedgerStore>,
    broker: Arc<dyn MessageBroker>,
    ingest_queue: String,
    skip_probability: f64,
    simulate_latency: bool,
    poll: Duration,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        broker: Arc<dyn MessageBroker>,
        ingest_queue: String,
        skip_probability: f64,
        simulate_latency: bool,
        poll: Duration,
    ) -> Self {
        Self {
            store,
            broker,
            ingest_queue,
            skip_probability,
            simulate_latency,
            poll,
        }
    }

    /// Start the consumer loop (runs in background)
    pub fn start(&self) -> JoinHandle<()> {
        let ingestor = self.clone();

        tokio::spawn(async move {
            let mut ticker = interval(ingestor.poll);
            loop {
                ticker.tick().await;

                if let Err(e) = ingestor.consume_available().await {
                    error!("❌ Ingest cycle failed: {:?}", e);
                }
            }
        })
    }

    /// Drain and process every ready message on the ingest queue.
    /// Returns the number of messages fully processed and acked.
    pub async fn consume_available(&self) -> AppResult<usize> {
        let mut processed = 0usize;

        while let Some(delivery) = self.broker.get(&self.ingest_queue).await? {
            let records = match messages::decode_batch_lenient(&delivery.payload) {
                Ok(records) => records,
                Err(e) => {
                    // Not even a JSON array. Ack it away rather than
                    // letting the broker redeliver it forever.
                    warn!("⚠️  Discarding undecodable batch message: {}", e);
                    self.broker
                        .ack(&self.ingest_queue, delivery.delivery_tag)
                        .await?;
                    continue;
                }
            };

            let summary = self.ingest(records).await?;
            info!(
                "📥 Ingested batch: {} inserted, {} duplicates, {} invalid IBANs, {} malformed, {} skipped",
                summary.inserted,
                summary.duplicates,
                summary.invalid_iban,
                summary.malformed,
                summary.skipped,
            );

            // All per-record outcomes are durably recorded; only now is
            // the message safe to drop.
            self.broker
                .ack(&self.ingest_queue, delivery.delivery_tag)
                .await?;
            processed += 1;
        }

        Ok(processed)
    }

    /// Process one decoded batch, record by record, in order.
    pub async fn ingest(&self, records: Vec<Result<Payment, Value>>) -> AppResult<IngestSummary> {
        let mut summary = IngestSummary::default();

        for record in records {
            let payment = match record {
                Ok(payment) => payment,
                Err(value) => {
                    // Wrong shape: nothing usable to key a log entry on.
                    warn!("⚠️  Received malformed record: {}", value);
                    summary.malformed += 1;
                    continue;
                }
            };

            if !iban::is_valid(&payment.iban) {
                self.store
                    .insert_invalid_log_if_absent(payment.id, &payment.iban)
                    .await?;
                summary.invalid_iban += 1;
                continue;
            }

            if self.simulate_latency {
                tokio::time::sleep(Self::latency()).await;
            }

            // Simulated internal failure: the record vanishes from this
            // delivery entirely and must surface later via absence from
            // the mirror's reports.
            if rand::random_bool(self.skip_probability) {
                summary.skipped += 1;
                continue;
            }

            if self.store.insert_payment_if_absent(&payment).await? {
                summary.inserted += 1;
            } else {
                summary.duplicates += 1;
            }

            self.store
                .insert_log_if_absent(payment.id, &payment.iban, LogState::Pending)
                .await?;
        }

        Ok(summary)
    }

    /// Mostly 5-25ms, occasionally 50ms.
    fn latency() -> Duration {
        if rand::random_bool(0.95) {
            Duration::from_micros(rand::random_range(5_000..25_000))
        } else {
            Duration::from_millis(50)
        }
    }
}
