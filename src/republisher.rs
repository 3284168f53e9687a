//! Origin-side anti-entropy republisher.
//!
//! Loss recovery, not a distribution path: any origin log entry still
//! `pending` after the cool-down window has either had its batch lost
//! in transit or been dropped by the ingestor's simulated failure, so
//! its full record is fetched back from the payments table and pushed
//! through the ingest queue again. The ingestor's insert-if-absent
//! rules make redundant re-ingestion safe. Log state is never touched
//! here.
//!
//! The cool-down must stay strictly above the reconciler's intervals
//! (enforced by `Config::validate`); otherwise entries that are merely
//! in flight through a live report/confirm cycle get republished too.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use crate::broker::MessageBroker;
use crate::error::AppResult;
use crate::ledger::models::LogEntry;
use crate::ledger::store::LedgerStore;
use crate::messages;

#[derive(Clone)]
pub struct Republisher {
    store: Arc<dyn LedgerStore>,
    broker: Arc<dyn MessageBroker>,
    ingest_queue: String,
    cooldown: chrono::Duration,
    republish_interval: Duration,
}

impl Republisher {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        broker: Arc<dyn MessageBroker>,
        ingest_queue: String,
        cooldown: chrono::Duration,
        republish_interval: Duration,
    ) -> Self {
        Self {
            store,
            broker,
            ingest_queue,
            cooldown,
            republish_interval,
        }
    }

    /// Start the republish loop (runs in background)
    pub fn start(&self) -> JoinHandle<()> {
        let republisher = self.clone();

        tokio::spawn(async move {
            let mut ticker = interval(republisher.republish_interval);
            loop {
                ticker.tick().await;

                match republisher.republish_stale().await {
                    Ok(0) => {}
                    Ok(count) => info!("🔁 Republished {} stale payments", count),
                    Err(e) => error!("❌ Republish cycle failed: {:?}", e),
                }
            }
        })
    }

    /// Republish every pending log entry older than the cool-down.
    /// Returns the number of payments republished.
    pub async fn republish_stale(&self) -> AppResult<usize> {
        let pending = self.store.pending_log_entries().await?;
        let stale_ids = stale_ids(&pending, self.cooldown, Utc::now());

        if stale_ids.is_empty() {
            return Ok(0);
        }

        let payments = self.store.fetch_payments_by_ids(&stale_ids).await?;
        if payments.is_empty() {
            return Ok(0);
        }

        let payload = messages::encode_rows(&payments)?;
        self.broker.publish(&self.ingest_queue, payload).await?;

        Ok(payments.len())
    }
}

/// Ids of pending entries that have sat in the log longer than the
/// cool-down window. Entries younger than the window are still within
/// a normal report/confirm round trip and must be left alone.
fn stale_ids(pending: &[LogEntry], cooldown: chrono::Duration, now: DateTime<Utc>) -> Vec<i64> {
    pending
        .iter()
        .filter(|entry| now - entry.inserted_at > cooldown)
        .map(|entry| entry.payment_id)
        .collect()
}
