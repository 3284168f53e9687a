//! The reconciler: cross-checks both ledgers' pending backlogs.
//!
//! Two independent halves share nothing but the broker. The trigger
//! half broadcasts an empty message to both sides on a fixed interval;
//! the compare half polls both report queues, keeps only the latest
//! report per side in a two-slot buffer, and once both slots are
//! filled computes the match set and publishes it back to both sides
//! as the confirmation.
//!
//! Matching is a hash-join keyed by payment id with full-tuple
//! verification: two rows match only when id, amount, iban and date
//! are all equal. A record present in only one report never matches
//! and never transitions state anywhere.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use crate::broker::MessageBroker;
use crate::config::QueueConfig;
use crate::error::AppResult;
use crate::ledger::models::{Payment, Side};
use crate::messages::{self, TRIGGER};

/// The compare half's only state: one slot per side, each overwritten
/// by that side's latest report. Matching requires both slots filled
/// and consumes them, so a stale report is never matched twice.
#[derive(Default)]
pub struct ReportSlots {
    origin: Option<Vec<Payment>>,
    mirror: Option<Vec<Payment>>,
}

impl ReportSlots {
    pub fn store(&mut self, side: Side, report: Vec<Payment>) {
        match side {
            Side::Origin => self.origin = Some(report),
            Side::Mirror => self.mirror = Some(report),
        }
    }

    pub fn both_filled(&self) -> bool {
        self.origin.is_some() && self.mirror.is_some()
    }

    /// When both slots are filled, compute the match set and clear
    /// both slots. Returns `None` while a side is still missing.
    pub fn compare(&mut self) -> Option<Vec<Payment>> {
        if !self.both_filled() {
            return None;
        }
        let origin = self.origin.take()?;
        let mirror = self.mirror.take()?;
        Some(match_reports(&origin, &mirror))
    }
}

/// Rows present identically in both reports, in origin report order.
pub fn match_reports(origin: &[Payment], mirror: &[Payment]) -> Vec<Payment> {
    let by_id: HashMap<i64, &Payment> = mirror.iter().map(|p| (p.id, p)).collect();

    origin
        .iter()
        .filter(|row| by_id.get(&row.id).is_some_and(|other| *other == *row))
        .cloned()
        .collect()
}

#[derive(Clone)]
pub struct Reconciler {
    broker: Arc<dyn MessageBroker>,
    queues: QueueConfig,
    trigger_interval: Duration,
    compare_interval: Duration,
}

impl Reconciler {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        queues: QueueConfig,
        trigger_interval: Duration,
        compare_interval: Duration,
    ) -> Self {
        Self {
            broker,
            queues,
            trigger_interval,
            compare_interval,
        }
    }

    /// Start the trigger half (runs in background)
    pub fn start_trigger(&self) -> JoinHandle<()> {
        let reconciler = self.clone();

        tokio::spawn(async move {
            let mut ticker = interval(reconciler.trigger_interval);
            loop {
                ticker.tick().await;

                match reconciler.trigger_cycle().await {
                    Ok(()) => info!("🔔 Triggered both sides to report"),
                    Err(e) => error!("❌ Trigger cycle failed: {:?}", e),
                }
            }
        })
    }

    /// Start the compare half (runs in background). The report slots
    /// live inside the task; nothing else ever sees them.
    pub fn start_compare(&self) -> JoinHandle<()> {
        let reconciler = self.clone();

        tokio::spawn(async move {
            let mut slots = ReportSlots::default();
            let mut ticker = interval(reconciler.compare_interval);
            loop {
                ticker.tick().await;

                match reconciler.compare_cycle(&mut slots).await {
                    Ok(Some(matched)) => {
                        info!("🤝 Confirmed {} matched records to both sides", matched)
                    }
                    Ok(None) => {}
                    Err(e) => error!("❌ Compare cycle failed: {:?}", e),
                }
            }
        })
    }

    /// Publish an empty trigger to both sides' reconciliation queues.
    pub async fn trigger_cycle(&self) -> AppResult<()> {
        for side in [Side::Origin, Side::Mirror] {
            self.broker
                .publish(self.queues.recon_queue(side), TRIGGER.to_vec())
                .await?;
        }
        Ok(())
    }

    /// One compare cycle: drain at most one report per side, then match
    /// if both slots are filled. Returns the size of the published match
    /// set, or `None` when no confirmation went out.
    pub async fn compare_cycle(&self, slots: &mut ReportSlots) -> AppResult<Option<usize>> {
        for side in [Side::Origin, Side::Mirror] {
            let queue = self.queues.report_queue(side);
            if let Some(delivery) = self.broker.get(queue).await? {
                let report = messages::decode_rows(&delivery.payload)?;
                info!("📨 Received {} rows from the {}", report.len(), side);
                if !report.is_empty() {
                    slots.store(side, report);
                }
                self.broker.ack(queue, delivery.delivery_tag).await?;
            }
        }

        let Some(matches) = slots.compare() else {
            return Ok(None);
        };

        if matches.is_empty() {
            return Ok(None);
        }

        let payload = messages::encode_rows(&matches)?;
        for side in [Side::Origin, Side::Mirror] {
            self.broker
                .publish(self.queues.recon_queue(side), payload.clone())
                .await?;
        }

        Ok(Some(matches.len()))
    }
}
