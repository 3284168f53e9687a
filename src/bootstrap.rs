use std::{sync::Arc, time::Duration};

use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    broker::{MemoryBroker, MessageBroker},
    config::Config,
    error::AppResult,
    exporter::Exporter,
    ingestor::Ingestor,
    ledger::{models::Side, store::LedgerStore, MemoryLedgerStore, PgLedgerStore},
    reconciler::Reconciler,
    republisher::Republisher,
    responder::ValidationResponder,
    seed,
    server::AppState,
};

/// The wired-up pipeline: the monitoring state plus the background
/// task handles for all five components.
pub struct Pipeline {
    pub state: AppState,
    pub handles: Vec<JoinHandle<()>>,
}

pub async fn initialize_pipeline(config: &Config) -> AppResult<Pipeline> {
    info!("Initializing reconciliation components ...");

    // The broker runs embedded: components still coordinate only
    // through its named queues, never through shared state.
    let broker: Arc<dyn MessageBroker> = Arc::new(MemoryBroker::new());
    for queue in config.queues.all() {
        broker.declare_queue(queue).await?;
    }
    info!("✅ Broker queues declared: {:?}", config.queues.all());

    let (origin, mirror) = initialize_stores(config).await?;

    if config.seed_records > 0 {
        seed::seed_if_empty(&origin, config.seed_records, config.seed_invalid_probability).await?;
    }

    let exporter = Exporter::new(
        origin.clone(),
        broker.clone(),
        config.queues.ingest.clone(),
        config.export_batch_min,
        config.export_batch_max,
        config.export_interval(),
    );

    let ingestor = Ingestor::new(
        mirror.clone(),
        broker.clone(),
        config.queues.ingest.clone(),
        config.insert_skip_probability,
        config.simulate_latency,
        config.consume_poll(),
    );

    let republisher = Republisher::new(
        origin.clone(),
        broker.clone(),
        config.queues.ingest.clone(),
        config.republish_cooldown(),
        config.republish_interval(),
    );

    let origin_responder = ValidationResponder::new(
        Side::Origin,
        origin.clone(),
        broker.clone(),
        config.queues.recon_queue(Side::Origin).to_string(),
        config.queues.report_queue(Side::Origin).to_string(),
        config.consume_poll(),
    );

    let mirror_responder = ValidationResponder::new(
        Side::Mirror,
        mirror.clone(),
        broker.clone(),
        config.queues.recon_queue(Side::Mirror).to_string(),
        config.queues.report_queue(Side::Mirror).to_string(),
        config.consume_poll(),
    );

    let reconciler = Reconciler::new(
        broker.clone(),
        config.queues.clone(),
        config.trigger_interval(),
        config.compare_interval(),
    );

    let handles = vec![
        exporter.start(),
        ingestor.start(),
        republisher.start(),
        origin_responder.start(),
        mirror_responder.start(),
        reconciler.start_trigger(),
        reconciler.start_compare(),
    ];

    info!("✅ Exporter started (every {}s)", config.export_interval_secs);
    info!("✅ Ingestor started (skip probability {})", config.insert_skip_probability);
    info!(
        "✅ Republisher started (every {}s, cool-down {}s)",
        config.republish_interval_secs, config.republish_cooldown_secs
    );
    info!("✅ Validation responders started for both sides");
    info!(
        "✅ Reconciler started (trigger {}s, compare {}s)",
        config.trigger_interval_secs, config.compare_interval_secs
    );

    Ok(Pipeline {
        state: AppState { origin, mirror },
        handles,
    })
}

async fn initialize_stores(
    config: &Config,
) -> AppResult<(Arc<dyn LedgerStore>, Arc<dyn LedgerStore>)> {
    if config.embedded_stores {
        info!("📊 Using embedded in-process stores");
        return Ok((
            Arc::new(MemoryLedgerStore::new()),
            Arc::new(MemoryLedgerStore::new()),
        ));
    }

    let origin_pool = initialize_database(&config.origin_database_url).await?;
    let mirror_pool = initialize_database(&config.mirror_database_url).await?;
    Ok((
        Arc::new(PgLedgerStore::new(origin_pool)),
        Arc::new(PgLedgerStore::new(mirror_pool)),
    ))
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await?;

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::models::{LogState, NewPayment};
    use crate::reconciler::ReportSlots;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    const IBAN: &str = "DE89370400440532013000";

    struct Harness {
        broker: Arc<MemoryBroker>,
        origin: Arc<MemoryLedgerStore>,
        mirror: Arc<MemoryLedgerStore>,
        exporter: Exporter,
        ingestor: Ingestor,
        origin_responder: ValidationResponder,
        mirror_responder: ValidationResponder,
        reconciler: Reconciler,
    }

    async fn harness(skip_probability: f64) -> Harness {
        let queues = crate::config::QueueConfig::default();
        let broker = Arc::new(MemoryBroker::new());
        for queue in queues.all() {
            broker.declare_queue(queue).await.unwrap();
        }

        let origin = Arc::new(MemoryLedgerStore::new());
        let mirror = Arc::new(MemoryLedgerStore::new());
        let poll = Duration::from_millis(10);

        Harness {
            exporter: Exporter::new(
                origin.clone(),
                broker.clone(),
                queues.ingest.clone(),
                100,
                100,
                Duration::from_secs(600),
            ),
            ingestor: Ingestor::new(
                mirror.clone(),
                broker.clone(),
                queues.ingest.clone(),
                skip_probability,
                false,
                poll,
            ),
            origin_responder: ValidationResponder::new(
                Side::Origin,
                origin.clone(),
                broker.clone(),
                queues.origin_recon.clone(),
                queues.origin_reports.clone(),
                poll,
            ),
            mirror_responder: ValidationResponder::new(
                Side::Mirror,
                mirror.clone(),
                broker.clone(),
                queues.mirror_recon.clone(),
                queues.mirror_reports.clone(),
                poll,
            ),
            reconciler: Reconciler::new(
                broker.clone(),
                queues,
                Duration::from_secs(60),
                Duration::from_secs(30),
            ),
            broker,
            origin,
            mirror,
        }
    }

    /// One full protocol round: export, ingest, trigger, report,
    /// compare, confirm, apply.
    async fn run_round(h: &Harness, slots: &mut ReportSlots) -> Option<usize> {
        h.ingestor.consume_available().await.unwrap();
        h.reconciler.trigger_cycle().await.unwrap();
        h.origin_responder.consume_available().await.unwrap();
        h.mirror_responder.consume_available().await.unwrap();
        let matched = h.reconciler.compare_cycle(slots).await.unwrap();
        h.origin_responder.consume_available().await.unwrap();
        h.mirror_responder.consume_available().await.unwrap();
        matched
    }

    #[tokio::test]
    async fn identical_pending_sets_converge_in_one_cycle() {
        let h = harness(0.0).await;
        let mut slots = ReportSlots::default();

        h.origin
            .insert_payments(&[NewPayment {
                amount: dec!(10.00),
                iban: IBAN.to_string(),
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            }])
            .await
            .unwrap();

        assert_eq!(h.exporter.export_batch().await.unwrap(), 1);
        let matched = run_round(&h, &mut slots).await;
        assert_eq!(matched, Some(1));

        assert_eq!(h.origin.log_entry(1).unwrap().state, LogState::Validated);
        assert_eq!(h.mirror.log_entry(1).unwrap().state, LogState::Validated);
        assert_eq!(h.mirror.counts().await.unwrap().payments, 1);
    }

    #[tokio::test]
    async fn dropped_insert_leaves_origin_pending_until_recovered() {
        // Skip probability 1: the mirror drops every insert, so it has
        // nothing to report and nothing may ever be confirmed.
        let h = harness(1.0).await;
        let mut slots = ReportSlots::default();

        h.origin
            .insert_payments(&[NewPayment {
                amount: dec!(10.00),
                iban: IBAN.to_string(),
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            }])
            .await
            .unwrap();

        h.exporter.export_batch().await.unwrap();
        let matched = run_round(&h, &mut slots).await;
        assert_eq!(matched, None);

        assert_eq!(h.origin.log_entry(1).unwrap().state, LogState::Pending);
        assert!(h.mirror.log_entry(1).is_none());

        // Recovery path: the republisher pushes the stale record back
        // through ingestion once the mirror stops failing.
        let republisher = Republisher::new(
            h.origin.clone(),
            h.broker.clone(),
            "payments.ingest".to_string(),
            chrono::Duration::seconds(-1),
            Duration::from_secs(60),
        );
        assert_eq!(republisher.republish_stale().await.unwrap(), 1);

        let healthy_ingestor = Ingestor::new(
            h.mirror.clone(),
            h.broker.clone(),
            "payments.ingest".to_string(),
            0.0,
            false,
            Duration::from_millis(10),
        );
        healthy_ingestor.consume_available().await.unwrap();

        h.reconciler.trigger_cycle().await.unwrap();
        h.origin_responder.consume_available().await.unwrap();
        h.mirror_responder.consume_available().await.unwrap();
        assert_eq!(
            h.reconciler.compare_cycle(&mut slots).await.unwrap(),
            Some(1)
        );
        h.origin_responder.consume_available().await.unwrap();
        h.mirror_responder.consume_available().await.unwrap();

        assert_eq!(h.origin.log_entry(1).unwrap().state, LogState::Validated);
        assert_eq!(h.mirror.log_entry(1).unwrap().state, LogState::Validated);
    }

    #[tokio::test]
    async fn invalid_iban_stays_out_of_every_report() {
        let h = harness(0.0).await;
        let mut slots = ReportSlots::default();

        h.origin
            .insert_payments(&[
                NewPayment {
                    amount: dec!(10.00),
                    iban: IBAN.to_string(),
                    date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                },
                NewPayment {
                    amount: dec!(99.00),
                    iban: "DE00000000000000000000".to_string(),
                    date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                },
            ])
            .await
            .unwrap();

        h.exporter.export_batch().await.unwrap();
        let matched = run_round(&h, &mut slots).await;

        // Only the valid record converges; the invalid one sits in the
        // mirror's invalid log and is faulty on the origin, so it is
        // excluded from reports and from republishing alike.
        assert_eq!(matched, Some(1));
        assert_eq!(h.origin.log_entry(1).unwrap().state, LogState::Validated);
        assert_eq!(h.origin.log_entry(2).unwrap().state, LogState::Faulty);
        assert!(h.mirror.log_entry(2).is_none());
        assert!(h.mirror.invalid_entry(2).is_some());
    }

    #[tokio::test]
    async fn double_delivery_of_a_batch_converges_to_single_rows() {
        let h = harness(0.0).await;
        let mut slots = ReportSlots::default();

        h.origin
            .insert_payments(&[NewPayment {
                amount: dec!(5.00),
                iban: IBAN.to_string(),
                date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            }])
            .await
            .unwrap();

        h.exporter.export_batch().await.unwrap();

        // Duplicate the in-flight batch message before consumption.
        let delivery = h.broker.get("payments.ingest").await.unwrap().unwrap();
        h.broker
            .publish("payments.ingest", delivery.payload.clone())
            .await
            .unwrap();
        h.broker
            .publish("payments.ingest", delivery.payload)
            .await
            .unwrap();
        h.broker
            .ack("payments.ingest", delivery.delivery_tag)
            .await
            .unwrap();

        let matched = run_round(&h, &mut slots).await;
        assert_eq!(matched, Some(1));

        let counts = h.mirror.counts().await.unwrap();
        assert_eq!(counts.payments, 1);
        assert_eq!(counts.validated, 1);
        assert_eq!(counts.pending, 0);

        // Once validated, a fresh trigger produces no report at all.
        h.reconciler.trigger_cycle().await.unwrap();
        h.origin_responder.consume_available().await.unwrap();
        assert_eq!(h.broker.ready_len("reports.origin"), 0);
    }
}
