use std::str::FromStr;
use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;

use crate::ledger::models::Side;

/// Runtime configuration, sourced from the environment with defaults that
/// match the reference deployment.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub origin_database_url: String,
    pub mirror_database_url: String,
    pub bind_address: String,

    /// Run against in-process stores instead of Postgres. Useful for
    /// demos and smoke runs where no databases are provisioned; the
    /// protocol behaves identically either way.
    pub embedded_stores: bool,

    /// Seconds between export cycles on the origin.
    pub export_interval_secs: u64,
    /// Bounds for the randomly sized export batch.
    pub export_batch_min: i64,
    pub export_batch_max: i64,

    /// Seconds between anti-entropy republish cycles.
    pub republish_interval_secs: u64,
    /// Minimum age of a pending log entry before it is eligible for
    /// republishing. Must stay strictly above both reconciler intervals,
    /// otherwise the republisher races entries that are still in flight.
    pub republish_cooldown_secs: u64,

    /// Seconds between reconciler trigger broadcasts.
    pub trigger_interval_secs: u64,
    /// Seconds between reconciler compare cycles.
    pub compare_interval_secs: u64,

    /// Polling cadence for queue consumers, in milliseconds.
    pub consume_poll_ms: u64,

    /// Probability that the ingestor silently skips an insertion,
    /// simulating an internal processing failure.
    pub insert_skip_probability: f64,
    /// Whether the ingestor sleeps a few milliseconds per record to
    /// simulate processing latency.
    pub simulate_latency: bool,

    /// Number of synthetic payments to seed into an empty origin ledger.
    pub seed_records: u32,
    /// Probability that a seeded payment gets corrupted check digits.
    pub seed_invalid_probability: f64,

    pub queues: QueueConfig,
}

/// Queue topology. One ingest queue, plus a reconciliation queue and a
/// report queue per side. Trigger and confirmation messages share the
/// reconciliation queue and are told apart by payload shape.
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    pub ingest: String,
    pub origin_recon: String,
    pub mirror_recon: String,
    pub origin_reports: String,
    pub mirror_reports: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            ingest: "payments.ingest".to_string(),
            origin_recon: "recon.origin".to_string(),
            mirror_recon: "recon.mirror".to_string(),
            origin_reports: "reports.origin".to_string(),
            mirror_reports: "reports.mirror".to_string(),
        }
    }
}

impl QueueConfig {
    pub fn recon_queue(&self, side: Side) -> &str {
        match side {
            Side::Origin => &self.origin_recon,
            Side::Mirror => &self.mirror_recon,
        }
    }

    pub fn report_queue(&self, side: Side) -> &str {
        match side {
            Side::Origin => &self.origin_reports,
            Side::Mirror => &self.mirror_reports,
        }
    }

    pub fn all(&self) -> [&str; 5] {
        [
            &self.ingest,
            &self.origin_recon,
            &self.mirror_recon,
            &self.origin_reports,
            &self.mirror_reports,
        ]
    }
}

fn env_parsed<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::Message(format!("invalid value for {}: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            origin_database_url: std::env::var("ORIGIN_DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/origin".to_string()),
            mirror_database_url: std::env::var("MIRROR_DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/mirror".to_string()),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            embedded_stores: env_parsed("EMBEDDED_STORES", false)?,
            export_interval_secs: env_parsed("EXPORT_INTERVAL_SECS", 600)?,
            export_batch_min: env_parsed("EXPORT_BATCH_MIN", 1_000)?,
            export_batch_max: env_parsed("EXPORT_BATCH_MAX", 10_000)?,
            republish_interval_secs: env_parsed("REPUBLISH_INTERVAL_SECS", 60)?,
            republish_cooldown_secs: env_parsed("REPUBLISH_COOLDOWN_SECS", 120)?,
            trigger_interval_secs: env_parsed("TRIGGER_INTERVAL_SECS", 60)?,
            compare_interval_secs: env_parsed("COMPARE_INTERVAL_SECS", 30)?,
            consume_poll_ms: env_parsed("CONSUME_POLL_MS", 500)?,
            insert_skip_probability: env_parsed("INSERT_SKIP_PROBABILITY", 0.001)?,
            simulate_latency: env_parsed("SIMULATE_LATENCY", true)?,
            seed_records: env_parsed("SEED_RECORDS", 30_000)?,
            seed_invalid_probability: env_parsed("SEED_INVALID_PROBABILITY", 0.001)?,
            queues: QueueConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Enforce the interval invariants the protocol depends on. These are
    /// configuration constraints, not timing luck.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.republish_cooldown_secs <= self.trigger_interval_secs {
            return Err(ConfigError::Message(format!(
                "republish cool-down ({}s) must exceed the trigger interval ({}s)",
                self.republish_cooldown_secs, self.trigger_interval_secs
            )));
        }
        if self.republish_cooldown_secs <= self.compare_interval_secs {
            return Err(ConfigError::Message(format!(
                "republish cool-down ({}s) must exceed the compare interval ({}s)",
                self.republish_cooldown_secs, self.compare_interval_secs
            )));
        }
        if self.export_batch_min < 1 || self.export_batch_min > self.export_batch_max {
            return Err(ConfigError::Message(format!(
                "invalid export batch range: {}..{}",
                self.export_batch_min, self.export_batch_max
            )));
        }
        for (name, p) in [
            ("INSERT_SKIP_PROBABILITY", self.insert_skip_probability),
            ("SEED_INVALID_PROBABILITY", self.seed_invalid_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::Message(format!(
                    "{} must be within [0, 1], got {}",
                    name, p
                )));
            }
        }
        Ok(())
    }

    pub fn export_interval(&self) -> Duration {
        Duration::from_secs(self.export_interval_secs)
    }

    pub fn republish_interval(&self) -> Duration {
        Duration::from_secs(self.republish_interval_secs)
    }

    pub fn republish_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.republish_cooldown_secs as i64)
    }

    pub fn trigger_interval(&self) -> Duration {
        Duration::from_secs(self.trigger_interval_secs)
    }

    pub fn compare_interval(&self) -> Duration {
        Duration::from_secs(self.compare_interval_secs)
    }

    pub fn consume_poll(&self) -> Duration {
        Duration::from_millis(self.consume_poll_ms)
    }
}
