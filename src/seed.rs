//! Synthetic data generator for the origin ledger.
//!
//! Fills an empty origin payments table with random payment facts so
//! the pipeline has something to reconcile. A small fraction of the
//! generated IBANs get their check digits corrupted to `00`, which the
//! mirror will reject at ingestion and the origin will mark faulty at
//! export.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use crate::error::AppResult;
use crate::iban;
use crate::ledger::models::NewPayment;
use crate::ledger::store::LedgerStore;

/// Generate `count` random payments. Each IBAN is corrupted with the
/// given probability; a corrupted IBAN is guaranteed to fail the
/// mod-97 check.
pub fn generate_payments(count: u32, invalid_probability: f64) -> Vec<NewPayment> {
    (0..count)
        .map(|_| {
            let cents: i64 = rand::random_range(100..=100_000);
            let days_ago: i64 = rand::random_range(0..=365);
            let iban = if rand::random_bool(invalid_probability) {
                corrupted_iban()
            } else {
                random_iban()
            };

            NewPayment {
                amount: Decimal::new(cents, 2),
                iban,
                date: (Utc::now() - Duration::days(days_ago)).date_naive(),
            }
        })
        .collect()
}

/// Seed the store when its payments table is empty. Returns the number
/// of rows inserted (zero when data already exists).
pub async fn seed_if_empty(
    store: &Arc<dyn LedgerStore>,
    count: u32,
    invalid_probability: f64,
) -> AppResult<u64> {
    if store.counts().await?.payments > 0 {
        info!("📦 Origin ledger already has payments, skipping seed");
        return Ok(0);
    }

    let rows = generate_payments(count, invalid_probability);
    let inserted = store.insert_payments(&rows).await?;
    info!("🌱 Seeded {} synthetic payments into the origin ledger", inserted);
    Ok(inserted)
}

fn random_bban() -> String {
    let bank: u32 = rand::random_range(10_000_000..100_000_000);
    let account: u64 = rand::random_range(1_000_000_000..10_000_000_000);
    format!("{:08}{:010}", bank, account)
}

/// A German IBAN with correct check digits. Check digit value 97 is
/// skipped so that the `00` corruption below can never validate.
fn random_iban() -> String {
    loop {
        let bban = random_bban();
        let digits = iban::check_digits("DE", &bban);
        if digits != 97 {
            return format!("DE{:02}{}", digits, bban);
        }
    }
}

fn corrupted_iban() -> String {
    let valid = random_iban();
    format!("DE00{}", &valid[4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ibans_validate() {
        for payment in generate_payments(50, 0.0) {
            assert!(iban::is_valid(&payment.iban), "bad IBAN: {}", payment.iban);
        }
    }

    #[test]
    fn corrupted_ibans_never_validate() {
        for payment in generate_payments(50, 1.0) {
            assert!(!iban::is_valid(&payment.iban), "IBAN slipped through: {}", payment.iban);
            assert!(payment.iban.starts_with("DE00"));
        }
    }

    #[test]
    fn amounts_and_dates_are_in_range() {
        let today = Utc::now().date_naive();
        let floor = today - chrono::Days::new(366);
        for payment in generate_payments(50, 0.0) {
            assert!(payment.amount >= Decimal::new(100, 2));
            assert!(payment.amount <= Decimal::new(100_000, 2));
            assert!(payment.date <= today);
            assert!(payment.date >= floor);
        }
    }

    #[tokio::test]
    async fn seeding_is_skipped_when_data_exists() {
        let store: Arc<dyn LedgerStore> = Arc::new(crate::ledger::MemoryLedgerStore::new());

        assert_eq!(seed_if_empty(&store, 10, 0.0).await.unwrap(), 10);
        assert_eq!(seed_if_empty(&store, 10, 0.0).await.unwrap(), 0);
        assert_eq!(store.counts().await.unwrap().payments, 10);
    }
}
