use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use sqlx::Type;

/// Which of the two autonomous ledgers a component works against.
/// The origin is the source of truth for payment facts; the mirror
/// independently ingests copies of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Origin,
    Mirror,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Origin => "origin",
            Side::Mirror => "mirror",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable payment fact. Originated only by the origin ledger,
/// uniquely identified by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: i64,
    pub amount: Decimal,
    pub iban: String,
    pub date: NaiveDate,
}

/// A payment before the origin ledger has assigned it an id.
/// Only the synthetic seeder produces these.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub amount: Decimal,
    pub iban: String,
    pub date: NaiveDate,
}

/// Lifecycle state of a reconciliation log entry. An entry is created
/// `pending` and transitions at most once; it never reverts and is
/// never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "log_state", rename_all = "lowercase")]
pub enum LogState {
    Pending,
    Validated,
    Faulty,
}

impl LogState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogState::Pending => "pending",
            LogState::Validated => "validated",
            LogState::Faulty => "faulty",
        }
    }
}

impl fmt::Display for LogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of a ledger's reconciliation log (or of the mirror's
/// invalid-record log, which shares the shape). `payment_id` is unique
/// within a log: duplicate insert attempts are no-ops, not new rows.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LogEntry {
    pub payment_id: i64,
    pub iban: String,
    pub state: LogState,
    pub inserted_at: DateTime<Utc>,
}

/// Aggregate counts reported by the monitoring endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerCounts {
    pub payments: i64,
    pub pending: i64,
    pub validated: i64,
    pub faulty: i64,
    pub invalid: i64,
}
